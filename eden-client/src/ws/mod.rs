//! WebSocket transport
//!
//! [`WsClient`] owns the socket and its request bookkeeping; `ws_link`
//! adapts it to the link chain.

mod client;
mod connection_state;
mod reconnect;
mod request_manager;

pub use client::{KeepAliveOptions, LazyOptions, OnClose, OnOpen, WsClient, WsClientOptions};
pub use connection_state::ConnectionManager;
pub use reconnect::{CustomDelay, ExponentialBackoff, FixedDelay, NoReconnect, ReconnectionStrategy};
pub use request_manager::{RequestEntry, RequestManager, RequestState};
