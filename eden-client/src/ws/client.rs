//! WebSocket client
//!
//! One `WsClient` owns one physical socket. Requests issued through
//! [`WsClient::request`] are registered with the request manager, grouped
//! with every other request made before the current task yields, and written
//! to the socket as one frame once it is open.
//!
//! # Lifecycle
//!
//! 1. **Connect**: immediately for a non-lazy client, on the first request
//!    for a lazy one
//! 2. **Flush**: outstanding requests are (re)sent whenever a socket opens
//! 3. **Reconnect**: a close, a socket error or a keep-alive timeout moves
//!    the client to `Connecting`, fails outstanding queries and mutations,
//!    and retries after the delay the reconnection strategy picks
//! 4. **Idle**: a lazy client closes its socket after `close_ms` without
//!    outstanding requests
//! 5. **Close**: [`WsClient::close`] completes subscriptions, fails the
//!    rest and stops the client for good
//!
//! # Cloning
//!
//! `WsClient` is cheaply cloneable; all clones share one connection. The
//! connection task stops once the last clone is dropped.

use super::connection_state::ConnectionManager;
use super::reconnect::{CustomDelay, ExponentialBackoff, ReconnectionStrategy};
use super::request_manager::{RequestManager, RequestState};
use crate::metrics::ClientMetrics;
use eden_core::observable::lock;
use eden_core::{
    codec, ConnectionState, EdenResult, Error, Id, Observable, Observer, OperationResultEnvelope,
    OperationType, Result, Teardown, WsIncoming, WsRequest, WsRequestParams, WsResponse,
    WsResultType,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Called each time a socket opens
pub type OnOpen = Arc<dyn Fn() + Send + Sync>;

/// Called with the cause each time a socket closes unexpectedly
pub type OnClose = Arc<dyn Fn(&Error) + Send + Sync>;

const PING: &str = "PING";
const PONG: &str = "PONG";

/// Lazy connection settings
#[derive(Debug, Clone, Copy, Default)]
pub struct LazyOptions {
    pub enabled: bool,
    /// Idle time before the socket closes
    pub close_ms: u64,
}

/// Keep-alive ping settings
#[derive(Debug, Clone, Copy)]
pub struct KeepAliveOptions {
    pub enabled: bool,
    /// Silence before a `PING` is sent
    pub interval: Duration,
    /// How long to wait for any message after a `PING`
    pub pong_timeout: Duration,
}

impl Default for KeepAliveOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(1),
        }
    }
}

/// Configuration of a [`WsClient`]
pub struct WsClientOptions {
    pub url: String,
    pub lazy: LazyOptions,
    pub keep_alive: KeepAliveOptions,
    pub reconnect: Box<dyn ReconnectionStrategy>,
    /// Sent as the first frame of every connection
    pub connection_params: Option<Value>,
    pub on_open: Option<OnOpen>,
    pub on_close: Option<OnClose>,
    pub metrics: Option<Arc<ClientMetrics>>,
}

impl WsClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            lazy: LazyOptions::default(),
            keep_alive: KeepAliveOptions::default(),
            reconnect: Box::new(ExponentialBackoff::default()),
            connection_params: None,
            on_open: None,
            on_close: None,
            metrics: None,
        }
    }

    /// Connect on first request and close after `close_ms` of inactivity
    pub fn with_lazy(mut self, close_ms: u64) -> Self {
        self.lazy = LazyOptions {
            enabled: true,
            close_ms,
        };
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.keep_alive = KeepAliveOptions {
            enabled: true,
            interval,
            pong_timeout,
        };
        self
    }

    pub fn with_reconnect(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.reconnect = Box::new(strategy);
        self
    }

    /// Reconnect forever, waiting `delay(attempt)` before each attempt
    pub fn with_retry_delay<F>(self, delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.with_reconnect(CustomDelay(delay))
    }

    pub fn with_connection_params(mut self, params: Value) -> Self {
        self.connection_params = Some(params);
        self
    }

    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

struct WsState {
    requests: RequestManager,
    /// Command channel of the open socket, if any
    session: Option<mpsc::UnboundedSender<String>>,
    driver_running: bool,
    flush_scheduled: bool,
    closed: bool,
}

struct WsInner {
    url: String,
    lazy: LazyOptions,
    keep_alive: KeepAliveOptions,
    connection_params: Option<Value>,
    on_open: Option<OnOpen>,
    on_close: Option<OnClose>,
    metrics: Option<Arc<ClientMetrics>>,
    connection: ConnectionManager,
    state: Mutex<WsState>,
    next_id: AtomicI64,
    shutdown: CancellationToken,
}

/// How a socket session ended
enum SessionEnd {
    /// Closed or failed; reconnect through the strategy
    Closed(Error),
    /// The server asked for a reconnect
    Reconnect,
    /// Lazy mode released an idle socket
    Idle,
    Shutdown,
}

/// Client for the eden WebSocket protocol
#[derive(Clone)]
pub struct WsClient {
    inner: Arc<WsInner>,
    _shutdown: Arc<DropGuard>,
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("url", &self.inner.url)
            .field("state", &self.inner.connection.state())
            .finish()
    }
}

impl WsClient {
    /// Create a client; a non-lazy client starts connecting right away
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a non-lazy client is created outside a
    /// tokio runtime.
    pub fn new(options: WsClientOptions) -> Result<Self> {
        let WsClientOptions {
            url,
            lazy,
            keep_alive,
            reconnect,
            connection_params,
            on_open,
            on_close,
            metrics,
        } = options;

        let shutdown = CancellationToken::new();
        let inner = Arc::new(WsInner {
            url,
            lazy,
            keep_alive,
            connection_params,
            on_open,
            on_close,
            connection: ConnectionManager::new(reconnect, metrics.clone()),
            metrics,
            state: Mutex::new(WsState {
                requests: RequestManager::new(),
                session: None,
                driver_running: false,
                flush_scheduled: false,
                closed: false,
            }),
            next_id: AtomicI64::new(1),
            shutdown: shutdown.clone(),
        });

        if !lazy.enabled {
            let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                Error::Config("a non-lazy WebSocket client needs a tokio runtime".to_string())
            })?;
            lock(&inner.state).driver_running = true;
            runtime.spawn(drive(Arc::clone(&inner)));
        }

        Ok(Self {
            inner,
            _shutdown: Arc::new(shutdown.drop_guard()),
        })
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// The current connection state followed by every change
    pub fn connection_state(&self) -> Observable<ConnectionState, Error> {
        self.inner.connection.observable()
    }

    /// Number of registered requests
    pub fn outstanding(&self) -> usize {
        lock(&self.inner.state).requests.len()
    }

    /// Send one request and observe its responses
    ///
    /// Queries and mutations emit one `Data` envelope and complete.
    /// Subscriptions emit `Started`, then `Data` for every event, and
    /// complete on `Stopped`. Unsubscribing from a subscription the server
    /// knows about sends `subscription.stop`.
    pub fn request(
        &self,
        op_type: OperationType,
        path: impl Into<String>,
        input: Value,
        last_event_id: Option<String>,
    ) -> Observable<OperationResultEnvelope, Error> {
        let client = self.clone();
        let path = path.into();

        Observable::new(move |observer| {
            let id = Id::Number(client.inner.next_id.fetch_add(1, Ordering::SeqCst));
            let message = WsRequest::new(
                id.clone(),
                op_type.into(),
                WsRequestParams {
                    path: path.clone(),
                    input: input.clone(),
                    last_event_id: last_event_id.clone(),
                },
            );

            if let Err(error) = client.register(message, observer.clone()) {
                observer.error(error);
                return Teardown::None;
            }
            let client = client.clone();
            Teardown::new(move || client.cancel(&id))
        })
    }

    fn register(&self, message: WsRequest, observer: Observer<OperationResultEnvelope, Error>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::Config("WebSocket requests must be made inside a tokio runtime".to_string())
        })?;

        let start_driver = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return Err(Error::connection_closed());
            }
            state.requests.register(message, observer);
            !std::mem::replace(&mut state.driver_running, true)
        };
        if start_driver {
            runtime.spawn(drive(Arc::clone(&self.inner)));
        }

        let schedule = !std::mem::replace(&mut lock(&self.inner.state).flush_scheduled, true);
        if schedule {
            let inner = Arc::clone(&self.inner);
            runtime.spawn(async move {
                tokio::task::yield_now().await;
                inner.flush();
            });
        }
        Ok(())
    }

    fn cancel(&self, id: &Id) {
        let mut state = lock(&self.inner.state);
        let Some(entry) = state.requests.remove(id) else {
            return;
        };
        if entry.state != RequestState::Pending || !entry.message.is_subscription() {
            return;
        }
        if let Some(session) = &state.session {
            match codec::encode(&WsRequest::stop(id.clone())) {
                Ok(text) => {
                    debug!(id = %id, "Stopping subscription");
                    let _ = session.send(text);
                }
                Err(error) => warn!(error = %error, "Failed to encode subscription.stop"),
            }
        }
    }

    /// Stop the client for good
    ///
    /// Subscriptions complete, every other outstanding request fails with a
    /// closed-connection error, and later requests fail the same way.
    pub fn close(&self) {
        let entries = {
            let mut state = lock(&self.inner.state);
            state.closed = true;
            state.session = None;
            state.requests.drain_all()
        };
        self.inner.shutdown.cancel();
        info!(url = %self.inner.url, "WebSocket client closed");

        for entry in entries {
            if entry.message.is_subscription() {
                entry.observer.complete();
            } else {
                entry.observer.error(Error::connection_closed());
            }
        }
        self.inner.connection.idle();
    }
}

impl WsInner {
    /// Write every outgoing request to the open socket, if there is one
    fn flush(&self) {
        let mut state = lock(&self.state);
        state.flush_scheduled = false;
        let Some(session) = state.session.clone() else {
            return;
        };
        let messages = state.requests.take_outgoing();
        if messages.is_empty() {
            return;
        }
        match codec::encode_requests(&messages) {
            Ok(text) => {
                debug!(count = messages.len(), "Flushing requests");
                // A closed session requeues everything on reconnect
                let _ = session.send(text);
            }
            Err(error) => warn!(error = %error, "Failed to encode requests"),
        }
    }

    fn record_message(&self, kind: &'static str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_message(kind);
        }
    }

    /// Dispatch a text frame; returns true if the server asked to reconnect
    fn handle_text(&self, text: &str) -> bool {
        let messages = match codec::decode_incoming(text) {
            Ok(messages) => messages,
            Err(error) => {
                warn!(error = %error, "Dropping undecodable message");
                return false;
            }
        };

        let mut reconnect = false;
        for message in messages {
            match message {
                WsIncoming::Reconnect => {
                    self.record_message("reconnect");
                    reconnect = true;
                }
                WsIncoming::Response(response) => self.handle_response(response),
            }
        }
        reconnect
    }

    fn handle_response(&self, response: WsResponse) {
        let WsResponse { id, outcome } = response;

        let result = match outcome {
            Ok(result) => result,
            Err(error) => {
                self.record_message("error");
                let entry = lock(&self.state).requests.remove(&id);
                match entry {
                    Some(entry) => entry.observer.error(Error::Fetch(error)),
                    None => debug!(id = %id, "Error for unknown request"),
                }
                return;
            }
        };

        let mut state = lock(&self.state);
        let Some(entry) = state.requests.get_mut(&id) else {
            drop(state);
            debug!(id = %id, "Response for unknown request");
            return;
        };
        let observer = entry.observer.clone();

        match result.kind {
            WsResultType::Data => {
                self.record_message("data");
                let envelope = OperationResultEnvelope::Data {
                    id: result.id.clone(),
                    result: EdenResult::ok(result.data.unwrap_or(Value::Null)),
                };
                if entry.message.is_subscription() {
                    if let (Some(event_id), Some(params)) = (result.id, entry.message.params.as_mut()) {
                        params.last_event_id = Some(event_id);
                    }
                    drop(state);
                    observer.next(envelope);
                } else {
                    state.requests.remove(&id);
                    drop(state);
                    observer.next(envelope);
                    observer.complete();
                }
            }
            WsResultType::Started => {
                self.record_message("started");
                drop(state);
                observer.next(OperationResultEnvelope::Started);
            }
            WsResultType::Stopped => {
                self.record_message("stopped");
                state.requests.remove(&id);
                drop(state);
                observer.next(OperationResultEnvelope::Stopped);
                observer.complete();
            }
        }
    }

    /// Common path for every unexpected close, socket error or failed connect
    fn connection_lost(&self, error: &Error) {
        let failed = {
            let mut state = lock(&self.state);
            state.session = None;
            state.requests.mark_all_outgoing();
            state.requests.drain_non_subscriptions()
        };

        let close_error = match error {
            Error::ConnectionClosed { .. } => error.clone(),
            other => Error::ConnectionClosed {
                code: None,
                reason: other.to_string(),
            },
        };
        for entry in failed {
            entry.observer.error(close_error.clone());
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_error(error);
        }
        if let Some(on_close) = &self.on_close {
            on_close(error);
        }
        self.connection.connecting(Some(error.clone()));
    }

    /// The strategy gave up: complete subscriptions and fail the rest
    fn give_up(&self) {
        let entries = {
            let mut state = lock(&self.state);
            state.session = None;
            state.requests.drain_all()
        };
        for entry in entries {
            if entry.message.is_subscription() {
                entry.observer.complete();
            } else {
                entry.observer.error(Error::connection_closed());
            }
        }
        self.connection.idle();
    }

    /// Release the session if nothing is outstanding
    fn release_idle_session(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.requests.is_empty() {
            return false;
        }
        state.session = None;
        true
    }

    /// Whether the connection task should keep going after going idle
    ///
    /// Clears `driver_running` when it should not, so the next request
    /// starts a new task.
    fn resume_after_idle(&self) -> bool {
        let mut state = lock(&self.state);
        if state.closed || state.requests.is_empty() {
            state.driver_running = false;
            return false;
        }
        true
    }
}

/// Connection task: connect, run a session, reconnect
///
/// Only one runs per client at a time.
async fn drive(inner: Arc<WsInner>) {
    let mut attempt: u32 = 0;
    let mut cause: Option<Error> = None;

    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        match cause.take() {
            Some(error) => match inner.connection.next_reconnect_delay(attempt) {
                Some(delay) => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Reconnecting"
                    );
                    attempt += 1;
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = inner.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                None => {
                    warn!(attempt, "Reconnection abandoned");
                    inner.give_up();
                    if inner.resume_after_idle() {
                        attempt = 0;
                        continue;
                    }
                    return;
                }
            },
            None => {
                if !matches!(inner.connection.state(), ConnectionState::Connecting { .. }) {
                    inner.connection.connecting(None);
                }
            }
        }

        debug!(url = %inner.url, "Connecting");
        let connected = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            connected = connect_async(inner.url.as_str()) => connected,
        };

        let stream = match connected {
            Ok((stream, _)) => stream,
            Err(e) => {
                let error = Error::WebSocket(e.to_string());
                warn!(error = %error, "Connection failed");
                inner.connection_lost(&error);
                cause = Some(error);
                continue;
            }
        };

        attempt = 0;
        match run_session(&inner, stream).await {
            SessionEnd::Closed(error) => {
                info!(error = %error, "WebSocket closed");
                inner.connection_lost(&error);
                cause = Some(error);
            }
            SessionEnd::Reconnect => {
                info!("Server requested reconnect");
                let mut state = lock(&inner.state);
                state.session = None;
                state.requests.mark_all_outgoing();
                drop(state);
                inner.connection.connecting(None);
            }
            SessionEnd::Idle => {
                info!("Closing idle WebSocket");
                inner.connection.idle();
                if !inner.resume_after_idle() {
                    return;
                }
            }
            SessionEnd::Shutdown => break,
        }
    }

    let mut state = lock(&inner.state);
    state.driver_running = false;
    state.session = None;
}

/// Sleep until `at`, or forever if it is `None`
async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run_session(inner: &Arc<WsInner>, stream: WsStream) -> SessionEnd {
    let (mut sink, mut incoming) = stream.split();

    if let Some(params) = &inner.connection_params {
        let sent = match codec::encode_connection_params(params) {
            Ok(text) => sink
                .send(Message::Text(text))
                .await
                .map_err(|e| Error::WebSocket(e.to_string())),
            Err(error) => Err(error),
        };
        if let Err(error) = sent {
            return SessionEnd::Closed(error);
        }
    }

    let (tx, mut commands) = mpsc::unbounded_channel::<String>();
    let resend = {
        let mut state = lock(&inner.state);
        state.session = Some(tx);
        state.requests.mark_all_outgoing();
        state.requests.take_outgoing()
    };

    inner.connection.connected();
    info!(url = %inner.url, "WebSocket connected");
    if let Some(on_open) = &inner.on_open {
        on_open();
    }

    if !resend.is_empty() {
        debug!(count = resend.len(), "Sending outstanding requests");
        let sent = match codec::encode_requests(&resend) {
            Ok(text) => sink
                .send(Message::Text(text))
                .await
                .map_err(|e| Error::WebSocket(e.to_string())),
            Err(error) => Err(error),
        };
        if let Err(error) = sent {
            return SessionEnd::Closed(error);
        }
    }

    let keep_alive = inner.keep_alive;
    let close_after = Duration::from_millis(inner.lazy.close_ms);
    let mut ping_at = keep_alive.enabled.then(|| Instant::now() + keep_alive.interval);
    let mut pong_deadline: Option<Instant> = None;
    let mut idle_at = inner.lazy.enabled.then(|| Instant::now() + close_after);

    let end = loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break SessionEnd::Shutdown,

            command = commands.recv() => {
                let Some(text) = command else {
                    break SessionEnd::Shutdown;
                };
                if inner.lazy.enabled {
                    idle_at = Some(Instant::now() + close_after);
                }
                if let Err(e) = sink.send(Message::Text(text)).await {
                    break SessionEnd::Closed(Error::WebSocket(e.to_string()));
                }
            }

            message = incoming.next() => {
                if keep_alive.enabled {
                    ping_at = Some(Instant::now() + keep_alive.interval);
                    pong_deadline = None;
                }
                if inner.lazy.enabled {
                    idle_at = Some(Instant::now() + close_after);
                }

                match message {
                    Some(Ok(Message::Text(text))) => match text.as_str() {
                        PING => {
                            if let Err(e) = sink.send(Message::Text(PONG.to_string())).await {
                                break SessionEnd::Closed(Error::WebSocket(e.to_string()));
                            }
                        }
                        PONG => {}
                        _ => {
                            if inner.handle_text(&text) {
                                break SessionEnd::Reconnect;
                            }
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                            None => (None, String::new()),
                        };
                        break SessionEnd::Closed(Error::ConnectionClosed { code, reason });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SessionEnd::Closed(Error::WebSocket(e.to_string())),
                    None => break SessionEnd::Closed(Error::connection_closed()),
                }
            }

            _ = wait_until(ping_at) => {
                ping_at = None;
                pong_deadline = Some(Instant::now() + keep_alive.pong_timeout);
                if let Err(e) = sink.send(Message::Text(PING.to_string())).await {
                    break SessionEnd::Closed(Error::WebSocket(e.to_string()));
                }
            }

            _ = wait_until(pong_deadline) => break SessionEnd::Closed(Error::KeepAliveTimeout),

            _ = wait_until(idle_at) => {
                if inner.release_idle_session() {
                    break SessionEnd::Idle;
                }
                idle_at = Some(Instant::now() + close_after);
            }
        }
    };

    let _ = sink.close().await;
    end
}
