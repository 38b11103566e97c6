//! Client metrics
//!
//! OpenTelemetry instruments describing operation traffic, HTTP batching and
//! the WebSocket connection. They are exported through whatever meter
//! provider `init_observability` installed; without one the global no-op
//! provider swallows them.
//!
//! # Metrics Collected
//!
//! - **operations_total**: Operations finished, by type and outcome (counter)
//! - **operation_duration**: Operation latency in seconds (histogram)
//! - **errors_total**: Errors by kind (counter)
//! - **batch_size**: Operations per HTTP batch request (histogram)
//! - **ws_connection_state**: 0=idle, 1=connecting, 2=pending (gauge)
//! - **ws_reconnection_attempts**: Reconnection attempts (counter)
//! - **ws_messages_received**: Decoded WebSocket messages (counter)
//!
//! # Examples
//!
//! ```rust,no_run
//! use eden_client::ClientMetrics;
//!
//! let metrics = ClientMetrics::new("my-app");
//! metrics.record_batch(3);
//! ```

use eden_core::{ConnectionState, Error, OperationType};
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// OpenTelemetry instruments recorded by the client
pub struct ClientMetrics {
    pub operations_total: Counter<u64>,
    /// Seconds from subscribe to the first result
    pub operation_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
    pub batch_size: Histogram<u64>,
    /// 0=idle, 1=connecting, 2=pending
    pub ws_connection_state: Gauge<i64>,
    pub ws_reconnection_attempts: Counter<u64>,
    pub ws_messages_received: Counter<u64>,
}

impl ClientMetrics {
    /// Instruments on the global meter named `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            operations_total: meter
                .u64_counter("eden.client.operations.total")
                .with_description("Total number of operations finished")
                .build(),
            operation_duration: meter
                .f64_histogram("eden.client.operation.duration")
                .with_description("Operation duration in seconds")
                .build(),
            errors_total: meter
                .u64_counter("eden.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
            batch_size: meter
                .u64_histogram("eden.client.batch.size")
                .with_description("Number of operations per batch request")
                .build(),
            ws_connection_state: meter
                .i64_gauge("eden.client.ws.connection.state")
                .with_description("WebSocket connection state (0=idle, 1=connecting, 2=pending)")
                .build(),
            ws_reconnection_attempts: meter
                .u64_counter("eden.client.ws.reconnection.attempts")
                .with_description("Total number of WebSocket reconnection attempts")
                .build(),
            ws_messages_received: meter
                .u64_counter("eden.client.ws.messages.received")
                .with_description("Total number of WebSocket messages received")
                .build(),
        }
    }

    /// Record a finished operation
    pub fn record_operation(&self, op_type: OperationType, ok: bool, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("type", op_type.as_str()),
            KeyValue::new("status", if ok { "success" } else { "error" }),
        ];
        self.operations_total.add(1, attributes);
        self.operation_duration.record(duration_secs, attributes);
    }

    pub fn record_error(&self, error: &Error) {
        let attributes = &[KeyValue::new("error_type", error_kind(error))];
        self.errors_total.add(1, attributes);
    }

    pub fn record_batch(&self, size: u64) {
        self.batch_size.record(size, &[]);
    }

    pub fn update_connection_state(&self, state: &ConnectionState) {
        let value = match state {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting { .. } => 1,
            ConnectionState::Pending => 2,
        };
        self.ws_connection_state.record(value, &[]);
    }

    pub fn record_reconnection_attempt(&self) {
        self.ws_reconnection_attempts.add(1, &[]);
    }

    /// Record a decoded message; `kind` is `data`, `started`, `stopped`,
    /// `error` or `reconnect`
    pub fn record_message(&self, kind: &'static str) {
        self.ws_messages_received.add(1, &[KeyValue::new("type", kind)]);
    }
}

fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::Fetch(_) => "fetch",
        Error::Aborted => "aborted",
        Error::ConnectionClosed { .. } => "connection_closed",
        Error::KeepAliveTimeout => "keep_alive_timeout",
        Error::WebSocket(_) => "websocket",
        Error::Serialization(_) => "serialization",
        Error::Transformer(_) => "transformer",
        Error::Config(_) => "config",
        Error::Timeout => "timeout",
    }
}
