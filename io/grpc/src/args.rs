//! Channel arguments: an open key/value store with a few well-known keys.

use http2::SessionOptions;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const KEEPALIVE_TIME_MS: &str = "grpc.keepalive_time_ms";
pub const KEEPALIVE_TIMEOUT_MS: &str = "grpc.keepalive_timeout_ms";
pub const KEEPALIVE_PERMIT_WITHOUT_CALLS: &str = "grpc.keepalive_permit_without_calls";
pub const HTTP2_MAX_PINGS_WITHOUT_DATA: &str = "grpc.http2.max_pings_without_data";
pub const HTTP2_MIN_SENT_PING_INTERVAL_WITHOUT_DATA_MS: &str =
    "grpc.http2.min_sent_ping_interval_without_data_ms";
pub const HTTP2_MIN_RECV_PING_INTERVAL_WITHOUT_DATA_MS: &str =
    "grpc.http2.min_recv_ping_interval_without_data_ms";
pub const MAX_CONNECTION_IDLE_MS: &str = "grpc.max_connection_idle_ms";
pub const MAX_CONNECTION_AGE_MS: &str = "grpc.max_connection_age_ms";
pub const MAX_CONNECTION_AGE_GRACE_MS: &str = "grpc.max_connection_age_grace_ms";
pub const PRIMARY_USER_AGENT: &str = "grpc.primary_user_agent";
/// Read/write loop iteration budget per call.
pub const CLIENT_MAX_ITERATIONS: &str = "grpc.client.max_iterations";
/// Socket read timeout per loop iteration.
pub const CLIENT_POLL_INTERVAL_MS: &str = "grpc.client.poll_interval_ms";

#[derive(Clone)]
pub enum ArgValue {
    Int(i64),
    Str(String),
    /// Opaque value owned by the caller.
    Handle(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Int(v) => write!(f, "Int({v})"),
            ArgValue::Str(v) => write!(f, "Str({v:?})"),
            ArgValue::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}

/// Channel configuration arguments.
///
/// Values are stored without validation. Only the keys that map onto
/// [`SessionOptions`] affect the connection.
#[derive(Debug, Clone, Default)]
pub struct ChannelArguments {
    entries: HashMap<String, ArgValue>,
}

impl ChannelArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.entries.insert(key.into(), ArgValue::Int(value));
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), ArgValue::Str(value.into()));
    }

    pub fn set_handle(&mut self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.entries.insert(key.into(), ArgValue::Handle(value));
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.entries.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            ArgValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_handle(&self, key: &str) -> Option<&Arc<dyn Any + Send + Sync>> {
        match self.entries.get(key)? {
            ArgValue::Handle(v) => Some(v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply the session-related keys on top of `base`.
    ///
    /// Keepalive time and timeout become the TCP keepalive idle time and
    /// probe interval. Non-positive values leave the default in place.
    pub fn session_options(&self, base: SessionOptions) -> SessionOptions {
        let millis = |key| {
            self.get_int(key)
                .filter(|v| *v > 0)
                .map(|v| Duration::from_millis(v as u64))
        };

        let mut options = base;
        if let Some(time) = millis(KEEPALIVE_TIME_MS) {
            options.keepalive_time = Some(time);
        }
        if let Some(timeout) = millis(KEEPALIVE_TIMEOUT_MS) {
            options.keepalive_interval = Some(timeout);
        }
        if let Some(idle) = millis(MAX_CONNECTION_IDLE_MS) {
            options.max_connection_idle = Some(idle);
        }
        if let Some(age) = millis(MAX_CONNECTION_AGE_MS) {
            options.max_connection_age = Some(age);
        }
        if let Some(poll) = millis(CLIENT_POLL_INTERVAL_MS) {
            options.poll_interval = poll;
        }
        if let Some(n) = self.get_int(CLIENT_MAX_ITERATIONS).filter(|v| *v > 0) {
            options.max_iterations = usize::try_from(n).unwrap_or(usize::MAX);
        }
        options
    }
}
