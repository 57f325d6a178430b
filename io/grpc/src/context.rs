//! Per-call configuration.

use std::time::{Duration, Instant};

/// Configuration for exactly one call.
///
/// Build a fresh context for every call. It is deliberately not `Clone`:
/// a context must not be shared between in-flight calls.
#[derive(Debug, Default)]
pub struct ClientContext {
    /// In the order entries were last set.
    metadata: Vec<(String, String)>,
    deadline: Option<Instant>,
    authority: Option<String>,
    compression: Option<String>,
    user_agent_prefix: Option<String>,
}

impl ClientContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request header, replacing any previous value for `key`.
    ///
    /// Names are stored as given; the channel lower-cases them on the wire.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.metadata.retain(|(k, _)| *k != key);
        self.metadata.push((key, value.into()));
    }

    /// Entries in the order they were last set.
    pub fn metadata(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Set the deadline to `timeout` from now.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_deadline(&self) -> bool {
        self.deadline.is_some()
    }

    /// Override the `:authority` sent with the call.
    pub fn set_authority(&mut self, authority: impl Into<String>) {
        self.authority = Some(authority.into());
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Record a compression algorithm. Messages are currently always sent
    /// uncompressed regardless of this setting.
    pub fn set_compression_algorithm(&mut self, algorithm: impl Into<String>) {
        self.compression = Some(algorithm.into());
    }

    pub fn compression_algorithm(&self) -> Option<&str> {
        self.compression.as_deref()
    }

    /// Prepended to the default user agent, separated by a space.
    pub fn set_user_agent_prefix(&mut self, prefix: impl Into<String>) {
        self.user_agent_prefix = Some(prefix.into());
    }

    pub fn user_agent_prefix(&self) -> Option<&str> {
        self.user_agent_prefix.as_deref()
    }

    /// True iff a deadline is set and the current time is past it.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() > d)
    }

    /// Time left before the deadline in milliseconds. `None` means no
    /// deadline; an expired deadline gives `Some(0)`.
    pub fn remaining_millis(&self) -> Option<u64> {
        self.remaining()
            .map(|left| u64::try_from(left.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Clear every field so the value can be reused for another call.
    pub fn reset(&mut self) {
        self.metadata.clear();
        self.deadline = None;
        self.authority = None;
        self.compression = None;
        self.user_agent_prefix = None;
    }
}
