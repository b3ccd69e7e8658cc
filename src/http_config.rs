use std::time::Duration;

/// Tunable limits and behaviors for request body decoding
///
/// Use [`HttpConfig::default`] or [`DEFAULT_CONFIG`] and override individual
/// values with the chainable `with_` setters.
#[derive(Clone, Copy, Debug)]
pub struct HttpConfig {
    pub(crate) max_request_body_size: Option<u64>,
    pub(crate) max_trailers_len: usize,
    pub(crate) request_body_drain_timeout: Duration,
    pub(crate) request_body_timing: bool,
}

impl HttpConfig {
    /// maximum cumulative bytes consumed for one request body, including
    /// chunk framing. `None` disables the limit.
    #[must_use]
    pub fn with_max_request_body_size(mut self, max_request_body_size: Option<u64>) -> Self {
        self.max_request_body_size = max_request_body_size;
        self
    }

    /// maximum length of the trailer header section after the final chunk
    #[must_use]
    pub fn with_max_trailers_len(mut self, max_trailers_len: usize) -> Self {
        self.max_trailers_len = max_trailers_len;
        self
    }

    /// how long an unread remainder may take to drain at request end before
    /// the connection is considered stuck
    #[must_use]
    pub fn with_request_body_drain_timeout(mut self, request_body_drain_timeout: Duration) -> Self {
        self.request_body_drain_timeout = request_body_drain_timeout;
        self
    }

    /// whether reader suspension opens a read-timing window on the timeout
    /// controller
    #[must_use]
    pub fn with_request_body_timing(mut self, request_body_timing: bool) -> Self {
        self.request_body_timing = request_body_timing;
        self
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        DEFAULT_CONFIG
    }
}

/// the default [`HttpConfig`]
pub const DEFAULT_CONFIG: HttpConfig = HttpConfig {
    max_request_body_size: Some(30_000_000),
    max_trailers_len: 32 * 1024,
    request_body_drain_timeout: Duration::from_secs(5),
    request_body_timing: true,
};
