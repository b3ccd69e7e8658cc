use std::time::Duration;

/// Why a timeout was installed on the [`TimeoutControl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TimeoutReason {
    /// an unread body remainder is being drained at request end
    RequestBodyDrain,
}

/// The per-connection timeout controller collaborator
///
/// The decoder reports read activity to it and asks it whether the request
/// deadline has elapsed; deciding deadlines and minimum data rates is the
/// controller's business, not the decoder's.
pub trait TimeoutControl: Send + Sync + 'static {
    /// arm a timeout `duration` from now
    fn set_timeout(&self, duration: Duration, reason: TimeoutReason);

    /// disarm the timeout installed by [`set_timeout`][Self::set_timeout]
    fn cancel_timeout(&self);

    /// a body read has suspended; a read-timing window opens
    fn start_timing_read(&self);

    /// the suspended body read completed; the window closes
    fn stop_timing_read(&self);

    /// `count` body bytes were observed for the first time
    fn bytes_read(&self, count: u64);

    /// true once the request deadline has elapsed
    fn request_timed_out(&self) -> bool;
}
