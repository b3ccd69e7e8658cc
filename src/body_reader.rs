use crate::{Error, PipeReader, ReadView, Result, TimeoutControl};
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// The read surface handlers consume the request body through
///
/// Wraps the body pipe's read half and keeps the read-timing bookkeeping
/// the timeout controller needs: a suspended read opens a timing window,
/// its completion closes it, and each body byte is reported to
/// [`TimeoutControl::bytes_read`] exactly once, the first time a read
/// returns it.
///
/// Obtained through [`ChunkedBody`][crate::ChunkedBody], which starts the
/// pump on the first read.
pub struct BodyReader {
    pipe: PipeReader,
    timeout: Arc<dyn TimeoutControl>,
    timing_enabled: bool,
    backpressure: bool,
    already_timed_bytes: u64,
    previous_read: Option<(u64, usize)>,
}

impl BodyReader {
    pub(crate) fn new(
        pipe: PipeReader,
        timeout: Arc<dyn TimeoutControl>,
        timing_enabled: bool,
    ) -> Self {
        Self {
            pipe,
            timeout,
            timing_enabled,
            backpressure: false,
            already_timed_bytes: 0,
            previous_read: None,
        }
    }

    /// A non-suspending read: a snapshot of the currently buffered bytes,
    /// or `None` when a read would have suspended.
    ///
    /// # Errors
    ///
    /// Returns the error the pump completed the body with, on this and
    /// every subsequent read.
    pub fn try_read(&mut self) -> Result<Option<ReadView>> {
        match self.pipe.try_read()? {
            Some(view) => {
                self.record(&view);
                Ok(Some(view))
            }
            None => Ok(None),
        }
    }

    /// Reads until at least one byte is available, the body is complete, or
    /// a pending read is canceled. Dropping the returned future cancels the
    /// read without disturbing the pump.
    ///
    /// # Errors
    ///
    /// Returns the error the pump completed the body with, on this and
    /// every subsequent read.
    pub async fn read(&mut self) -> Result<ReadView> {
        loop {
            let view = match self.pipe.try_read()? {
                Some(view) => view,
                None => {
                    self.start_timing_read();
                    let result = self.pipe.read().await;
                    self.stop_timing_read();
                    result?
                }
            };
            self.record(&view);
            if !view.is_empty() || view.is_completed() || view.is_canceled() {
                return Ok(view);
            }
        }
    }

    /// [`advance_to`][Self::advance_to] with `examined` = `consumed`
    pub fn advance(&mut self, consumed: usize) {
        self.advance_to(consumed, consumed);
    }

    /// Release `consumed` bytes of the previous read and mark `examined`
    /// bytes as inspected, both relative to the start of that read's view.
    ///
    /// # Panics
    ///
    /// Panics when called before any read, or with cursors past the end of
    /// the previous read.
    pub fn advance_to(&mut self, consumed: usize, examined: usize) {
        let (offset, len) = self
            .previous_read
            .expect("advanced a body reader before reading from it");
        assert!(
            consumed <= examined && examined <= len,
            "advanced past the end of the previous read"
        );
        self.pipe
            .advance_to(offset + consumed as u64, offset + examined as u64);
        self.already_timed_bytes = self.already_timed_bytes.saturating_sub(consumed as u64);
    }

    /// The handler is done with the body. This does not stop the pump; an
    /// unread remainder is dealt with by the lifecycle's consume/stop.
    pub fn complete(&mut self, error: Option<Error>) {
        if let Some(error) = &error {
            log::debug!("body reader completed with: {error}");
        }
        self.stop_timing_read();
        self.pipe.complete();
    }

    /// Declared for interface parity and intentionally not supported.
    ///
    /// # Errors
    ///
    /// Always [`Error::Unsupported`]. Cancellation of an in-flight read is
    /// done by dropping its future.
    pub fn cancel_pending_read(&mut self) -> Result<()> {
        Err(Error::Unsupported("cancel_pending_read"))
    }

    /// Declared for interface parity and intentionally not supported.
    ///
    /// # Errors
    ///
    /// Always [`Error::Unsupported`].
    pub fn on_writer_completed(
        &mut self,
        _callback: Box<dyn FnOnce(Option<&Error>) + Send>,
    ) -> Result<()> {
        Err(Error::Unsupported("on_writer_completed"))
    }

    fn record(&mut self, view: &ReadView) {
        let len = view.len() as u64;
        let first_seen = len.saturating_sub(self.already_timed_bytes);
        if first_seen > 0 {
            self.timeout.bytes_read(first_seen);
            self.already_timed_bytes = len;
        }
        self.previous_read = Some((view.offset(), view.len()));
    }

    fn start_timing_read(&mut self) {
        if self.timing_enabled && !self.backpressure {
            self.backpressure = true;
            self.timeout.start_timing_read();
        }
    }

    fn stop_timing_read(&mut self) {
        if self.backpressure {
            self.backpressure = false;
            self.timeout.stop_timing_read();
        }
    }
}

impl Debug for BodyReader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyReader")
            .field("pipe", &self.pipe)
            .field("backpressure", &self.backpressure)
            .field("already_timed_bytes", &self.already_timed_bytes)
            .field("previous_read", &self.previous_read)
            .finish()
    }
}
