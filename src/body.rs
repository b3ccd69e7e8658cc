use crate::{
    BodyReader, ChunkParser, ConnectionContext, Error, HttpConfig, Pipe, PipeOptions, PipeWriter,
    ReadView, Result, TimeoutControl, TimeoutReason, TransportReader,
    pump::{Completion, Pump},
    trailers::{TrailerParser, Trailers},
};
use std::{
    fmt::{self, Debug, Formatter},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering::Relaxed},
    },
    time::Duration,
};

/// A chunked transfer-coding request body
///
/// Constructed once per request, this couples the transport's read side to
/// an internal body pipe through a pump task, and hands the decoded byte
/// stream to the handler through the [`BodyReader`] surface it delegates
/// to. The pump starts on the first read; at request end the connection
/// loop calls [`consume`][Self::consume] to drain an unread remainder (so
/// the connection can be kept alive) or [`stop`][Self::stop] to tear the
/// body down.
///
/// The body pipe pauses its writer on any unread byte: the pump holds at
/// most one payload segment in flight, and a slow handler pushes back to
/// the transport rather than buffering chunks on the heap.
pub struct ChunkedBody<T> {
    transport: Arc<T>,
    context: Arc<dyn ConnectionContext>,
    timeout: Arc<dyn TimeoutControl>,
    pipe: Pipe,
    reader: BodyReader,
    writer: Option<PipeWriter>,
    trailer_parser: Option<Box<dyn TrailerParser>>,
    trailers: Trailers,
    canceled: Arc<AtomicBool>,
    pump_done: Arc<Completion>,
    started: bool,
    stopped: bool,
    keep_alive: bool,
    max_request_body_size: Option<u64>,
    drain_timeout: Duration,
}

impl<T: TransportReader> ChunkedBody<T> {
    /// a decoder for one request body read from `transport`
    pub fn new(
        transport: T,
        keep_alive: bool,
        context: Arc<dyn ConnectionContext>,
        timeout: Arc<dyn TimeoutControl>,
        config: &HttpConfig,
    ) -> Self {
        let pipe = Pipe::new(PipeOptions {
            pause_writer_threshold: 1,
            resume_writer_threshold: 1,
        });
        let writer = pipe.writer();
        let reader = BodyReader::new(
            pipe.reader(),
            Arc::clone(&timeout),
            config.request_body_timing,
        );
        let trailers = Trailers::new(config.max_trailers_len);
        Self {
            transport: Arc::new(transport),
            context,
            timeout,
            pipe,
            reader,
            writer: Some(writer),
            trailer_parser: Some(Box::new(trailers.clone())),
            trailers,
            canceled: Arc::new(AtomicBool::new(false)),
            pump_done: Arc::new(Completion::new()),
            started: false,
            stopped: false,
            keep_alive,
            max_request_body_size: config.max_request_body_size,
            drain_timeout: config.request_body_drain_timeout,
        }
    }

    /// Replace the trailer header parser. Only meaningful before the first
    /// read; [`trailers`][Self::trailers] reflects the default parser only.
    #[must_use]
    pub fn with_trailer_parser(mut self, parser: Box<dyn TrailerParser>) -> Self {
        self.trailer_parser = Some(parser);
        self
    }

    /// whether the connection wants to survive this request
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// true once a reader operation has started the pump
    pub fn has_started_consuming(&self) -> bool {
        self.started
    }

    /// trailer fields collected after the final chunk, in wire order
    pub fn trailers(&self) -> Vec<(String, String)> {
        self.trailers.fields()
    }

    /// See [`BodyReader::try_read`]. Starts the pump if this is the first
    /// reader operation.
    ///
    /// # Errors
    ///
    /// Returns the error the body was completed with.
    pub fn try_read(&mut self) -> Result<Option<ReadView>> {
        self.start();
        self.reader.try_read()
    }

    /// See [`BodyReader::read`]. Starts the pump if this is the first
    /// reader operation.
    ///
    /// # Errors
    ///
    /// Returns the error the body was completed with.
    pub async fn read(&mut self) -> Result<ReadView> {
        self.start();
        self.reader.read().await
    }

    /// See [`BodyReader::advance`].
    pub fn advance(&mut self, consumed: usize) {
        self.reader.advance(consumed);
    }

    /// See [`BodyReader::advance_to`].
    pub fn advance_to(&mut self, consumed: usize, examined: usize) {
        self.reader.advance_to(consumed, examined);
    }

    /// See [`BodyReader::complete`].
    pub fn complete(&mut self, error: Option<Error>) {
        self.reader.complete(error);
    }

    /// See [`BodyReader::cancel_pending_read`].
    ///
    /// # Errors
    ///
    /// Always [`Error::Unsupported`].
    pub fn cancel_pending_read(&mut self) -> Result<()> {
        self.reader.cancel_pending_read()
    }

    /// See [`BodyReader::on_writer_completed`].
    ///
    /// # Errors
    ///
    /// Always [`Error::Unsupported`].
    pub fn on_writer_completed(
        &mut self,
        callback: Box<dyn FnOnce(Option<&Error>) + Send>,
    ) -> Result<()> {
        self.reader.on_writer_completed(callback)
    }

    /// Tear the body down at request end. A body that was never read is a
    /// no-op; otherwise the reader side is completed, a still-running pump
    /// is canceled and awaited, and the pipe is reset.
    pub async fn stop(&mut self) {
        if !self.started || self.stopped {
            return;
        }
        self.stopped = true;
        self.reader.complete(None);
        if !self.pump_done.is_set() {
            self.canceled.store(true, Relaxed);
            self.transport.cancel_pending_read();
            log::trace!(
                "[{}] waiting for the request body pump to stop",
                self.context.connection_id()
            );
            self.pump_done.wait().await;
        }
        self.pipe.reset();
    }

    /// Consume whatever the handler left unread, so the connection can be
    /// kept alive. Tries a non-blocking drain first and only falls through
    /// to the timed asynchronous drain when that did not observe
    /// completion.
    ///
    /// # Errors
    ///
    /// Bad requests discovered while draining are recorded on the
    /// connection context and connection aborts are logged; both return
    /// `Ok`. Only unexpected transport errors propagate.
    pub async fn consume(&mut self) -> Result<()> {
        self.start();
        match self.try_drain() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(error) if error.is_bad_request() => {
                self.context.set_bad_request_state(&error);
                return Ok(());
            }
            Err(_) => {}
        }
        self.consume_awaited().await
    }

    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let Some(writer) = self.writer.take() else {
            return;
        };
        let Some(trailers) = self.trailer_parser.take() else {
            return;
        };
        let pump = Pump::new(
            Arc::clone(&self.transport),
            writer,
            ChunkParser::new(self.max_request_body_size),
            trailers,
            Arc::clone(&self.context),
            Arc::clone(&self.timeout),
            Arc::clone(&self.canceled),
            Arc::clone(&self.pump_done),
        );
        self.context.spawn(Box::pin(pump.run()));
    }

    fn try_drain(&mut self) -> Result<bool> {
        match self.reader.try_read()? {
            Some(view) => {
                self.reader.advance(view.len());
                Ok(view.is_completed())
            }
            None => Ok(false),
        }
    }

    async fn consume_awaited(&mut self) -> Result<()> {
        log::debug!(
            "[{}] request body was not entirely read; draining",
            self.context.connection_id()
        );
        self.timeout
            .set_timeout(self.drain_timeout, TimeoutReason::RequestBodyDrain);
        let result: Result<()> = async {
            loop {
                let view = self.reader.read().await?;
                self.reader.advance(view.len());
                if view.is_completed() {
                    return Ok(());
                }
            }
        }
        .await;
        self.timeout.cancel_timeout();
        match result {
            Ok(()) => Ok(()),
            Err(error) if error.is_bad_request() => {
                self.context.set_bad_request_state(&error);
                Ok(())
            }
            Err(error) if error.is_connection_abort() => {
                log::debug!(
                    "[{}] request body drain timed out: {error}",
                    self.context.connection_id()
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}

impl<T> Debug for ChunkedBody<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedBody")
            .field("pipe", &self.pipe)
            .field("started", &self.started)
            .field("stopped", &self.stopped)
            .field("keep_alive", &self.keep_alive)
            .field("max_request_body_size", &self.max_request_body_size)
            .finish()
    }
}
