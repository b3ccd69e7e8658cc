use crate::{
    ChunkParser, ConnectionContext, Error, PipeWriter, ReadView, Result, TimeoutControl,
    TransportReader, trailers::TrailerParser,
};
use event_listener::Event;
use futures_lite::future::poll_once;
use std::{
    pin::pin,
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering::{Acquire, Relaxed, Release},
        },
    },
};

/// one-shot done flag the lifecycle can await
pub(crate) struct Completion {
    done: AtomicBool,
    event: Event,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            event: Event::new(),
        }
    }

    pub(crate) fn set(&self) {
        self.done.store(true, Release);
        self.event.notify(usize::MAX);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.done.load(Acquire)
    }

    pub(crate) async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let listener = self.event.listen();
            if self.is_set() {
                return;
            }
            listener.await;
        }
    }
}

enum Step {
    Continue,
    Finished,
}

/// The producer half of the decoder: reads the transport, drives the
/// parser, and flushes decoded payload into the body pipe under
/// back-pressure. One pump runs per body, spawned on the request scheduler
/// at first read.
pub(crate) struct Pump<T> {
    transport: Arc<T>,
    writer: PipeWriter,
    parser: ChunkParser,
    trailers: Box<dyn TrailerParser>,
    context: Arc<dyn ConnectionContext>,
    timeout: Arc<dyn TimeoutControl>,
    canceled: Arc<AtomicBool>,
    completion: Arc<Completion>,
}

impl<T: TransportReader> Pump<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: Arc<T>,
        writer: PipeWriter,
        parser: ChunkParser,
        trailers: Box<dyn TrailerParser>,
        context: Arc<dyn ConnectionContext>,
        timeout: Arc<dyn TimeoutControl>,
        canceled: Arc<AtomicBool>,
        completion: Arc<Completion>,
    ) -> Self {
        Self {
            transport,
            writer,
            parser,
            trailers,
            context,
            timeout,
            canceled,
            completion,
        }
    }

    pub(crate) async fn run(mut self) {
        log::trace!(
            "[{}] request body pump started",
            self.context.connection_id()
        );
        let result = self.pump().await;
        match &result {
            Ok(()) => log::trace!(
                "[{}] request body pump finished",
                self.context.connection_id()
            ),
            Err(error) => log::debug!(
                "[{}] request body pump failed: {error}",
                self.context.connection_id()
            ),
        }
        self.writer.complete(result.err());
        self.completion.set();
    }

    async fn pump(&mut self) -> Result<()> {
        let mut first = true;
        loop {
            let view = self.read_transport(first).await?;
            first = false;
            let mut consumed = view.offset();
            let mut examined = view.offset();
            let step = self.process(&view, &mut consumed, &mut examined).await;
            // the transport cursor advances on every iteration, error or not
            self.transport.advance_to(consumed, examined);
            match step? {
                Step::Finished => return Ok(()),
                Step::Continue => {}
            }
        }
    }

    /// Reads the transport. The first read that does not complete
    /// synchronously is the moment the outer layer may send `100 Continue`.
    async fn read_transport(&mut self, first: bool) -> Result<ReadView> {
        let mut read = pin!(self.transport.read());
        if first {
            if let Some(result) = poll_once(read.as_mut()).await {
                return Ok(result?);
            }
            self.context.try_produce_continue();
        }
        Ok(read.await?)
    }

    async fn process(
        &mut self,
        view: &ReadView,
        consumed: &mut u64,
        examined: &mut u64,
    ) -> Result<Step> {
        if self.timeout.request_timed_out() {
            return Err(Error::RequestBodyTimeout);
        }
        if self.canceled.load(Relaxed) || view.is_canceled() {
            return Ok(Step::Finished);
        }

        let outcome = self
            .parser
            .parse(&view.as_input(), &mut self.writer, &mut *self.trailers)?;
        *consumed = view.offset() + outcome.consumed as u64;
        *examined = view.offset() + outcome.examined as u64;

        let flush = self.writer.flush().await;
        if outcome.done || flush.is_completed {
            return Ok(Step::Finished);
        }
        if view.is_completed() {
            self.transport.on_input_or_output_completed();
            return Err(Error::UnexpectedEndOfRequestContent);
        }
        Ok(Step::Continue)
    }
}
