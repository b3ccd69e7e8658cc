use crate::{Error, Result, Segments};
use event_listener::Event;
use smallvec::SmallVec;
use std::{
    collections::VecDeque,
    fmt::{self, Debug, Formatter},
    mem,
    ops::Range,
    sync::{Arc, Mutex, MutexGuard},
};

/// Back-pressure thresholds for a [`Pipe`]
///
/// After a flush commits data, the writer suspends while unconsumed bytes
/// are at or above `pause_writer_threshold` (0 disables pausing) and resumes
/// once the reader has released enough to drop below
/// `resume_writer_threshold`.
///
/// The body pipe is created with both thresholds at 1: any unread byte
/// pauses the writer, so at most one payload segment is ever in flight and
/// slow consumers push back to the transport instead of the heap.
#[derive(Debug, Clone, Copy)]
pub struct PipeOptions {
    /// pause the writer when this many unconsumed bytes are buffered
    pub pause_writer_threshold: usize,
    /// resume the writer when buffered bytes drop below this
    pub resume_writer_threshold: usize,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            pause_writer_threshold: 64 * 1024,
            resume_writer_threshold: 32 * 1024,
        }
    }
}

#[derive(Debug)]
struct Block {
    data: Arc<[u8]>,
    start: usize,
}

impl Block {
    fn len(&self) -> usize {
        self.data.len() - self.start
    }
}

#[derive(Debug, Default)]
struct PipeState {
    blocks: VecDeque<Block>,
    buffered: usize,
    consumed_offset: u64,
    examined_offset: u64,
    writer_done: bool,
    completion_error: Option<Error>,
    reader_done: bool,
    read_canceled: bool,
}

struct Shared {
    state: Mutex<PipeState>,
    read_ready: Event,
    write_ready: Event,
    options: PipeOptions,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap()
    }
}

/// A bounded single-producer single-consumer byte pipe
///
/// One task writes and flushes through a [`PipeWriter`], another reads
/// through a [`PipeReader`]; back-pressure follows [`PipeOptions`]. Cursors
/// are absolute offsets into the byte stream that has passed through the
/// pipe, which makes re-advancing to an already released cursor a no-op.
pub struct Pipe {
    shared: Arc<Shared>,
}

impl Pipe {
    /// a pipe with the provided thresholds
    pub fn new(options: PipeOptions) -> Self {
        debug_assert!(
            options.pause_writer_threshold == 0
                || (1..=options.pause_writer_threshold).contains(&options.resume_writer_threshold),
            "resume threshold must be between 1 and the pause threshold"
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PipeState::default()),
                read_ready: Event::new(),
                write_ready: Event::new(),
                options,
            }),
        }
    }

    /// the write half. The pipe expects a single writer.
    pub fn writer(&self) -> PipeWriter {
        PipeWriter {
            shared: Arc::clone(&self.shared),
            staging: Vec::new(),
        }
    }

    /// the read half. The pipe expects a single reader.
    pub fn reader(&self) -> PipeReader {
        PipeReader {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns the pipe to pristine state so it can carry another body.
    ///
    /// # Panics
    ///
    /// Panics if either side has not yet completed.
    pub fn reset(&self) {
        let mut state = self.shared.state();
        assert!(
            state.writer_done && state.reader_done,
            "pipe reset before both sides completed"
        );
        *state = PipeState::default();
    }
}

/// writes `$name` and the buffered/done summary of the shared state
macro_rules! fmt_with_state {
    ($name:ident) => {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            let state = self.shared.state();
            f.debug_struct(stringify!($name))
                .field("buffered", &state.buffered)
                .field("writer_done", &state.writer_done)
                .field("reader_done", &state.reader_done)
                .finish()
        }
    };
}

impl Debug for Pipe {
    fmt_with_state!(Pipe);
}

/// One contiguous piece of a [`ReadView`]
#[derive(Clone)]
pub struct Segment {
    data: Arc<[u8]>,
    range: Range<usize>,
}

impl Segment {
    /// the bytes of this segment
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.range.clone()]
    }
}

impl Debug for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("len", &self.range.len())
            .finish()
    }
}

/// A snapshot of the currently buffered, unconsumed bytes of a pipe
///
/// Segments are cheap clones of the pipe's internal blocks; no bytes are
/// copied. `offset` anchors the view in the pipe's absolute byte stream so
/// positions within the view translate to [`PipeReader::advance_to`]
/// cursors.
#[derive(Clone)]
pub struct ReadView {
    offset: u64,
    segments: SmallVec<[Segment; 2]>,
    len: usize,
    is_completed: bool,
    is_canceled: bool,
}

impl ReadView {
    /// absolute stream offset of the first byte of this view
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// absolute stream offset just past this view
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }

    /// number of bytes in the view
    pub fn len(&self) -> usize {
        self.len
    }

    /// true when the view holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// true when the writer has completed; no bytes will ever follow this
    /// view
    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    /// true when this view was produced by
    /// [`PipeReader::cancel_pending_read`] rather than by data arriving
    pub fn is_canceled(&self) -> bool {
        self.is_canceled
    }

    /// the view's contiguous pieces, in stream order
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.segments.iter().map(Segment::as_slice)
    }

    /// the view as parser input
    pub fn as_input(&self) -> Segments<'_> {
        Segments::new(self.segments())
    }

    /// copies the view into one contiguous buffer
    pub fn to_vec(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(self.len);
        for segment in self.segments() {
            vec.extend_from_slice(segment);
        }
        vec
    }
}

impl Debug for ReadView {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadView")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("segments", &self.segments.len())
            .field("is_completed", &self.is_completed)
            .field("is_canceled", &self.is_canceled)
            .finish()
    }
}

/// outcome of a [`PipeWriter::flush`]
#[derive(Debug, Clone, Copy)]
pub struct FlushOutcome {
    /// the reader has completed; the flushed bytes were discarded and no
    /// further writes will be observed
    pub is_completed: bool,
}

/// The write half of a [`Pipe`]
///
/// `write` stages bytes without suspending; `flush` commits them and is the
/// suspension point where back-pressure is applied.
pub struct PipeWriter {
    shared: Arc<Shared>,
    staging: Vec<u8>,
}

impl PipeWriter {
    /// stage `bytes` for the next flush. Never suspends.
    pub fn write(&mut self, bytes: &[u8]) {
        self.staging.extend_from_slice(bytes);
    }

    /// Commit staged bytes, making them observable to the reader, then
    /// suspend while the pipe holds at least `pause_writer_threshold`
    /// unconsumed bytes.
    pub async fn flush(&mut self) -> FlushOutcome {
        let paused = {
            let mut state = self.shared.state();
            if state.reader_done {
                self.staging.clear();
                return FlushOutcome { is_completed: true };
            }
            commit(&mut state, &mut self.staging);
            let pause = self.shared.options.pause_writer_threshold;
            pause != 0 && state.buffered >= pause
        };
        self.shared.read_ready.notify(usize::MAX);
        if !paused {
            return FlushOutcome {
                is_completed: false,
            };
        }
        loop {
            let listener = self.shared.write_ready.listen();
            {
                let state = self.shared.state();
                if state.reader_done {
                    return FlushOutcome { is_completed: true };
                }
                if state.buffered < self.shared.options.resume_writer_threshold {
                    return FlushOutcome {
                        is_completed: false,
                    };
                }
            }
            listener.await;
        }
    }

    /// Signal that no further bytes will be written, with the error the
    /// reader should observe, if any.
    ///
    /// Staged bytes are committed on a clean completion and discarded on an
    /// error completion, where the error supersedes them.
    pub fn complete(&mut self, error: Option<Error>) {
        let mut state = self.shared.state();
        if error.is_none() && !state.reader_done {
            commit(&mut state, &mut self.staging);
        } else {
            self.staging.clear();
        }
        state.writer_done = true;
        state.completion_error = error;
        drop(state);
        self.shared.read_ready.notify(usize::MAX);
        self.shared.write_ready.notify(usize::MAX);
    }
}

impl crate::PayloadSink for PipeWriter {
    fn write(&mut self, bytes: &[u8]) {
        PipeWriter::write(self, bytes);
    }
}

fn commit(state: &mut PipeState, staging: &mut Vec<u8>) {
    if !staging.is_empty() {
        let data: Arc<[u8]> = mem::take(staging).into();
        state.buffered += data.len();
        state.blocks.push_back(Block { data, start: 0 });
    }
}

impl Debug for PipeWriter {
    fmt_with_state!(PipeWriter);
}

/// The read half of a [`Pipe`]
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Waits until the pipe holds bytes past the examined cursor, the
    /// writer has completed, or a pending read is canceled, and returns a
    /// snapshot of all unconsumed bytes.
    ///
    /// # Errors
    ///
    /// Once the writer has completed with an error, every read returns that
    /// error.
    pub async fn read(&self) -> Result<ReadView> {
        loop {
            if let Some(view) = self.poll_view()? {
                return Ok(view);
            }
            let listener = self.shared.read_ready.listen();
            if let Some(view) = self.poll_view()? {
                return Ok(view);
            }
            listener.await;
        }
    }

    /// The non-suspending variant of [`read`][Self::read]: `None` when a
    /// read would have suspended.
    pub fn try_read(&self) -> Result<Option<ReadView>> {
        self.poll_view()
    }

    fn poll_view(&self) -> Result<Option<ReadView>> {
        let mut state = self.shared.state();
        if state.writer_done {
            if let Some(error) = &state.completion_error {
                return Err(error.clone());
            }
        }
        let canceled = mem::take(&mut state.read_canceled);
        let committed_end = state.consumed_offset + state.buffered as u64;
        if canceled || state.writer_done || committed_end > state.examined_offset {
            let segments = state
                .blocks
                .iter()
                .map(|block| Segment {
                    data: Arc::clone(&block.data),
                    range: block.start..block.data.len(),
                })
                .collect();
            Ok(Some(ReadView {
                offset: state.consumed_offset,
                segments,
                len: state.buffered,
                is_completed: state.writer_done,
                is_canceled: canceled,
            }))
        } else {
            Ok(None)
        }
    }

    /// [`advance_to`][Self::advance_to] with `examined` = `consumed`
    pub fn advance(&self, consumed: u64) {
        self.advance_to(consumed, consumed);
    }

    /// Release bytes up to the absolute `consumed` cursor and record that
    /// bytes up to `examined` have been inspected; the next read suspends
    /// until data arrives past `examined`. Cursors at or behind the current
    /// ones are no-ops.
    ///
    /// # Panics
    ///
    /// Panics if `consumed > examined` or either cursor is past the end of
    /// the buffered data.
    pub fn advance_to(&self, consumed: u64, examined: u64) {
        assert!(consumed <= examined, "consumed cursor past examined cursor");
        let mut state = self.shared.state();
        let committed_end = state.consumed_offset + state.buffered as u64;
        assert!(
            examined <= committed_end,
            "examined cursor past the end of buffered data"
        );
        let mut release = consumed.saturating_sub(state.consumed_offset) as usize;
        state.buffered -= release;
        while release > 0 {
            let block = state.blocks.front_mut().unwrap();
            if block.len() <= release {
                release -= block.len();
                state.blocks.pop_front();
            } else {
                block.start += release;
                release = 0;
            }
        }
        state.consumed_offset = state.consumed_offset.max(consumed);
        state.examined_offset = state.examined_offset.max(examined);
        let options = &self.shared.options;
        let resumed = options.pause_writer_threshold == 0
            || state.buffered < options.resume_writer_threshold;
        drop(state);
        if resumed {
            self.shared.write_ready.notify(usize::MAX);
        }
    }

    /// Wake a suspended read with a canceled, non-error result. The wake is
    /// consumed by the next read if none is pending.
    pub fn cancel_pending_read(&self) {
        self.shared.state().read_canceled = true;
        self.shared.read_ready.notify(usize::MAX);
    }

    /// Signal that nothing further will be read. A writer suspended in
    /// flush wakes and observes `is_completed`.
    pub fn complete(&self) {
        self.shared.state().reader_done = true;
        self.shared.write_ready.notify(usize::MAX);
    }
}

impl Debug for PipeReader {
    fmt_with_state!(PipeReader);
}
