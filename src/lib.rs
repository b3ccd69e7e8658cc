#![forbid(unsafe_code)]
#![deny(
    clippy::dbg_macro,
    missing_copy_implementations,
    rustdoc::missing_crate_level_docs,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    unused_qualifications
)]

/*!
A streaming decoder for http/1.1 chunked transfer-coding request bodies
(RFC 7230 §4.1).

The decoder couples the connection's read side to an internal bounded pipe:
a pump task reads the transport, runs the [`ChunkParser`] state machine
over whatever segments are on hand, and flushes decoded payload into the
pipe, where application handlers read it through a [`BodyReader`]. The
pipe pauses its writer on any unread byte, so back-pressure from a slow
handler reaches the transport instead of accumulating chunks in memory.

[`ChunkedBody`] owns one request's lifecycle: the pump starts on the first
read, [`ChunkedBody::consume`] drains an unread remainder at request end so
the connection can be kept alive, and [`ChunkedBody::stop`] cancels and
tears down. Decoding errors are reported once, by the pump completing the
pipe, and surface on every subsequent read; the mapping to response status
lives on [`Error`].

The crate does not do socket I/O and does not parse request heads; those
stay behind the [`TransportReader`], [`ConnectionContext`],
[`TimeoutControl`], and [`TrailerParser`] seams.
*/

mod body;
pub use body::ChunkedBody;

mod body_reader;
pub use body_reader::BodyReader;

mod chunk_parser;
pub use chunk_parser::{ChunkParser, ParseOutcome, PayloadSink};

mod connection;
pub use connection::{BoxedTask, ConnectionContext};

mod error;
pub use error::{Error, Result};

mod http_config;
pub use http_config::{DEFAULT_CONFIG, HttpConfig};

mod pipe;
pub use pipe::{FlushOutcome, Pipe, PipeOptions, PipeReader, PipeWriter, ReadView, Segment};

mod pump;

mod segmented;
pub use segmented::Segments;

mod timeout;
pub use timeout::{TimeoutControl, TimeoutReason};

mod trailers;
pub use trailers::{TrailerOutcome, TrailerParser, Trailers};

mod transport;
pub use transport::TransportReader;
