use std::{io, sync::Arc};
use thiserror::Error;

/// Concrete errors that occur while decoding a chunked request body
///
/// Decoding errors are reported exactly once, by the pump completing the
/// body pipe, and then surface on every subsequent read. That is why this
/// enum is `Clone`: io errors are held behind an [`Arc`] so the same error
/// can be observed by a read in flight and by any later read.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// the chunk-size line was malformed: a non-hex digit, a size that
    /// overflows a 32-bit signed value, a `\r` not followed by `\n`, or more
    /// than ten bytes without a terminator
    #[error("Malformed chunk size data in request body")]
    BadChunkSizeData,

    /// the two bytes after chunk-data were not CRLF
    #[error("Bad chunk suffix in request body")]
    BadChunkSuffix,

    /// the transport reported completion before the final chunk was decoded
    #[error("Unexpected end of request content")]
    UnexpectedEndOfRequestContent,

    /// the request deadline elapsed while the body was being read
    #[error("Reading the request body timed out")]
    RequestBodyTimeout,

    /// the cumulative bytes consumed for this body exceeded the configured
    /// maximum
    #[error("Request body too long. Maximum {0} bytes")]
    MaxRequestBodySizeExceeded(u64),

    /// the trailer section contained a field httparse could not accept
    #[error("Malformed trailer header fields")]
    InvalidTrailers,

    /// the trailer section exceeded the configured maximum length
    #[error("Trailer header fields longer than allowed. Maximum {0} bytes")]
    TrailersTooLong(usize),

    /// an io error on the underlying transport, such as a disconnect
    #[error(transparent)]
    Io(Arc<io::Error>),

    /// the invoked operation exists for interface parity but is intentionally
    /// not supported on this body reader
    #[error("{0} is not supported on this body reader")]
    Unsupported(&'static str),
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl Error {
    /// The response status this error maps to, when it maps to one.
    ///
    /// Transport-level errors and unsupported-operation errors have no
    /// meaningful status; the connection is usually just closed.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::BadChunkSizeData
            | Self::BadChunkSuffix
            | Self::UnexpectedEndOfRequestContent
            | Self::InvalidTrailers => Some(400),
            Self::RequestBodyTimeout => Some(408),
            Self::MaxRequestBodySizeExceeded(_) => Some(413),
            Self::TrailersTooLong(_) => Some(431),
            Self::Io(_) | Self::Unsupported(_) => None,
        }
    }

    /// true for errors caused by the client sending an unacceptable request,
    /// as opposed to transport failures
    pub fn is_bad_request(&self) -> bool {
        self.status().is_some()
    }

    /// true when this error represents the peer going away rather than a
    /// protocol violation
    pub fn is_connection_abort(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            )
        )
    }
}

/// this crate's result type
pub type Result<T> = std::result::Result<T, Error>;
