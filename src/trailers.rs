use crate::{Error, Result};
use std::sync::{Arc, Mutex};

/// httparse supports up to this many trailer fields per request
const MAX_TRAILER_FIELDS: usize = 64;

/// Outcome of one [`TrailerParser::take_message_headers`] invocation
///
/// `consumed` is the number of bytes the parser has made a final decision
/// about. While `done` is false the examined cursor extends to the end of
/// the offered buffer, so the caller waits for more data before re-offering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailerOutcome {
    /// the trailer section, including its final CRLF, has been fully parsed
    pub done: bool,
    /// bytes of the offered buffer consumed by the parser
    pub consumed: usize,
}

/// The header-parser collaborator used for trailer fields after the final
/// chunk
///
/// Invoked with a contiguous view of all bytes buffered past the last chunk;
/// reinvoked with a longer view each time more data arrives, until it
/// reports `done`.
pub trait TrailerParser: Send + 'static {
    /// parse trailer header fields from `buffer`
    fn take_message_headers(&mut self, buffer: &[u8]) -> Result<TrailerOutcome>;
}

/// The default [`TrailerParser`], backed by [`httparse::parse_headers`]
///
/// Collected fields are shared behind an [`Arc`] so they remain reachable
/// from [`ChunkedBody::trailers`][crate::ChunkedBody::trailers] after the
/// parser itself has moved into the pump.
#[derive(Debug, Clone)]
pub struct Trailers {
    max_len: usize,
    fields: Arc<Mutex<Vec<(String, String)>>>,
}

impl Trailers {
    /// a trailer parser that accepts at most `max_len` bytes of trailer
    /// fields
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            fields: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// the trailer fields collected so far, as name/value pairs in wire
    /// order
    pub fn fields(&self) -> Vec<(String, String)> {
        self.fields.lock().unwrap().clone()
    }
}

impl TrailerParser for Trailers {
    fn take_message_headers(&mut self, buffer: &[u8]) -> Result<TrailerOutcome> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_TRAILER_FIELDS];
        match httparse::parse_headers(buffer, &mut headers) {
            Ok(httparse::Status::Complete((consumed, parsed))) => {
                if consumed > self.max_len {
                    return Err(Error::TrailersTooLong(self.max_len));
                }
                let mut fields = self.fields.lock().unwrap();
                for header in parsed {
                    fields.push((
                        header.name.to_string(),
                        String::from_utf8_lossy(header.value).into_owned(),
                    ));
                }
                Ok(TrailerOutcome {
                    done: true,
                    consumed,
                })
            }
            Ok(httparse::Status::Partial) => {
                if buffer.len() > self.max_len {
                    return Err(Error::TrailersTooLong(self.max_len));
                }
                Ok(TrailerOutcome {
                    done: false,
                    consumed: 0,
                })
            }
            Err(error) => {
                log::debug!("malformed trailer fields: {error}");
                Err(Error::InvalidTrailers)
            }
        }
    }
}
