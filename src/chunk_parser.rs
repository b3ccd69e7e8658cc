use crate::{Error, Result, Segments, trailers::TrailerParser};

// chunk-size is at most eight hex digits plus CRLF
const MAX_CHUNK_PREFIX_BYTES: usize = 10;
// eight hex digits, constrained to a 32-bit signed value
const MAX_CHUNK_SIZE: u64 = 0x7fff_ffff;

/// Where decoded chunk-data bytes go during a [`ChunkParser::parse`] call
pub trait PayloadSink {
    /// append `bytes` to the decoded body
    fn write(&mut self, bytes: &[u8]);
}

impl PayloadSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// What one [`ChunkParser::parse`] invocation decided about the offered
/// buffer
///
/// `consumed` bytes may be released; bytes up to `examined` have been
/// inspected and need not be re-offered until more data has arrived past
/// that point. `consumed <= examined <= buffer.len()` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOutcome {
    /// the body, including any trailer section, is fully decoded
    pub done: bool,
    /// bytes of the offered buffer that may be released
    pub consumed: usize,
    /// bytes of the offered buffer that have been inspected
    pub examined: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Mode {
    #[default]
    Prefix,
    Extension,
    Data,
    Suffix,
    Trailer,
    TrailerHeaders,
    Complete,
}

#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    consumed: usize,
    examined: usize,
}

impl Cursor {
    fn advance(&mut self, count: usize) {
        self.consumed += count;
        self.examined = self.consumed;
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Advanced,
    NeedMoreData,
}

/// Incremental decoder for the chunked transfer coding of RFC 7230 §4.1
///
/// The parser is a resumable state machine: it decodes as much of the
/// offered buffer as it can, emits chunk-data to the supplied sink, and
/// reports how far it got through the consumed/examined cursors. Offering
/// the same input split at any byte boundary yields the same decoded body.
///
/// Every byte the parser consumes is counted against the configured maximum
/// request body size; trailer header fields are bounded separately by the
/// [`TrailerParser`] it delegates them to.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParser {
    mode: Mode,
    input_length: u64,
    consumed_bytes: u64,
    max_request_body_size: Option<u64>,
}

impl ChunkParser {
    /// a parser enforcing the provided cumulative body size limit
    pub fn new(max_request_body_size: Option<u64>) -> Self {
        Self {
            mode: Mode::default(),
            input_length: 0,
            consumed_bytes: 0,
            max_request_body_size,
        }
    }

    /// true once the final chunk and any trailer section have been decoded
    pub fn is_complete(&self) -> bool {
        self.mode == Mode::Complete
    }

    /// cumulative input bytes consumed for this body across all invocations
    pub fn consumed_bytes(&self) -> u64 {
        self.consumed_bytes
    }

    /// Decode as much of `buf` as possible, writing chunk-data to `sink` and
    /// delegating any trailer header fields to `trailers`.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the request: malformed framing, a chunk size
    /// over 32-bit signed range, a body over the configured maximum, or a
    /// trailer section the delegate rejects.
    pub fn parse(
        &mut self,
        buf: &Segments<'_>,
        sink: &mut dyn PayloadSink,
        trailers: &mut dyn TrailerParser,
    ) -> Result<ParseOutcome> {
        let mut cursor = Cursor::default();
        loop {
            let step = match self.mode {
                Mode::Prefix => self.parse_prefix(buf, &mut cursor)?,
                Mode::Extension => self.parse_extension(buf, &mut cursor)?,
                Mode::Data => self.parse_data(buf, &mut cursor, sink)?,
                Mode::Suffix => self.parse_suffix(buf, &mut cursor)?,
                Mode::Trailer => self.parse_trailer(buf, &mut cursor)?,
                Mode::TrailerHeaders => self.parse_trailer_headers(buf, &mut cursor, trailers)?,
                Mode::Complete => break,
            };
            if step == Step::NeedMoreData {
                break;
            }
        }
        Ok(ParseOutcome {
            done: self.mode == Mode::Complete,
            consumed: cursor.consumed,
            examined: cursor.examined,
        })
    }

    /// chunk-size [ ";" ... ] CRLF, at least one and at most eight hex
    /// digits
    fn parse_prefix(&mut self, buf: &Segments<'_>, cursor: &mut Cursor) -> Result<Step> {
        let start = cursor.consumed;
        let mut size: u64 = 0;
        let mut digits = 0;
        let mut index = start;
        loop {
            let scanned = index - start;
            if scanned == MAX_CHUNK_PREFIX_BYTES {
                return Err(Error::BadChunkSizeData);
            }
            let Some(byte) = buf.byte_at(index) else {
                cursor.examined = buf.len();
                return Ok(Step::NeedMoreData);
            };
            match byte {
                b';' if digits > 0 => {
                    let prefix_len = scanned + 1;
                    self.add_consumed(prefix_len)?;
                    cursor.advance(prefix_len);
                    self.input_length = size;
                    self.mode = Mode::Extension;
                    return Ok(Step::Advanced);
                }
                b'\r' if digits > 0 => {
                    if scanned + 2 > MAX_CHUNK_PREFIX_BYTES {
                        return Err(Error::BadChunkSizeData);
                    }
                    return match buf.byte_at(index + 1) {
                        None => {
                            cursor.examined = buf.len();
                            Ok(Step::NeedMoreData)
                        }
                        Some(b'\n') => {
                            let prefix_len = scanned + 2;
                            self.add_consumed(prefix_len)?;
                            cursor.advance(prefix_len);
                            self.input_length = size;
                            self.mode = if size > 0 { Mode::Data } else { Mode::Trailer };
                            Ok(Step::Advanced)
                        }
                        Some(_) => Err(Error::BadChunkSizeData),
                    };
                }
                _ => {
                    let digit = match byte {
                        b'0'..=b'9' => byte - b'0',
                        b'a'..=b'f' => byte - b'a' + 10,
                        b'A'..=b'F' => byte - b'A' + 10,
                        _ => return Err(Error::BadChunkSizeData),
                    };
                    size = size * 16 + u64::from(digit);
                    if size > MAX_CHUNK_SIZE {
                        return Err(Error::BadChunkSizeData);
                    }
                    digits += 1;
                    index += 1;
                }
            }
        }
    }

    /// Discard bytes up to CRLF. A `\r` that is the last buffered byte stays
    /// unconsumed and uncounted until the next byte can be seen; a `\r`
    /// followed by anything other than `\n` is counted and skipped.
    fn parse_extension(&mut self, buf: &Segments<'_>, cursor: &mut Cursor) -> Result<Step> {
        let mut scan = cursor.consumed;
        loop {
            let Some(cr) = buf.find(scan, b'\r') else {
                self.add_consumed(buf.len() - scan)?;
                cursor.consumed = buf.len();
                cursor.examined = buf.len();
                return Ok(Step::NeedMoreData);
            };
            if cr + 1 == buf.len() {
                self.add_consumed(cr - scan)?;
                cursor.consumed = cr;
                cursor.examined = buf.len();
                return Ok(Step::NeedMoreData);
            }
            if buf.byte_at(cr + 1) == Some(b'\n') {
                self.add_consumed(cr + 2 - scan)?;
                cursor.consumed = cr + 2;
                cursor.examined = cursor.consumed;
                self.mode = if self.input_length > 0 {
                    Mode::Data
                } else {
                    Mode::Trailer
                };
                return Ok(Step::Advanced);
            }
            self.add_consumed(cr + 1 - scan)?;
            scan = cr + 1;
        }
    }

    fn parse_data(
        &mut self,
        buf: &Segments<'_>,
        cursor: &mut Cursor,
        sink: &mut dyn PayloadSink,
    ) -> Result<Step> {
        let available = (buf.len() - cursor.consumed) as u64;
        let count = available.min(self.input_length) as usize;
        if count > 0 {
            self.add_consumed(count)?;
            buf.for_each_slice(cursor.consumed..cursor.consumed + count, |slice| {
                sink.write(slice);
            });
            self.input_length -= count as u64;
            cursor.advance(count);
        }
        if self.input_length == 0 {
            self.mode = Mode::Suffix;
            Ok(Step::Advanced)
        } else {
            cursor.examined = buf.len();
            Ok(Step::NeedMoreData)
        }
    }

    /// exactly CRLF after chunk-data
    fn parse_suffix(&mut self, buf: &Segments<'_>, cursor: &mut Cursor) -> Result<Step> {
        if buf.len() - cursor.consumed < 2 {
            cursor.examined = buf.len();
            return Ok(Step::NeedMoreData);
        }
        if buf.byte_at(cursor.consumed) == Some(b'\r')
            && buf.byte_at(cursor.consumed + 1) == Some(b'\n')
        {
            self.add_consumed(2)?;
            cursor.advance(2);
            self.mode = Mode::Prefix;
            Ok(Step::Advanced)
        } else {
            Err(Error::BadChunkSuffix)
        }
    }

    /// after the final chunk: CRLF completes the body, anything else is the
    /// start of trailer header fields
    fn parse_trailer(&mut self, buf: &Segments<'_>, cursor: &mut Cursor) -> Result<Step> {
        if buf.len() - cursor.consumed < 2 {
            cursor.examined = buf.len();
            return Ok(Step::NeedMoreData);
        }
        if buf.byte_at(cursor.consumed) == Some(b'\r')
            && buf.byte_at(cursor.consumed + 1) == Some(b'\n')
        {
            self.add_consumed(2)?;
            cursor.advance(2);
            self.mode = Mode::Complete;
        } else {
            self.mode = Mode::TrailerHeaders;
        }
        Ok(Step::Advanced)
    }

    fn parse_trailer_headers(
        &mut self,
        buf: &Segments<'_>,
        cursor: &mut Cursor,
        trailers: &mut dyn TrailerParser,
    ) -> Result<Step> {
        let remaining = buf.contiguous(cursor.consumed);
        let outcome = trailers.take_message_headers(&remaining)?;
        cursor.consumed += outcome.consumed;
        if outcome.done {
            cursor.examined = cursor.consumed;
            self.mode = Mode::Complete;
            Ok(Step::Advanced)
        } else {
            cursor.examined = buf.len();
            Ok(Step::NeedMoreData)
        }
    }

    fn add_consumed(&mut self, count: usize) -> Result<()> {
        self.consumed_bytes += count as u64;
        match self.max_request_body_size {
            Some(max) if self.consumed_bytes > max => Err(Error::MaxRequestBodySizeExceeded(max)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChunkParser, MAX_CHUNK_SIZE, ParseOutcome};
    use crate::{
        Error, Result, Segments,
        trailers::{TrailerOutcome, TrailerParser, Trailers},
    };
    use pretty_assertions::assert_eq;

    struct CountingTrailers {
        inner: Trailers,
        invocations: usize,
        offered: Vec<Vec<u8>>,
    }

    impl CountingTrailers {
        fn new() -> Self {
            Self {
                inner: Trailers::new(32 * 1024),
                invocations: 0,
                offered: Vec::new(),
            }
        }
    }

    impl TrailerParser for CountingTrailers {
        fn take_message_headers(&mut self, buffer: &[u8]) -> Result<TrailerOutcome> {
            self.invocations += 1;
            self.offered.push(buffer.to_vec());
            self.inner.take_message_headers(buffer)
        }
    }

    /// feeds `input` to a fresh parser `split` bytes at a time, maintaining
    /// a pending buffer with the consumed/examined release discipline of a
    /// transport
    fn decode_split(input: &[u8], split: usize) -> Result<(Vec<u8>, ChunkParser, bool)> {
        let mut parser = ChunkParser::new(Some(1 << 20));
        let mut trailers = Trailers::new(32 * 1024);
        let mut sink = Vec::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut offered = 0;
        loop {
            let take = split.min(input.len() - offered);
            pending.extend_from_slice(&input[offered..offered + take]);
            offered += take;
            let outcome = parser.parse(&Segments::from(&pending[..]), &mut sink, &mut trailers)?;
            assert!(outcome.consumed <= outcome.examined);
            assert!(outcome.examined <= pending.len());
            if !outcome.done && offered < input.len() {
                // waiting for a refill must examine everything on hand
                assert_eq!(outcome.examined, pending.len());
            }
            pending.drain(..outcome.consumed);
            if outcome.done {
                return Ok((sink, parser, true));
            }
            if offered == input.len() {
                return Ok((sink, parser, false));
            }
        }
    }

    #[track_caller]
    fn assert_decoded(input: &[u8], payload: &[u8], consumed_bytes: u64) {
        for split in 1..=input.len() {
            let (sink, parser, done) = decode_split(input, split).unwrap();
            assert_eq!(&sink, payload, "split: {split}");
            assert!(done, "split: {split}");
            assert_eq!(parser.consumed_bytes(), consumed_bytes, "split: {split}");
        }
    }

    #[track_caller]
    fn assert_rejected(input: &[u8], expected: fn(&Error) -> bool) {
        for split in 1..=input.len() {
            match decode_split(input, split) {
                Err(error) => assert!(expected(&error), "split: {split}, error: {error:?}"),
                Ok((_, _, done)) => panic!("split {split} unexpectedly succeeded (done: {done})"),
            }
        }
    }

    #[test]
    fn single_small_chunk() {
        assert_decoded(b"5\r\nHello\r\n0\r\n\r\n", b"Hello", 15);
    }

    #[test]
    fn several_chunks() {
        assert_decoded(
            b"5\r\n12345\r\n1\r\na\r\n2\r\nbc\r\n3\r\ndef\r\n0\r\n\r\n",
            b"12345abcdef",
            36,
        );
    }

    #[test]
    fn chunks_with_extensions() {
        assert_decoded(b"3;name=val\r\nfoo\r\n4;\r\nbar!\r\n0\r\n\r\n", b"foobar!", 32);
    }

    #[test]
    fn zero_length_body() {
        assert_decoded(b"0\r\n\r\n", b"", 5);
    }

    #[test]
    fn extension_cr_not_followed_by_lf_resumes_scanning() {
        assert_decoded(b"1;a\rb\r\nX\r\n0\r\n\r\n", b"X", 15);
        assert_decoded(b"1;\r\r\r\r\n_\r\n0\r\n\r\n", b"_", 15);
    }

    #[test]
    fn uppercase_and_lowercase_sizes() {
        assert_decoded(b"A\r\n0123456789\r\n0\r\n\r\n", b"0123456789", 20);
        assert_decoded(b"a\r\n0123456789\r\n0\r\n\r\n", b"0123456789", 20);
    }

    #[test]
    fn eight_digit_max_size_is_accepted() {
        let mut parser = ChunkParser::new(None);
        let mut sink = Vec::new();
        let mut trailers = Trailers::new(1024);
        let outcome = parser
            .parse(
                &Segments::from(&b"7FFFFFFF\r\nx"[..]),
                &mut sink,
                &mut trailers,
            )
            .unwrap();
        assert_eq!(
            outcome,
            ParseOutcome {
                done: false,
                consumed: 11,
                examined: 11
            }
        );
        assert_eq!(sink, b"x");
        assert_eq!(parser.input_length, MAX_CHUNK_SIZE - 1);
    }

    #[test]
    fn size_overflowing_32_bit_signed_is_rejected() {
        assert_rejected(b"80000000\r\n", |e| matches!(e, Error::BadChunkSizeData));
        assert_rejected(b"100000000\r\n", |e| matches!(e, Error::BadChunkSizeData));
        assert_rejected(b"FFFFFFFFF\r\n", |e| matches!(e, Error::BadChunkSizeData));
    }

    #[test]
    fn unterminated_ten_byte_prefix_is_rejected() {
        assert_rejected(b"0123456789", |e| matches!(e, Error::BadChunkSizeData));
    }

    #[test]
    fn ten_byte_prefix_with_terminator_is_accepted() {
        assert_decoded(b"00000001\r\nz\r\n0\r\n\r\n", b"z", 18);
    }

    #[test]
    fn prefix_must_start_with_a_hex_digit() {
        assert_rejected(b"\r\n", |e| matches!(e, Error::BadChunkSizeData));
        assert_rejected(b";ext\r\n", |e| matches!(e, Error::BadChunkSizeData));
        assert_rejected(b"g\r\n", |e| matches!(e, Error::BadChunkSizeData));
    }

    #[test]
    fn prefix_cr_must_be_followed_by_lf() {
        assert_rejected(b"5\rX", |e| matches!(e, Error::BadChunkSizeData));
    }

    #[test]
    fn bad_chunk_suffix_is_rejected() {
        assert_rejected(b"1\r\nXAB", |e| matches!(e, Error::BadChunkSuffix));
        assert_rejected(b"1\r\nX\rB", |e| matches!(e, Error::BadChunkSuffix));
    }

    #[test]
    fn trailer_headers_are_delegated() {
        let input = b"3\r\nabc\r\n0\r\nX-Trace: 1\r\n\r\n";
        for split in 1..=input.len() {
            let mut parser = ChunkParser::new(None);
            let mut trailers = CountingTrailers::new();
            let mut sink = Vec::new();
            let mut pending: Vec<u8> = Vec::new();
            let mut offered = 0;
            loop {
                let take = split.min(input.len() - offered);
                pending.extend_from_slice(&input[offered..offered + take]);
                offered += take;
                let outcome = parser
                    .parse(&Segments::from(&pending[..]), &mut sink, &mut trailers)
                    .unwrap();
                pending.drain(..outcome.consumed);
                if outcome.done {
                    break;
                }
            }
            assert_eq!(&sink, b"abc", "split: {split}");
            assert_eq!(
                trailers.inner.fields(),
                vec![("X-Trace".to_string(), "1".to_string())],
                "split: {split}"
            );
            if split == input.len() {
                // a single full buffer delegates exactly once, with exactly
                // the trailer section
                assert_eq!(trailers.invocations, 1);
                assert_eq!(trailers.offered, vec![b"X-Trace: 1\r\n\r\n".to_vec()]);
            }
        }
    }

    #[test]
    fn body_size_limit_counts_framing_and_data() {
        let input = b"5\r\nHello\r\n0\r\n\r\n";
        let run = |max: u64| {
            let mut parser = ChunkParser::new(Some(max));
            let mut sink = Vec::new();
            let mut trailers = Trailers::new(1024);
            parser.parse(&Segments::from(&input[..]), &mut sink, &mut trailers)
        };
        assert!(run(15).is_ok());
        assert!(matches!(
            run(14),
            Err(Error::MaxRequestBodySizeExceeded(14))
        ));
    }

    #[test]
    fn segmented_input_decodes_identically() {
        let input: &[&[u8]] = &[b"5\r", b"\nHel", b"lo\r\n0", b"\r\n\r\n"];
        let mut parser = ChunkParser::new(None);
        let mut sink = Vec::new();
        let mut trailers = Trailers::new(1024);
        let outcome = parser
            .parse(
                &Segments::new(input.iter().copied()),
                &mut sink,
                &mut trailers,
            )
            .unwrap();
        assert_eq!(
            outcome,
            ParseOutcome {
                done: true,
                consumed: 15,
                examined: 15
            }
        );
        assert_eq!(&sink, b"Hello");
        assert_eq!(parser.consumed_bytes(), 15);
    }

    #[test]
    fn data_split_mid_chunk_examines_everything() {
        let mut parser = ChunkParser::new(None);
        let mut sink = Vec::new();
        let mut trailers = Trailers::new(1024);
        let outcome = parser
            .parse(&Segments::from(&b"5\r\nHel"[..]), &mut sink, &mut trailers)
            .unwrap();
        assert_eq!(
            outcome,
            ParseOutcome {
                done: false,
                consumed: 6,
                examined: 6
            }
        );
        assert_eq!(&sink, b"Hel");
    }

    #[test]
    fn extension_trailing_cr_stays_unconsumed() {
        let mut parser = ChunkParser::new(None);
        let mut sink = Vec::new();
        let mut trailers = Trailers::new(1024);
        let outcome = parser
            .parse(&Segments::from(&b"1;ext\r"[..]), &mut sink, &mut trailers)
            .unwrap();
        // "1;" is consumed entering Extension, "ext" is consumed by the
        // scan, the trailing \r waits for its possible \n
        assert_eq!(
            outcome,
            ParseOutcome {
                done: false,
                consumed: 5,
                examined: 6
            }
        );
        assert_eq!(parser.consumed_bytes(), 5);
    }

    #[test]
    fn bytes_after_the_body_are_left_for_the_next_request() {
        let mut parser = ChunkParser::new(None);
        let mut sink = Vec::new();
        let mut trailers = Trailers::new(1024);
        let outcome = parser
            .parse(
                &Segments::from(&b"1\r\n_\r\n0\r\n\r\nnext request"[..]),
                &mut sink,
                &mut trailers,
            )
            .unwrap();
        assert_eq!(
            outcome,
            ParseOutcome {
                done: true,
                consumed: 11,
                examined: 11
            }
        );
        assert_eq!(&sink, b"_");
    }

    #[test]
    fn empty_buffer_decides_nothing() {
        let mut parser = ChunkParser::new(None);
        let mut sink = Vec::new();
        let mut trailers = Trailers::new(1024);
        let outcome = parser
            .parse(&Segments::from(&b""[..]), &mut sink, &mut trailers)
            .unwrap();
        assert_eq!(
            outcome,
            ParseOutcome {
                done: false,
                consumed: 0,
                examined: 0
            }
        );
    }
}
