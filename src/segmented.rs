use memchr::memchr;
use smallvec::SmallVec;
use std::{borrow::Cow, ops::Range};

/// A read-only view over a possibly non-contiguous sequence of bytes
///
/// The transport read side hands the decoder whatever segments it has on
/// hand; [`ChunkParser`][crate::ChunkParser] operates on them through this
/// view without concatenating. Offsets are relative to the start of the
/// view.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    parts: SmallVec<[&'a [u8]; 4]>,
    len: usize,
}

impl<'a> Segments<'a> {
    /// builds a view from the provided slices, skipping empty ones
    pub fn new(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let parts: SmallVec<[&'a [u8]; 4]> =
            parts.into_iter().filter(|part| !part.is_empty()).collect();
        let len = parts.iter().map(|part| part.len()).sum();
        Self { parts, len }
    }

    /// total number of bytes in the view
    pub fn len(&self) -> usize {
        self.len
    }

    /// true when the view holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// the byte at `index`, if the view is that long
    pub fn byte_at(&self, index: usize) -> Option<u8> {
        let mut index = index;
        for part in &self.parts {
            if index < part.len() {
                return Some(part[index]);
            }
            index -= part.len();
        }
        None
    }

    /// position of the first occurrence of `byte` at or after `from`
    pub fn find(&self, from: usize, byte: u8) -> Option<usize> {
        let mut offset = 0;
        for part in &self.parts {
            let end = offset + part.len();
            if from < end {
                let start = from.saturating_sub(offset);
                if let Some(i) = memchr(byte, &part[start..]) {
                    return Some(offset + start + i);
                }
            }
            offset = end;
        }
        None
    }

    /// calls `f` once per maximal contiguous slice within `range`, in order
    pub fn for_each_slice(&self, range: Range<usize>, mut f: impl FnMut(&'a [u8])) {
        let mut offset = 0;
        for part in &self.parts {
            let end = offset + part.len();
            if range.start < end && range.end > offset {
                let start = range.start.saturating_sub(offset);
                let stop = part.len().min(range.end - offset);
                f(&part[start..stop]);
            }
            offset = end;
        }
    }

    /// the bytes from `from` to the end of the view as one slice, borrowing
    /// when they already are contiguous
    pub fn contiguous(&self, from: usize) -> Cow<'a, [u8]> {
        let mut remaining: SmallVec<[&'a [u8]; 4]> = SmallVec::new();
        let mut offset = 0;
        for part in &self.parts {
            let end = offset + part.len();
            if from < end {
                remaining.push(&part[from.saturating_sub(offset)..]);
            }
            offset = end;
        }
        match remaining.len() {
            0 => Cow::Borrowed(&[]),
            1 => Cow::Borrowed(remaining[0]),
            _ => Cow::Owned(remaining.concat()),
        }
    }
}

impl<'a> From<&'a [u8]> for Segments<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::new([bytes])
    }
}

#[cfg(test)]
mod tests {
    use super::Segments;

    fn segmented(input: &[&'static [u8]]) -> Segments<'static> {
        Segments::new(input.iter().copied())
    }

    #[test]
    fn spans_segment_boundaries() {
        let segments = segmented(&[b"ab", b"", b"cd", b"e"]);
        assert_eq!(segments.len(), 5);
        assert_eq!(segments.byte_at(0), Some(b'a'));
        assert_eq!(segments.byte_at(2), Some(b'c'));
        assert_eq!(segments.byte_at(4), Some(b'e'));
        assert_eq!(segments.byte_at(5), None);
    }

    #[test]
    fn find_searches_from_offset() {
        let segments = segmented(&[b"a\rb", b"\rc"]);
        assert_eq!(segments.find(0, b'\r'), Some(1));
        assert_eq!(segments.find(2, b'\r'), Some(3));
        assert_eq!(segments.find(4, b'\r'), None);
    }

    #[test]
    fn for_each_slice_covers_exact_range() {
        let segments = segmented(&[b"abc", b"def", b"ghi"]);
        let mut collected = Vec::new();
        segments.for_each_slice(2..7, |slice| collected.extend_from_slice(slice));
        assert_eq!(collected, b"cdefg");
    }

    #[test]
    fn contiguous_borrows_single_segment() {
        let segments = segmented(&[b"abc", b"def"]);
        let tail = segments.contiguous(3);
        assert!(matches!(tail, std::borrow::Cow::Borrowed(_)));
        assert_eq!(&*tail, b"def");
        assert_eq!(&*segments.contiguous(1), b"bcdef");
        assert_eq!(&*segments.contiguous(6), b"");
    }
}
