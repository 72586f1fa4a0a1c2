//! Read-only view over a possibly non-contiguous byte sequence.
//!
//! The transport read side yields one or more [`Bytes`] segments per read.
//! [`SegmentedBuf`] lets the chunk parser address that sequence through
//! absolute byte positions without concatenating it: byte access and byte
//! search walk the segments, and payload ranges are emitted as zero-copy
//! sub-slices of the original segments.

use bytes::{Bytes, BytesMut};

/// A borrowed sequence of byte segments addressed by absolute position.
///
/// Positions run from 0 to [`len`](SegmentedBuf::len) across segment
/// boundaries. All range arguments follow the usual half-open convention.
pub struct SegmentedBuf<'a> {
    segments: &'a [Bytes],
    len: usize,
}

impl<'a> SegmentedBuf<'a> {
    pub fn new(segments: &'a [Bytes]) -> Self {
        let len = segments.iter().map(|s| s.len()).sum();
        Self { segments, len }
    }

    /// Total number of bytes across all segments.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the byte at `pos`, or `None` past the end.
    pub fn get(&self, pos: usize) -> Option<u8> {
        let (seg, offset) = self.locate(pos)?;
        Some(self.segments[seg][offset])
    }

    /// Position of the first occurrence of `byte` at or after `from`.
    pub fn find(&self, byte: u8, from: usize) -> Option<usize> {
        let (mut seg, mut offset) = self.locate(from)?;
        let mut base = from - offset;
        while seg < self.segments.len() {
            let segment = &self.segments[seg];
            if let Some(i) = segment[offset..].iter().position(|&b| b == byte) {
                return Some(base + offset + i);
            }
            base += segment.len();
            offset = 0;
            seg += 1;
        }
        None
    }

    /// Yields the range `start..end` as zero-copy sub-slices of the
    /// underlying segments, in order.
    pub fn slices(&self, start: usize, end: usize) -> impl Iterator<Item = Bytes> + 'a {
        debug_assert!(start <= end && end <= self.len);
        let mut remaining = end - start;
        let mut pos = start;
        let segments = self.segments;
        let mut seg = 0;
        let mut base = 0;
        std::iter::from_fn(move || {
            while remaining > 0 && seg < segments.len() {
                let segment = &segments[seg];
                if pos >= base + segment.len() {
                    base += segment.len();
                    seg += 1;
                    continue;
                }
                let offset = pos - base;
                let take = std::cmp::min(segment.len() - offset, remaining);
                pos += take;
                remaining -= take;
                return Some(segment.slice(offset..offset + take));
            }
            None
        })
    }

    /// Returns the bytes from `from` to the end as one contiguous [`Bytes`].
    ///
    /// Zero-copy when the tail lies within a single segment; otherwise the
    /// tail is copied once. Used to hand the trailer section to the header
    /// parser collaborator, which needs contiguous input.
    pub fn coalesce(&self, from: usize) -> Bytes {
        let Some((seg, offset)) = self.locate(from) else {
            return Bytes::new();
        };
        if seg == self.segments.len() - 1 {
            return self.segments[seg].slice(offset..);
        }
        let mut out = BytesMut::with_capacity(self.len - from);
        out.extend_from_slice(&self.segments[seg][offset..]);
        for segment in &self.segments[seg + 1..] {
            out.extend_from_slice(segment);
        }
        out.freeze()
    }

    /// Maps an absolute position onto (segment index, offset in segment).
    fn locate(&self, pos: usize) -> Option<(usize, usize)> {
        if pos >= self.len {
            return None;
        }
        let mut base = 0;
        for (i, segment) in self.segments.iter().enumerate() {
            if pos < base + segment.len() {
                return Some((i, pos - base));
            }
            base += segment.len();
        }
        None
    }
}
