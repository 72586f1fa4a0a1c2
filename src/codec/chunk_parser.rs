//! Parser for HTTP chunked transfer encoding.
//!
//! This module implements the chunked-body grammar of
//! [RFC 7230 Section 4.1](https://tools.ietf.org/html/rfc7230#section-4.1)
//! as a resumable state machine over a possibly non-contiguous input buffer:
//!
//! - Each chunk starts with its size in hexadecimal, optionally followed by
//!   extensions, then CRLF
//! - Then the chunk data and CRLF
//! - A zero-sized chunk ends the data, optionally followed by trailer
//!   headers, then a final CRLF
//!
//! The parser reports progress through two cursors per invocation:
//! `consumed` (bytes whose disposition is decided and may be released from
//! the input) and `examined` (bytes inspected; the transport need not offer
//! the buffer again until more data arrives past this point). Payload bytes
//! are emitted to a caller-supplied [`PayloadSink`] during the call.

use crate::codec::segmented::SegmentedBuf;
use crate::connection::TrailerParser;
use crate::protocol::BodyError;
use bytes::{Bytes, BytesMut};
use tracing::trace;
use ChunkMode::*;

/// Chunk sizes carry at most 8 hex digits, bounding the size line at 10
/// bytes including its CRLF.
const MAX_CHUNK_SIZE_DIGITS: usize = 8;

/// Chunk sizes must fit a 32-bit signed integer.
const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;

/// Output seam for decoded payload bytes.
///
/// The parser pushes zero-copy sub-slices of the input segments; a sink may
/// retain them or copy them into its own storage.
pub trait PayloadSink {
    fn push(&mut self, data: Bytes);
}

impl PayloadSink for Vec<Bytes> {
    fn push(&mut self, data: Bytes) {
        Vec::push(self, data);
    }
}

impl PayloadSink for BytesMut {
    fn push(&mut self, data: Bytes) {
        self.extend_from_slice(&data);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkMode {
    /// Read the chunk size line
    Prefix,
    /// Skip chunk extensions
    Extension,
    /// Read chunk data
    Data,
    /// Read CRLF after chunk data
    Suffix,
    /// Read the final CRLF, or detect trailer headers
    Trailer,
    /// Delegate trailer headers to the header parser
    TrailerHeaders,
    /// Final state after the closing CRLF
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// The mode made progress; keep looping over the same buffer
    Advanced,
    /// The buffer ran out mid-mode; the caller must wait for more bytes
    NeedMoreData,
}

macro_rules! or_bad_size {
    ($e:expr) => {
        match $e {
            Some(val) => val,
            None => return Err(BodyError::BadChunkSizeData),
        }
    };
}

/// A resumable decoder for chunked transfer encoded request bodies.
///
/// One instance decodes one request body. The same parser state is driven
/// across successive transport buffers: bytes the parser did not consume are
/// re-offered (together with newly arrived bytes) on the next invocation.
pub struct ChunkParser<T> {
    mode: ChunkMode,
    /// Remaining data bytes of the current chunk
    input_length: u32,
    /// All input bytes consumed for this body, framing included
    consumed_bytes: u64,
    max_body_size: Option<u64>,
    trailer_parser: T,
    /// Cursors of the current invocation, absolute within the offered buffer
    consumed: usize,
    examined: usize,
}

impl<T: TrailerParser> ChunkParser<T> {
    /// Creates a parser in the Prefix state.
    ///
    /// `max_body_size` caps the cumulative consumed bytes (framing included);
    /// `None` disables the check. Trailer headers are delegated to
    /// `trailer_parser`.
    pub fn new(max_body_size: Option<u64>, trailer_parser: T) -> Self {
        Self {
            mode: Prefix,
            input_length: 0,
            consumed_bytes: 0,
            max_body_size,
            trailer_parser,
            consumed: 0,
            examined: 0,
        }
    }

    /// Decodes as much of `buffer` as possible, emitting payload to `sink`.
    ///
    /// # Returns
    /// - `Ok(true)` when the body is complete
    /// - `Ok(false)` when more data is needed
    /// - `Err(_)` on malformed input or an exceeded limit
    ///
    /// The `consumed`/`examined` cursors for this invocation are available
    /// from [`cursors`](Self::cursors) afterwards, in every case including
    /// the error one, so the caller can always release input accordingly.
    pub fn parse(&mut self, buffer: &SegmentedBuf<'_>, sink: &mut dyn PayloadSink) -> Result<bool, BodyError> {
        self.consumed = 0;
        self.examined = 0;

        loop {
            let step = match self.mode {
                Prefix => self.parse_chunked_prefix(buffer)?,
                Extension => self.parse_extension(buffer)?,
                Data => self.read_chunked_data(buffer, sink)?,
                Suffix => self.parse_chunked_suffix(buffer)?,
                Trailer => self.parse_chunked_trailer(buffer)?,
                TrailerHeaders => self.parse_trailer_headers(buffer)?,
                Complete => {
                    trace!("finished reading chunked body");
                    return Ok(true);
                }
            };

            if step == Step::NeedMoreData {
                return Ok(false);
            }
        }
    }

    /// The `(consumed, examined)` cursors recorded by the last `parse` call.
    pub fn cursors(&self) -> (usize, usize) {
        (self.consumed, self.examined)
    }

    /// Returns true once the closing CRLF has been consumed.
    pub fn is_complete(&self) -> bool {
        self.mode == Complete
    }

    /// Total input bytes consumed for this body so far, framing included.
    pub fn consumed_bytes(&self) -> u64 {
        self.consumed_bytes
    }

    pub fn trailer_parser(&self) -> &T {
        &self.trailer_parser
    }

    /// Reads and parses the chunk size line.
    ///
    /// The size is 1 to 8 hex digits, terminated by `;` (extensions follow)
    /// or CRLF. Accumulation is checked and capped at `0x7FFF_FFFF`.
    ///
    /// # State Transitions
    /// - On `<digits> ;`: enter Extension
    /// - On `<digits> CRLF` with size > 0: enter Data
    /// - On `<digits> CRLF` with size 0: enter Trailer
    /// - A partial line is left unconsumed and re-parsed whole after refill
    /// - Non-hex lead byte, bare CR, overflow, or a 9th digit:
    ///   `BadChunkSizeData`
    fn parse_chunked_prefix(&mut self, buffer: &SegmentedBuf<'_>) -> Result<Step, BodyError> {
        let start = self.consumed;
        let mut size: u32 = 0;
        let mut pos = start;

        loop {
            let Some(byte) = buffer.get(pos) else {
                self.examined = buffer.len();
                return Ok(Step::NeedMoreData);
            };

            let digit = match byte {
                b @ b'0'..=b'9' => Some((b - b'0') as u32),
                b @ b'a'..=b'f' => Some((b + 10 - b'a') as u32),
                b @ b'A'..=b'F' => Some((b + 10 - b'A') as u32),
                _ => None,
            };

            let Some(digit) = digit else {
                // at least one digit must precede the terminator
                if pos == start {
                    return Err(BodyError::BadChunkSizeData);
                }
                return match byte {
                    b';' => {
                        self.input_length = size;
                        self.release(pos + 1)?;
                        self.mode = Extension;
                        Ok(Step::Advanced)
                    }
                    b'\r' => match buffer.get(pos + 1) {
                        None => {
                            // CR at buffer end: wait for the LF
                            self.examined = buffer.len();
                            Ok(Step::NeedMoreData)
                        }
                        Some(b'\n') => {
                            trace!(size, "parsed chunk size");
                            self.input_length = size;
                            self.release(pos + 2)?;
                            self.mode = if size > 0 { Data } else { Trailer };
                            Ok(Step::Advanced)
                        }
                        Some(_) => Err(BodyError::BadChunkSizeData),
                    },
                    _ => Err(BodyError::BadChunkSizeData),
                };
            };

            size = or_bad_size!(size.checked_mul(16));
            size = or_bad_size!(size.checked_add(digit));
            if size > MAX_CHUNK_SIZE {
                return Err(BodyError::BadChunkSizeData);
            }
            pos += 1;
            if pos - start > MAX_CHUNK_SIZE_DIGITS {
                return Err(BodyError::BadChunkSizeData);
            }
        }
    }

    /// Skips chunk extensions up to the terminating CRLF.
    ///
    /// Extensions are tolerated and discarded; their bytes still count
    /// against the body size limit.
    ///
    /// # State Transitions
    /// - On CRLF: enter Data (size > 0) or Trailer (size 0)
    /// - A CR followed by any other byte is part of the extension; scanning
    ///   resumes after it
    /// - A CR as the final buffered byte stays unconsumed so it can pair
    ///   with an LF arriving in the next refill
    fn parse_extension(&mut self, buffer: &SegmentedBuf<'_>) -> Result<Step, BodyError> {
        let start = self.consumed;

        let Some(cr) = buffer.find(b'\r', start) else {
            self.release(buffer.len())?;
            return Ok(Step::NeedMoreData);
        };

        match buffer.get(cr + 1) {
            None => {
                self.release(cr)?;
                self.examined = buffer.len();
                Ok(Step::NeedMoreData)
            }
            Some(b'\n') => {
                self.release(cr + 2)?;
                self.mode = if self.input_length > 0 { Data } else { Trailer };
                Ok(Step::Advanced)
            }
            Some(_) => {
                self.release(cr + 1)?;
                Ok(Step::Advanced)
            }
        }
    }

    /// Emits chunk data to the sink.
    ///
    /// Takes `min(available, input_length)` bytes, as zero-copy slices of the
    /// underlying segments.
    ///
    /// # State Transitions
    /// - When the chunk is fully read: enter Suffix
    /// - Otherwise: wait for more data
    fn read_chunked_data(&mut self, buffer: &SegmentedBuf<'_>, sink: &mut dyn PayloadSink) -> Result<Step, BodyError> {
        let start = self.consumed;
        let available = buffer.len() - start;
        if available == 0 {
            self.examined = buffer.len();
            return Ok(Step::NeedMoreData);
        }

        let take = std::cmp::min(available, self.input_length as usize);
        trace!(len = take, "read chunked data");
        for slice in buffer.slices(start, start + take) {
            sink.push(slice);
        }
        self.input_length -= take as u32;
        self.release(start + take)?;

        if self.input_length == 0 {
            self.mode = Suffix;
            Ok(Step::Advanced)
        } else {
            self.examined = buffer.len();
            Ok(Step::NeedMoreData)
        }
    }

    /// Validates the CRLF after chunk data.
    ///
    /// # State Transitions
    /// - On CRLF: re-enter Prefix for the next chunk
    /// - Fewer than two bytes buffered: wait
    /// - Anything else: `BadChunkSuffix`
    fn parse_chunked_suffix(&mut self, buffer: &SegmentedBuf<'_>) -> Result<Step, BodyError> {
        let start = self.consumed;
        if buffer.len() - start < 2 {
            self.examined = buffer.len();
            return Ok(Step::NeedMoreData);
        }

        if buffer.get(start) == Some(b'\r') && buffer.get(start + 1) == Some(b'\n') {
            self.release(start + 2)?;
            self.mode = Prefix;
            Ok(Step::Advanced)
        } else {
            Err(BodyError::BadChunkSuffix)
        }
    }

    /// Handles the bytes after the last chunk.
    ///
    /// # State Transitions
    /// - On CRLF: enter Complete
    /// - Fewer than two bytes buffered: wait
    /// - Anything else: enter TrailerHeaders without consuming
    fn parse_chunked_trailer(&mut self, buffer: &SegmentedBuf<'_>) -> Result<Step, BodyError> {
        let start = self.consumed;
        if buffer.len() - start < 2 {
            self.examined = buffer.len();
            return Ok(Step::NeedMoreData);
        }

        if buffer.get(start) == Some(b'\r') && buffer.get(start + 1) == Some(b'\n') {
            self.release(start + 2)?;
            self.mode = Complete;
        } else {
            self.mode = TrailerHeaders;
        }
        Ok(Step::Advanced)
    }

    /// Delegates trailer headers to the header parser collaborator.
    ///
    /// The collaborator reports completion through its own consumed/examined
    /// contract, translated here back into absolute buffer positions.
    fn parse_trailer_headers(&mut self, buffer: &SegmentedBuf<'_>) -> Result<Step, BodyError> {
        let start = self.consumed;
        if start >= buffer.len() {
            self.examined = buffer.len();
            return Ok(Step::NeedMoreData);
        }

        let tail = buffer.coalesce(start);
        let progress = self.trailer_parser.take_message_headers(&tail)?;
        debug_assert!(progress.consumed <= progress.examined && progress.examined <= tail.len());

        self.add_and_check_consumed_bytes(progress.consumed)?;
        self.consumed = start + progress.consumed;
        self.examined = start + progress.examined;

        if progress.done {
            self.mode = Complete;
            Ok(Step::Advanced)
        } else {
            Ok(Step::NeedMoreData)
        }
    }

    /// Moves both cursors to `to` and accounts the released bytes.
    fn release(&mut self, to: usize) -> Result<(), BodyError> {
        let count = to - self.consumed;
        self.consumed = to;
        self.examined = to;
        self.add_and_check_consumed_bytes(count)
    }

    fn add_and_check_consumed_bytes(&mut self, count: usize) -> Result<(), BodyError> {
        self.consumed_bytes += count as u64;
        if let Some(max) = self.max_body_size {
            if self.consumed_bytes > max {
                return Err(BodyError::max_body_size_exceeded(max));
            }
        }
        Ok(())
    }
}
