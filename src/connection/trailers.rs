//! Trailer header parsing seam.
//!
//! The chunk parser does not interpret trailer header fields itself; it
//! hands the section after the last chunk to a [`TrailerParser`], which
//! reports progress through the same consumed/examined contract the parser
//! uses toward the transport. [`HttparseTrailerParser`] is the shipped
//! implementation, building an [`http::HeaderMap`] via httparse.

use crate::ensure;
use crate::protocol::BodyError;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use httparse::Status;
use std::sync::{Arc, Mutex};

const MAX_TRAILER_NUM: usize = 32;
const MAX_TRAILER_BYTES: usize = 8 * 1024;

/// Progress report of one [`TrailerParser::take_message_headers`] call.
///
/// Positions are relative to the offered buffer, with
/// `consumed <= examined <= buffer.len()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailerProgress {
    /// True once the whole trailer section, final CRLF included, was parsed
    pub done: bool,
    pub consumed: usize,
    pub examined: usize,
}

/// Parses the trailer header section of a chunked body.
pub trait TrailerParser: Send {
    /// Attempts to parse trailer headers out of `buffer`.
    ///
    /// Incomplete input reports `done = false` with `examined` at the buffer
    /// end; the parser is re-invoked with the unconsumed bytes plus whatever
    /// arrived since.
    fn take_message_headers(&mut self, buffer: &[u8]) -> Result<TrailerProgress, BodyError>;
}

/// Handle through which parsed trailers are observed after body completion.
pub type TrailerMap = Arc<Mutex<HeaderMap>>;

/// httparse-backed trailer parser.
///
/// Consumes nothing until the whole section is buffered, then publishes all
/// fields into a shared [`TrailerMap`] at once.
pub struct HttparseTrailerParser {
    trailers: TrailerMap,
}

impl HttparseTrailerParser {
    pub fn new() -> Self {
        Self { trailers: Arc::new(Mutex::new(HeaderMap::new())) }
    }

    /// The map trailer fields are published into on completion.
    pub fn trailers(&self) -> TrailerMap {
        self.trailers.clone()
    }
}

impl Default for HttparseTrailerParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TrailerParser for HttparseTrailerParser {
    fn take_message_headers(&mut self, buffer: &[u8]) -> Result<TrailerProgress, BodyError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_TRAILER_NUM];

        match httparse::parse_headers(buffer, &mut headers) {
            Ok(Status::Complete((used, parsed))) => {
                ensure!(used <= MAX_TRAILER_BYTES, BodyError::too_large_trailers(used, MAX_TRAILER_BYTES));

                let shared = Bytes::copy_from_slice(&buffer[..used]);
                let base = buffer.as_ptr() as usize;
                let mut map = self.trailers.lock().unwrap_or_else(|e| e.into_inner());
                map.reserve(parsed.len());
                for header in parsed {
                    let name = HeaderName::from_bytes(header.name.as_bytes())
                        .map_err(|e| BodyError::invalid_trailers(e.to_string()))?;
                    // httparse already checked the value is visible ASCII;
                    // slice out of one shared allocation
                    let start = header.value.as_ptr() as usize - base;
                    let value = HeaderValue::from_maybe_shared(shared.slice(start..start + header.value.len()))
                        .map_err(|e| BodyError::invalid_trailers(e.to_string()))?;
                    map.append(name, value);
                }

                Ok(TrailerProgress { done: true, consumed: used, examined: used })
            }
            Ok(Status::Partial) => {
                ensure!(buffer.len() <= MAX_TRAILER_BYTES, BodyError::too_large_trailers(buffer.len(), MAX_TRAILER_BYTES));
                Ok(TrailerProgress { done: false, consumed: 0, examined: buffer.len() })
            }
            Err(e) => Err(BodyError::invalid_trailers(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_trailer_section() {
        let mut parser = HttparseTrailerParser::new();
        let input = b"X-Trace: 1\r\nX-Checksum: abc\r\n\r\n";

        let progress = parser.take_message_headers(input).unwrap();

        assert_eq!(progress, TrailerProgress { done: true, consumed: input.len(), examined: input.len() });
        let trailers = parser.trailers();
        let map = trailers.lock().unwrap();
        assert_eq!(map.get("x-trace").unwrap(), "1");
        assert_eq!(map.get("x-checksum").unwrap(), "abc");
    }

    #[test]
    fn partial_section_consumes_nothing() {
        let mut parser = HttparseTrailerParser::new();
        let input = b"X-Trace: 1\r\n";

        let progress = parser.take_message_headers(input).unwrap();

        assert_eq!(progress, TrailerProgress { done: false, consumed: 0, examined: input.len() });
        assert!(parser.trailers().lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_trailer_rejected() {
        let mut parser = HttparseTrailerParser::new();

        let result = parser.take_message_headers(b"not a header line\x00\r\n\r\n");
        assert!(matches!(result, Err(BodyError::InvalidTrailers { .. })));
    }

    #[test]
    fn oversized_partial_section_rejected() {
        let mut parser = HttparseTrailerParser::new();
        let input = vec![b'a'; MAX_TRAILER_BYTES + 1];

        let result = parser.take_message_headers(&input);
        assert!(matches!(result, Err(BodyError::TooLargeTrailers { .. })));
    }
}
