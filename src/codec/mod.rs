//! Decoding primitives for chunked request bodies
//!
//! # Components
//!
//! - [`ChunkParser`]: resumable state machine over the chunked transfer
//!   encoding grammar (RFC 7230)
//! - [`SegmentedBuf`]: absolute-position view over the transport's possibly
//!   non-contiguous read buffers
//! - [`PayloadSink`]: output seam the parser emits decoded payload through

mod chunk_parser;
mod segmented;

pub use chunk_parser::ChunkParser;
pub use chunk_parser::PayloadSink;
pub use segmented::SegmentedBuf;
