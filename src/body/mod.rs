//! The request body pipeline
//!
//! # Components
//!
//! - [`ChunkedRequestBody`]: per-request lifecycle and the handler-facing
//!   read surface
//! - [`ReadSnapshot`]: one observation of the readable bytes, with absolute
//!   cursors
//! - `BodyPipe`/`Pump`/`BodyReader` (internal): the bounded hand-off between
//!   the transport-driven producer task and the pulling reader
//!
//! Data flows `transport → pump → parser → pipe → reader`; the pipe's
//! one-byte pause threshold keeps at most one flush batch in flight.

mod chunked_body;
mod pipe;
mod pump;
mod reader;

pub use chunked_body::ChunkedRequestBody;
pub use pipe::ReadSnapshot;
