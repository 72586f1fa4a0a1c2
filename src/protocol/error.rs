//! Error types for request body decoding
//!
//! This module provides [`BodyError`], the error type surfaced by every layer
//! of the body pipeline: the chunk parser, the pipe, the pump and the reader
//! surface.
//!
//! The pump captures at most one error per request and reports it through the
//! pipe writer's completion; every subsequent read observes that same error.
//! To allow re-surfacing without boxing, the variants carry owned data (reason
//! strings rather than an `io::Error` source) and the enum derives `Clone`.
use http::StatusCode;
use thiserror::Error;

/// Errors raised while decoding a chunked request body
///
/// The request-fault variants map to an HTTP status through
/// [`status_code`](BodyError::status_code), which the connection loop uses
/// together with the keep-alive flag to decide close-vs-respond policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BodyError {
    /// Malformed chunk size line: non-hex digit, overflow, bare CR, or more
    /// than 10 prefix bytes without a terminator
    #[error("bad chunk size data in request body")]
    BadChunkSizeData,

    /// The two bytes after chunk data were not CRLF
    #[error("bad chunk suffix in request body")]
    BadChunkSuffix,

    /// The transport completed before the chunked body was fully decoded
    #[error("unexpected end of request content")]
    UnexpectedEndOfRequestContent,

    /// The request deadline elapsed while reading the body
    #[error("reading the request body timed out")]
    RequestBodyTimeout,

    /// Cumulative consumed bytes exceeded the configured maximum
    #[error("request body too large, exceed the limit {max_size}")]
    MaxBodySizeExceeded { max_size: u64 },

    /// Malformed trailer header section
    #[error("invalid trailer header: {reason}")]
    InvalidTrailers { reason: String },

    /// Trailer section exceeds the maximum allowed size
    #[error("trailer size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeTrailers { current_size: usize, max_size: usize },

    /// Transport error or peer reset
    #[error("connection aborted: {reason}")]
    ConnectionAborted { reason: String },

    /// The caller's cancellation token fired while a read was suspended
    #[error("request body read canceled")]
    ReadCanceled,

    /// Operation declared for surface parity but intentionally unsupported
    #[error("operation not supported: {operation}")]
    Unsupported { operation: &'static str },
}

impl BodyError {
    /// Creates a new MaxBodySizeExceeded error
    pub fn max_body_size_exceeded(max_size: u64) -> Self {
        Self::MaxBodySizeExceeded { max_size }
    }

    /// Creates a new InvalidTrailers error
    pub fn invalid_trailers<S: ToString>(str: S) -> Self {
        Self::InvalidTrailers { reason: str.to_string() }
    }

    /// Creates a new TooLargeTrailers error
    pub fn too_large_trailers(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeTrailers { current_size, max_size }
    }

    /// Creates a new ConnectionAborted error
    pub fn connection_aborted<S: ToString>(str: S) -> Self {
        Self::ConnectionAborted { reason: str.to_string() }
    }

    /// Creates a new Unsupported error
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    /// The response status a request-fault error maps to
    ///
    /// Returns `None` for errors that are not the client's fault
    /// (aborts, cancellation, unsupported surface operations).
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::BadChunkSizeData
            | Self::BadChunkSuffix
            | Self::UnexpectedEndOfRequestContent
            | Self::InvalidTrailers { .. }
            | Self::TooLargeTrailers { .. } => Some(StatusCode::BAD_REQUEST),
            Self::RequestBodyTimeout => Some(StatusCode::REQUEST_TIMEOUT),
            Self::MaxBodySizeExceeded { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Self::ConnectionAborted { .. } | Self::ReadCanceled | Self::Unsupported { .. } => None,
        }
    }

    /// Returns true if this error represents a malformed or over-limit request
    pub fn is_bad_request(&self) -> bool {
        self.status_code().is_some()
    }
}

impl From<std::io::Error> for BodyError {
    fn from(e: std::io::Error) -> Self {
        Self::ConnectionAborted { reason: e.to_string() }
    }
}
