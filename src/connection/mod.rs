//! Collaborator seams toward the enclosing connection
//!
//! The body core neither performs transport I/O nor parses headers nor keeps
//! time; those concerns stay with the outer HTTP/1 connection loop and are
//! reached through the traits in this module:
//!
//! - [`TransportRead`]: the connection's buffered read side
//! - [`TrailerParser`]: header parsing, invoked only for trailer fields
//! - [`TimeoutControl`]: deadlines and read-rate accounting
//! - [`ConnectionContext`]: continue signaling, bad-request state, identity

mod context;
mod timeout;
mod trailers;
mod transport;

pub use context::ConnectionContext;
pub use timeout::{TimeoutControl, TimeoutReason};
pub use trailers::{HttparseTrailerParser, TrailerMap, TrailerParser, TrailerProgress};
pub use transport::{TransportRead, TransportReadResult};
