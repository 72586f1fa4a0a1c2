use crate::protocol::BodyError;

/// The enclosing connection, as seen by the body core.
///
/// Everything here is owned by the outer HTTP/1 connection loop; the body
/// core only signals into it.
pub trait ConnectionContext: Send + Sync {
    /// Invoked at most once, when the first transport read of the body did
    /// not complete synchronously: the client is waiting, so an interim
    /// `100 Continue` may be produced now.
    fn try_produce_continue(&self);

    /// Records that the request failed with a client fault, so the
    /// connection loop responds with the matching status instead of
    /// processing further.
    fn set_bad_request_state(&self, error: &BodyError);

    /// Connection identifier attached to body-core log events.
    fn connection_id(&self) -> &str;
}
