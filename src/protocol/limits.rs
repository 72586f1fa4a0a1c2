use std::time::Duration;

/// Per-request body limits and drain policy
///
/// The defaults follow common production server settings: a 30 MB body cap
/// and a five second allowance for draining an unread body at request end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyLimits {
    /// Maximum cumulative bytes consumed for one request body, framing
    /// included. `None` disables the check.
    pub max_request_body_size: Option<u64>,

    /// How long `consume` may spend draining an unread body before the
    /// timeout controller fires.
    pub drain_timeout: Duration,

    /// Whether suspended reads open a read-timing window on the timeout
    /// controller.
    pub time_reads: bool,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            max_request_body_size: Some(30_000_000),
            drain_timeout: Duration::from_secs(5),
            time_reads: true,
        }
    }
}

impl BodyLimits {
    /// Returns limits with the body size cap disabled
    pub fn unlimited() -> Self {
        Self { max_request_body_size: None, ..Default::default() }
    }
}
