use thiserror::Error;

/// Errors surfaced by the channel layer.
///
/// `Contention` (locking MPSC only) is deliberately not a variant here: the
/// spec requires contention to be reported as a plain `bool`/`Option` return,
/// never as an exception (see spec.md §7). Fatal invariant violations are
/// not variants either — they abort via `panic!` at the point of detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Logic error: zero-sized token/capacity, undersized buffer, or a
    /// `peek`/`pop`/`push` argument that is structurally out of bounds
    /// (`n`/`pos >= capacity`) regardless of current depth.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Human-readable description of the violated precondition.
        reason: &'static str,
    },

    /// Runtime error: the request was well-formed but there was not enough
    /// data (`pop`/`peek`) or not enough free capacity (`push`) *right now*.
    #[error("out of range: {reason}")]
    OutOfRange {
        /// Human-readable description of the runtime condition.
        reason: &'static str,
    },

    /// A `CommunicationManager` operation failed. Treated as unrecoverable
    /// for the affected channel and re-raised rather than retried.
    #[error("transport error: {reason}")]
    Transport {
        /// Human-readable description of the transport failure.
        reason: &'static str,
    },
}

impl ChannelError {
    pub(crate) const fn invalid_argument(reason: &'static str) -> Self {
        Self::InvalidArgument { reason }
    }

    pub(crate) const fn out_of_range(reason: &'static str) -> Self {
        Self::OutOfRange { reason }
    }

    pub(crate) const fn transport(reason: &'static str) -> Self {
        Self::Transport { reason }
    }
}
