//! Channel Base (spec.md §3 `Channel`, §4.7 sizing helpers) plus the three
//! flow-control protocols built on top of it.

pub mod mpsc_locking;
pub mod mpsc_nonlocking;
pub mod spsc;

#[cfg(feature = "stack-ring")]
pub mod stack_token_buffer;

use crate::comm::GlobalKey;
use crate::error::ChannelError;

/// Well-known global keys a channel construction publishes its slots under
/// (spec.md §6): `TOKEN_BUFFER = 0`, `PRODUCER_COORDINATION = 1`,
/// `CONSUMER_COORDINATION = 2`. A newtype-free set of associated constants
/// so a key can't be confused with an arbitrary `u64` at the call site.
pub struct WellKnownKey;

impl WellKnownKey {
    pub const TOKEN_BUFFER: GlobalKey = 0;
    pub const PRODUCER_COORDINATION: GlobalKey = 1;
    pub const CONSUMER_COORDINATION: GlobalKey = 2;

    /// The locking-MPSC and non-locking-MPSC variants key each registered
    /// producer's own slots starting past the three single-producer keys
    /// above, so many producers can share one `CommunicationManager`
    /// registry under distinct tags without key collisions.
    pub const PRODUCER_KEY_BASE: GlobalKey = 100;

    pub const fn producer_coordination(producer_id: usize) -> GlobalKey {
        Self::PRODUCER_KEY_BASE + producer_id as GlobalKey
    }
}

/// `getTokenBufferSize(tokenSize, capacity)` (spec.md §4.7).
pub const fn token_buffer_size(token_size: usize, capacity: usize) -> usize {
    token_size * capacity
}

/// Validates the preconditions spec.md §4.7 places on every channel
/// construction: `tokenSize ≥ 1`, `capacity ≥ 1`, and both the token and
/// coordination buffers at least as large as their required sizes.
pub(crate) fn validate_construction(
    token_size: usize,
    capacity: usize,
    token_buffer_len: usize,
    coordination_buffer_len: usize,
) -> Result<(), ChannelError> {
    if token_size == 0 {
        return Err(ChannelError::invalid_argument("tokenSize must be >= 1"));
    }
    if capacity == 0 {
        return Err(ChannelError::invalid_argument("capacity must be >= 1"));
    }
    if token_buffer_len < token_buffer_size(token_size, capacity) {
        return Err(ChannelError::invalid_argument(
            "token buffer smaller than tokenSize * capacity",
        ));
    }
    if coordination_buffer_len < crate::circular_buffer::coordination_buffer_size() {
        return Err(ChannelError::invalid_argument(
            "coordination buffer smaller than two words",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_token_size_or_capacity() {
        assert!(validate_construction(0, 4, 4 * 8, 16).is_err());
        assert!(validate_construction(8, 0, 0, 16).is_err());
    }

    #[test]
    fn rejects_undersized_buffers() {
        assert!(validate_construction(8, 4, 31, 16).is_err());
        assert!(validate_construction(8, 4, 32, 15).is_err());
        assert!(validate_construction(8, 4, 32, 16).is_ok());
    }
}
