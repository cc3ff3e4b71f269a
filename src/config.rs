/// Convenience configuration for constructing a channel.
///
/// Not part of the CommunicationManager/MemoryManager contract — purely a
/// constructor helper, mirroring the role the teacher's `Config` plays for
/// `Ring`/`Channel`. No CLI flags or environment variables read this; per
/// `spec.md` §6, "No CLI, config files, or environment variables are part of
/// the channel core."
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Size in bytes of a single token.
    pub token_size: usize,
    /// Number of tokens the ring can hold.
    pub capacity: usize,
    /// Enable metrics collection (adds a handful of atomic increments).
    pub enable_metrics: bool,
}

impl ChannelConfig {
    /// Creates a new configuration.
    ///
    /// # Panics
    ///
    /// Panics if `token_size` or `capacity` is zero — the same precondition
    /// `spec.md` §8 requires channel construction itself to reject with
    /// `InvalidArgument`; this constructor is a convenience used before a
    /// slot even exists, so it panics early instead of deferring to
    /// construction time.
    pub const fn new(token_size: usize, capacity: usize, enable_metrics: bool) -> Self {
        assert!(token_size > 0, "token_size must be non-zero");
        assert!(capacity > 0, "capacity must be non-zero");
        Self {
            token_size,
            capacity,
            enable_metrics,
        }
    }

    /// Total size in bytes of the token ring this configuration describes.
    #[inline]
    pub const fn token_buffer_size(&self) -> usize {
        self.token_size * self.capacity
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(8, 1 << 16, false)
    }
}

/// A low-latency preset: small ring, no metrics overhead.
pub const LOW_LATENCY_CONFIG: ChannelConfig = ChannelConfig::new(8, 1 << 12, false);

/// A high-throughput preset: large ring, metrics enabled for observability.
pub const HIGH_THROUGHPUT_CONFIG: ChannelConfig = ChannelConfig::new(8, 1 << 18, true);
