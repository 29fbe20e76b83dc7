//! Flow cache errors

/// Errors from building or running the cache.
///
/// Nothing on the forwarding path returns this type: lookups and inserts
/// degrade to a miss instead (see [`Uncached`]).
#[derive(Debug, thiserror::Error)]
pub enum FlowTableError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to spawn reaper: {0}")]
    SpawnFailed(String),
}

/// Result type for cache setup
pub type FlowTableResult<T> = Result<T, FlowTableError>;

/// Why an insert left nothing in the cache.
///
/// All of these are absorbed: the caller sees `None` and takes the slow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uncached {
    /// Cache switched off
    Disabled,
    /// Loopback, point-to-point, local or degenerate flow
    Uncachable,
    /// Neighbor resolution still in progress
    ResolutionPending,
    /// Entry pool at `max_flows`
    PoolExhausted,
    /// Maintenance held the shard at that instant
    Contended,
}

impl Uncached {
    /// Short label for logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Uncachable => "uncachable",
            Self::ResolutionPending => "resolution_pending",
            Self::PoolExhausted => "pool_exhausted",
            Self::Contended => "contended",
        }
    }
}
