use serde::{Deserialize, Serialize};

/// Default number of databases kept open by a store.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Configuration for an [`RrdStore`](crate::RrdStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of idle databases kept open.
    ///
    /// Databases still referenced by a caller are never evicted, so the pool
    /// may temporarily hold more. Values below 1 are treated as 1.
    ///
    /// Default: 64
    pub pool_size: usize,

    /// Flush file data to disk after every append.
    ///
    /// Default: true
    pub sync_writes: bool,

    /// Create missing parent directories when creating a database.
    ///
    /// Default: true
    pub create_parent_dirs: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            sync_writes: true,
            create_parent_dirs: true,
        }
    }
}
