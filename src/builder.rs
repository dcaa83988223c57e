use crate::config::StoreConfig;
use crate::store::RrdStore;

/// Builder for configuring an [`RrdStore`].
///
/// # Example
///
/// ```
/// use manifold_rrd::RrdStore;
///
/// let store = RrdStore::builder()
///     .pool_size(16)
///     .without_sync()
///     .build();
/// assert_eq!(store.config().pool_size, 16);
/// ```
pub struct RrdStoreBuilder {
    config: StoreConfig,
}

impl RrdStoreBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    /// Sets the maximum number of idle databases kept open.
    ///
    /// Default: 64
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Sets whether every append is flushed to disk before returning.
    ///
    /// Default: true
    #[must_use]
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.config.sync_writes = sync;
        self
    }

    /// Skips the flush after each append.
    ///
    /// A crash may then lose recent samples. Equivalent to `.sync_writes(false)`.
    #[must_use]
    pub fn without_sync(self) -> Self {
        self.sync_writes(false)
    }

    /// Sets whether missing parent directories are created on create.
    ///
    /// Default: true
    #[must_use]
    pub fn create_parent_dirs(mut self, create: bool) -> Self {
        self.config.create_parent_dirs = create;
        self
    }

    /// Replaces all settings with `config`.
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the store. No file is touched until the first operation.
    pub fn build(self) -> RrdStore {
        RrdStore::with_config(self.config)
    }
}

impl Default for RrdStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
