//! Bounded pool of open database files.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::file::RrdFile;

/// Entry in the handle pool tracking usage metadata.
struct PoolEntry {
    file: Arc<RrdFile>,
    last_used: Instant,
}

impl PoolEntry {
    fn new(file: Arc<RrdFile>) -> Self {
        Self {
            file,
            last_used: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Only the pool holds the handle.
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.file) == 1
    }
}

/// Keeps a bounded set of open databases, keyed by canonical path.
///
/// There is at most one [`RrdFile`] per path in the pool, so every append to a
/// path goes through the same write lock. When the pool is full, the least
/// recently used idle handle is evicted; handles still held by a caller are
/// skipped, which lets the pool grow past `max_size` while they are in use.
pub(crate) struct HandlePool {
    max_size: usize,
    entries: Mutex<HashMap<PathBuf, PoolEntry>>,
}

impl HandlePool {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pooled handle for `key`, opening it with `open` if needed.
    pub fn acquire<F>(&self, key: &Path, open: F) -> io::Result<Arc<RrdFile>>
    where
        F: FnOnce() -> io::Result<RrdFile>,
    {
        // Fast path: already open
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(key) {
                entry.touch();
                return Ok(entry.file.clone());
            }
        }

        // Open WITHOUT holding the lock so other databases are not serialized
        let file = Arc::new(open()?);

        let mut entries = self.entries.lock().unwrap();

        // Double-check: another thread might have opened it meanwhile
        if let Some(entry) = entries.get_mut(key) {
            entry.touch();
            return Ok(entry.file.clone());
        }

        if entries.len() >= self.max_size {
            Self::evict_lru(&mut entries);
        }

        entries.insert(key.to_path_buf(), PoolEntry::new(file.clone()));
        Ok(file)
    }

    /// Registers a freshly created database, replacing any stale handle.
    pub fn insert(&self, key: PathBuf, file: RrdFile) -> Arc<RrdFile> {
        let file = Arc::new(file);
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            Self::evict_lru(&mut entries);
        }
        entries.insert(key, PoolEntry::new(file.clone()));
        file
    }

    /// Drops the pooled handle for `key` if no caller still holds it.
    ///
    /// A handle in use stays pooled so a later `acquire` returns the same
    /// [`RrdFile`] rather than opening a second writer for the path.
    pub fn release(&self, key: &Path) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_idle() => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn evict_lru(entries: &mut HashMap<PathBuf, PoolEntry>) {
        let lru = entries
            .iter()
            .filter(|(_, entry)| entry.is_idle())
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(path, _)| path.clone());

        if let Some(path) = lru {
            #[cfg(feature = "logging")]
            log::debug!("evicting idle database '{}'", path.display());
            entries.remove(&path);
        }
    }
}
