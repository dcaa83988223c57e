//! A database persisted in one fixed-size file.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock, RwLockWriteGuard, TryLockError};

use crate::database::{Database, DatabaseInfo};
use crate::error::{AppendError, CreateError, FetchError};
use crate::fetch::{ArchiveSelector, FetchTable};
use crate::format::{self, Layout};
use crate::schema::DatabaseSpec;
use crate::update::AppendReport;

/// A round-robin database persisted in a single fixed-size file.
///
/// Appends take the write lock; fetches and metadata reads take the read lock,
/// so readers never observe a half-applied sample. Each append writes back only
/// the ring rows it touched, then the live state region.
///
/// The state region is written last, after a sync of the rows when
/// `sync_writes` is set. A crash between the two leaves the previous state on
/// disk next to newer rows; after reopening, `last_update` is the previous one
/// and replaying the lost samples rewrites the same rows with the same values.
/// Rows are not checksummed, so a crash that tears a row write is not detected.
///
/// If persisting an append fails after the in-memory database changed, the
/// file is marked inconsistent and every later append or fetch fails with
/// `Inconsistent` until [`RrdFile::reload`] re-reads the file.
#[derive(Debug)]
pub struct RrdFile {
    path: PathBuf,
    layout: Layout,
    db: RwLock<Database>,
    file: Mutex<File>,
    sync_writes: bool,
    inconsistent: AtomicBool,
}

impl RrdFile {
    /// Creates a new database file at `path`.
    ///
    /// The file is fully allocated here and never changes size afterwards. On
    /// an I/O failure the partially written file is removed.
    ///
    /// # Errors
    ///
    /// * [`CreateError::InvalidSchema`] if `spec` is invalid; nothing is written.
    /// * [`CreateError::AlreadyExists`] if `path` exists.
    /// * [`CreateError::Io`] on any other I/O failure.
    pub fn create(
        path: impl AsRef<Path>,
        spec: &DatabaseSpec,
        sync_writes: bool,
    ) -> Result<Self, CreateError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(spec)?;
        let layout = Layout::for_spec(spec);

        let mut file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(CreateError::AlreadyExists(path));
            }
            Err(e) => return Err(CreateError::Io(e)),
        };

        if let Err(e) = Self::write_initial(&mut file, &db, spec, &layout, sync_writes) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(CreateError::Io(e));
        }

        #[cfg(feature = "logging")]
        log::info!(
            "created database '{}': {} data sources, {} archives, {} bytes",
            path.display(),
            spec.data_sources.len(),
            spec.archives.len(),
            layout.file_len
        );

        Ok(Self {
            path,
            layout,
            db: RwLock::new(db),
            file: Mutex::new(file),
            sync_writes,
            inconsistent: AtomicBool::new(false),
        })
    }

    /// Opens an existing database file.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the file cannot be read, and one of kind
    /// [`io::ErrorKind::InvalidData`] if it is corrupt: bad magic number,
    /// unsupported version, checksum mismatch, invalid schema or a size that
    /// does not match the schema.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let (db, layout) = Self::load(&mut file)?;

        #[cfg(feature = "logging")]
        log::info!(
            "opened database '{}', last update {}",
            path.display(),
            db.last_update()
        );

        Ok(Self {
            path,
            layout,
            db: RwLock::new(db),
            file: Mutex::new(file),
            sync_writes,
            inconsistent: AtomicBool::new(false),
        })
    }

    /// Path this database was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies one sample and persists the result.
    ///
    /// Blocks while another append is in progress.
    ///
    /// # Errors
    ///
    /// * [`AppendError::OutOfOrder`] if `timestamp` is not newer than the last update.
    /// * [`AppendError::Inconsistent`] if an earlier write failed.
    /// * [`AppendError::Io`] if persisting fails; the file is then marked inconsistent.
    pub fn append(
        &self,
        timestamp: u64,
        values: &HashMap<String, f64>,
    ) -> Result<AppendReport, AppendError> {
        let db = self.db.write().unwrap();
        self.apply(db, timestamp, values)
    }

    /// Like [`RrdFile::append`], but fails with [`AppendError::Busy`] instead of
    /// waiting for another writer or reader.
    pub fn try_append(
        &self,
        timestamp: u64,
        values: &HashMap<String, f64>,
    ) -> Result<AppendReport, AppendError> {
        let db = match self.db.try_write() {
            Ok(db) => db,
            Err(TryLockError::WouldBlock) => return Err(AppendError::Busy),
            Err(TryLockError::Poisoned(e)) => panic!("database lock poisoned: {e}"),
        };
        self.apply(db, timestamp, values)
    }

    fn apply(
        &self,
        mut db: RwLockWriteGuard<'_, Database>,
        timestamp: u64,
        values: &HashMap<String, f64>,
    ) -> Result<AppendReport, AppendError> {
        if !self.is_consistent() {
            return Err(AppendError::Inconsistent(self.path.clone()));
        }

        let report = db.append(timestamp, values)?;
        if let Err(e) = self.persist(&db, &report) {
            self.inconsistent.store(true, Ordering::Release);
            #[cfg(feature = "logging")]
            log::warn!(
                "failed to persist sample at {timestamp} to '{}', marked inconsistent: {e}",
                self.path.display()
            );
            return Err(AppendError::Io(e));
        }
        Ok(report)
    }

    /// Reads a range; see [`Database::fetch`].
    ///
    /// # Errors
    ///
    /// As [`Database::fetch`], plus [`FetchError::Inconsistent`] if an earlier
    /// write failed.
    pub fn fetch(
        &self,
        selector: ArchiveSelector,
        start: u64,
        end: u64,
    ) -> Result<FetchTable, FetchError> {
        if !self.is_consistent() {
            return Err(FetchError::Inconsistent(self.path.clone()));
        }
        self.db.read().unwrap().fetch(selector, start, end)
    }

    /// Timestamp of the most recent accepted sample, or the creation time.
    pub fn last_update(&self) -> u64 {
        self.db.read().unwrap().last_update()
    }

    /// Summarizes schema and live state.
    pub fn info(&self) -> DatabaseInfo {
        self.db.read().unwrap().info()
    }

    /// Returns a copy of the in-memory database.
    pub fn snapshot(&self) -> Database {
        self.db.read().unwrap().clone()
    }

    /// Returns `false` after a failed write, until the next successful [`RrdFile::reload`].
    pub fn is_consistent(&self) -> bool {
        !self.inconsistent.load(Ordering::Acquire)
    }

    /// Re-reads the whole database from disk, discarding in-memory state.
    pub fn reload(&self) -> io::Result<()> {
        let mut db = self.db.write().unwrap();
        let mut file = self.file.lock().unwrap();
        let (loaded, layout) = Self::load(&mut file)?;
        if layout != self.layout {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "database layout changed on disk",
            ));
        }
        *db = loaded;
        self.inconsistent.store(false, Ordering::Release);

        #[cfg(feature = "logging")]
        log::info!(
            "reloaded database '{}', last update {}",
            self.path.display(),
            db.last_update()
        );
        Ok(())
    }

    fn write_initial(
        file: &mut File,
        db: &Database,
        spec: &DatabaseSpec,
        layout: &Layout,
        sync: bool,
    ) -> io::Result<()> {
        file.set_len(layout.file_len)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&format::encode_header(spec))?;
        file.write_all(&format::encode_state(db, layout))?;
        for (archive, &offset) in db.archives.iter().zip(&layout.ring_offsets) {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&format::encode_ring(archive))?;
        }
        if sync {
            file.sync_all()?;
        }
        Ok(())
    }

    fn load(file: &mut File) -> io::Result<(Database, Layout)> {
        let file_len = file.metadata()?.len();

        let mut prefix = [0u8; 14];
        if file_len < prefix.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file too short: {file_len} bytes"),
            ));
        }
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut prefix)?;

        let header_len = format::header_len(&prefix)?;
        if file_len < header_len as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file too short for a {header_len} byte header: {file_len} bytes"),
            ));
        }
        let mut header = vec![0u8; header_len];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let spec = format::decode_header(&header)?;

        let layout = Layout::for_spec(&spec);
        if layout.header_len != header_len as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "header length mismatch: schema needs {}, header claims {header_len}",
                    layout.header_len
                ),
            ));
        }
        if file_len != layout.file_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "file size mismatch: expected {}, got {file_len}",
                    layout.file_len
                ),
            ));
        }

        let mut db = Database::create(&spec)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let mut state = vec![0u8; layout.state_len as usize];
        file.seek(SeekFrom::Start(layout.state_offset))?;
        file.read_exact(&mut state)?;
        format::decode_state(&state, &mut db)?;

        for (archive, &offset) in db.archives.iter_mut().zip(&layout.ring_offsets) {
            let mut ring = vec![0u8; archive.rows.len() * 8];
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut ring)?;
            format::decode_ring(&ring, archive)?;
        }

        Ok((db, layout))
    }

    fn persist(&self, db: &Database, report: &AppendReport) -> io::Result<()> {
        let mut file = self.file.lock().unwrap();
        for &(archive, row) in &report.dirty_rows {
            file.seek(SeekFrom::Start(self.layout.row_offset(archive, row)))?;
            file.write_all(&format::encode_row(db.archives[archive].row(row)))?;
        }
        if self.sync_writes && !report.dirty_rows.is_empty() {
            file.sync_data()?;
        }
        file.seek(SeekFrom::Start(self.layout.state_offset))?;
        file.write_all(&format::encode_state(db, &self.layout))?;
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }
}
