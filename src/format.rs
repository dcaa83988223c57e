//! On-disk layout of a round-robin database file.
//!
//! A file is written once at creation and never changes size:
//!
//! ```text
//! +---------------------------+  0
//! | header pages              |  schema, CRC32 in the last 4 bytes
//! +---------------------------+  header_len
//! | live state                |  last update, pending and consolidation state, CRC32
//! +---------------------------+  ring_offsets[0] (8-byte aligned)
//! | archive 0 ring            |  row_count * ds_count * f64
//! | archive 1 ring            |
//! | ...                       |
//! +---------------------------+  file_len
//! ```
//!
//! All integers and floats are little-endian. Unknown values are stored as NaN.

use std::io;

use crate::archive::Archive;
use crate::database::Database;
use crate::schema::{ArchiveSpec, ConsolidationFn, DataSourceKind, DataSourceSpec, DatabaseSpec};

/// Magic number identifying a round-robin database file.
///
/// The sequence includes DOS/Unix line ending detection bytes (0x1A, 0x0A) to help
/// detect text-mode corruption.
pub const MAGIC_NUMBER: [u8; 9] = *b"mnfd-rr\x1A\x0A";

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// Header pages are allocated in units of this size.
pub(crate) const PAGE_SIZE: usize = 4096;

/// magic + version + page count
const HEADER_PREFIX_LEN: usize = 9 + 1 + 4;

const STATE_FIXED_LEN: usize = 16;
const STATE_DS_LEN: usize = 24;
const STATE_ARCHIVE_LEN: usize = 24;
const STATE_PREP_LEN: usize = 16;
const CRC_LEN: usize = 4;

/// Byte offsets of every region of a database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Layout {
    pub header_len: u64,
    pub state_offset: u64,
    pub state_len: u64,
    pub ring_offsets: Vec<u64>,
    pub ds_count: usize,
    pub file_len: u64,
}

impl Layout {
    /// Computes the layout for a validated spec.
    pub fn for_spec(spec: &DatabaseSpec) -> Self {
        let ds_count = spec.data_sources.len();
        let header_len = (page_count(header_body_len(spec)) * PAGE_SIZE) as u64;
        let state_len = (STATE_FIXED_LEN
            + ds_count * STATE_DS_LEN
            + spec.archives.len() * (STATE_ARCHIVE_LEN + ds_count * STATE_PREP_LEN)
            + CRC_LEN) as u64;

        let mut offset = (header_len + state_len).next_multiple_of(8);
        let mut ring_offsets = Vec::with_capacity(spec.archives.len());
        for archive in &spec.archives {
            ring_offsets.push(offset);
            offset += u64::from(archive.row_count) * ds_count as u64 * 8;
        }

        Self {
            header_len,
            state_offset: header_len,
            state_len,
            ring_offsets,
            ds_count,
            file_len: offset,
        }
    }

    /// File offset of one ring row.
    pub fn row_offset(&self, archive: usize, row: usize) -> u64 {
        self.ring_offsets[archive] + (row * self.ds_count * 8) as u64
    }
}

fn header_body_len(spec: &DatabaseSpec) -> usize {
    let ds: usize = spec
        .data_sources
        .iter()
        .map(|ds| 4 + ds.name.len() + 1 + 8 + 8 + 8)
        .sum();
    let archives = spec.archives.len() * (1 + 4 + 4 + 8);
    HEADER_PREFIX_LEN + 8 + 8 + 4 + 4 + ds + archives + CRC_LEN
}

fn page_count(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE).max(1)
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Little-endian cursor over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> io::Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.data.len());
        let Some(end) = end else {
            return Err(invalid(format!(
                "insufficient data: need {len} bytes at offset {}, have {}",
                self.pos,
                self.data.len().saturating_sub(self.pos)
            )));
        };
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> io::Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> io::Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }
}

fn optional_bound(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}

/// Serializes the schema header, padded to whole pages with a trailing CRC32.
///
/// Format:
/// - magic (9 bytes)
/// - version (1 byte)
/// - `page_count` (u32)
/// - `step` (u64), `start` (u64)
/// - `ds_count` (u32), `archive_count` (u32)
/// - per data source: `name_len` (u32) | name | kind (u8) | heartbeat (u64) | min (f64) | max (f64)
/// - per archive: consolidation (u8) | `steps_per_row` (u32) | `row_count` (u32) | xff (f64)
/// - padding
/// - CRC32 (4 bytes) at `page_count * PAGE_SIZE - 4`
///
/// Absent bounds are stored as NaN.
pub(crate) fn encode_header(spec: &DatabaseSpec) -> Vec<u8> {
    let pages = page_count(header_body_len(spec));
    let len = pages * PAGE_SIZE;
    let mut bytes = Vec::with_capacity(len);

    bytes.extend_from_slice(&MAGIC_NUMBER);
    bytes.push(FORMAT_VERSION);
    let pages = u32::try_from(pages).expect("header page count exceeds u32");
    bytes.extend_from_slice(&pages.to_le_bytes());
    bytes.extend_from_slice(&spec.step.to_le_bytes());
    bytes.extend_from_slice(&spec.start.to_le_bytes());

    let ds_count = u32::try_from(spec.data_sources.len()).expect("too many data sources");
    let archive_count = u32::try_from(spec.archives.len()).expect("too many archives");
    bytes.extend_from_slice(&ds_count.to_le_bytes());
    bytes.extend_from_slice(&archive_count.to_le_bytes());

    for ds in &spec.data_sources {
        let name = ds.name.as_bytes();
        let name_len = u32::try_from(name.len()).expect("data source name exceeds maximum length");
        bytes.extend_from_slice(&name_len.to_le_bytes());
        bytes.extend_from_slice(name);
        bytes.push(ds.kind.to_byte());
        bytes.extend_from_slice(&ds.heartbeat.to_le_bytes());
        bytes.extend_from_slice(&ds.min.unwrap_or(f64::NAN).to_le_bytes());
        bytes.extend_from_slice(&ds.max.unwrap_or(f64::NAN).to_le_bytes());
    }

    for archive in &spec.archives {
        bytes.push(archive.consolidation.to_byte());
        bytes.extend_from_slice(&archive.steps_per_row.to_le_bytes());
        bytes.extend_from_slice(&archive.row_count.to_le_bytes());
        bytes.extend_from_slice(&archive.xff.to_le_bytes());
    }

    bytes.resize(len - CRC_LEN, 0);
    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());

    assert_eq!(bytes.len(), len);
    bytes
}

/// Validates the magic number and version and returns the header length in bytes.
///
/// `prefix` must hold at least the first 14 bytes of the file.
pub(crate) fn header_len(prefix: &[u8]) -> io::Result<usize> {
    if prefix.len() < HEADER_PREFIX_LEN {
        return Err(invalid(format!(
            "data too short: need {HEADER_PREFIX_LEN}, have {}",
            prefix.len()
        )));
    }
    if prefix[0..9] != MAGIC_NUMBER {
        return Err(invalid("invalid magic number"));
    }
    let version = prefix[9];
    if version != FORMAT_VERSION {
        return Err(invalid(format!("unsupported format version: {version}")));
    }
    let pages = u32::from_le_bytes([prefix[10], prefix[11], prefix[12], prefix[13]]);
    if pages == 0 {
        return Err(invalid("header page count is zero"));
    }
    usize::try_from(pages)
        .ok()
        .and_then(|pages| pages.checked_mul(PAGE_SIZE))
        .ok_or_else(|| invalid(format!("header page count {pages} is too large")))
}

/// Deserializes and validates the schema header.
pub(crate) fn decode_header(data: &[u8]) -> io::Result<DatabaseSpec> {
    let len = header_len(data)?;
    if data.len() < len {
        return Err(invalid(format!(
            "data too short: need {len}, have {}",
            data.len()
        )));
    }

    // Validate CRC32 checksum BEFORE parsing
    let stored_crc = u32::from_le_bytes(
        data[len - CRC_LEN..len]
            .try_into()
            .map_err(|_| invalid("header checksum truncated"))?,
    );
    let computed_crc = crc32fast::hash(&data[0..len - CRC_LEN]);
    if stored_crc != computed_crc {
        return Err(invalid(format!(
            "header checksum mismatch: expected {stored_crc:#x}, got {computed_crc:#x}"
        )));
    }

    let mut reader = Reader::new(&data[HEADER_PREFIX_LEN..len - CRC_LEN]);
    let step = reader.u64()?;
    let start = reader.u64()?;
    let ds_count = reader.u32()? as usize;
    let archive_count = reader.u32()? as usize;

    let mut data_sources = Vec::with_capacity(ds_count.min(PAGE_SIZE));
    for _ in 0..ds_count {
        let name_len = reader.u32()? as usize;
        let name = String::from_utf8(reader.take(name_len)?.to_vec())
            .map_err(|e| invalid(format!("invalid UTF-8 in data source name: {e}")))?;
        let kind_byte = reader.u8()?;
        let kind = DataSourceKind::from_byte(kind_byte)
            .ok_or_else(|| invalid(format!("unknown data source kind {kind_byte}")))?;
        let heartbeat = reader.u64()?;
        let min = optional_bound(reader.f64()?);
        let max = optional_bound(reader.f64()?);
        data_sources.push(DataSourceSpec {
            name,
            kind,
            heartbeat,
            min,
            max,
        });
    }

    let mut archives = Vec::with_capacity(archive_count.min(PAGE_SIZE));
    for _ in 0..archive_count {
        let cf_byte = reader.u8()?;
        let consolidation = ConsolidationFn::from_byte(cf_byte)
            .ok_or_else(|| invalid(format!("unknown consolidation function {cf_byte}")))?;
        let steps_per_row = reader.u32()?;
        let row_count = reader.u32()?;
        let xff = reader.f64()?;
        archives.push(ArchiveSpec {
            consolidation,
            steps_per_row,
            row_count,
            xff,
        });
    }

    let spec = DatabaseSpec {
        step,
        start,
        data_sources,
        archives,
    };
    spec.validate()
        .map_err(|e| invalid(format!("invalid schema in header: {e}")))?;
    Ok(spec)
}

/// Serializes the live state region.
///
/// Format:
/// - `last_update` (u64) | `update_count` (u64)
/// - per data source: `last_raw` (f64) | value (f64) | `unknown_secs` (u64)
/// - per archive: `cur_row` (u64) | `last_row_time` (u64) | `pdps_in_window` (u64),
///   then per data source: acc (f64) | unknown (u64)
/// - CRC32 (4 bytes)
pub(crate) fn encode_state(db: &Database, layout: &Layout) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(layout.state_len as usize);
    bytes.extend_from_slice(&db.last_update.to_le_bytes());
    bytes.extend_from_slice(&db.update_count.to_le_bytes());

    for ds in &db.data_sources {
        bytes.extend_from_slice(&ds.pending.last_raw.to_le_bytes());
        bytes.extend_from_slice(&ds.pending.value.to_le_bytes());
        bytes.extend_from_slice(&ds.pending.unknown_secs.to_le_bytes());
    }

    for archive in &db.archives {
        bytes.extend_from_slice(&(archive.cur_row as u64).to_le_bytes());
        bytes.extend_from_slice(&archive.last_row_time.to_le_bytes());
        bytes.extend_from_slice(&archive.pdps_in_window.to_le_bytes());
        for prep in &archive.prep {
            bytes.extend_from_slice(&prep.acc.to_le_bytes());
            bytes.extend_from_slice(&prep.unknown.to_le_bytes());
        }
    }

    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());

    debug_assert_eq!(bytes.len() as u64, layout.state_len);
    bytes
}

/// Restores the live state region into a freshly created database.
pub(crate) fn decode_state(data: &[u8], db: &mut Database) -> io::Result<()> {
    if data.len() < CRC_LEN {
        return Err(invalid("state region too short"));
    }
    let (body, crc) = data.split_at(data.len() - CRC_LEN);
    let stored_crc = u32::from_le_bytes(
        crc.try_into()
            .map_err(|_| invalid("state checksum truncated"))?,
    );
    let computed_crc = crc32fast::hash(body);
    if stored_crc != computed_crc {
        return Err(invalid(format!(
            "state checksum mismatch: expected {stored_crc:#x}, got {computed_crc:#x}"
        )));
    }

    let mut reader = Reader::new(body);
    let last_update = reader.u64()?;
    let update_count = reader.u64()?;
    if last_update < db.start {
        return Err(invalid(format!(
            "last update {last_update} precedes creation time {}",
            db.start
        )));
    }
    db.last_update = last_update;
    db.update_count = update_count;

    for ds in &mut db.data_sources {
        ds.pending.last_raw = reader.f64()?;
        ds.pending.value = reader.f64()?;
        ds.pending.unknown_secs = reader.u64()?;
    }

    let step = db.step;
    for archive in &mut db.archives {
        let cur_row = reader.u64()?;
        let last_row_time = reader.u64()?;
        let pdps_in_window = reader.u64()?;
        check_archive_state(archive, cur_row, last_row_time, pdps_in_window, step)?;

        archive.cur_row = cur_row as usize;
        archive.last_row_time = last_row_time;
        archive.pdps_in_window = pdps_in_window;
        for prep in &mut archive.prep {
            prep.acc = reader.f64()?;
            prep.unknown = reader.u64()?;
        }
    }

    Ok(())
}

fn check_archive_state(
    archive: &Archive,
    cur_row: u64,
    last_row_time: u64,
    pdps_in_window: u64,
    step: u64,
) -> io::Result<()> {
    if cur_row >= archive.row_count() as u64 {
        return Err(invalid(format!(
            "archive cursor {cur_row} out of range for {} rows",
            archive.row_count()
        )));
    }
    if pdps_in_window >= u64::from(archive.spec.steps_per_row) {
        return Err(invalid(format!(
            "archive window holds {pdps_in_window} of {} steps",
            archive.spec.steps_per_row
        )));
    }
    if last_row_time % archive.row_step != 0 || archive.row_step % step != 0 {
        return Err(invalid(format!(
            "archive row time {last_row_time} is not aligned to {}",
            archive.row_step
        )));
    }
    Ok(())
}

/// Serializes one ring row.
pub(crate) fn encode_row(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Serializes a whole ring region.
pub(crate) fn encode_ring(archive: &Archive) -> Vec<u8> {
    encode_row(&archive.rows)
}

/// Restores a whole ring region.
pub(crate) fn decode_ring(data: &[u8], archive: &mut Archive) -> io::Result<()> {
    if data.len() != archive.rows.len() * 8 {
        return Err(invalid(format!(
            "ring region is {} bytes, expected {}",
            data.len(),
            archive.rows.len() * 8
        )));
    }
    for (slot, chunk) in archive.rows.iter_mut().zip(data.chunks_exact(8)) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        *slot = f64::from_le_bytes(raw);
    }
    Ok(())
}
