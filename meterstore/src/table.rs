//! Memory-mapped row file backing a durable table.
//!
//! A table file stores fixed-width rows of `f64` cells: cell 0 of a row is
//! the timestamp, cells `1..=columns` are the value columns. Rows are
//! appended at the end; the region grows geometrically by extending the file
//! and re-mapping it.
//!
//! # File Format
//!
//! ```text
//! [0..64)        Header (magic, version, column count, row count, row capacity)
//! [64..)         Rows: (1 + columns) little-endian f64 cells each
//! ```
//!
//! NaN is the null sentinel: an unwritten or absent cell reads back as `None`.
//! Cell access goes through bounds-checked byte slices of the mapping; the
//! only unsafe operation is establishing the mapping itself.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{Result, TableError};

/// Magic bytes identifying a meterstore table file.
const TABLE_MAGIC: [u8; 4] = *b"MTBL";

/// Current table format version.
const TABLE_VERSION: u32 = 1;

/// Size of the table header in bytes.
const HEADER_SIZE: usize = 64;

/// Size of one cell in bytes.
const CELL_SIZE: usize = 8;

/// Row capacity of a freshly created table.
const INITIAL_ROW_CAPACITY: u64 = 64;

// Header field offsets.
const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const COLUMNS_OFFSET: usize = 8;
const ROW_COUNT_OFFSET: usize = 16;
const ROW_CAPACITY_OFFSET: usize = 24;

/// Header of a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TableHeader {
    magic: [u8; 4],
    version: u32,
    columns: u32,
    row_count: u64,
    row_capacity: u64,
}

impl TableHeader {
    fn new(columns: u32, row_capacity: u64) -> Self {
        Self {
            magic: TABLE_MAGIC,
            version: TABLE_VERSION,
            columns,
            row_count: 0,
            row_capacity,
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[..HEADER_SIZE].fill(0);
        buf[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&self.magic);
        buf[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&self.version.to_le_bytes());
        buf[COLUMNS_OFFSET..COLUMNS_OFFSET + 4].copy_from_slice(&self.columns.to_le_bytes());
        buf[ROW_COUNT_OFFSET..ROW_COUNT_OFFSET + 8].copy_from_slice(&self.row_count.to_le_bytes());
        buf[ROW_CAPACITY_OFFSET..ROW_CAPACITY_OFFSET + 8]
            .copy_from_slice(&self.row_capacity.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        let u32_at = |at: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&buf[at..at + 4]);
            u32::from_le_bytes(bytes)
        };
        let u64_at = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(bytes)
        };

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[MAGIC_OFFSET..MAGIC_OFFSET + 4]);

        Self {
            magic,
            version: u32_at(VERSION_OFFSET),
            columns: u32_at(COLUMNS_OFFSET),
            row_count: u64_at(ROW_COUNT_OFFSET),
            row_capacity: u64_at(ROW_CAPACITY_OFFSET),
        }
    }

    fn validate(&self, path: &str) -> Result<()> {
        if self.magic != TABLE_MAGIC {
            return Err(TableError::Corrupted {
                path: path.to_string(),
                reason: format!(
                    "invalid magic bytes: expected {:?}, found {:?}",
                    TABLE_MAGIC, self.magic
                ),
            }
            .into());
        }

        if self.version != TABLE_VERSION {
            return Err(TableError::Corrupted {
                path: path.to_string(),
                reason: format!(
                    "unsupported version: expected {}, found {}",
                    TABLE_VERSION, self.version
                ),
            }
            .into());
        }

        if self.row_count > self.row_capacity {
            return Err(TableError::Corrupted {
                path: path.to_string(),
                reason: format!(
                    "row count {} exceeds capacity {}",
                    self.row_count, self.row_capacity
                ),
            }
            .into());
        }

        Ok(())
    }
}

/// Byte size of a file holding `row_capacity` rows of `columns` value cells,
/// `None` if it does not fit in `usize`.
fn file_size(columns: u32, row_capacity: u64) -> Option<usize> {
    usize::try_from(row_capacity)
        .ok()?
        .checked_mul(row_width(columns))?
        .checked_add(HEADER_SIZE)
}

/// [`file_size`], with overflow reported as corruption of `path`.
fn checked_file_size(path: &str, columns: u32, row_capacity: u64) -> Result<usize> {
    file_size(columns, row_capacity).ok_or_else(|| {
        TableError::Corrupted {
            path: path.to_string(),
            reason: format!("{row_capacity} rows of {columns} columns overflow the address space"),
        }
        .into()
    })
}

/// Byte width of one row.
fn row_width(columns: u32) -> usize {
    (1 + columns as usize) * CELL_SIZE
}

/// Memory-mapped table file.
///
/// # Thread Safety
///
/// `TableFile` is a single-writer structure; [`Table`](crate::db::Table)
/// wraps it in a read-write lock so that reads from several threads can
/// proceed alongside one appending writer.
#[derive(Debug)]
pub struct TableFile {
    file: File,
    mmap: MmapMut,
    header: TableHeader,
    path: String,
}

impl TableFile {
    /// Creates a new, empty table file with `columns` value columns.
    ///
    /// An existing file at `path` is truncated.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::WriteFailed`] if the file cannot be created,
    /// sized or mapped.
    pub fn create<P: AsRef<Path>>(path: P, columns: u32) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();
        let write_failed = |source| TableError::WriteFailed {
            path: path_str.clone(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(write_failed)?;

        let header = TableHeader::new(columns, INITIAL_ROW_CAPACITY);
        let size = checked_file_size(&path_str, columns, INITIAL_ROW_CAPACITY)?;
        file.set_len(size as u64).map_err(write_failed)?;

        // SAFETY: The file was just created with the exact size of the mapping
        // and is only resized through `grow`, which re-maps afterwards.
        let mmap = unsafe { MmapMut::map_mut(&file).map_err(write_failed)? };

        let mut table = Self {
            file,
            mmap,
            header,
            path: path_str,
        };
        table.write_header();
        table.fill_null(0, INITIAL_ROW_CAPACITY);
        Ok(table)
    }

    /// Opens an existing table file.
    ///
    /// # Errors
    ///
    /// - [`TableError::ReadFailed`] if the file cannot be opened or mapped.
    /// - [`TableError::Corrupted`] if the header or size is invalid.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();
        let read_failed = |source| TableError::ReadFailed {
            path: path_str.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(read_failed)?;

        // SAFETY: The file was opened read/write; its size is validated
        // against the header below before any cell is accessed.
        let mmap = unsafe { MmapMut::map_mut(&file).map_err(read_failed)? };

        if mmap.len() < HEADER_SIZE {
            return Err(TableError::Corrupted {
                path: path_str,
                reason: format!(
                    "file too small: {} bytes, expected at least {}",
                    mmap.len(),
                    HEADER_SIZE
                ),
            }
            .into());
        }

        let header = TableHeader::decode(&mmap);
        header.validate(&path_str)?;

        let expected = checked_file_size(&path_str, header.columns, header.row_capacity)?;
        if mmap.len() != expected {
            return Err(TableError::Corrupted {
                path: path_str,
                reason: format!("file size mismatch: {} bytes, expected {}", mmap.len(), expected),
            }
            .into());
        }

        Ok(Self {
            file,
            mmap,
            header,
            path: path_str,
        })
    }

    /// Returns the number of value columns (the timestamp is not counted).
    pub fn columns(&self) -> u32 {
        self.header.columns
    }

    /// Returns the number of rows written.
    pub fn row_count(&self) -> u64 {
        self.header.row_count
    }

    /// Returns the number of rows the current mapping can hold.
    pub fn row_capacity(&self) -> u64 {
        self.header.row_capacity
    }

    /// Returns the path to this table file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reads one cell; cell 0 is the timestamp.
    ///
    /// Returns `None` for null cells and for addresses outside the written
    /// rows or columns.
    pub fn read_cell(&self, row: u64, cell: usize) -> Option<f64> {
        let offset = self.cell_offset(row, cell)?;
        let mut bytes = [0u8; CELL_SIZE];
        bytes.copy_from_slice(&self.mmap[offset..offset + CELL_SIZE]);
        let value = f64::from_le_bytes(bytes);
        (!value.is_nan()).then_some(value)
    }

    /// Writes one cell of an existing row; `None` writes the null sentinel.
    ///
    /// Writes outside the written rows or columns are ignored.
    pub fn write_cell(&mut self, row: u64, cell: usize, value: Option<f64>) {
        if let Some(offset) = self.cell_offset(row, cell) {
            let bits = value.unwrap_or(f64::NAN).to_le_bytes();
            self.mmap[offset..offset + CELL_SIZE].copy_from_slice(&bits);
        }
    }

    /// Appends a row of null cells and returns its 0-based position.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::WriteFailed`] if the file must grow and cannot.
    pub fn push_row(&mut self) -> Result<u64> {
        if self.header.row_count == self.header.row_capacity {
            let capacity = (self.header.row_capacity * 2).max(INITIAL_ROW_CAPACITY);
            self.grow(capacity)?;
        }

        let row = self.header.row_count;
        self.header.row_count += 1;
        self.write_header();
        Ok(row)
    }

    /// Flushes the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::SyncFailed`] if the flush fails.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().map_err(|e| {
            TableError::SyncFailed {
                path: self.path.clone(),
                source: e,
            }
            .into()
        })
    }

    /// Extends the file to `row_capacity` rows and re-maps it.
    fn grow(&mut self, row_capacity: u64) -> Result<()> {
        let write_failed = |source| TableError::WriteFailed {
            path: self.path.clone(),
            source,
        };

        let size = checked_file_size(&self.path, self.header.columns, row_capacity)?;
        self.mmap.flush().map_err(write_failed)?;
        self.file.set_len(size as u64).map_err(write_failed)?;

        // SAFETY: The file was just extended to the new size; the previous
        // mapping is replaced (and unmapped) before any access through it.
        self.mmap = unsafe { MmapMut::map_mut(&self.file).map_err(write_failed)? };

        let previous = self.header.row_capacity;
        self.header.row_capacity = row_capacity;
        self.write_header();
        self.fill_null(previous, row_capacity);

        tracing::debug!(path = %self.path, row_capacity, "grew table file");
        Ok(())
    }

    /// Writes the null sentinel into every cell of rows `[from, to)`.
    #[allow(clippy::cast_possible_truncation)] // rows are within the mapped region
    fn fill_null(&mut self, from: u64, to: u64) {
        let width = row_width(self.header.columns);
        let start = HEADER_SIZE + from as usize * width;
        let end = HEADER_SIZE + to as usize * width;
        let nan = f64::NAN.to_le_bytes();
        for cell in self.mmap[start..end].chunks_exact_mut(CELL_SIZE) {
            cell.copy_from_slice(&nan);
        }
    }

    fn write_header(&mut self) {
        let header = self.header;
        header.encode(&mut self.mmap[..HEADER_SIZE]);
    }

    /// Byte offset of a cell, `None` if outside the written area.
    #[allow(clippy::cast_possible_truncation)] // row < row_count, which is mapped
    fn cell_offset(&self, row: u64, cell: usize) -> Option<usize> {
        if row >= self.header.row_count || cell > self.header.columns as usize {
            return None;
        }
        Some(HEADER_SIZE + row as usize * row_width(self.header.columns) + cell * CELL_SIZE)
    }
}
