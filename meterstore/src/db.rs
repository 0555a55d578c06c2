//! Durable tables: the persistence adapter for persistent storages.
//!
//! A [`Database`] is a directory holding one table per persistent store.
//! Table `T` is made of two files:
//!
//! ```text
//! T.meta.json   column metadata: "timestamp" (integer) + one real column per signal
//! T.tbl         memory-mapped rows, see crate::table
//! ```
//!
//! A [`Table`] is a cheap, cloneable handle. Clones share the mapped file
//! behind a read-write lock, so point reads from several threads can run
//! while another thread appends.
//!
//! Row counts live in the mapped headers of the open [`Database`], so only
//! one `Database` may hold a directory at a time. It takes an exclusive lock
//! on `meterstore.lock`, released once the database and all of its table
//! handles are dropped. Share tables across threads through one `Database`.
//!
//! Rows are addressed by 0-based logical index; [`Table::row_id`] gives the
//! matching 1-based row address used in log and error messages.
//!
//! # Schema drift
//!
//! When an existing table's columns differ from the configured signals the
//! mismatch is logged and the table is used through a by-name mapping:
//! configured signals without a column read as absent and are never written.

use std::collections::HashMap;
use std::fs::{self, File, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecError, TableError};
use crate::table::TableFile;

/// Current metadata format version.
const META_VERSION: u32 = 1;

/// Name of the timestamp column.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Directory lock file.
const LOCK_FILE: &str = "meterstore.lock";

/// Storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Integer affinity (the timestamp column).
    Integer,
    /// Floating point.
    Real,
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name; signal columns are named after their signal.
    pub name: String,
    /// Storage class.
    pub kind: ColumnKind,
}

/// Persisted column metadata of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Metadata format version.
    pub version: u32,
    /// Table name.
    pub name: String,
    /// Columns, timestamp first.
    pub columns: Vec<ColumnMeta>,
}

impl TableMeta {
    fn new(name: &str, signals: &[String]) -> Self {
        let mut columns = vec![ColumnMeta {
            name: TIMESTAMP_COLUMN.to_string(),
            kind: ColumnKind::Integer,
        }];
        columns.extend(signals.iter().map(|s| ColumnMeta {
            name: s.clone(),
            kind: ColumnKind::Real,
        }));

        Self {
            version: META_VERSION,
            name: name.to_string(),
            columns,
        }
    }

    /// Names of the value columns, in file order.
    fn value_columns(&self) -> Vec<String> {
        self.columns.iter().skip(1).map(|c| c.name.clone()).collect()
    }

    fn load(path: &Path) -> Result<Self> {
        let path_str = path.to_string_lossy().to_string();
        let content = fs::read_to_string(path).map_err(|e| TableError::ReadFailed {
            path: path_str.clone(),
            source: e,
        })?;
        let meta: Self = serde_json::from_str(&content).map_err(|e| TableError::Metadata {
            path: path_str.clone(),
            source: e,
        })?;

        if meta.version != META_VERSION {
            return Err(TableError::Corrupted {
                path: path_str,
                reason: format!(
                    "unsupported metadata version: expected {}, found {}",
                    META_VERSION, meta.version
                ),
            }
            .into());
        }
        if meta.columns.first().is_none_or(|c| c.name != TIMESTAMP_COLUMN) {
            return Err(TableError::Corrupted {
                path: path_str,
                reason: format!("first column must be '{TIMESTAMP_COLUMN}'"),
            }
            .into());
        }
        Ok(meta)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().to_string();
        let json = serde_json::to_string_pretty(self).map_err(|e| TableError::Metadata {
            path: path_str.clone(),
            source: e,
        })?;
        fs::write(path, json).map_err(|e| {
            TableError::WriteFailed {
                path: path_str,
                source: e,
            }
            .into()
        })
    }
}

/// Returns whether `name` can be used as a table name.
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Open table file shared by every handle on the same table.
#[derive(Debug, Clone)]
struct SharedTable {
    file: Arc<RwLock<TableFile>>,
    columns: Arc<Vec<String>>,
    /// Keeps the directory locked while any handle is alive.
    _lock: Arc<File>,
}

/// Directory of durable tables.
#[derive(Debug)]
pub struct Database {
    dir: PathBuf,
    tables: Mutex<HashMap<String, SharedTable>>,
    lock: Arc<File>,
}

/// Takes the exclusive directory lock.
fn lock_dir(dir: &Path) -> Result<File> {
    let path = dir.join(LOCK_FILE);
    let write_failed = |source| TableError::WriteFailed {
        path: path.to_string_lossy().to_string(),
        source,
    };

    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(write_failed)?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(TableError::DatabaseLocked {
            path: dir.to_string_lossy().to_string(),
        }
        .into()),
        Err(TryLockError::Error(e)) => Err(write_failed(e).into()),
    }
}

impl Database {
    /// Opens (creating if needed) a database directory and locks it.
    ///
    /// # Errors
    ///
    /// - [`TableError::WriteFailed`] if the directory or its lock file cannot
    ///   be created.
    /// - [`TableError::DatabaseLocked`] if another `Database`, in this or
    ///   another process, holds the directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| TableError::WriteFailed {
            path: dir.to_string_lossy().to_string(),
            source: e,
        })?;
        let lock = lock_dir(&dir)?;

        tracing::debug!(dir = %dir.display(), "opened database");
        Ok(Self {
            dir,
            tables: Mutex::new(HashMap::new()),
            lock: Arc::new(lock),
        })
    }

    /// Returns the database directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Opens a table for the configured `signals`, creating it if missing.
    ///
    /// Opening the same table again returns a handle sharing the already
    /// mapped file.
    ///
    /// # Errors
    ///
    /// - [`TableError::InvalidName`] if `name` is not `[A-Za-z0-9_]+`.
    /// - [`TableError`] variants if the files cannot be created, read or
    ///   are corrupted.
    pub fn open_table(&self, name: &str, signals: &[String]) -> Result<Table> {
        if !is_valid_table_name(name) {
            return Err(TableError::InvalidName {
                name: name.to_string(),
            }
            .into());
        }

        let mut tables = self.tables.lock();
        let shared = match tables.get(name) {
            Some(shared) => shared.clone(),
            None => {
                let shared = self.load_or_create(name, signals)?;
                tables.insert(name.to_string(), shared.clone());
                shared
            }
        };
        drop(tables);

        if shared.columns.as_slice() != signals {
            tracing::error!(
                table = name,
                configured = ?signals,
                found = ?shared.columns,
                "table columns do not match configured signals"
            );
        }

        let mapping = signals
            .iter()
            .map(|signal| {
                shared
                    .columns
                    .iter()
                    .position(|c| c == signal)
                    .map(|column| column + 1)
            })
            .collect();

        Ok(Table {
            name: Arc::from(name),
            signals: Arc::new(signals.to_vec()),
            mapping: Arc::new(mapping),
            shared,
        })
    }

    /// Lists the tables present in the directory, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::ReadFailed`] if the directory cannot be listed.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let read_failed = |e| TableError::ReadFailed {
            path: self.dir.to_string_lossy().to_string(),
            source: e,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(read_failed)? {
            let entry = entry.map_err(read_failed)?;
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".meta.json")) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.meta.json"))
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.tbl"))
    }

    fn load_or_create(&self, name: &str, signals: &[String]) -> Result<SharedTable> {
        let meta_path = self.meta_path(name);
        let table_path = self.table_path(name);

        let (meta, file) = if meta_path.exists() {
            let meta = TableMeta::load(&meta_path)?;
            let file = TableFile::open(&table_path)?;

            let columns = meta.columns.len() - 1;
            if file.columns() as usize != columns {
                return Err(TableError::Corrupted {
                    path: file.path().to_string(),
                    reason: format!(
                        "file has {} value columns, metadata lists {}",
                        file.columns(),
                        columns
                    ),
                }
                .into());
            }

            tracing::info!(table = name, rows = file.row_count(), "opened table");
            (meta, file)
        } else if table_path.exists() {
            // Creating would truncate rows whose layout is no longer known.
            return Err(TableError::Corrupted {
                path: table_path.to_string_lossy().to_string(),
                reason: format!("metadata file {} is missing", meta_path.display()),
            }
            .into());
        } else {
            let meta = TableMeta::new(name, signals);
            let columns = u32::try_from(signals.len()).map_err(|_| TableError::Corrupted {
                path: table_path.to_string_lossy().to_string(),
                reason: format!("too many columns: {}", signals.len()),
            })?;
            let file = TableFile::create(&table_path, columns)?;
            meta.save(&meta_path)?;

            tracing::info!(table = name, columns = ?signals, "created table");
            (meta, file)
        };

        Ok(SharedTable {
            file: Arc::new(RwLock::new(file)),
            columns: Arc::new(meta.value_columns()),
            _lock: Arc::clone(&self.lock),
        })
    }
}

/// All rows of a table, column by column, in row order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableDump {
    /// The timestamp column.
    pub timestamps: Vec<Option<f64>>,
    /// One column per configured signal, in configured order.
    pub columns: Vec<Vec<Option<f64>>>,
}

/// Handle on one durable table, viewed through a configured signal list.
///
/// Row cells are exchanged as `[timestamp, v0, v1, ...]` with `vi` the
/// configured signal `i`.
#[derive(Debug, Clone)]
pub struct Table {
    name: Arc<str>,
    signals: Arc<Vec<String>>,
    /// Configured signal position -> file cell (1-based; 0 is the timestamp).
    mapping: Arc<Vec<Option<usize>>>,
    shared: SharedTable,
}

#[allow(clippy::cast_possible_truncation)] // row counts never exceed the mapped region
fn to_usize(rows: u64) -> usize {
    rows as usize
}

impl Table {
    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configured signals.
    pub fn signals(&self) -> &[String] {
        &self.signals
    }

    /// Returns the value columns present in the file.
    pub fn columns(&self) -> &[String] {
        &self.shared.columns
    }

    /// Returns the number of rows.
    pub fn row_count(&self) -> usize {
        to_usize(self.shared.file.read().row_count())
    }

    /// Returns the 1-based row address of a logical index.
    pub fn row_id(&self, index: usize) -> u64 {
        index as u64 + 1
    }

    /// Reads a full row as `[timestamp, v0, v1, ...]`, `None` past the end.
    pub fn read_row(&self, index: usize) -> Option<Vec<Option<f64>>> {
        let file = self.shared.file.read();
        let row = index as u64;
        if row >= file.row_count() {
            return None;
        }

        let mut cells = Vec::with_capacity(self.mapping.len() + 1);
        cells.push(file.read_cell(row, 0));
        cells.extend(
            self.mapping
                .iter()
                .map(|column| column.and_then(|c| file.read_cell(row, c))),
        );
        Some(cells)
    }

    /// Reads one cell: 0 is the timestamp, `1 + i` the configured signal `i`.
    pub fn read_cell(&self, index: usize, cell: usize) -> Option<f64> {
        let column = self.file_cell(cell)?;
        self.shared.file.read().read_cell(index as u64, column)
    }

    /// Reads the timestamp of a row.
    pub fn read_timestamp(&self, index: usize) -> Option<f64> {
        self.read_cell(index, 0)
    }

    /// Appends a row and returns its logical index.
    ///
    /// The write is sparse: absent cells are skipped and stay null.
    ///
    /// # Errors
    ///
    /// - [`SpecError::ArrayLength`] if `row` does not match the signals.
    /// - [`TableError::WriteFailed`] if the file cannot grow.
    pub fn append_row(&self, row: &[Option<f64>]) -> Result<usize> {
        self.check_width(row)?;

        let mut file = self.shared.file.write();
        let position = file.push_row()?;
        for (cell, value) in row.iter().enumerate() {
            if let (Some(value), Some(column)) = (value, self.file_cell(cell)) {
                file.write_cell(position, column, Some(*value));
            }
        }

        tracing::trace!(table = %self.name, row_id = position + 1, "appended row");
        Ok(to_usize(position))
    }

    /// Overwrites every cell of an existing row, absent cells included.
    ///
    /// # Errors
    ///
    /// - [`SpecError::ArrayLength`] if `row` does not match the signals.
    /// - [`TableError::RowOutOfRange`] if the row does not exist.
    pub fn update_row(&self, index: usize, row: &[Option<f64>]) -> Result<()> {
        self.check_width(row)?;

        let mut file = self.shared.file.write();
        let rows = file.row_count();
        if index as u64 >= rows {
            return Err(TableError::RowOutOfRange {
                table: self.name.to_string(),
                row_id: self.row_id(index),
                rows,
            }
            .into());
        }

        for (cell, value) in row.iter().enumerate() {
            if let Some(column) = self.file_cell(cell) {
                file.write_cell(index as u64, column, *value);
            }
        }
        Ok(())
    }

    /// Reads every row, column by column.
    pub fn dump(&self) -> TableDump {
        let file = self.shared.file.read();
        let rows = file.row_count();

        let timestamps = (0..rows).map(|row| file.read_cell(row, 0)).collect();
        let columns = self
            .mapping
            .iter()
            .map(|column| match column {
                Some(c) => (0..rows).map(|row| file.read_cell(row, *c)).collect(),
                None => vec![None; to_usize(rows)],
            })
            .collect();

        TableDump {
            timestamps,
            columns,
        }
    }

    /// Flushes the table to disk.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::SyncFailed`] if the flush fails.
    pub fn sync(&self) -> Result<()> {
        self.shared.file.read().sync()
    }

    /// Maps a row cell position to its file cell.
    fn file_cell(&self, cell: usize) -> Option<usize> {
        match cell {
            0 => Some(0),
            _ => self.mapping.get(cell - 1).copied().flatten(),
        }
    }

    fn check_width(&self, row: &[Option<f64>]) -> Result<()> {
        let expected = self.signals.len() + 1;
        if row.len() != expected {
            return Err(SpecError::ArrayLength {
                expected,
                found: row.len(),
            }
            .into());
        }
        Ok(())
    }
}
