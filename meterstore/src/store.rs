//! Named data stores.
//!
//! A [`DataStore`] binds a [`StoreConfig`] to the storage variant it
//! describes. The variant is picked once, when the store is opened:
//!
//! | persistency  | lifespan   | storage                       |
//! |--------------|------------|-------------------------------|
//! | `volatile`   | `circular` | [`CircularMemStorage`]        |
//! | `volatile`   | `linear`   | [`LinearMemStorage`]          |
//! | `persistent` | `circular` | [`CircularPersistentStorage`] |
//! | `persistent` | `linear`   | [`LinearPersistentStorage`]   |

use serde::Serialize;

use crate::config::{LifeSpan, Persistency, StoreConfig};
use crate::db::Database;
use crate::error::{ConfigError, Result};
use crate::storage::{
    CircularMemStorage, CircularPersistentStorage, LinearMemStorage, LinearPersistentStorage,
    TimedStorage,
};

/// Serializable description of a store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataStoreInfo {
    /// Store name.
    pub name: String,
    /// Memory or durable table.
    pub persistency: Persistency,
    /// Ring or unbounded.
    pub lifespan: LifeSpan,
    /// Carried signals.
    pub signals: Vec<String>,
    /// Ring capacity, circular stores only.
    pub buffer_length: Option<usize>,
    /// Backing table, persistent stores only.
    pub table: Option<String>,
    /// Current number of items.
    pub length: usize,
}

/// A configured store and its storage.
#[derive(Debug)]
pub struct DataStore {
    config: StoreConfig,
    storage: Box<dyn TimedStorage>,
}

impl DataStore {
    /// Validates `config` and opens the matching storage.
    ///
    /// Persistent stores open (or create) their table in `db`.
    ///
    /// # Errors
    ///
    /// - Any error of [`StoreConfig::validate`].
    /// - [`ConfigError::NoDatabase`] if a persistent store gets no database.
    /// - Table errors while opening a persistent store.
    pub fn open(config: &StoreConfig, db: Option<&Database>) -> Result<Self> {
        config.validate()?;

        let capacity = config.buffer_length.unwrap_or(0);
        let storage: Box<dyn TimedStorage> = match config.persistency {
            Persistency::Volatile => match config.lifespan {
                LifeSpan::Circular => Box::new(CircularMemStorage::new(capacity, &config.signals)?),
                LifeSpan::Linear => Box::new(LinearMemStorage::new(&config.signals)?),
            },
            Persistency::Persistent => {
                let (Some(db), Some(table)) = (db, config.table.as_deref()) else {
                    return Err(ConfigError::NoDatabase {
                        store: config.name.clone(),
                    }
                    .into());
                };
                let table = db.open_table(table, &config.signals)?;
                match config.lifespan {
                    LifeSpan::Circular => Box::new(CircularPersistentStorage::open(capacity, table)?),
                    LifeSpan::Linear => Box::new(LinearPersistentStorage::open(table)?),
                }
            }
        };

        tracing::info!(
            store = %config.name,
            persistency = %config.persistency,
            lifespan = %config.lifespan,
            length = storage.length(),
            "opened data store"
        );

        Ok(Self {
            config: config.clone(),
            storage,
        })
    }

    /// Returns the store name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the configured signals.
    pub fn signals(&self) -> &[String] {
        &self.config.signals
    }

    /// Returns the store persistency.
    pub fn persistency(&self) -> Persistency {
        self.config.persistency
    }

    /// Returns the store lifespan.
    pub fn lifespan(&self) -> LifeSpan {
        self.config.lifespan
    }

    /// Returns the descriptor the store was opened from.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the storage.
    pub fn storage(&self) -> &dyn TimedStorage {
        self.storage.as_ref()
    }

    /// Describes the store.
    pub fn info(&self) -> DataStoreInfo {
        DataStoreInfo {
            name: self.config.name.clone(),
            persistency: self.config.persistency,
            lifespan: self.config.lifespan,
            signals: self.config.signals.clone(),
            buffer_length: (self.config.lifespan == LifeSpan::Circular)
                .then_some(self.config.buffer_length)
                .flatten(),
            table: (self.config.persistency == Persistency::Persistent)
                .then(|| self.config.table.clone())
                .flatten(),
            length: self.storage.length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeterStoreError;
    use tempfile::tempdir;

    fn config(persistency: Persistency, lifespan: LifeSpan) -> StoreConfig {
        StoreConfig {
            name: "store".to_string(),
            persistency,
            lifespan,
            signals: vec!["A".to_string()],
            buffer_length: Some(4),
            table: Some("store".to_string()),
        }
    }

    #[test]
    fn test_open_every_variant() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        for persistency in [Persistency::Volatile, Persistency::Persistent] {
            for lifespan in [LifeSpan::Circular, LifeSpan::Linear] {
                let mut config = config(persistency, lifespan);
                config.table = Some(format!("t_{lifespan}"));
                let store = DataStore::open(&config, Some(&db)).unwrap();
                assert_eq!(store.name(), "store");
                assert_eq!(store.storage().length(), 0);
            }
        }
    }

    #[test]
    fn test_persistent_needs_database() {
        let config = config(Persistency::Persistent, LifeSpan::Linear);
        assert!(matches!(
            DataStore::open(&config, None),
            Err(MeterStoreError::Config(ConfigError::NoDatabase { .. }))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config(Persistency::Volatile, LifeSpan::Circular);
        config.buffer_length = Some(0);
        assert!(DataStore::open(&config, None).is_err());
    }

    #[test]
    fn test_info_drops_unused_fields() {
        let store = DataStore::open(&config(Persistency::Volatile, LifeSpan::Linear), None).unwrap();
        let info = store.info();

        assert_eq!(info.buffer_length, None);
        assert_eq!(info.table, None);
        assert_eq!(info.length, 0);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["persistency"], "volatile");
        assert_eq!(json["lifespan"], "linear");
    }
}
