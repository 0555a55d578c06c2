//! # meterstore
//!
//! Time-ordered storage engine for metering and sensor samples.
//!
//! meterstore keeps timestamped samples (electricity and gas meter readings,
//! solar production, environmental sensors) in bounded or unbounded
//! buffers, in memory or in durable tables, and answers time-range averages
//! and point lookups over them.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Ring buffers evict the oldest sample; linear buffers grow without bound
//! - Memory and durable backings behave identically to callers
//! - Units are resolved once per signal and never drift silently
//! - Averages tolerate missing values and resample one signal by a
//!   fractional number of samples
//! - One writer and any number of readers per store, without torn reads
//!
//! ## Quick Start
//!
//! ```rust
//! use meterstore::{DataHolder, DataItem, HolderConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HolderConfig::from_json(r#"{
//!     "data_dir": "./data",
//!     "stores": [
//!         { "name": "real_time", "persistency": "volatile", "lifespan": "circular",
//!           "signals": ["current_usage"], "buffer_length": 60 }
//!     ]
//! }"#)?;
//! let holder = DataHolder::open(&config)?;
//!
//! let spec = holder.data_store("real_time")?.storage().spec();
//! for second in 0..10u32 {
//!     let mut sample = DataItem::new(spec.clone(), Some(1_700_000_000.0 + f64::from(second)));
//!     sample.set_value("current_usage", 0.4)?;
//!     holder.add_measurement("real_time", &sample)?;
//! }
//!
//! let range = holder.get_timerange("real_time")?.expect("store has samples");
//! let average = holder.get_average(
//!     "real_time",
//!     range.first,
//!     range.last,
//!     &["current_usage".to_string()],
//!     None,
//! )?;
//! assert_eq!(average.get_value("current_usage")?, Some(0.4));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`DataHolder`]: Registry of named stores built from a [`HolderConfig`]
//! - [`DataStore`]: One configured store and its storage
//! - [`TimedStorage`]: Time-ordered storage contract, implemented by
//!   [`Storage`] for every ordering × backing combination
//! - [`DataItem`] / [`DataItemSpec`]: Samples and their signal schema
//!
//! ## Modules
//!
//! - [`spec`]: Signal specifications and unit resolution
//! - [`item`]: Timestamped samples
//! - [`ordering`]: Circular and linear ordering, time-index search
//! - [`backing`]: Memory and durable backings
//! - [`storage`]: Composition of ordering and backing
//! - [`aggregate`]: Shift-aware averaging
//! - [`query`]: Serialized exports and time ranges
//! - [`table`]: Raw memory-mapped table file format
//! - [`db`]: Durable tables with column metadata
//! - [`config`]: Store and holder configuration
//! - [`store`]: Named data stores
//! - [`holder`]: Store registry
//! - [`error`]: Error types

pub mod aggregate;
pub mod backing;
pub mod config;
pub mod db;
pub mod error;
pub mod holder;
pub mod item;
pub mod ordering;
pub mod query;
pub mod spec;
pub mod storage;
pub mod store;
pub mod table;

// Re-export primary API types at crate root for convenience.
pub use aggregate::ShiftSpec;
pub use config::{HolderConfig, LifeSpan, Persistency, ShiftConfig, StoreConfig};
pub use error::{MeterStoreError, Result};
pub use holder::DataHolder;
pub use item::DataItem;
pub use query::{Serialized, TimeRange};
pub use spec::DataItemSpec;
pub use storage::{
    CircularMemStorage, CircularPersistentStorage, LinearMemStorage, LinearPersistentStorage,
    Storage, TimedStorage,
};
pub use store::{DataStore, DataStoreInfo};
