//! Job record store.
//!
//! This crate provides:
//! - The `RecordStore` interface the engine persists through
//! - Shared update validation (`RecordUpdate`)
//! - An in-memory implementation
//! - An injectable wall clock

pub mod clock;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod store;
pub mod update;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryRecordStore;
pub use store::RecordStore;
pub use update::RecordUpdate;
