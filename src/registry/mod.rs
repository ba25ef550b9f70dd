//! Upload history: a bounded, most-recent-first record of completed transfers
//! with pluggable persistence.

pub mod error;
pub mod persistence;
pub mod store;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use persistence::{MemoryPersistence, RegistryPersistence, SqlitePersistence};
pub use store::TransferRegistry;
pub use types::TransferRecord;
