#[cfg(feature = "sea-orm")]
mod database;
mod error;
mod memory;
mod traits;

#[cfg(feature = "sea-orm")]
pub use database::DatabaseStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use traits::{Reclaimed, RubricSync, Store};
