/// Drop Store
///
/// Metadata for every drop plus the manager that sequences metadata and
/// blob operations so neither side is ever left pointing at nothing.

pub mod manager;
pub mod models;
pub mod store;

pub use manager::{DropManager, DropUpload, FetchedDrop};
pub use models::*;
pub use store::DropStore;
