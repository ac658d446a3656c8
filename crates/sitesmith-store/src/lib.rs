pub mod database;
pub mod documents;
pub mod error;
pub mod schema;

pub use database::Database;
pub use documents::{DocumentRepo, PersistenceStore, StoredWorkspace};
pub use error::StoreError;
