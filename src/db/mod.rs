pub mod connection;
pub mod error;
pub mod history;
pub mod models;
pub mod preferences;

pub use connection::{get_connection, lock, open_in_memory, DbPool};
pub use error::{StoreError, StoreResult};
pub use history::HistoryStore;
pub use models::*;
pub use preferences::PreferenceStore;
