use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database Error: {0}")]
    Db(#[from] duckdb::Error),
    #[error("Conversation {0} not found")]
    ConversationNotFound(Uuid),
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
