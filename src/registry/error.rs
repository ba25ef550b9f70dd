use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Corrupt record at position {position}: {reason}")]
    CorruptRecord { position: i64, reason: String },

    #[error("Invalid capacity: {0}")]
    InvalidCapacity(usize),
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        RegistryError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::SerializationError(err.to_string())
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
