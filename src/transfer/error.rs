use thiserror::Error;

use crate::chunk::PlanningError;
use crate::registry::RegistryError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("Chunk {index} failed: {source}")]
    ChunkTransfer {
        index: u32,
        #[source]
        source: StorageError,
    },

    #[error("Manifest unavailable: {message}")]
    Manifest { message: String },

    #[error("Transfer incomplete: {} of {total} chunks missing (first missing: {})", missing.len(), missing.first().copied().unwrap_or_default())]
    IncompleteTransfer { missing: Vec<u32>, total: u32 },

    #[error("All chunks of {transfer_id} were stored but completion failed: {source}; remote chunks may be orphaned")]
    PostUploadReconciliation {
        transfer_id: String,
        #[source]
        source: StorageError,
    },

    #[error("Invalid upload grant: {0}")]
    InvalidGrant(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0} strategy is not configured")]
    StrategyUnavailable(&'static str),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transfer task aborted: {0}")]
    Aborted(String),
}

impl TransferError {
    /// Failures where bytes may be stored remotely without a usable file
    pub fn needs_reconciliation(&self) -> bool {
        matches!(self, TransferError::PostUploadReconciliation { .. })
    }

    /// Remote file id carried by the error, if any
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            TransferError::PostUploadReconciliation { transfer_id, .. } => Some(transfer_id),
            _ => None,
        }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::Planning(_) => "planning",
            TransferError::ChunkTransfer { .. } => "chunk_transfer",
            TransferError::Manifest { .. } => "manifest",
            TransferError::IncompleteTransfer { .. } => "incomplete",
            TransferError::PostUploadReconciliation { .. } => "reconciliation",
            TransferError::InvalidGrant(_) => "invalid_grant",
            TransferError::Storage(_) => "storage",
            TransferError::StrategyUnavailable(_) => "strategy_unavailable",
            TransferError::Cancelled => "cancelled",
            TransferError::InvalidState(_) => "invalid_state",
            TransferError::Registry(_) => "registry",
            TransferError::Io(_) => "io",
            TransferError::Aborted(_) => "aborted",
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
