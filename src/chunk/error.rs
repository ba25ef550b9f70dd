use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Cannot plan a zero-length file; empty files must be handled by the caller")]
    EmptyFile,

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("File of {file_size} bytes needs {chunks} chunks, more than the supported maximum")]
    TooManyChunks { file_size: u64, chunks: u64 },
}

pub type PlanningResult<T> = std::result::Result<T, PlanningError>;
