use serde::{Deserialize, Serialize};

use crate::registry::TransferRecord;
use crate::transfer::{HubEvent, ProgressUpdate, TransferOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub records: Vec<TransferRecord>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetainRequest {
    pub keep: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTransferResponse {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTransfersResponse {
    pub uploads: Vec<String>,
    pub downloads: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WebSocketMessage {
    TransferProgress(ProgressUpdate),
    TransferCompleted(TransferOutcome),
    /// Includes `needsReconciliation` when chunks were stored but the file
    /// was never completed
    TransferFailed(TransferOutcome),
    /// Hub events were dropped because the client fell behind
    Lagged { skipped: u64 },
    Error(ErrorResponse),
}

impl From<HubEvent> for WebSocketMessage {
    fn from(event: HubEvent) -> Self {
        match event {
            HubEvent::Progress(update) => WebSocketMessage::TransferProgress(update),
            HubEvent::Finished(outcome) if outcome.succeeded() => {
                WebSocketMessage::TransferCompleted(outcome)
            }
            HubEvent::Finished(outcome) => WebSocketMessage::TransferFailed(outcome),
        }
    }
}
