use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed transfer, as shown in the upload history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub transfer_id: String,
    pub file_name: String,
    pub file_type: String,
    pub completed_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub owner_id: String,
}

impl TransferRecord {
    pub fn new(
        transfer_id: impl Into<String>,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        size_bytes: u64,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            file_name: file_name.into(),
            file_type: file_type.into(),
            completed_at: Utc::now(),
            size_bytes,
            owner_id: owner_id.into(),
        }
    }
}
