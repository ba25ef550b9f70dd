use serde::{Deserialize, Serialize};

/// Where a chunk's bytes go to, or come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkLocation {
    /// Relay endpoint that accepts multipart chunk uploads
    Relay(String),
    /// Short-lived pre-signed object URL
    Presigned(String),
}

impl ChunkLocation {
    pub fn as_str(&self) -> &str {
        match self {
            ChunkLocation::Relay(endpoint) => endpoint,
            ChunkLocation::Presigned(url) => url,
        }
    }
}

impl std::fmt::Display for ChunkLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexedLocation {
    #[serde(rename = "chunkIndex")]
    pub index: u32,
    #[serde(rename = "uploadUrl")]
    pub location: String,
}

/// Response of the direct-upload "init" call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectUploadGrant {
    #[serde(rename = "fileId")]
    pub transfer_id: String,
    #[serde(rename = "uploadUrls")]
    pub chunk_upload_locations: Vec<IndexedLocation>,
    #[serde(rename = "callbackUrl")]
    pub completion_location: String,
}

impl DirectUploadGrant {
    /// Locations reordered by chunk index. `None` unless there is exactly one
    /// location for every index in `0..total_chunks`.
    pub fn ordered_locations(&self, total_chunks: u32) -> Option<Vec<String>> {
        let mut slots: Vec<Option<String>> = vec![None; total_chunks as usize];
        for entry in &self.chunk_upload_locations {
            let slot = slots.get_mut(entry.index as usize)?;
            if slot.is_some() {
                return None;
            }
            *slot = Some(entry.location.clone());
        }
        slots.into_iter().collect()
    }
}

/// Relay response to a single chunk upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelayReceipt {
    #[serde(rename = "fileId")]
    pub transfer_id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
}

/// Description of a stored file's chunks, in index order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub file_name: String,
    #[serde(default = "default_content_type")]
    pub file_type: String,
    pub chunk_locations: Vec<String>,
}

impl Manifest {
    pub fn total_chunks(&self) -> usize {
        self.chunk_locations.len()
    }
}

pub(crate) fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(indices: &[u32]) -> DirectUploadGrant {
        DirectUploadGrant {
            transfer_id: "t".into(),
            chunk_upload_locations: indices
                .iter()
                .map(|i| IndexedLocation {
                    index: *i,
                    location: format!("url-{i}"),
                })
                .collect(),
            completion_location: "done".into(),
        }
    }

    #[test]
    fn test_ordered_locations_ignore_response_order() {
        let ordered = grant(&[2, 0, 1]).ordered_locations(3).unwrap();
        assert_eq!(ordered, vec!["url-0", "url-1", "url-2"]);
    }

    #[test]
    fn test_ordered_locations_reject_gaps_and_duplicates() {
        assert!(grant(&[0, 2]).ordered_locations(3).is_none());
        assert!(grant(&[0, 0, 1]).ordered_locations(3).is_none());
        assert!(grant(&[0, 1, 5]).ordered_locations(3).is_none());
    }

    #[test]
    fn test_grant_wire_shape() {
        let json = r#"{
            "fileId": "abc",
            "uploadUrls": [{"chunkIndex": 0, "uploadUrl": "http://s3/a"}],
            "callbackUrl": "http://api/complete"
        }"#;
        let grant: DirectUploadGrant = serde_json::from_str(json).unwrap();
        assert_eq!(grant.transfer_id, "abc");
        assert_eq!(grant.chunk_upload_locations[0].location, "http://s3/a");
    }

    #[test]
    fn test_manifest_defaults_content_type() {
        let json = r#"{"fileName": "a.bin", "chunkLocations": ["x", "y"]}"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.file_type, "application/octet-stream");
        assert_eq!(manifest.total_chunks(), 2);
    }
}
