//! Owner profile attached to uploads.
//!
//! Profiles arrive as loose JSON from the auth layer. They are validated once
//! here and every missing field resolves to an explicit default, so nothing
//! downstream has to handle an absent owner.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CURRENT_PROFILE_VERSION: u32 = 1;
pub const ANONYMOUS_OWNER: &str = "anonymous";
/// Storage quota shown when the profile omits one, in GiB
pub const DEFAULT_STORAGE_LIMIT_GB: u64 = 10;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Malformed profile: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported profile version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerProfile {
    pub version: u32,
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    pub storage_used: u64,
    pub storage_limit_gb: u64,
}

/// Wire shape; every field optional
#[derive(Deserialize)]
struct RawProfile {
    version: Option<u32>,
    #[serde(alias = "userID", alias = "userId")]
    user_id: Option<String>,
    #[serde(alias = "username", alias = "displayName")]
    display_name: Option<String>,
    email: Option<String>,
    #[serde(alias = "storageUsed")]
    storage_used: Option<u64>,
    #[serde(alias = "storageLimit")]
    storage_limit: Option<u64>,
}

impl OwnerProfile {
    pub fn anonymous() -> Self {
        Self {
            version: CURRENT_PROFILE_VERSION,
            user_id: ANONYMOUS_OWNER.to_string(),
            display_name: String::new(),
            email: String::new(),
            storage_used: 0,
            storage_limit_gb: DEFAULT_STORAGE_LIMIT_GB,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ProfileError> {
        let raw: RawProfile = serde_json::from_str(json)?;

        let version = raw.version.unwrap_or(CURRENT_PROFILE_VERSION);
        if version != CURRENT_PROFILE_VERSION {
            return Err(ProfileError::UnsupportedVersion(version));
        }

        let user_id = raw
            .user_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| ANONYMOUS_OWNER.to_string());

        Ok(Self {
            version,
            user_id,
            display_name: raw.display_name.unwrap_or_default(),
            email: raw.email.unwrap_or_default(),
            storage_used: raw.storage_used.unwrap_or(0),
            storage_limit_gb: raw.storage_limit.unwrap_or(DEFAULT_STORAGE_LIMIT_GB),
        })
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id == ANONYMOUS_OWNER
    }
}

impl Default for OwnerProfile {
    fn default() -> Self {
        Self::anonymous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_profile() {
        let profile = OwnerProfile::from_json(
            r#"{"userID":"u-42","username":"ada","email":"ada@example.com","storageUsed":1024,"storageLimit":20}"#,
        )
        .unwrap();

        assert_eq!(profile.version, 1);
        assert_eq!(profile.user_id, "u-42");
        assert_eq!(profile.display_name, "ada");
        assert_eq!(profile.storage_used, 1024);
        assert_eq!(profile.storage_limit_gb, 20);
        assert!(!profile.is_anonymous());
    }

    #[test]
    fn test_missing_fields_resolve_to_defaults() {
        let profile = OwnerProfile::from_json(r#"{"theme":"dark"}"#).unwrap();
        assert_eq!(profile, OwnerProfile::anonymous());

        let blank = OwnerProfile::from_json(r#"{"userID":"   "}"#).unwrap();
        assert!(blank.is_anonymous());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let err = OwnerProfile::from_json(r#"{"version":2,"userID":"u"}"#).unwrap_err();
        assert!(matches!(err, ProfileError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            OwnerProfile::from_json("not json"),
            Err(ProfileError::Malformed(_))
        ));
    }
}
