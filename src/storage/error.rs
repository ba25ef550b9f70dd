use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Remote(ErrorEnvelope),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Injected failure: {0}")]
    Injected(String),
}

impl StorageError {
    /// Build an error from a non-success response, preferring a structured
    /// envelope when the body carries one.
    pub fn from_response(status: u16, body: &str) -> Self {
        match ErrorEnvelope::parse(body) {
            Some(envelope) => StorageError::Remote(envelope),
            None => StorageError::Status {
                status,
                body: body.trim().to_string(),
            },
        }
    }

    /// Human-readable message suitable for surfacing to a user
    pub fn readable_message(&self) -> String {
        match self {
            StorageError::Remote(envelope) => envelope.readable_message(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidResponse(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Structured error body returned by object storage (S3/MinIO style).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    #[serde(rename = "Code", alias = "code", alias = "errorCode", default)]
    pub error_code: String,
    #[serde(rename = "Message", alias = "message", alias = "errorMessage", default)]
    pub error_message: String,
    #[serde(rename = "Key", alias = "key", alias = "resourceKey", default)]
    pub resource_key: String,
    #[serde(rename = "BucketName", alias = "bucketName", alias = "containerName", default)]
    pub container_name: String,
}

#[derive(Deserialize)]
struct WrappedEnvelope {
    #[serde(rename = "Error", alias = "error")]
    error: ErrorEnvelope,
}

impl ErrorEnvelope {
    /// Parse an XML (`<Error><Code>..</Code>..</Error>`) or JSON error body.
    /// Returns `None` when neither a code nor a message can be found.
    pub fn parse(body: &str) -> Option<Self> {
        let trimmed = body.trim();
        let envelope = if trimmed.starts_with('<') {
            Self::parse_xml(trimmed)
        } else {
            serde_json::from_str::<WrappedEnvelope>(trimmed)
                .map(|w| w.error)
                .or_else(|_| serde_json::from_str::<ErrorEnvelope>(trimmed))
                .ok()
        }?;

        if envelope.error_code.is_empty() && envelope.error_message.is_empty() {
            return None;
        }
        Some(envelope)
    }

    fn parse_xml(body: &str) -> Option<Self> {
        let error = xml_element(body, "Error")?;
        let text = |tag: &str| xml_element(error, tag).map(decode_xml_entities).unwrap_or_default();
        Some(Self {
            error_code: text("Code"),
            error_message: text("Message"),
            resource_key: text("Key"),
            container_name: text("BucketName"),
        })
    }

    pub fn is_missing_resource(&self) -> bool {
        matches!(
            self.error_code.as_str(),
            "NoSuchKey" | "NoSuchBucket" | "NoSuchUpload" | "NotFound"
        )
    }

    pub fn readable_message(&self) -> String {
        let mut message = if self.error_message.is_empty() {
            self.error_code.clone()
        } else {
            format!("{} ({})", self.error_message, self.error_code)
        };
        if !self.resource_key.is_empty() {
            message.push_str(&format!(" [key: {}", self.resource_key));
            if !self.container_name.is_empty() {
                message.push_str(&format!(", bucket: {}", self.container_name));
            }
            message.push(']');
        }
        message
    }
}

impl std::fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.readable_message())
    }
}

/// Text content of the first `<tag>..</tag>` element. Nested elements are
/// returned verbatim.
fn xml_element<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim())
}

/// Replace the predefined XML entities. `&amp;` goes last so `&amp;lt;`
/// decodes to `&lt;`.
fn decode_xml_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
