use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};
use serde_json::json;

use super::error::{StorageError, StorageResult};
use super::types::{DirectUploadGrant, Manifest, RelayReceipt};
use super::{DirectUploadPort, DownloadPort, RelayPort};

/// Storage boundary backed by the file-manager backend's HTTP routes.
#[derive(Clone)]
pub struct HttpStorage {
    client: Client,
    base_url: String,
    owner_id: String,
}

impl HttpStorage {
    pub fn new(base_url: &str, owner_id: &str, timeout: Duration) -> StorageResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            owner_id: owner_id.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `transfer_id` is percent-encoded as a single path segment
    fn manifest_url(&self, transfer_id: &str) -> StorageResult<Url> {
        let mut url = Url::parse(&self.url("/api/minio/files"))
            .map_err(|e| StorageError::InvalidResponse(format!("bad base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidResponse(format!("bad base url: {}", self.base_url)))?
            .push(transfer_id)
            .push("manifest");
        Ok(url)
    }

    /// Pass successful responses through; turn everything else into a
    /// `StorageError`, parsing a structured body when there is one.
    async fn check(response: Response) -> StorageResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), "storage request rejected: {}", body);
        Err(StorageError::from_response(status.as_u16(), &body))
    }
}

#[async_trait]
impl RelayPort for HttpStorage {
    fn relay_endpoint(&self) -> String {
        self.url("/upload-chunk")
    }

    async fn upload_chunk_relay(
        &self,
        chunk: Bytes,
        file_name: &str,
        chunk_index: u32,
        total_chunks: u32,
        transfer_id: Option<&str>,
    ) -> StorageResult<RelayReceipt> {
        let length = chunk.len() as u64;
        let part = Part::stream_with_length(chunk, length).file_name(file_name.to_string());
        let mut form = Form::new()
            .part("file", part)
            .text("chunkIndex", chunk_index.to_string())
            .text("totalChunks", total_chunks.to_string());
        if let Some(id) = transfer_id {
            form = form.text("fileId", id.to_string());
        }

        let response = self
            .client
            .post(self.url("/upload-chunk"))
            .multipart(form)
            .send()
            .await?;
        let receipt = Self::check(response).await?.json::<RelayReceipt>().await?;
        Ok(receipt)
    }
}

#[async_trait]
impl DirectUploadPort for HttpStorage {
    async fn init_direct_upload(
        &self,
        file_name: &str,
        file_type: &str,
        file_size: u64,
        total_chunks: u32,
    ) -> StorageResult<DirectUploadGrant> {
        let body = json!({
            "userID": self.owner_id,
            "fileName": file_name,
            "fileType": file_type,
            "fileSize": file_size,
            "totalChunks": total_chunks,
        });

        let response = self
            .client
            .post(self.url("/api/minio/files/init"))
            .json(&body)
            .send()
            .await?;
        let grant = Self::check(response).await?.json::<DirectUploadGrant>().await?;
        Ok(grant)
    }

    async fn upload_chunk_direct(
        &self,
        location: &str,
        chunk: Bytes,
        content_type: &str,
    ) -> StorageResult<()> {
        let response = self
            .client
            .put(location)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(chunk)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn complete_direct_upload(&self, completion_location: &str) -> StorageResult<()> {
        let response = self.client.post(completion_location).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl DownloadPort for HttpStorage {
    async fn fetch_manifest(&self, transfer_id: &str) -> StorageResult<Manifest> {
        let response = self
            .client
            .get(self.manifest_url(transfer_id)?)
            .send()
            .await?;
        let manifest = Self::check(response).await?.json::<Manifest>().await?;
        Ok(manifest)
    }

    async fn fetch_chunk(&self, location: &str) -> StorageResult<Bytes> {
        let response = self.client.get(location).send().await?;
        Ok(Self::check(response).await?.bytes().await?)
    }

    async fn delete_remote_file(&self, transfer_id: &str) -> StorageResult<()> {
        let body = json!({
            "userId": self.owner_id,
            "fileId": transfer_id,
        });
        let response = self
            .client
            .delete(self.url("/api/minio/files/delete"))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let storage =
            HttpStorage::new("http://localhost:8080/", "user-1", Duration::from_secs(5)).unwrap();
        assert_eq!(storage.base_url(), "http://localhost:8080");
        assert_eq!(
            storage.url("/upload-chunk"),
            "http://localhost:8080/upload-chunk"
        );
    }

    #[test]
    fn test_manifest_url_escapes_transfer_id() {
        let storage =
            HttpStorage::new("http://localhost:8080", "user-1", Duration::from_secs(5)).unwrap();
        assert_eq!(
            storage.manifest_url("abc123").unwrap().as_str(),
            "http://localhost:8080/api/minio/files/abc123/manifest"
        );
        assert_eq!(
            storage.manifest_url("../../x").unwrap().as_str(),
            "http://localhost:8080/api/minio/files/..%2F..%2Fx/manifest"
        );
    }
}
