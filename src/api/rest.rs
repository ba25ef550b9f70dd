use crate::api::error::{ApiError, ApiResult};
use crate::api::types::*;
use crate::api::AppState;
use crate::transfer::{UploadSource, UploadStrategy};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};

pub struct RestApi {
    state: AppState,
}

impl RestApi {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            // Upload history
            .route("/api/v1/history", get(list_history).delete(clear_history))
            .route("/api/v1/history/retain", post(retain_history))
            // Files
            .route(
                "/api/v1/uploads",
                post(upload_file).layer(DefaultBodyLimit::max(self.state.max_upload_bytes)),
            )
            .route(
                "/api/v1/files/:transfer_id",
                get(download_file).delete(delete_file),
            )
            // Running transfers
            .route("/api/v1/transfers", get(list_transfers))
            .route("/api/v1/transfers/:id/cancel", post(cancel_transfer))
            .with_state(self.state.clone())
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn list_history(State(state): State<AppState>) -> Json<HistoryResponse> {
    let records = state.registry.list();
    Json(HistoryResponse {
        count: records.len(),
        records,
    })
}

async fn clear_history(State(state): State<AppState>) -> ApiResult<Json<SuccessResponse>> {
    state.registry.clear_all().await?;
    Ok(Json(SuccessResponse {
        message: "Upload history cleared".to_string(),
    }))
}

async fn retain_history(
    State(state): State<AppState>,
    Json(req): Json<RetainRequest>,
) -> ApiResult<Json<HistoryResponse>> {
    state.registry.keep_last_n(req.keep).await?;
    let records = state.registry.list();
    Ok(Json(HistoryResponse {
        count: records.len(),
        records,
    }))
}

/// Multipart fields: `file` (required), `strategy` (`relay` | `direct`),
/// `chunkSize` (bytes)
async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<StartTransferResponse>)> {
    let mut source: Option<UploadSource> = None;
    let mut strategy = UploadStrategy::Relay;
    let mut chunk_size: Option<u64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("Failed to read multipart field: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .ok_or_else(|| ApiError::InvalidRequest("No filename provided".to_string()))?
                    .to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| {
                    ApiError::InvalidRequest(format!("Failed to read file data: {e}"))
                })?;

                let mut upload = UploadSource::from_bytes(&filename, data);
                if let Some(content_type) = content_type {
                    upload = upload.with_file_type(&content_type);
                }
                source = Some(upload);
            }
            "strategy" => {
                let value = field.text().await.map_err(|e| {
                    ApiError::InvalidRequest(format!("Failed to read strategy: {e}"))
                })?;
                strategy = match value.as_str() {
                    "relay" => UploadStrategy::Relay,
                    "direct" => UploadStrategy::Direct,
                    other => {
                        return Err(ApiError::InvalidRequest(format!(
                            "Unknown strategy: {other}"
                        )))
                    }
                };
            }
            "chunkSize" => {
                let value = field.text().await.map_err(|e| {
                    ApiError::InvalidRequest(format!("Failed to read chunk size: {e}"))
                })?;
                chunk_size = Some(value.trim().parse().map_err(|e| {
                    ApiError::InvalidRequest(format!("Invalid chunk size: {e}"))
                })?);
            }
            _ => {}
        }
    }

    let mut source =
        source.ok_or_else(|| ApiError::InvalidRequest("No file uploaded".to_string()))?;
    if let Some(size) = chunk_size {
        source = source.with_chunk_size(size);
    }

    let handle = state.uploads.start_upload(source, strategy);
    let session_id = handle.session_id().to_string();

    Ok((
        StatusCode::ACCEPTED,
        Json(StartTransferResponse {
            session_id: session_id.clone(),
            message: format!("Upload started with session ID: {session_id}"),
        }),
    ))
}

async fn download_file(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let artifact = state.downloads.download(&transfer_id, None).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        artifact.file_name.replace('"', "")
    );
    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.data,
    ))
}

/// Delete the stored file, then drop it from the history
async fn delete_file(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    let record = state
        .registry
        .get(&transfer_id)
        .ok_or_else(|| ApiError::NotFound(format!("No upload recorded for {transfer_id}")))?;

    state.storage.delete_remote_file(&transfer_id).await?;
    state.registry.remove_by_transfer_id(&transfer_id).await?;

    Ok(Json(SuccessResponse {
        message: format!("Deleted {}", record.file_name),
    }))
}

async fn list_transfers(State(state): State<AppState>) -> Json<ListTransfersResponse> {
    let uploads = state.uploads.active_sessions();
    let downloads = state.downloads.active_sessions();
    Json(ListTransfersResponse {
        count: uploads.len() + downloads.len(),
        uploads,
        downloads,
    })
}

async fn cancel_transfer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    if state.uploads.cancel_transfer(&id) || state.downloads.cancel_transfer(&id) {
        Ok(Json(SuccessResponse {
            message: format!("Transfer {id} cancelled"),
        }))
    } else {
        Err(ApiError::NotFound(format!("No running transfer {id}")))
    }
}
