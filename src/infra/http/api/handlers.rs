use std::path::Path as FsPath;

use axum::Json;
use axum::extract::rejection::PathRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use uuid::Uuid;

use super::error::{ApiError, blob_to_api, multipart_to_api, path_to_api};
use super::models::{TaskEnvelope, TaskResponse, UploadResponse};
use super::state::ApiState;

const UPLOAD_FIELD: &str = "image";

pub async fn upload_image(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_to_api("invalid multipart payload", err))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let extension = field
            .file_name()
            .and_then(|name| FsPath::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("file must have an extension", None))?;
        let data = field
            .bytes()
            .await
            .map_err(|err| multipart_to_api("failed to read upload", err))?;

        let task_id = state.tasks.submit(data, &extension).await?;
        return Ok(Json(UploadResponse { task_id }));
    }

    Err(ApiError::bad_request(
        "missing file",
        Some(format!("expected multipart field `{UPLOAD_FIELD}`")),
    ))
}

pub async fn get_image(
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id.map_err(path_to_api)?;
    let task = state.tasks.get_task(id).await?;
    Ok(Json(TaskEnvelope {
        task: TaskResponse::from(task),
    }))
}

pub async fn delete_image(
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id.map_err(path_to_api)?;
    state.tasks.delete_task(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn serve_blob(
    State(state): State<ApiState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state.blobs.read(&path).await.map_err(blob_to_api)?;
    let content_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    Ok(([(header::CONTENT_TYPE, content_type)], data))
}
