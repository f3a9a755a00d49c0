use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    extract::{MultipartForm, PathParam},
    models::{auth::AuthenticatedUser, task::Task},
    services::tasks::TaskService,
    AppState,
};

pub async fn create_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    MultipartForm(multipart): MultipartForm,
) -> AppResult<(StatusCode, Json<Task>)> {
    let new = TaskService::parse_create_form(multipart).await?;
    let task = TaskService::create(&state.db, &state.blobs, &user, new).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<Task>>> {
    TaskService::list(&state.db, user.group_id).await.map(Json)
}

pub async fn get_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<Task>> {
    TaskService::get(&state.db, user.group_id, id).await.map(Json)
}

pub async fn update_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    PathParam(id): PathParam<Uuid>,
    MultipartForm(multipart): MultipartForm,
) -> AppResult<Json<Task>> {
    let patch = TaskService::parse_update_form(multipart).await?;
    TaskService::update(&state.db, &state.blobs, &user, id, patch)
        .await
        .map(Json)
}

pub async fn delete_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<Value>> {
    TaskService::delete(&state.db, user.group_id, id).await?;
    Ok(Json(json!({ "message": "Task deleted" })))
}

pub async fn upload_task_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    PathParam(task_id): PathParam<Uuid>,
    MultipartForm(multipart): MultipartForm,
) -> AppResult<Json<Value>> {
    let upload = TaskService::parse_single_file(multipart).await?;
    let task = TaskService::add_attachment(&state.db, &state.blobs, &user, task_id, upload).await?;
    Ok(Json(json!({ "message": "File uploaded", "task": task })))
}

/// Stream a stored attachment. Public: the blob key is the capability.
/// A read failure after the headers went out aborts the connection.
pub async fn serve_file(
    State(state): State<AppState>,
    PathParam(filename): PathParam<String>,
) -> AppResult<Response> {
    let (record, file) = state.blobs.retrieve(&filename).await?;
    let disposition_name = record.key.replace('"', "");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &record.content_type)
        .header(header::CONTENT_LENGTH, record.size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{disposition_name}\""),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::Internal(e.into()))
}
