use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::AppResult,
    extract::{JsonBody, PathParam},
    models::{
        auth::AuthenticatedUser,
        group::{CreateGroupRequest, Group, SetProjectRequest},
    },
    services::groups::GroupService,
    AppState,
};

pub async fn list_groups(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Json<Vec<Group>>> {
    GroupService::list(&state.db).await.map(Json)
}

pub async fn get_group(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<Group>> {
    GroupService::get(&state.db, id).await.map(Json)
}

pub async fn create_group(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    JsonBody(body): JsonBody<CreateGroupRequest>,
) -> AppResult<(StatusCode, Json<Group>)> {
    let group = GroupService::create(&state.db, user.user_id, &body).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn join_group(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<Group>> {
    GroupService::join(&state.db, id, user.user_id).await.map(Json)
}

pub async fn leave_group(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<Value>> {
    let group = GroupService::leave(&state.db, id, user.user_id).await?;
    Ok(Json(json!({ "message": "Left group successfully", "group": group })))
}

pub async fn set_project(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    PathParam(id): PathParam<Uuid>,
    JsonBody(body): JsonBody<SetProjectRequest>,
) -> AppResult<Json<Group>> {
    GroupService::set_project(&state.db, id, &body.project_name)
        .await
        .map(Json)
}

pub async fn clear_project(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<Value>> {
    let group = GroupService::clear_project(&state.db, id).await?;
    Ok(Json(json!({ "message": "Project removed", "group": group })))
}

pub async fn delete_group(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<Value>> {
    GroupService::delete(&state.db, id, user.user_id).await?;
    Ok(Json(json!({ "message": "Group deleted successfully" })))
}
