use axum::{extract::State, http::StatusCode, Json};

use crate::{
    error::AppResult,
    extract::JsonBody,
    models::{
        auth::AuthenticatedUser,
        user::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse},
    },
    services::auth::AuthService,
    AppState,
};

pub async fn register(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let user_id = AuthService::register(&state.db, &body).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".into(),
            user_id,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    AuthService::login(
        &state.db,
        &body,
        &state.config.jwt_secret,
        state.config.jwt_expiry_days,
    )
    .await
    .map(Json)
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<serde_json::Value>> {
    let profile = AuthService::me(&state.db, user.user_id).await?;
    Ok(Json(serde_json::json!({ "user": profile })))
}
