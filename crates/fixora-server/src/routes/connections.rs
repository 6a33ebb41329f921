use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use fixora::store::connection::{Connection, ConnectionStatus};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct CreateConnectionRequest {
    kind: String,
    name: String,
    #[serde(default)]
    credentials: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    status: ConnectionStatus,
}

async fn list(State(state): State<AppState>) -> Json<Vec<Connection>> {
    Json(state.connections.list().await)
}

async fn get_one(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Connection>> {
    state
        .connections
        .get_by_id(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("connection {} not found", id)))
}

async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateConnectionRequest>,
) -> ApiResult<(StatusCode, Json<Connection>)> {
    if request.kind.trim().is_empty() || request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("kind and name are required".to_string()));
    }
    let connection = Connection::new(
        request.kind.trim().to_lowercase(),
        request.name,
        request.credentials,
        state.codec.as_ref(),
    )?;
    if connection.connection_kind().is_none() {
        tracing::info!(kind = %connection.kind, "stored connection of a kind without tools");
    }
    let connection = state.connections.insert(connection).await;
    Ok((StatusCode::CREATED, Json(connection)))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<Json<Connection>> {
    Ok(Json(state.connections.update_status(id, request.status).await?))
}

async fn remove(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.connections.remove(id).await?;
    tracing::info!(connection = %id, "connection removed");
    Ok(StatusCode::NO_CONTENT)
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/connections", get(list).post(create))
        .route("/connections/:id", get(get_one).delete(remove))
        .route("/connections/:id/status", put(update_status))
        .with_state(state)
}
