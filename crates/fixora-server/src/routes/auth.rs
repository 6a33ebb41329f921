use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use fixora::{
    auth::AuthorizationStart,
    store::connection::{Connection, ConnectionKind},
};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    state: String,
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn start(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<AuthorizationStart>> {
    let kind = ConnectionKind::from_str(&kind)
        .map_err(|_| ApiError::BadRequest(format!("unknown connection kind '{}'", kind)))?;
    url::Url::parse(&request.redirect_uri)
        .map_err(|_| ApiError::BadRequest("redirectUri must be an absolute URL".to_string()))?;

    Ok(Json(state.auth.start(kind, &request.redirect_uri).await?))
}

async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<(StatusCode, Json<Connection>)> {
    let outcome = match (query.code, query.error) {
        (_, Some(error)) => Err(query.error_description.unwrap_or(error)),
        (Some(code), None) => Ok(code),
        (None, None) => Err("callback carried neither a code nor an error".to_string()),
    };
    let connection = state.auth.complete(&query.state, outcome).await?;
    Ok((StatusCode::CREATED, Json(connection)))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/auth/:kind/start", post(start))
        .route("/auth/callback", get(callback))
        .with_state(state)
}
