use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use fixora::providers::factory::ProviderKind;
use fixora::store::config::{MODEL_KEY, PROVIDER_KEY};
use fixora::store::connection::ConnectionKind;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::IntoEnumIterator;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderStatus {
    name: ProviderKind,
    has_key: bool,
    default_model: &'static str,
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    provider: String,
    model: Option<String>,
    providers: Vec<ProviderStatus>,
    /// Connection kinds that can be added through the OAuth flow
    oauth: Vec<ConnectionKind>,
}

#[derive(Debug, Deserialize)]
struct SetProviderRequest {
    provider: String,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetKeyRequest {
    api_key: String,
}

#[derive(Debug, Serialize)]
struct SetKeyResponse {
    provider: ProviderKind,
    replaced: bool,
}

fn parse_provider(identifier: &str) -> ApiResult<ProviderKind> {
    ProviderKind::from_str(identifier.trim())
        .map_err(|_| ApiError::BadRequest(format!("unknown provider '{}'", identifier)))
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let mut providers = Vec::new();
    for kind in ProviderKind::iter() {
        providers.push(ProviderStatus {
            name: kind,
            has_key: state.config.get(&kind.api_key_name()).await.is_some(),
            default_model: kind.default_model(),
        });
    }

    Json(ConfigResponse {
        provider: state
            .config
            .get(PROVIDER_KEY)
            .await
            .unwrap_or_else(|| state.settings.default_provider.clone()),
        model: match state.config.get(MODEL_KEY).await {
            Some(model) => Some(model),
            None => state.settings.default_model.clone(),
        },
        providers,
        oauth: state.auth.configured_kinds(),
    })
}

async fn set_provider(
    State(state): State<AppState>,
    Json(request): Json<SetProviderRequest>,
) -> ApiResult<StatusCode> {
    // selections are always validated, even when chat falls back
    let kind = parse_provider(&request.provider)?;
    state.config.set(PROVIDER_KEY, kind.as_ref(), false).await?;
    match request.model.filter(|m| !m.trim().is_empty()) {
        Some(model) => {
            state.config.set(MODEL_KEY, &model, false).await?;
        }
        None => {
            state.config.delete(MODEL_KEY).await;
        }
    }
    tracing::info!(provider = %kind, "provider selected");
    Ok(StatusCode::NO_CONTENT)
}

async fn set_key(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(request): Json<SetKeyRequest>,
) -> ApiResult<Json<SetKeyResponse>> {
    let kind = parse_provider(&provider)?;
    let api_key = request.api_key.trim();
    if !kind.validate_api_key(api_key) {
        return Err(ApiError::BadRequest(format!(
            "that does not look like a {} API key",
            kind
        )));
    }

    let replaced = state.config.set(&kind.api_key_name(), api_key, true).await?;
    tracing::info!(provider = %kind, replaced, "api key stored");
    Ok(Json(SetKeyResponse {
        provider: kind,
        replaced,
    }))
}

async fn delete_key(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> ApiResult<StatusCode> {
    let kind = parse_provider(&provider)?;
    if state.config.delete(&kind.api_key_name()).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("no API key stored for {}", kind)))
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/config", get(get_config))
        .route("/config/provider", put(set_provider))
        .route("/config/keys/:provider", put(set_key).delete(delete_key))
        .with_state(state)
}
