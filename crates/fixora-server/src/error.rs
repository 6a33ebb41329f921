use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fixora::{
    auth::AuthError,
    errors::{ErrorKind, RelayError},
    models::message::ConversationError,
    store::StoreError,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Convert a settings path such as `oauth.github.client_id` into the
/// environment variable that sets it
pub fn to_env_var(field_path: &str) -> String {
    format!("FIXORA_{}", field_path.replace('.', "__").to_uppercase())
}

/// Errors returned by the HTTP routes, rendered as `{error: {kind, message}}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ModelUnavailable(String),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "InvalidRequest"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::ModelUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "ModelUnavailable"),
            ApiError::Relay(err) => match err.kind() {
                ErrorKind::ToolLoopExceeded => (StatusCode::UNPROCESSABLE_ENTITY, "ToolLoopExceeded"),
                ErrorKind::StreamInterrupted => (StatusCode::BAD_GATEWAY, "StreamInterrupted"),
                _ => (StatusCode::BAD_GATEWAY, "ModelUnavailable"),
            },
            ApiError::Auth(err) => match err {
                AuthError::NotConfigured(_) => (StatusCode::NOT_FOUND, "NotConfigured"),
                AuthError::InvalidState => (StatusCode::BAD_REQUEST, "InvalidState"),
                AuthError::Denied(_) => (StatusCode::FORBIDDEN, "AuthorizationDenied"),
                AuthError::Exchange(_) => (StatusCode::BAD_GATEWAY, "TokenExchangeFailed"),
                AuthError::InvalidUrl(_) | AuthError::Store(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal")
                }
            },
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
        }
    }
}

impl From<ConversationError> for ApiError {
    fn from(err: ConversationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(format!("{} not found", id)),
            StoreError::Codec(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(kind, "request failed: {}", self);
        }
        let body = Json(json!({
            "error": {
                "kind": kind,
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("secret_key"), "FIXORA_SECRET_KEY");
        assert_eq!(to_env_var("server.port"), "FIXORA_SERVER__PORT");
        assert_eq!(
            to_env_var("oauth.github.client_id"),
            "FIXORA_OAUTH__GITHUB__CLIENT_ID"
        );
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = ApiError::from(RelayError::ToolLoopExceeded(6)).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({"error": {"kind": "ToolLoopExceeded", "message": "tool loop exceeded 6 rounds"}})
        );
    }

    #[test]
    fn test_store_errors() {
        let err = ApiError::from(StoreError::NotFound("abc".to_string()));
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(err.status_and_kind().0, StatusCode::NOT_FOUND);
    }
}
