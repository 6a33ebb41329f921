//! Authorization-code flow that turns a user's consent into a stored connection.
//!
//! The browser side is out of scope: `start` hands back the URL to send the
//! user to, and `complete` receives whatever arrived on the callback.
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::codec::SecretCodec;
use crate::store::connection::{Connection, ConnectionKind, ConnectionStore};
use crate::store::StoreError;

/// How long a `state` stays redeemable
pub const STATE_TTL_MINUTES: i64 = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("no OAuth client configured for {0}")]
    NotConfigured(ConnectionKind),

    #[error("unknown or expired authorization state")]
    InvalidState,

    #[error("authorization denied: {0}")]
    Denied(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("invalid authorize url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Registered OAuth application for one connection kind
#[derive(Clone, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scope: Option<String>,
    /// API base recorded on connections created through this client
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationStart {
    pub authorize_url: String,
    pub state: String,
}

struct PendingAuthorization {
    kind: ConnectionKind,
    redirect_uri: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

pub struct AuthorizationFlow {
    http: Client,
    clients: HashMap<ConnectionKind, OAuthClient>,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
    connections: Arc<dyn ConnectionStore>,
    codec: Arc<dyn SecretCodec>,
}

impl AuthorizationFlow {
    pub fn new(
        clients: HashMap<ConnectionKind, OAuthClient>,
        connections: Arc<dyn ConnectionStore>,
        codec: Arc<dyn SecretCodec>,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            clients,
            pending: Mutex::new(HashMap::new()),
            connections,
            codec,
        })
    }

    /// Kinds that have an OAuth client configured
    pub fn configured_kinds(&self) -> Vec<ConnectionKind> {
        let mut kinds: Vec<ConnectionKind> = self.clients.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    fn client(&self, kind: ConnectionKind) -> Result<&OAuthClient, AuthError> {
        self.clients.get(&kind).ok_or(AuthError::NotConfigured(kind))
    }

    /// Begin an authorization. The returned state must come back on the callback.
    pub async fn start(
        &self,
        kind: ConnectionKind,
        redirect_uri: &str,
    ) -> Result<AuthorizationStart, AuthError> {
        let client = self.client(kind)?;
        let state = nanoid::nanoid!();

        let mut url = Url::parse(&client.authorize_url)
            .map_err(|e| AuthError::InvalidUrl(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &client.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("state", &state);
            if let Some(scope) = &client.scope {
                query.append_pair("scope", scope);
            }
        }

        let now = Utc::now();
        let mut pending = self.pending.lock().await;
        pending.retain(|_, p| p.expires_at > now);
        pending.insert(
            state.clone(),
            PendingAuthorization {
                kind,
                redirect_uri: redirect_uri.to_string(),
                expires_at: now + Duration::minutes(STATE_TTL_MINUTES),
            },
        );
        tracing::info!(%kind, "authorization started");

        Ok(AuthorizationStart {
            authorize_url: url.to_string(),
            state,
        })
    }

    /// Finish an authorization with the callback's outcome: the code on
    /// success, or the error the authorization server reported.
    pub async fn complete(
        &self,
        state: &str,
        outcome: Result<String, String>,
    ) -> Result<Connection, AuthError> {
        // single use, even when the outcome is an error
        let pending = self
            .pending
            .lock()
            .await
            .remove(state)
            .filter(|p| p.expires_at > Utc::now())
            .ok_or(AuthError::InvalidState)?;

        let code = outcome.map_err(|reason| {
            tracing::warn!(kind = %pending.kind, "authorization denied: {}", reason);
            AuthError::Denied(reason)
        })?;

        let client = self.client(pending.kind)?;
        let token = self.exchange(client, &code, &pending.redirect_uri).await?;

        let mut credentials = HashMap::new();
        let token_field = match pending.kind {
            ConnectionKind::Supabase => "key",
            ConnectionKind::Github | ConnectionKind::Mcp => "token",
        };
        credentials.insert(token_field.to_string(), token.access_token);
        if let Some(refresh_token) = token.refresh_token {
            credentials.insert("refresh_token".to_string(), refresh_token);
        }
        if let Some(api_url) = &client.api_url {
            let field = match pending.kind {
                ConnectionKind::Github => "base_url",
                ConnectionKind::Supabase | ConnectionKind::Mcp => "url",
            };
            credentials.insert(field.to_string(), api_url.clone());
        }

        let connection = Connection::new(
            pending.kind.to_string(),
            pending.kind.to_string(),
            credentials,
            self.codec.as_ref(),
        )?;
        let connection = self.connections.insert(connection).await;
        tracing::info!(kind = %pending.kind, connection = %connection.id, "authorization completed");
        Ok(connection)
    }

    async fn exchange(
        &self,
        client: &OAuthClient,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(&client.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        // some servers report errors with a 200
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            let description = body
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or(error);
            return Err(AuthError::Exchange(description.to_string()));
        }
        if !status.is_success() {
            return Err(AuthError::Exchange(format!(
                "token endpoint returned {}",
                status.as_u16()
            )));
        }

        serde_json::from_value(body).map_err(|e| AuthError::Exchange(e.to_string()))
    }
}
