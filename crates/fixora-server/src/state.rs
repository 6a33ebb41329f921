use fixora::{
    auth::AuthorizationFlow,
    codec::{AeadCodec, SecretCodec},
    providers::{
        base::Provider,
        factory::{get_provider, provider_config, ProviderKind},
    },
    store::{
        config::{ConfigStore, MemoryConfigStore, MODEL_KEY, PROVIDER_KEY},
        connection::{ConnectionStore, MemoryConnectionStore},
    },
    tools::ToolRegistry,
};
use std::str::FromStr;
use std::sync::Arc;

use crate::configuration::Settings;
use crate::error::{ApiError, ApiResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<dyn ConfigStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub codec: Arc<dyn SecretCodec>,
    pub tools: ToolRegistry,
    pub auth: Arc<AuthorizationFlow>,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// In-memory stores with credentials encrypted under the configured secret
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let codec: Arc<dyn SecretCodec> = Arc::new(AeadCodec::from_secret(&settings.secret_key));
        let config: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new(codec.clone()));
        let connections: Arc<dyn ConnectionStore> = Arc::new(MemoryConnectionStore::new());
        let auth = AuthorizationFlow::new(
            settings.oauth.clients(),
            connections.clone(),
            codec.clone(),
        )?;

        Ok(Self {
            config,
            connections,
            codec,
            tools: ToolRegistry::new()?,
            auth: Arc::new(auth),
            settings: Arc::new(settings),
        })
    }

    /// Parse a provider identifier, falling back to the default provider
    /// unless strict provider checking is on
    pub fn provider_kind(&self, identifier: &str) -> ApiResult<ProviderKind> {
        if self.settings.strict_providers {
            return ProviderKind::from_str(identifier.trim())
                .map_err(|_| ApiError::BadRequest(format!("unknown provider '{}'", identifier)));
        }
        Ok(ProviderKind::resolve(identifier).kind)
    }

    /// Build the provider for a chat request. An explicit provider in the
    /// request wins over the stored selection, which wins over the settings.
    pub async fn provider(
        &self,
        provider: Option<&str>,
        model: Option<String>,
    ) -> ApiResult<Arc<dyn Provider>> {
        let (kind, model) = match provider {
            Some(identifier) => (self.provider_kind(identifier)?, model),
            None => {
                let stored = self.config.get(PROVIDER_KEY).await;
                let identifier = stored
                    .as_deref()
                    .unwrap_or(self.settings.default_provider.as_str());
                let model = match model {
                    Some(model) => Some(model),
                    None if stored.is_some() => self.config.get(MODEL_KEY).await,
                    None => self.settings.default_model.clone(),
                };
                (self.provider_kind(identifier)?, model)
            }
        };

        let api_key = self
            .config
            .get_decrypted(&kind.api_key_name())
            .await?
            .ok_or_else(|| {
                ApiError::ModelUnavailable(format!("no API key configured for {}", kind))
            })?;
        let host = self.settings.provider_hosts.get(kind.as_ref()).cloned();

        let provider = get_provider(provider_config(kind, api_key, model, host))
            .map_err(|e| ApiError::ModelUnavailable(e.to_string()))?;
        tracing::debug!(provider = %kind, model = provider.model(), "provider selected");
        Ok(Arc::from(provider))
    }
}
