use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use fixora::{
    auth::OAuthClient,
    relay::{RelayConfig, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_TOOL_TIMEOUT},
    store::connection::ConnectionKind,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl RelaySettings {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_tool_rounds: self.max_tool_rounds,
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
        }
    }
}

/// OAuth applications per connection kind; kinds left unset cannot be
/// authorized through the server
#[derive(Default, Deserialize)]
pub struct OAuthSettings {
    #[serde(default)]
    pub github: Option<OAuthClient>,
    #[serde(default)]
    pub supabase: Option<OAuthClient>,
    #[serde(default)]
    pub mcp: Option<OAuthClient>,
}

impl OAuthSettings {
    pub fn clients(&self) -> HashMap<ConnectionKind, OAuthClient> {
        [
            (ConnectionKind::Github, &self.github),
            (ConnectionKind::Supabase, &self.supabase),
            (ConnectionKind::Mcp, &self.mcp),
        ]
        .into_iter()
        .filter_map(|(kind, client)| client.clone().map(|client| (kind, client)))
        .collect()
    }
}

impl std::fmt::Debug for OAuthSettings {
    // client secrets stay out of logs
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("github", &self.github.is_some())
            .field("supabase", &self.supabase.is_some())
            .field("mcp", &self.mcp.is_some())
            .finish()
    }
}

#[derive(Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    /// Secret the credential encryption key is derived from
    pub secret_key: String,
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Reject unknown provider identifiers instead of falling back
    #[serde(default)]
    pub strict_providers: bool,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub oauth: OAuthSettings,
    /// Endpoint overrides keyed by provider identifier
    #[serde(default)]
    pub provider_hosts: HashMap<String, String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("default_provider", default_provider())?
            .add_source(
                Environment::with_prefix("FIXORA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // "missing field `client_id`" optionally followed by " for key `oauth.github`"
                let error_str = err.to_string();
                if let Some(rest) = error_str.strip_prefix("missing field `") {
                    let (field, rest) = rest.split_once('`').unwrap_or((rest, ""));
                    let path = match rest
                        .strip_prefix(" for key `")
                        .and_then(|key| key.split_once('`'))
                    {
                        Some((key, _)) if !key.is_empty() => format!("{}.{}", key, field),
                        _ => field.to_string(),
                    };
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&path),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("server", &self.server)
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("strict_providers", &self.strict_providers)
            .field("relay", &self.relay)
            .field("oauth", &self.oauth)
            .field("provider_hosts", &self.provider_hosts)
            .finish_non_exhaustive()
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_system_prompt() -> String {
    "You are Fixora, a helpful assistant. Use the available tools to look up \
     information from the user's connected services when it helps answer the question."
        .to_string()
}

fn default_max_tool_rounds() -> usize {
    DEFAULT_MAX_TOOL_ROUNDS
}

fn default_tool_timeout_secs() -> u64 {
    DEFAULT_TOOL_TIMEOUT.as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("FIXORA_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var("FIXORA_SECRET_KEY", "test-secret");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.secret_key, "test-secret");
        assert_eq!(settings.default_provider, "openai");
        assert_eq!(settings.default_model, None);
        assert!(!settings.strict_providers);
        assert_eq!(settings.relay.max_tool_rounds, 6);
        assert_eq!(
            settings.relay.relay_config().tool_timeout,
            Duration::from_secs(30)
        );
        assert!(settings.oauth.clients().is_empty());

        env::remove_var("FIXORA_SECRET_KEY");
    }

    #[test]
    #[serial]
    fn test_missing_secret_key() {
        clean_env();

        match Settings::new() {
            Err(ConfigError::MissingEnvVar { env_var }) => {
                assert_eq!(env_var, "FIXORA_SECRET_KEY")
            }
            other => panic!("expected missing env var, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("FIXORA_SECRET_KEY", "test-secret");
        env::set_var("FIXORA_SERVER__PORT", "8080");
        env::set_var("FIXORA_DEFAULT_PROVIDER", "anthropic");
        env::set_var("FIXORA_STRICT_PROVIDERS", "true");
        env::set_var("FIXORA_RELAY__MAX_TOOL_ROUNDS", "3");
        env::set_var("FIXORA_RELAY__TOOL_TIMEOUT_SECS", "5");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.default_provider, "anthropic");
        assert!(settings.strict_providers);
        let relay = settings.relay.relay_config();
        assert_eq!(relay.max_tool_rounds, 3);
        assert_eq!(relay.tool_timeout, Duration::from_secs(5));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_oauth_clients() {
        clean_env();
        env::set_var("FIXORA_SECRET_KEY", "test-secret");
        env::set_var("FIXORA_OAUTH__GITHUB__CLIENT_ID", "gh-client");
        env::set_var("FIXORA_OAUTH__GITHUB__CLIENT_SECRET", "gh-secret");
        env::set_var(
            "FIXORA_OAUTH__GITHUB__AUTHORIZE_URL",
            "https://github.com/login/oauth/authorize",
        );
        env::set_var(
            "FIXORA_OAUTH__GITHUB__TOKEN_URL",
            "https://github.com/login/oauth/access_token",
        );

        let settings = Settings::new().unwrap();
        let clients = settings.oauth.clients();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[&ConnectionKind::Github].client_id, "gh-client");
        assert!(!format!("{:?}", settings).contains("gh-secret"));

        clean_env();
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        let addr = server_settings.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }
}
