use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use super::{
    anthropic::AnthropicProvider,
    base::{Provider, ProviderError},
    configs::{AnthropicProviderConfig, OpenAiProviderConfig, ProviderConfig},
    openai::OpenAiProvider,
};

lazy_static! {
    static ref OPENAI_KEY: Regex = Regex::new(r"^sk-[A-Za-z0-9_\-]{20,}$").unwrap();
    static ref ANTHROPIC_KEY: Regex = Regex::new(r"^sk-ant-[A-Za-z0-9_\-]{20,}$").unwrap();
    static ref GROQ_KEY: Regex = Regex::new(r"^gsk_[A-Za-z0-9]{20,}$").unwrap();
    static ref OPENROUTER_KEY: Regex = Regex::new(r"^sk-or-[A-Za-z0-9_\-]{20,}$").unwrap();
}

#[derive(
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Groq,
    OpenRouter,
}

/// The provider used when an identifier is missing or not recognised
pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::OpenAi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedProvider {
    pub kind: ProviderKind,
    /// True when the requested identifier was not recognised
    pub fell_back: bool,
}

impl ProviderKind {
    pub fn default_host(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Groq => "https://api.groq.com/openai",
            ProviderKind::OpenRouter => "https://openrouter.ai/api",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-sonnet-latest",
            ProviderKind::Groq => "llama-3.3-70b-versatile",
            ProviderKind::OpenRouter => "openai/gpt-4o-mini",
        }
    }

    /// Config store key holding this provider's encrypted API key
    pub fn api_key_name(&self) -> String {
        format!("api_key.{}", self)
    }

    /// Check that a key has the shape this provider issues. This does not
    /// contact the provider.
    pub fn validate_api_key(&self, key: &str) -> bool {
        let key = key.trim();
        match self {
            // anthropic and openrouter keys also start with "sk-"
            ProviderKind::OpenAi => {
                OPENAI_KEY.is_match(key)
                    && !ANTHROPIC_KEY.is_match(key)
                    && !OPENROUTER_KEY.is_match(key)
            }
            ProviderKind::Anthropic => ANTHROPIC_KEY.is_match(key),
            ProviderKind::Groq => GROQ_KEY.is_match(key),
            ProviderKind::OpenRouter => OPENROUTER_KEY.is_match(key),
        }
    }

    /// Resolve a provider identifier, falling back to [`DEFAULT_PROVIDER`]
    pub fn resolve(identifier: &str) -> ResolvedProvider {
        match ProviderKind::from_str(identifier.trim()) {
            Ok(kind) => ResolvedProvider {
                kind,
                fell_back: false,
            },
            Err(_) => {
                tracing::warn!(
                    provider = identifier,
                    fallback = %DEFAULT_PROVIDER,
                    "unknown provider, using default"
                );
                ResolvedProvider {
                    kind: DEFAULT_PROVIDER,
                    fell_back: true,
                }
            }
        }
    }
}

/// Build the client configuration for a provider from a decrypted key.
/// `host` overrides the provider's public endpoint.
pub fn provider_config(
    kind: ProviderKind,
    api_key: String,
    model: Option<String>,
    host: Option<String>,
) -> ProviderConfig {
    let model = model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| kind.default_model().to_string());
    let host = host.unwrap_or_else(|| kind.default_host().to_string());

    match kind {
        ProviderKind::Anthropic => ProviderConfig::Anthropic(AnthropicProviderConfig {
            host,
            api_key,
            model,
            temperature: None,
            max_tokens: None,
        }),
        ProviderKind::OpenAi | ProviderKind::Groq | ProviderKind::OpenRouter => {
            ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature: None,
                max_tokens: None,
            })
        }
    }
}

pub fn get_provider(config: ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Box::new(OpenAiProvider::new(openai_config)?)),
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Box::new(AnthropicProvider::new(anthropic_config)?))
        }
    }
}
