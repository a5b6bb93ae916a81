//! Provider selection by id.
//!
//! Providers are described by [`ProviderSettings`], built once at startup
//! from a closed set of [`ProviderKind`]s, and looked up by id afterwards.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::RegistryError;

use super::provider::AiProvider;
use super::providers::{AnthropicProvider, HttpRetry, OpenAiCompatibleProvider};

/// Supported provider implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// OpenAI chat completions and compatible endpoints.
    OpenAiCompatible,
    /// Anthropic messages API.
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAiCompatible => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" | "openai_compatible" => {
                Ok(ProviderKind::OpenAiCompatible)
            }
            "anthropic" => Ok(ProviderKind::Anthropic),
            other => Err(RegistryError::UnknownKind(other.to_string())),
        }
    }
}

/// Everything needed to construct one provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub id: String,
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    /// Endpoint root without the API path, e.g. `https://api.openai.com`.
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout: Duration,
    /// Required by Anthropic, ignored otherwise.
    pub api_version: Option<String>,
    pub retry: HttpRetry,
}

impl ProviderSettings {
    /// Defaults for the OpenAI chat completions API.
    pub fn openai(api_key: Option<String>) -> Self {
        Self {
            id: "openai".to_string(),
            kind: ProviderKind::OpenAiCompatible,
            api_key,
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4".to_string(),
            max_tokens: 4000,
            temperature: 0.3,
            timeout: Duration::from_secs(30),
            api_version: None,
            retry: HttpRetry::default(),
        }
    }

    /// Defaults for the Anthropic messages API.
    pub fn anthropic(api_key: Option<String>) -> Self {
        Self {
            id: "anthropic".to_string(),
            kind: ProviderKind::Anthropic,
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 4000,
            temperature: 0.3,
            timeout: Duration::from_secs(60),
            api_version: Some("2023-06-01".to_string()),
            retry: HttpRetry::default(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: HttpRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Builds the provider described by these settings.
    pub fn build(&self) -> Result<Arc<dyn AiProvider>, RegistryError> {
        let provider: Arc<dyn AiProvider> = match self.kind {
            ProviderKind::OpenAiCompatible => Arc::new(
                OpenAiCompatibleProvider::new(self.clone()).map_err(|source| {
                    RegistryError::Construction {
                        id: self.id.clone(),
                        source,
                    }
                })?,
            ),
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(self.clone()).map_err(
                |source| RegistryError::Construction {
                    id: self.id.clone(),
                    source,
                },
            )?),
        };
        Ok(provider)
    }
}

/// Providers indexed by id, plus the id of the default one.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AiProvider>>,
    default_id: String,
}

impl ProviderRegistry {
    pub fn new(default_id: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_id: default_id.into(),
        }
    }

    /// Builds and registers every provider in `settings`.
    ///
    /// # Errors
    ///
    /// Fails on duplicate ids or when a provider cannot be constructed.
    pub fn from_settings(
        settings: &[ProviderSettings],
        default_id: impl Into<String>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new(default_id);
        for entry in settings {
            registry.register(entry.build()?)?;
        }

        info!(
            providers = ?registry.provider_ids(),
            default = %registry.default_id,
            "Initialized AI provider registry"
        );
        Ok(registry)
    }

    /// Registers a provider under its own id.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateProvider` if the id is taken.
    pub fn register(&mut self, provider: Arc<dyn AiProvider>) -> Result<(), RegistryError> {
        let id = provider.provider_id().to_string();
        if self.providers.contains_key(&id) {
            return Err(RegistryError::DuplicateProvider(id));
        }
        self.providers.insert(id, provider);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_provider(mut self, provider: Arc<dyn AiProvider>) -> Result<Self, RegistryError> {
        self.register(provider)?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn AiProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn default_provider(&self) -> Option<Arc<dyn AiProvider>> {
        self.get(&self.default_id)
    }

    /// Registered ids, sorted.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}
