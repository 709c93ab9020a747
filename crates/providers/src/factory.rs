//! Provider factory — builds the right adapter from per-turn connection info.

use std::sync::Arc;
use std::time::Duration;

use overture_config::StreamConfig;
use overture_core::error::ProviderError;
use overture_core::provider::{ChatProvider, LlmConnection, ProviderFactory};

use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAiProvider;

/// Builds adapters keyed by the connection's provider name. Anything that is
/// not the Anthropic native API is assumed to speak the OpenAI dialect,
/// which covers the vast majority of hosted and local endpoints.
pub struct DefaultProviderFactory {
    read_deadline: Duration,
}

impl DefaultProviderFactory {
    pub fn new() -> Self {
        Self {
            read_deadline: Duration::from_secs(300),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            read_deadline: Duration::from_secs(config.read_deadline_secs),
        }
    }
}

impl Default for DefaultProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFactory for DefaultProviderFactory {
    fn create(&self, connection: &LlmConnection) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        let endpoint = if connection.endpoint.is_empty() {
            default_base_url(&connection.provider)
                .ok_or_else(|| ProviderError::UnknownProvider(connection.provider.clone()))?
        } else {
            connection.endpoint.clone()
        };

        let provider: Arc<dyn ChatProvider> = if connection.provider == "anthropic" {
            Arc::new(AnthropicProvider::with_read_deadline(
                endpoint,
                &connection.api_key,
                self.read_deadline,
            ))
        } else {
            Arc::new(OpenAiProvider::with_read_deadline(
                endpoint,
                &connection.api_key,
                self.read_deadline,
            ))
        };

        Ok(provider)
    }
}

/// Default base URLs for well-known provider names.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openai" => "https://api.openai.com/v1",
        "anthropic" => "https://api.anthropic.com",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        _ => return None,
    };
    Some(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(provider: &str, endpoint: &str) -> LlmConnection {
        LlmConnection {
            provider: provider.into(),
            endpoint: endpoint.into(),
            api_key: "key".into(),
            model: "model".into(),
            max_tokens: 4096,
            context_window: 128_000,
        }
    }

    #[test]
    fn anthropic_name_builds_anthropic_adapter() {
        let factory = DefaultProviderFactory::new();
        let provider = factory
            .create(&connection("anthropic", "https://api.anthropic.com"))
            .unwrap();
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn openai_name_builds_openai_adapter() {
        let factory = DefaultProviderFactory::new();
        let provider = factory
            .create(&connection("openai", "https://api.openai.com/v1"))
            .unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn unknown_provider_without_endpoint_is_an_error() {
        let factory = DefaultProviderFactory::new();
        let err = factory.create(&connection("mystery", "")).err().unwrap();
        assert!(matches!(err, ProviderError::UnknownProvider(name) if name == "mystery"));
    }

    #[test]
    fn unknown_provider_with_explicit_endpoint_falls_back_to_openai_dialect() {
        let factory = DefaultProviderFactory::new();
        let provider = factory
            .create(&connection("vllm-cluster", "http://localhost:8000/v1"))
            .unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn well_known_defaults_resolve() {
        assert!(default_base_url("openrouter").unwrap().contains("openrouter.ai"));
        assert!(default_base_url("ollama").unwrap().contains("localhost:11434"));
        assert!(default_base_url("made-up").is_none());
    }
}
