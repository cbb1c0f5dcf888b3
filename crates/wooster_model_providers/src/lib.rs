//! Model provider implementations.
//!
//! One provider covers the whole configured surface: every backend Wooster
//! talks to — the OpenAI cloud API and local servers like Ollama, llama.cpp
//! or LM Studio — speaks the OpenAI-compatible HTTP protocol, differing only
//! in base URL and credentials.
//!
//! [`bootstrap_providers`] reads the configuration view and registers one
//! [`openai::OpenAiCompatProvider`] per configured backend into a
//! [`ProviderRegistry`](wooster_models::ProviderRegistry).

pub mod openai;

use crate::openai::OpenAiCompatProvider;
use std::sync::Arc;
use wooster_config::ConfigView;
use wooster_models::ProviderRegistry;

/// Registers every configured provider into `registry`.
///
/// The `openai` group registers under the provider name `"openai"` when an
/// API key is present; each `routing.providers` entry registers under its
/// own name. All providers serve both chat and embeddings.
pub fn bootstrap_providers(registry: &mut ProviderRegistry, config: &ConfigView) {
    if !config.openai.api_key.is_empty() {
        let provider = Arc::new(OpenAiCompatProvider::new(
            "https://api.openai.com/v1",
            config.openai.api_key.clone(),
        ));
        registry.register_chat_provider("openai", provider.clone());
        registry.register_embedding_provider("openai", provider);
        tracing::info!(provider = "openai", "registered cloud provider");
    }

    for entry in &config.routing.providers {
        // The openai group already claimed its name; skip a shadowing entry.
        if entry.name == "openai" && registry.chat_provider("openai").is_some() {
            tracing::warn!("routing provider 'openai' shadows the openai group; skipping");
            continue;
        }
        let provider = Arc::new(OpenAiCompatProvider::new(
            entry.base_url.clone(),
            entry.api_key.clone(),
        ));
        registry.register_chat_provider(&entry.name, provider.clone());
        registry.register_embedding_provider(&entry.name, provider);
        tracing::info!(provider = %entry.name, base_url = %entry.base_url, "registered provider");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(pairs: &[(&str, &str)]) -> ConfigView {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ConfigView::from_pairs(&map).unwrap()
    }

    #[test]
    fn bootstrap_registers_cloud_and_local_providers() {
        let config = config_with(&[
            ("WOOSTER_OPENAI_API_KEY", "sk-test"),
            ("WOOSTER_ROUTING_ENABLED", "true"),
            (
                "WOOSTER_ROUTING_PROVIDERS",
                r#"[{"name":"local","base_url":"http://localhost:11434/v1"}]"#,
            ),
        ]);
        let mut registry = ProviderRegistry::new();
        bootstrap_providers(&mut registry, &config);

        assert_eq!(registry.chat_provider_names(), vec!["local", "openai"]);
        assert_eq!(registry.embedding_provider_names(), vec!["local", "openai"]);
    }

    #[test]
    fn shadowing_openai_entry_is_skipped() {
        let config = config_with(&[
            ("WOOSTER_OPENAI_API_KEY", "sk-test"),
            ("WOOSTER_ROUTING_ENABLED", "true"),
            (
                "WOOSTER_ROUTING_PROVIDERS",
                r#"[{"name":"openai","base_url":"http://localhost:9999/v1"}]"#,
            ),
        ]);
        let mut registry = ProviderRegistry::new();
        bootstrap_providers(&mut registry, &config);

        assert_eq!(registry.chat_provider_names(), vec!["openai"]);
    }
}
