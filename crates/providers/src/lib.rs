//! Reasoning-engine providers for BimPilot.
//!
//! All providers implement the `bimpilot_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use std::sync::Arc;

use bimpilot_config::AppConfig;
use bimpilot_core::Provider;

/// Build the configured provider.
///
/// Any OpenAI-compatible endpoint works; `api_url` selects it.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn Provider> {
    let api_key = config.api_key.clone().unwrap_or_default();
    let provider = OpenAiCompatProvider::new(&config.default_provider, &config.api_url, api_key)
        .with_timeout(config.agent.inference_timeout());
    Arc::new(provider)
}
