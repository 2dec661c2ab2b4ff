pub mod anthropic;
pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use templar_core::config::OracleConfig;

use crate::generator::{Generator, OracleError};
use crate::retry::{Limited, Retrying};

/// Infer the backend from a model name, for `provider = "auto"`.
fn infer_provider(model: &str) -> &'static str {
    let m = model.to_ascii_lowercase();
    if m.starts_with("claude") {
        "anthropic"
    } else if m.starts_with("local") {
        "ollama"
    } else {
        "openai"
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, OracleError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Create the raw provider backend selected by config.
pub fn create_generator(config: &OracleConfig) -> Result<Box<dyn Generator>, OracleError> {
    let provider = match config.provider.as_str() {
        "auto" => infer_provider(&config.openai_model),
        other => other,
    };
    let client = http_client(config.timeout_secs)?;

    match provider {
        "openai" => {
            let api_key = config
                .openai_api_key
                .as_ref()
                .ok_or_else(|| OracleError::NotConfigured("OPENAI_API_KEY not set".into()))?;
            let base_url = config
                .openai_base_url
                .as_deref()
                .unwrap_or("https://api.openai.com");
            Ok(Box::new(openai::OpenAiGenerator::new(
                client,
                api_key.clone(),
                config.openai_model.clone(),
                base_url.to_string(),
            )))
        }
        "anthropic" | "claude" => {
            let api_key = config
                .anthropic_api_key
                .as_ref()
                .ok_or_else(|| OracleError::NotConfigured("ANTHROPIC_API_KEY not set".into()))?;
            Ok(Box::new(anthropic::AnthropicGenerator::new(
                client,
                api_key.clone(),
                config.anthropic_model.clone(),
            )))
        }
        "ollama" => Ok(Box::new(ollama::OllamaGenerator::new(
            client,
            config.ollama_url.clone(),
            config.ollama_model.clone(),
        ))),
        other => Err(OracleError::NotConfigured(format!(
            "unknown oracle provider: '{}'",
            other
        ))),
    }
}

/// Assemble the full oracle stack: provider backend, bounded retry with
/// backoff, and the global concurrency limit shared across all cases.
pub fn build_oracle(config: &OracleConfig) -> Result<Arc<dyn Generator>, OracleError> {
    let backend = create_generator(config)?;
    let retrying = Retrying::new(backend, config.max_retries);
    Ok(Arc::new(Limited::new(retrying, config.max_concurrency)))
}
