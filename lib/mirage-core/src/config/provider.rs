//! Scenario configuration providers.

use async_trait::async_trait;
use tracing::debug;

use super::ScenarioConfig;
use crate::error::{ConfigError, GenericError};

/// A scenario document produced by a provider, before validation.
#[derive(Clone, Debug)]
pub enum ScenarioDocument {
    /// A YAML document.
    Yaml(String),

    /// A loosely-typed JSON document.
    Json(serde_json::Value),
}

/// A source of scenario documents.
///
/// Providers turn a free-text description of a system into a scenario document, typically by asking a language model.
/// Their output is never trusted: [`acquire_config`] always validates it into a [`ScenarioConfig`].
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Returns the name of the provider.
    fn name(&self) -> &str;

    /// Produces a scenario document for the given description.
    ///
    /// # Errors
    ///
    /// If the provider cannot produce a document, an error is returned.
    async fn generate(&self, description: &str) -> Result<ScenarioDocument, GenericError>;
}

/// Acquires a scenario from the given provider and validates it.
///
/// # Errors
///
/// If the provider fails, or its document does not describe a valid scenario, an error is returned.
pub async fn acquire_config<P>(provider: &P, description: &str) -> Result<ScenarioConfig, ConfigError>
where
    P: ConfigProvider + ?Sized,
{
    debug!(provider = provider.name(), "Requesting scenario document.");

    let document = provider
        .generate(description)
        .await
        .map_err(|source| ConfigError::Acquisition { source })?;

    match document {
        ScenarioDocument::Yaml(raw) => ScenarioConfig::from_yaml(&raw),
        ScenarioDocument::Json(value) => ScenarioConfig::from_json_value(value),
    }
}
