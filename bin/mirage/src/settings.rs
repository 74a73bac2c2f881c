//! Runtime settings.
//!
//! Settings are layered: built-in defaults, then the settings file (if any), then `MIRAGE_`-prefixed environment
//! variables.

use std::path::Path;

use figment::{
    providers::{Env, Format as _, Serialized, Yaml},
    Figment,
};
use mirage_core::error::{ErrorContext as _, GenericError};
use mirage_core::registry::RegistryConfig;

const ENV_PREFIX: &str = "MIRAGE_";

fn figment(settings: Option<&str>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(RegistryConfig::default()));
    if let Some(settings) = settings {
        figment = figment.merge(Yaml::string(settings));
    }
    figment.merge(Env::prefixed(ENV_PREFIX))
}

/// Loads the runtime settings.
///
/// # Errors
///
/// If the settings file cannot be read, or a setting has an invalid value, an error is returned.
pub fn load(path: Option<&Path>) -> Result<RegistryConfig, GenericError> {
    let raw = match path {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_error_context(|| format!("Failed to read settings file '{}'.", path.display()))?,
        ),
        None => None,
    };

    figment(raw.as_deref())
        .extract()
        .error_context("Invalid runtime settings.")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults_round_trip() {
        let config: RegistryConfig = figment(None).extract().unwrap();
        assert_eq!(config, RegistryConfig::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let config: RegistryConfig = figment(Some("failure_threshold: 2\ndelivery_timeout: 750ms\n"))
            .extract()
            .unwrap();
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.delivery_timeout, Duration::from_millis(750));
        assert_eq!(config.max_active_jobs, RegistryConfig::default().max_active_jobs);
    }
}
