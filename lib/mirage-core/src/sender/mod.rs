//! Payload delivery.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, DeliveryError};

mod http;
pub use self::http::{HttpDelivery, DEFAULT_DELIVERY_TIMEOUT};

/// A telemetry signal type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Traces.
    Traces,

    /// Logs.
    Logs,

    /// Metrics.
    Metrics,
}

impl Signal {
    /// Returns the name of this signal, as used in OTLP/HTTP paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Logs => "logs",
            Self::Metrics => "metrics",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivers encoded payloads to a collector.
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Delivers a single payload of the given signal type.
    ///
    /// # Errors
    ///
    /// If the payload cannot be sent, the request times out, or the collector does not answer with a success status,
    /// an error is returned. Failed deliveries are not retried.
    async fn deliver(&self, signal: Signal, payload: Bytes) -> Result<(), DeliveryError>;
}

/// How requests to the collector are authenticated.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "scheme", content = "credential", rename_all = "snake_case")]
pub enum AuthScheme {
    /// No authentication.
    #[default]
    None,

    /// `Authorization: Bearer <token>`.
    Bearer(String),

    /// `Authorization: ApiKey <key>`.
    ApiKey(String),
}

impl AuthScheme {
    /// Returns the value of the `Authorization` header, if any.
    pub fn header_value(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Bearer(token) => Some(format!("Bearer {}", token)),
            Self::ApiKey(key) => Some(format!("ApiKey {}", key)),
        }
    }
}

impl fmt::Debug for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credentials are never printed.
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
        }
    }
}

/// Where, and how, a job delivers its payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryTarget {
    endpoint: Url,

    #[serde(skip)]
    auth: AuthScheme,
}

impl DeliveryTarget {
    /// Creates a delivery target from a collector base URL.
    ///
    /// # Errors
    ///
    /// If the endpoint is not an absolute `http` or `https` URL, an error is returned.
    pub fn parse(endpoint: &str, auth: AuthScheme) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let url = Url::parse(endpoint.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query strings and fragments are not supported".to_string()));
        }

        Ok(Self { endpoint: url, auth })
    }

    /// Returns the collector base URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Returns the authentication scheme.
    pub fn auth(&self) -> &AuthScheme {
        &self.auth
    }

    /// Returns the URL payloads of the given signal type are posted to: `<endpoint>/v1/<signal>`.
    pub fn signal_url(&self, signal: Signal) -> String {
        format!(
            "{}/v1/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            signal.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_urls() {
        let target = DeliveryTarget::parse("http://collector:4318", AuthScheme::None).unwrap();
        assert_eq!(target.signal_url(Signal::Traces), "http://collector:4318/v1/traces");

        let target = DeliveryTarget::parse("https://otel.example.com/ingest/", AuthScheme::None).unwrap();
        assert_eq!(
            target.signal_url(Signal::Metrics),
            "https://otel.example.com/ingest/v1/metrics"
        );
    }

    #[test]
    fn rejects_unusable_endpoints() {
        for endpoint in ["not a url", "ftp://collector", "http://collector:4318/?a=b", "unix:/tmp/sock"] {
            let result = DeliveryTarget::parse(endpoint, AuthScheme::None);
            assert!(
                matches!(result, Err(ConfigError::InvalidEndpoint { .. })),
                "{} was accepted",
                endpoint
            );
        }
    }

    #[test]
    fn auth_headers_and_redaction() {
        assert_eq!(AuthScheme::None.header_value(), None);
        assert_eq!(
            AuthScheme::Bearer("t0k3n".to_string()).header_value().as_deref(),
            Some("Bearer t0k3n")
        );
        let api_key = AuthScheme::ApiKey("s3cr3t".to_string());
        assert_eq!(api_key.header_value().as_deref(), Some("ApiKey s3cr3t"));
        assert!(!format!("{:?}", api_key).contains("s3cr3t"));
    }
}
