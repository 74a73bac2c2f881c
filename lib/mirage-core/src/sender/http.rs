//! OTLP/HTTP sender.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderValue};
use reqwest::Client;
use snafu::ResultExt as _;
use tracing::debug;

use super::{Deliver, DeliveryTarget, Signal};
use crate::error::{DeliveryError, ErrorContext as _, GenericError, Transport};

/// Default per-request timeout.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of response body bytes kept when a payload is rejected.
const MAX_ERROR_BODY_LEN: usize = 512;

/// OTLP/HTTP (JSON) sender.
///
/// Posts each payload to `<endpoint>/v1/<signal>`. This sender is cheap to clone, and clones share the underlying
/// connection pool.
#[derive(Clone)]
pub struct HttpDelivery {
    client: Client,
    target: DeliveryTarget,
    authorization: Option<HeaderValue>,
    timeout: Duration,
}

impl HttpDelivery {
    /// Creates a new sender for the given target, using the given per-request timeout.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be created, or the credentials cannot be used as a header value, an error is returned.
    pub fn new(target: DeliveryTarget, timeout: Duration) -> Result<Self, GenericError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .error_context("Failed to build HTTP client.")?;

        let authorization = match target.auth().header_value() {
            Some(value) => {
                let mut value =
                    HeaderValue::from_str(&value).error_context("Credentials are not a valid header value.")?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        Ok(Self {
            client,
            target,
            authorization,
            timeout,
        })
    }

    /// Returns the delivery target.
    pub fn target(&self) -> &DeliveryTarget {
        &self.target
    }
}

#[async_trait]
impl Deliver for HttpDelivery {
    async fn deliver(&self, signal: Signal, payload: Bytes) -> Result<(), DeliveryError> {
        let url = self.target.signal_url(signal);
        debug!(%signal, %url, bytes = payload.len(), "Delivering payload.");

        let mut request = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload);
        if let Some(authorization) = &self.authorization {
            request = request.header(header::AUTHORIZATION, authorization.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(DeliveryError::Timeout {
                    signal: signal.as_str(),
                    url,
                    timeout: self.timeout,
                })
            }
            Err(e) => {
                return Err(e).context(Transport {
                    signal: signal.as_str(),
                    url,
                })
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY_LEN {
            let mut end = MAX_ERROR_BODY_LEN;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }

        Err(DeliveryError::Rejected {
            signal: signal.as_str(),
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;
    use crate::sender::AuthScheme;

    /// An export request, as seen by the collector.
    struct Export {
        signal: String,
        headers: HeaderMap,
        body: Bytes,
    }

    #[derive(Clone)]
    struct CollectorState {
        status: StatusCode,
        response: &'static str,
        exports: mpsc::UnboundedSender<Export>,
    }

    async fn handle_export(
        State(state): State<CollectorState>, Path(signal): Path<String>, headers: HeaderMap, body: Bytes,
    ) -> (StatusCode, &'static str) {
        let _ = state.exports.send(Export { signal, headers, body });
        (state.status, state.response)
    }

    async fn handle_stall() -> StatusCode {
        std::future::pending::<()>().await;
        StatusCode::OK
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        endpoint
    }

    /// Starts a collector answering every export with the given status and body.
    async fn collector(status: StatusCode, response: &'static str) -> (String, mpsc::UnboundedReceiver<Export>) {
        let (exports, received) = mpsc::unbounded_channel();
        let app = Router::new()
            .route("/v1/{signal}", post(handle_export))
            .with_state(CollectorState {
                status,
                response,
                exports,
            });
        (serve(app).await, received)
    }

    fn delivery(endpoint: &str, auth: AuthScheme, timeout: Duration) -> HttpDelivery {
        HttpDelivery::new(DeliveryTarget::parse(endpoint, auth).unwrap(), timeout).unwrap()
    }

    #[tokio::test]
    async fn posts_json_to_signal_path_with_auth() {
        let (endpoint, mut exports) = collector(StatusCode::OK, "").await;
        let sender = delivery(&endpoint, AuthScheme::ApiKey("k".to_string()), DEFAULT_DELIVERY_TIMEOUT);

        sender
            .deliver(Signal::Logs, Bytes::from_static(b"{\"resourceLogs\":[]}"))
            .await
            .unwrap();

        let export = exports.recv().await.unwrap();
        assert_eq!(export.signal, "logs");
        assert_eq!(export.headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(export.headers[header::AUTHORIZATION], "ApiKey k");
        assert_eq!(export.body, Bytes::from_static(b"{\"resourceLogs\":[]}"));
    }

    #[tokio::test]
    async fn unauthenticated_targets_send_no_credentials() {
        let (endpoint, mut exports) = collector(StatusCode::ACCEPTED, "").await;
        let sender = delivery(&endpoint, AuthScheme::None, DEFAULT_DELIVERY_TIMEOUT);

        sender.deliver(Signal::Metrics, Bytes::from_static(b"{}")).await.unwrap();

        let export = exports.recv().await.unwrap();
        assert_eq!(export.signal, "metrics");
        assert!(!export.headers.contains_key(header::AUTHORIZATION));
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let (endpoint, _exports) = collector(StatusCode::SERVICE_UNAVAILABLE, "overload").await;
        let sender = delivery(&endpoint, AuthScheme::None, DEFAULT_DELIVERY_TIMEOUT);

        let error = sender
            .deliver(Signal::Traces, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        match error {
            DeliveryError::Rejected { signal, status, body } => {
                assert_eq!(signal, "traces");
                assert_eq!(status, 503);
                assert_eq!(body, "overload");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn unresponsive_collector_times_out() {
        let endpoint = serve(Router::new().route("/v1/{signal}", post(handle_stall))).await;

        let sender = delivery(&endpoint, AuthScheme::None, Duration::from_millis(100));
        let error = sender
            .deliver(Signal::Metrics, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(error, DeliveryError::Timeout { signal: "metrics", .. }), "{}", error);
    }

    #[tokio::test]
    async fn unreachable_collector_is_a_transport_error() {
        // Bind and drop a listener to find a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let sender = delivery(&format!("http://127.0.0.1:{}", port), AuthScheme::None, DEFAULT_DELIVERY_TIMEOUT);

        let error = sender
            .deliver(Signal::Traces, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(error, DeliveryError::Transport { .. }), "{}", error);
    }
}
