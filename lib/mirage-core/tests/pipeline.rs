//! End-to-end tests: jobs run by the registry, delivering to an in-memory collector.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mirage_core::config::ScenarioConfig;
use mirage_core::engine::JobState;
use mirage_core::error::{DeliveryError, GenericError, RegistryError};
use mirage_core::model::Modification;
use mirage_core::registry::{DeliveryFactory, JobRegistry, JobRequest, RegistryConfig, ScenarioRequest};
use mirage_core::sender::{Deliver, DeliveryTarget, Signal};
use serde_json::Value;

const CHAIN: &str = r#"
services:
  - name: a
    role: frontend
    depends_on:
      - service: b
        protocol: http
        latency: { min_ms: 10, max_ms: 50, probability: 0.05 }
  - name: b
    depends_on:
      - db: d
        example_queries: ["SELECT * FROM accounts WHERE id = ?"]
databases:
  - name: d
    type: postgres
telemetry:
  error_rate: 0
  include_logs: true
"#;

const SHOP: &str = r#"
services:
  - name: frontend
    role: frontend
    depends_on:
      - service: checkout
      - service: payments
  - name: checkout
    depends_on:
      - db: orders
  - name: payments
databases:
  - name: orders
    type: postgres
telemetry:
  error_rate: 0
"#;

#[derive(Default)]
struct Collector {
    reject: bool,
    received: Mutex<Vec<(Signal, Value)>>,
}

impl Collector {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    fn deliveries(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    fn payloads(&self, signal: Signal) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == signal)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl Deliver for Collector {
    async fn deliver(&self, signal: Signal, payload: Bytes) -> Result<(), DeliveryError> {
        let payload = serde_json::from_slice(&payload).expect("payloads are valid JSON");
        self.received.lock().unwrap().push((signal, payload));

        if self.reject {
            return Err(DeliveryError::Rejected {
                signal: signal.as_str(),
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

struct CollectorFactory(Arc<Collector>);

impl DeliveryFactory for CollectorFactory {
    fn connect(&self, _target: &DeliveryTarget, _timeout: Duration) -> Result<Arc<dyn Deliver>, GenericError> {
        Ok(Arc::clone(&self.0) as Arc<dyn Deliver>)
    }
}

fn registry(config: RegistryConfig, collector: &Arc<Collector>) -> JobRegistry {
    JobRegistry::with_delivery(config, Arc::new(CollectorFactory(Arc::clone(collector))))
}

fn request(owner: &str, scenario: &str) -> JobRequest {
    JobRequest::new(
        owner,
        ScenarioConfig::from_yaml(scenario).unwrap(),
        "http://collector:4318",
    )
}

fn service_name(resource: &Value) -> String {
    resource["attributes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|kv| kv["key"] == "service.name")
        .and_then(|kv| kv["value"]["stringValue"].as_str())
        .expect("every resource has a service name")
        .to_string()
}

fn nanos(value: &Value) -> u64 {
    value.as_str().expect("timestamps are strings").parse().unwrap()
}

/// Spans of a traces payload, paired with the name of the service that owns them.
fn spans(payload: &Value) -> Vec<(String, Value)> {
    let mut spans = Vec::new();
    for resource_spans in payload["resourceSpans"].as_array().unwrap() {
        let service = service_name(&resource_spans["resource"]);
        for scope_spans in resource_spans["scopeSpans"].as_array().unwrap() {
            for span in scope_spans["spans"].as_array().unwrap() {
                spans.push((service.clone(), span.clone()));
            }
        }
    }
    spans
}

fn log_records(payload: &Value) -> Vec<Value> {
    let mut records = Vec::new();
    for resource_logs in payload["resourceLogs"].as_array().unwrap() {
        for scope_logs in resource_logs["scopeLogs"].as_array().unwrap() {
            records.extend(scope_logs["logRecords"].as_array().unwrap().iter().cloned());
        }
    }
    records
}

fn duration_ns(span: &Value) -> u64 {
    nanos(&span["endTimeUnixNano"]) - nanos(&span["startTimeUnixNano"])
}

#[tokio::test(start_paused = true)]
async fn chain_produces_correlated_traces_and_logs() {
    let collector = Arc::new(Collector::default());
    let registry = registry(RegistryConfig::default(), &collector);
    let job = registry.create_job(request("alice", CHAIN)).unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    registry.shutdown().await;

    let traces = collector.payloads(Signal::Traces);
    let logs = collector.payloads(Signal::Logs);
    assert_eq!(traces.len(), 3);
    assert_eq!(logs.len(), 3);

    let mut span_ids_by_trace: HashMap<String, HashSet<String>> = HashMap::new();
    for payload in &traces {
        let spans = spans(payload);
        assert_eq!(spans.len(), 3);

        let trace_id = spans[0].1["traceId"].as_str().unwrap().to_string();
        assert_eq!(trace_id.len(), 32);
        for (service, span) in &spans {
            assert!(service == "a" || service == "b", "unexpected service {}", service);
            assert_eq!(span["traceId"], trace_id.as_str());
            assert_eq!(span["spanId"].as_str().unwrap().len(), 16);
            assert_eq!(span["status"]["code"], 1);
            assert!(nanos(&span["endTimeUnixNano"]) >= nanos(&span["startTimeUnixNano"]));
        }

        let roots: Vec<_> = spans.iter().filter(|(_, s)| s.get("parentSpanId").is_none()).collect();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].0, "a");

        let db = spans.iter().find(|(_, s)| s["kind"] == 3 && s["name"] == "SELECT d");
        assert_eq!(db.map(|(service, _)| service.as_str()), Some("b"));

        let ids = spans.iter().map(|(_, s)| s["spanId"].as_str().unwrap().to_string()).collect();
        span_ids_by_trace.insert(trace_id, ids);
    }

    for payload in &logs {
        let records = log_records(payload);
        assert_eq!(records.len(), 3);
        for record in records {
            let span_ids = &span_ids_by_trace[record["traceId"].as_str().unwrap()];
            assert!(span_ids.contains(record["spanId"].as_str().unwrap()));
        }
    }

    let job = registry.get_job(job.id).unwrap();
    assert_eq!(job.state, JobState::Stopped);
    assert_eq!(job.counters.spans_emitted, 9);
    assert_eq!(job.counters.logs_emitted, 9);
    assert_eq!(job.counters.payloads_failed, 0);
}

#[tokio::test(start_paused = true)]
async fn active_job_limit_is_enforced() {
    let collector = Arc::new(Collector::default());
    let config = RegistryConfig {
        max_active_jobs: 2,
        ..RegistryConfig::default()
    };
    let registry = registry(config, &collector);

    registry.create_job(request("alice", SHOP)).unwrap();
    registry.create_job(request("bob", SHOP)).unwrap();
    let error = registry.create_job(request("carol", SHOP)).unwrap_err();
    assert!(matches!(
        error,
        RegistryError::LimitExceeded {
            current: 2,
            max: 2,
            ..
        }
    ));

    assert_eq!(registry.list_jobs(None).len(), 2);
    assert!(registry.list_jobs(Some("carol")).is_empty());
    assert_eq!(registry.limits().active_jobs, 2);

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unreachable_collector_fails_the_job() {
    let collector = Arc::new(Collector::rejecting());
    let config = RegistryConfig {
        failure_threshold: 3,
        ..RegistryConfig::default()
    };
    let registry = registry(config, &collector);
    let job = registry.create_job(request("alice", SHOP)).unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    let job = registry.get_job(job.id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.consecutive_failures, 3);
    assert_eq!(job.counters.payloads_failed, 3);
    assert_eq!(job.counters.payloads_sent, 0);
    assert!(job.last_error.unwrap().contains("503"));
    assert!(job.stopped_at.is_some());

    // Nothing is sent once the job has failed.
    assert_eq!(collector.deliveries(), 3);

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn healthy_collector_keeps_the_job_running() {
    let collector = Arc::new(Collector::default());
    let config = RegistryConfig {
        failure_threshold: 1,
        ..RegistryConfig::default()
    };
    let registry = registry(config, &collector);
    let job = registry.create_job(request("alice", SHOP)).unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    let job = registry.get_job(job.id).unwrap();
    assert_eq!(job.state, JobState::Running);
    assert_eq!(job.consecutive_failures, 0);
    assert!(job.last_error.is_none());
    assert!(job.counters.payloads_sent > 30);

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn latency_spike_slows_only_its_target() {
    let collector = Arc::new(Collector::default());
    let registry = registry(RegistryConfig::default(), &collector);
    let job = registry.create_job(request("alice", SHOP)).unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    let scenario = registry
        .apply_scenario(
            job.id,
            ScenarioRequest {
                targets: vec!["checkout".to_string()],
                modification: Modification::LatencySpike {
                    min_ms: 5000,
                    max_ms: 6000,
                    probability: 1.0,
                },
                pattern: None,
                duration: Duration::from_secs(60),
            },
        )
        .unwrap();
    assert_eq!(registry.list_active_scenarios(job.id).unwrap().len(), 1);

    let before = collector.payloads(Signal::Traces).len();
    tokio::time::sleep(Duration::from_millis(3500)).await;

    let traces = collector.payloads(Signal::Traces);
    assert!(traces.len() > before);
    for payload in &traces[before..] {
        let spans = spans(payload);
        let checkout = spans
            .iter()
            .find(|(service, span)| service == "checkout" && span["kind"] == 2)
            .expect("every trace reaches checkout");
        assert!(duration_ns(&checkout.1) >= 5_000_000_000);

        for (_, span) in spans.iter().filter(|(service, _)| service == "payments") {
            assert!(duration_ns(span) < 1_000_000_000);
        }
    }

    registry.stop_scenario(scenario.id).unwrap();
    assert!(registry.list_active_scenarios(job.id).unwrap().is_empty());

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn latency_spike_reverts_once_it_expires() {
    let collector = Arc::new(Collector::default());
    let registry = registry(RegistryConfig::default(), &collector);
    let job = registry.create_job(request("alice", SHOP)).unwrap();

    // Traces are built at 0s, 1s, 2s, ... and the spike covers 10ms to 2.01s.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let scenario = registry
        .apply_scenario(
            job.id,
            ScenarioRequest {
                targets: vec!["checkout".to_string()],
                modification: Modification::LatencySpike {
                    min_ms: 5000,
                    max_ms: 6000,
                    probability: 1.0,
                },
                pattern: None,
                duration: Duration::from_secs(2),
            },
        )
        .unwrap();
    assert_eq!(scenario.ends_at - scenario.starts_at, chrono::TimeDelta::seconds(2));

    tokio::time::sleep(Duration::from_millis(5490)).await;
    assert!(registry.list_active_scenarios(job.id).unwrap().is_empty());
    assert_eq!(registry.get_job(job.id).unwrap().active_scenarios, 0);

    let checkout_durations: Vec<u64> = collector
        .payloads(Signal::Traces)
        .iter()
        .map(|payload| {
            let spans = spans(payload);
            let (_, checkout) = spans
                .iter()
                .find(|(service, span)| service == "checkout" && span["kind"] == 2)
                .expect("every trace reaches checkout");
            duration_ns(checkout)
        })
        .collect();
    assert_eq!(checkout_durations.len(), 6);

    assert!(checkout_durations[0] < 1_000_000_000);
    assert!(checkout_durations[1..3].iter().all(|d| *d >= 5_000_000_000));
    assert!(checkout_durations[3..].iter().all(|d| *d < 1_000_000_000));

    registry.shutdown().await;
}
