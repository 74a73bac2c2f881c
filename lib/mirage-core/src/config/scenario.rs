//! Root scenario configuration.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Dependency, DependencyKind, LatencyConfig, Service, MAX_LATENCY_MS};
use crate::error::{ConfigError, ErrorContext as _, GenericError};

/// A scenario: the simulated topology and how it should emit telemetry.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScenarioConfig {
    /// Services, in declaration order.
    pub services: Vec<Service>,

    /// Databases and caches.
    #[serde(default)]
    pub databases: Vec<Datastore>,

    /// Message queues.
    #[serde(default)]
    pub message_queues: Vec<Queue>,

    /// Global telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetrySettings,

    /// Kubernetes settings.
    ///
    /// When present, resources carry `k8s.*` attributes and cluster-resource metrics are emitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubernetesSettings>,
}

/// A database or cache.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Datastore {
    /// The unique name of the datastore.
    pub name: String,

    /// The datastore type (e.g. `postgres`, `redis`, `mongodb`).
    #[serde(rename = "type")]
    pub kind: String,
}

/// A message queue.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Queue {
    /// The unique name of the queue.
    pub name: String,

    /// The messaging system (e.g. `kafka`, `rabbitmq`).
    #[serde(rename = "type")]
    pub kind: String,
}

/// Global telemetry settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TelemetrySettings {
    /// Traces generated per second. Zero disables trace generation.
    #[serde(default = "default_trace_rate")]
    pub trace_rate: f64,

    /// Base probability that any given span errors.
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,

    /// Seconds between metric snapshots.
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: u64,

    /// Whether to emit one log record per span.
    #[serde(default = "default_include_logs")]
    pub include_logs: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            trace_rate: default_trace_rate(),
            error_rate: default_error_rate(),
            metrics_interval: default_metrics_interval(),
            include_logs: default_include_logs(),
        }
    }
}

const fn default_trace_rate() -> f64 {
    1.0
}

const fn default_error_rate() -> f64 {
    0.05
}

const fn default_metrics_interval() -> u64 {
    10
}

const fn default_include_logs() -> bool {
    true
}

/// Kubernetes settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct KubernetesSettings {
    /// The cluster name.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// The namespace services are deployed in.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// The managed platform (`eks`, `gke`, `aks`, ...).
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Number of simulated nodes.
    #[serde(default = "default_node_count")]
    pub node_count: usize,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            namespace: default_namespace(),
            platform: default_platform(),
            node_count: default_node_count(),
        }
    }
}

fn default_cluster_name() -> String {
    "mirage-cluster".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_platform() -> String {
    "eks".to_string()
}

const fn default_node_count() -> usize {
    3
}

impl ScenarioConfig {
    /// Attempts to load and validate a scenario from the given YAML file.
    pub fn try_from_file<P>(path: P) -> Result<Self, GenericError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_error_context(|| format!("Failed to read scenario file '{}'.", path.display()))?;
        let config = Self::from_yaml(&raw)
            .with_error_context(|| format!("Failed to load scenario file '{}'.", path.display()))?;
        Ok(config)
    }

    /// Parses and validates a scenario from a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse { source: e.into() })?;
        config.validated()
    }

    /// Parses and validates a scenario from a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Parse { source: e.into() })?;
        config.validated()
    }

    /// Converts and validates a loosely-typed JSON value into a scenario.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_value(value).map_err(|e| ConfigError::Parse { source: e.into() })?;
        config.validated()
    }

    /// Returns `true` if this scenario has Kubernetes settings.
    pub fn is_kubernetes(&self) -> bool {
        self.kubernetes.is_some()
    }

    /// Validates the scenario, clamping out-of-range probabilities into `[0, 1]`.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::NoServices);
        }

        // Names share one namespace across services, datastores and queues.
        let mut seen = HashSet::new();
        let names = self
            .services
            .iter()
            .map(|s| &s.name)
            .chain(self.databases.iter().map(|d| &d.name))
            .chain(self.message_queues.iter().map(|q| &q.name));
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateName { name: name.clone() });
            }
        }

        let kinds: HashMap<&str, EntityKind> = self
            .services
            .iter()
            .map(|s| (s.name.as_str(), EntityKind::Service))
            .chain(self.databases.iter().map(|d| (d.name.as_str(), EntityKind::Datastore)))
            .chain(self.message_queues.iter().map(|q| (q.name.as_str(), EntityKind::Queue)))
            .collect();

        for service in &self.services {
            for dep in &service.dependencies {
                check_dependency_target(&kinds, &service.name, dep)?;
            }
        }

        let telemetry = &mut self.telemetry;
        if !telemetry.trace_rate.is_finite() || telemetry.trace_rate < 0.0 {
            return Err(ConfigError::InvalidTelemetry {
                setting: "trace_rate",
                reason: format!("must be a finite, non-negative number (got {})", telemetry.trace_rate),
            });
        }
        if telemetry.metrics_interval == 0 {
            return Err(ConfigError::InvalidTelemetry {
                setting: "metrics_interval",
                reason: "must be at least one second".to_string(),
            });
        }
        clamp_probability(&mut telemetry.error_rate, || "telemetry.error_rate".to_string())?;

        for service in &mut self.services {
            let service_name = service.name.as_str();
            for operation in &mut service.operations {
                if let Some(latency) = operation.latency.as_mut() {
                    check_latency(latency, || {
                        format!("operation '{}' of service '{}'", operation.name, service_name)
                    })?;
                }
            }

            for dep in &mut service.dependencies {
                let location = || format!("dependency of '{}' on {} '{}'", service_name, dep.kind, dep.target);
                if let Some(latency) = dep.latency.as_mut() {
                    check_latency(latency, location)?;
                }
                if let Some(p) = dep.call_probability.as_mut() {
                    clamp_probability(p, location)?;
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EntityKind {
    Service,
    Datastore,
    Queue,
}

fn check_dependency_target(
    kinds: &HashMap<&str, EntityKind>, service: &str, dep: &Dependency,
) -> Result<(), ConfigError> {
    let expected = match dep.kind {
        DependencyKind::Service => EntityKind::Service,
        DependencyKind::Db | DependencyKind::Cache => EntityKind::Datastore,
        DependencyKind::Queue => EntityKind::Queue,
    };
    if kinds.get(dep.target.as_str()) != Some(&expected) {
        return Err(ConfigError::UnresolvedDependency {
            service: service.to_string(),
            kind: dep.kind.as_str(),
            target: dep.target.clone(),
        });
    }

    if let Some(via) = dep.via.as_deref() {
        if kinds.get(via) != Some(&EntityKind::Queue) {
            return Err(ConfigError::UnresolvedDependency {
                service: service.to_string(),
                kind: "queue",
                target: via.to_string(),
            });
        }
    }

    Ok(())
}

fn check_latency<F>(latency: &mut LatencyConfig, location: F) -> Result<(), ConfigError>
where
    F: Fn() -> String,
{
    check_latency_range(latency.min_ms, latency.max_ms, &location)?;
    clamp_probability(&mut latency.probability, location)
}

/// Checks that a latency range is ordered and no longer than [`MAX_LATENCY_MS`].
pub(crate) fn check_latency_range<F>(min_ms: u64, max_ms: u64, location: F) -> Result<(), ConfigError>
where
    F: Fn() -> String,
{
    if min_ms > max_ms {
        return Err(ConfigError::InvertedLatency {
            location: location(),
            min_ms,
            max_ms,
        });
    }
    check_latency_bound(max_ms, location)
}

/// Checks that a single latency value is no longer than [`MAX_LATENCY_MS`].
pub(crate) fn check_latency_bound<F>(value_ms: u64, location: F) -> Result<(), ConfigError>
where
    F: FnOnce() -> String,
{
    if value_ms > MAX_LATENCY_MS {
        return Err(ConfigError::LatencyTooLarge {
            location: location(),
            value_ms,
            max_ms: MAX_LATENCY_MS,
        });
    }
    Ok(())
}

/// Clamps a probability into `[0, 1]`, rejecting non-finite values.
pub(crate) fn clamp_probability<F>(value: &mut f64, location: F) -> Result<(), ConfigError>
where
    F: FnOnce() -> String,
{
    if !value.is_finite() {
        return Err(ConfigError::InvalidProbability {
            location: location(),
            value: *value,
        });
    }

    if !(0.0..=1.0).contains(value) {
        let clamped = value.clamp(0.0, 1.0);
        warn!(location = %location(), value = *value, clamped, "Probability out of range, clamping.");
        *value = clamped;
    }

    Ok(())
}
