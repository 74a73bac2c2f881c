//! Scenario configuration.

mod duration;
mod provider;
mod scenario;
mod seed;
mod service;

pub use self::duration::{deserialize_duration, parse_duration, serialize_duration};
pub use self::provider::{acquire_config, ConfigProvider, ScenarioDocument};
pub(crate) use self::scenario::{check_latency_bound, check_latency_range, clamp_probability};
pub use self::scenario::{Datastore, KubernetesSettings, Queue, ScenarioConfig, TelemetrySettings};
pub use self::seed::{job_rng, Seed};
pub use self::service::{
    BusinessDataField, Dependency, DependencyKind, FieldType, Language, LatencyConfig, Operation, Service,
    MAX_LATENCY_MS,
};
