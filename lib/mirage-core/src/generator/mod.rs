//! Signal generators.
//!
//! Generators are pure functions of the scenario, a snapshot of the active overlays, a random source and a clock value.
//! They produce internal records, which are encoded for the wire separately.

mod cluster;
pub use self::cluster::ClusterMetricGenerator;

mod log;
pub use self::log::LogGenerator;

mod metric;
pub use self::metric::MetricGenerator;

mod sampling;
pub use self::sampling::{choose, coin, sample_latency_ns, uniform_ms, union_probability, BASELINE_LATENCY_MS};

mod trace;
pub use self::trace::{TraceGenerator, MAX_DEPTH, MAX_SPANS};
