//! Metric generator.

use std::sync::Arc;

use rand::Rng;

use crate::config::Language;
use crate::model::{GeneratedTrace, MetricKind, MetricRecord, NumberValue, OverlaySnapshot, SpanKind, Topology};

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Cumulative counters of a single service.
#[derive(Clone, Debug, Default)]
struct ServiceCounters {
    requests: i64,
    errors: i64,
    runtime: i64,
}

/// Generator for per-service metrics.
///
/// Request counts are fed from generated traces through [`observe`][Self::observe], and reported as cumulative sums
/// that start when the generator is created.
#[derive(Clone, Debug)]
pub struct MetricGenerator {
    topology: Arc<Topology>,
    start_ns: u64,
    counters: Vec<ServiceCounters>,
}

impl MetricGenerator {
    /// Creates a new metric generator whose cumulative sums start at `start_ns`.
    pub fn new(topology: Arc<Topology>, start_ns: u64) -> Self {
        let counters = vec![ServiceCounters::default(); topology.service_count()];
        Self {
            topology,
            start_ns,
            counters,
        }
    }

    /// Counts the requests handled, and failed, by each service in the given trace.
    ///
    /// Only spans that handle a request (server and consumer spans) are counted.
    pub fn observe(&mut self, trace: &GeneratedTrace) {
        for span in &trace.spans {
            if !matches!(span.kind, SpanKind::Server | SpanKind::Consumer) {
                continue;
            }
            let Some(index) = self.topology.service_index(&span.resource) else {
                continue;
            };
            let counters = &mut self.counters[index];
            counters.requests += 1;
            if span.status.is_error() {
                counters.errors += 1;
            }
        }
    }

    /// Builds one snapshot of every service's metrics, observed at `now_ns`.
    pub fn build_metrics<R: Rng + ?Sized>(
        &mut self, overlays: &OverlaySnapshot, rng: &mut R, now_ns: u64,
    ) -> Vec<MetricRecord> {
        let topology = Arc::clone(&self.topology);
        let mut metrics = Vec::with_capacity(topology.service_count() * 5);

        for (index, service) in topology.config().services.iter().enumerate() {
            let (cpu_override, memory_override) = overlays.resource_pressure_for(&service.name);
            let point = MetricPoint {
                resource: &service.name,
                start_ns: self.start_ns,
                time_ns: now_ns,
            };

            let cpu = cpu_override.unwrap_or_else(|| rng.random_range(0.1..0.9));
            metrics.push(point.gauge("system.cpu.utilization", "1", NumberValue::Double(cpu)));

            let memory = match memory_override {
                Some(fraction) => (fraction * BYTES_PER_GIB) as i64,
                None => rng.random_range(200_000_000..800_000_000),
            };
            metrics.push(point.gauge("process.memory.usage", "By", NumberValue::Int(memory)));

            let counters = &mut self.counters[index];
            metrics.push(point.sum(
                "http.server.request.count",
                "{request}",
                NumberValue::Int(counters.requests),
            ));
            metrics.push(point.sum(
                "http.server.request.error.count",
                "{request}",
                NumberValue::Int(counters.errors),
            ));

            let runtime = match service.language {
                Language::Python => {
                    counters.runtime += rng.random_range(0..=3);
                    Some(point.sum("python.gc.collections", "{collection}", NumberValue::Int(counters.runtime)))
                }
                Language::Java => {
                    counters.runtime += rng.random_range(0..=2);
                    Some(point.sum("jvm.gc.collection_count", "{collection}", NumberValue::Int(counters.runtime)))
                }
                Language::NodeJs => Some(point.gauge(
                    "nodejs.eventloop.delay.avg",
                    "ms",
                    NumberValue::Double(rng.random_range(0.5..5.0)),
                )),
                Language::Go => Some(point.gauge(
                    "go.goroutines",
                    "{goroutine}",
                    NumberValue::Int(rng.random_range(20..=150)),
                )),
                Language::Ruby => {
                    counters.runtime += rng.random_range(0..=3);
                    Some(point.sum("ruby.gc.count", "{collection}", NumberValue::Int(counters.runtime)))
                }
                Language::DotNet => {
                    counters.runtime += rng.random_range(0..=2);
                    Some(point.sum("dotnet.gc.collections", "{collection}", NumberValue::Int(counters.runtime)))
                }
                Language::Other(_) => None,
            };
            metrics.extend(runtime);
        }

        metrics
    }
}

/// Where, and when, a batch of data points was observed.
pub(super) struct MetricPoint<'a> {
    pub resource: &'a str,
    pub start_ns: u64,
    pub time_ns: u64,
}

impl MetricPoint<'_> {
    pub fn gauge(&self, name: &'static str, unit: &'static str, value: NumberValue) -> MetricRecord {
        MetricRecord {
            resource: self.resource.to_string(),
            name,
            unit,
            kind: MetricKind::Gauge,
            start_ns: None,
            time_ns: self.time_ns,
            value,
        }
    }

    pub fn sum(&self, name: &'static str, unit: &'static str, value: NumberValue) -> MetricRecord {
        MetricRecord {
            resource: self.resource.to_string(),
            name,
            unit,
            kind: MetricKind::Sum,
            start_ns: Some(self.start_ns),
            time_ns: self.time_ns,
            value,
        }
    }
}
