//! Trace generator.

use std::ops::Range;
use std::sync::Arc;

use rand::Rng;

use super::sampling::{choose, coin, sample_latency_ns, uniform_ms, union_probability};
use super::LogGenerator;
use crate::config::{BusinessDataField, Dependency, FieldType, Operation, Service};
use crate::model::{
    hex, random_uuid, AttrValue, Attributes, GeneratedTrace, OverlaySnapshot, SpanKind, SpanRecord, SpanStatus, Target,
    Topology, TraceContext,
};

/// Maximum call depth of a trace. Deeper calls are not made.
pub const MAX_DEPTH: usize = 12;

/// Maximum number of spans in a trace. Further calls are not made once it is reached.
pub const MAX_SPANS: usize = 512;

/// Delay before a service makes its first outgoing call.
const CHILD_OFFSET_NS: Range<u64> = 1_000_000..4_000_000;

/// Network time between a client and the server handling its call.
const NETWORK_HOP_NS: Range<u64> = 500_000..2_500_000;

/// Time a message spends in a queue before it is consumed.
const QUEUE_DELAY_NS: Range<u64> = 5_000_000..15_000_000;

/// Gap between consecutive outgoing calls.
const CALL_GAP_NS: Range<u64> = 100_000..1_000_000;

/// Time a span spends after its own work and its children are done.
const OVERHEAD_NS: Range<u64> = 100_000..1_000_000;

/// Simulated failures: (`error.type`, message).
const FAILURES: &[(&str, &str)] = &[
    ("TimeoutError", "Upstream request timed out"),
    ("InternalServerError", "Internal server error"),
    ("ConnectionRefused", "Connection refused by upstream"),
    ("ResourceExhausted", "Connection pool exhausted"),
    ("DeadlineExceeded", "Deadline exceeded while waiting for response"),
];

/// Generator for correlated traces.
///
/// Each trace is a depth-first walk of the service graph from the topology's root service. Calls into a service that is
/// already on the current call path are skipped, which is how dependency cycles terminate.
#[derive(Clone)]
pub struct TraceGenerator {
    topology: Arc<Topology>,
    logs: Option<LogGenerator>,
}

impl TraceGenerator {
    /// Creates a new trace generator for the given topology.
    pub fn new(topology: Arc<Topology>) -> Self {
        let logs = topology.config().telemetry.include_logs.then(LogGenerator::new);
        Self { topology, logs }
    }

    /// Builds one trace, and its logs when enabled, starting at `now_ns`.
    pub fn build_trace<R: Rng + ?Sized>(&self, overlays: &OverlaySnapshot, rng: &mut R, now_ns: u64) -> GeneratedTrace {
        let topology = self.topology.as_ref();
        let ctx = TraceContext::new_root(rng);
        let mut walk = Walk {
            topology,
            overlays,
            base_error_rate: topology.config().telemetry.error_rate,
            rng: &mut *rng,
            ctx,
            path: Vec::new(),
            spans: Vec::new(),
        };
        walk.visit(topology.root(), now_ns, Incoming::root());

        let spans = walk.spans;
        let erroneous = spans.iter().any(|s| s.status.is_error());
        let logs = match &self.logs {
            Some(logs) => logs.build_logs(rng, &spans),
            None => Vec::new(),
        };

        GeneratedTrace { spans, logs, erroneous }
    }
}

/// How a service span was reached.
struct Incoming<'a> {
    kind: SpanKind,
    dependency: Option<&'a Dependency>,
    caller: Option<&'a Service>,
    queue: Option<usize>,
}

impl Incoming<'_> {
    fn root() -> Self {
        Self {
            kind: SpanKind::Server,
            dependency: None,
            caller: None,
            queue: None,
        }
    }
}

struct Walk<'a, R: ?Sized> {
    topology: &'a Topology,
    overlays: &'a OverlaySnapshot,
    base_error_rate: f64,
    rng: &'a mut R,
    ctx: TraceContext,
    path: Vec<usize>,
    spans: Vec<SpanRecord>,
}

impl<'a, R: Rng + ?Sized> Walk<'a, R> {
    /// Returns `true` if another span may be created without exceeding the span limit.
    ///
    /// Spans still open on the context stack are counted, since they are recorded when they close.
    fn has_span_budget(&self) -> bool {
        self.spans.len() + self.ctx.depth() < MAX_SPANS
    }

    fn error_probability(&self, service: &Service) -> f64 {
        union_probability(self.base_error_rate, self.overlays.error_rate_for(&service.name))
    }

    fn sample_status(&mut self, p: f64) -> (SpanStatus, Option<&'static str>) {
        if coin(self.rng, p) {
            let (kind, message) = *choose(self.rng, FAILURES).unwrap_or(&FAILURES[0]);
            (
                SpanStatus::Error {
                    message: message.to_string(),
                },
                Some(kind),
            )
        } else {
            (SpanStatus::Ok, None)
        }
    }

    /// Visits a service, recording its span and those of its outgoing calls. Returns the end time of the span.
    fn visit(&mut self, index: usize, start_ns: u64, incoming: Incoming<'a>) -> u64 {
        let topology = self.topology;
        let service = topology.service(index);
        let span_id = self.ctx.next_span_id(self.rng);
        let parent_span_id = self.ctx.current_span();
        let operation = choose(self.rng, &service.operations);

        let latency = self
            .overlays
            .latency_for(&service.name)
            .or_else(|| operation.and_then(|op| op.latency.clone()))
            .or_else(|| incoming.dependency.and_then(|dep| dep.latency.clone()));
        let own_ns = sample_latency_ns(self.rng, latency.as_ref());

        self.path.push(index);
        self.ctx.enter(span_id);

        let mut cursor = start_ns.saturating_add(self.rng.random_range(CHILD_OFFSET_NS));
        let mut latest_child_end = start_ns;

        for (edge, dep) in topology.edges(index) {
            if !self.has_span_budget() {
                break;
            }
            if !coin(self.rng, dep.call_probability.unwrap_or(1.0)) {
                continue;
            }

            let child_end = match edge.target {
                Target::Service(target) => {
                    if self.path.contains(&target) || self.ctx.depth() >= MAX_DEPTH {
                        continue;
                    }
                    let target_service = topology.service(target);
                    if coin(self.rng, self.overlays.unavailable_probability(&target_service.name)) {
                        self.unavailable_call(service, target_service, dep, cursor)
                    } else {
                        let (kind, hop_ns) = match edge.via {
                            Some(_) => (SpanKind::Consumer, self.rng.random_range(QUEUE_DELAY_NS)),
                            None => (SpanKind::Server, self.rng.random_range(NETWORK_HOP_NS)),
                        };
                        let start = cursor.saturating_add(hop_ns);
                        let incoming = Incoming {
                            kind,
                            dependency: Some(dep),
                            caller: Some(service),
                            queue: edge.via,
                        };
                        self.visit(target, start, incoming)
                    }
                }
                Target::Datastore(datastore) => self.datastore_call(service, operation, dep, datastore, cursor),
                Target::Queue(queue) => self.publish(service, dep, queue, cursor),
            };

            latest_child_end = latest_child_end.max(child_end);
            cursor = child_end.saturating_add(self.rng.random_range(CALL_GAP_NS));
        }

        self.ctx.exit();
        self.path.pop();

        let end_ns = start_ns
            .saturating_add(own_ns)
            .max(latest_child_end)
            .saturating_add(self.rng.random_range(OVERHEAD_NS));
        let (status, error_type) = self.sample_status(self.error_probability(service));

        let mut attributes = Attributes::new();
        let name = match operation {
            Some(op) => op.span_name.clone(),
            None => match incoming.kind {
                SpanKind::Consumer => format!("{} consumer", service.name),
                _ => format!("{} server", service.name),
            },
        };

        match (incoming.kind, incoming.queue) {
            (SpanKind::Consumer, Some(queue)) => {
                let queue = &topology.config().message_queues[queue];
                attributes.set("messaging.system", queue.kind.as_str());
                attributes.set("messaging.destination.name", queue.name.as_str());
                attributes.set("messaging.operation", "process");
            }
            _ => match incoming.dependency.map(Dependency::protocol) {
                Some("grpc") => {
                    attributes.set("rpc.system", "grpc");
                    attributes.set("rpc.service", rpc_service_name(&service.name));
                    attributes.set("rpc.method", operation.map(|op| op.name.as_str()).unwrap_or("Process"));
                    attributes.set("rpc.grpc.status_code", if status.is_error() { 13i64 } else { 0 });
                }
                _ => {
                    attributes.set("http.request.method", http_method(&name));
                    attributes.set("http.route", http_route(&name));
                    attributes.set(
                        "http.response.status_code",
                        if status.is_error() { 500i64 } else { 200 },
                    );
                }
            },
        }
        if let Some(caller) = incoming.caller {
            attributes.set("peer.service", caller.name.as_str());
        }
        if let Some(op) = operation {
            attributes.set("operation.name", op.name.as_str());
            for field in &op.business_data {
                if let Some(value) = business_value(self.rng, field) {
                    attributes.set(field.name.as_str(), value);
                }
            }
        }
        if let Some(error_type) = error_type {
            attributes.set("error.type", error_type);
        }
        self.apply_pattern(service, &status, &mut attributes);

        self.record(SpanRecord {
            resource: service.name.clone(),
            trace_id: self.ctx.trace_id(),
            span_id,
            parent_span_id,
            name,
            kind: incoming.kind,
            start_ns,
            end_ns,
            status,
            attributes,
        })
    }

    /// Records a failed call into an unavailable service. The call fails fast and the target is never visited.
    fn unavailable_call(&mut self, caller: &Service, target: &Service, dep: &Dependency, start_ns: u64) -> u64 {
        let span_id = self.ctx.next_span_id(self.rng);
        let end_ns = start_ns.saturating_add(self.rng.random_range(NETWORK_HOP_NS));

        let mut attributes = Attributes::new();
        attributes.set("server.address", target.name.as_str());
        attributes.set("peer.service", target.name.as_str());
        attributes.set("error.type", "service_unavailable");
        if dep.protocol() == "grpc" {
            attributes.set("rpc.system", "grpc");
            attributes.set("rpc.service", rpc_service_name(&target.name));
            attributes.set("rpc.grpc.status_code", 14i64);
        } else {
            attributes.set("http.request.method", "POST");
            attributes.set("http.response.status_code", 503i64);
        }
        let status = SpanStatus::Error {
            message: format!("Service '{}' is unavailable", target.name),
        };
        self.apply_pattern(target, &status, &mut attributes);

        self.record(SpanRecord {
            resource: caller.name.clone(),
            trace_id: self.ctx.trace_id(),
            span_id,
            parent_span_id: self.ctx.current_span(),
            name: format!("{} {}", dep.protocol().to_ascii_uppercase(), target.name),
            kind: SpanKind::Client,
            start_ns,
            end_ns,
            status,
            attributes,
        })
    }

    /// Records a database or cache query issued by `caller`.
    fn datastore_call(
        &mut self, caller: &Service, operation: Option<&Operation>, dep: &Dependency, datastore: usize, start_ns: u64,
    ) -> u64 {
        let topology = self.topology;
        let datastore = &topology.config().databases[datastore];
        let span_id = self.ctx.next_span_id(self.rng);

        let mut duration_ns = sample_latency_ns(self.rng, dep.latency.as_ref());
        if let Some((delay_ms, p)) = self.overlays.query_delay_for(&caller.name) {
            if coin(self.rng, p) {
                duration_ns = duration_ns.saturating_add(uniform_ms(self.rng, delay_ms, delay_ms));
            }
        }
        let end_ns = start_ns.saturating_add(duration_ns);

        let configured_query = operation
            .and_then(|op| choose(self.rng, &op.db_queries))
            .or_else(|| choose(self.rng, &dep.example_queries))
            .cloned();

        let table = format!("{}s", caller.name.trim_end_matches("-service").to_ascii_lowercase());
        let (verb, operation_name, statement) = match datastore.kind.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "mysql" | "mariadb" | "mssql" => (
                "SELECT",
                "SELECT",
                configured_query.unwrap_or_else(|| format!("SELECT * FROM {} WHERE id = ?", table)),
            ),
            "redis" | "memcached" => (
                "GET",
                "GET",
                configured_query.unwrap_or_else(|| format!("GET {}:{}", table, hex(self.rng, 8))),
            ),
            "mongodb" | "mongo" => (
                "FIND",
                "find",
                configured_query.unwrap_or_else(|| format!("db.{}.findOne({{ \"_id\": ObjectId(\"...\") }})", table)),
            ),
            _ => (
                "QUERY",
                "query",
                configured_query.unwrap_or_else(|| format!("QUERY {}", table)),
            ),
        };

        let mut attributes = Attributes::new();
        attributes.set("db.system", datastore.kind.as_str());
        attributes.set("db.name", datastore.name.as_str());
        attributes.set("db.operation", operation_name);
        attributes.set("db.statement", statement);
        attributes.set("server.address", datastore.name.as_str());

        let (status, error_type) = self.sample_status(self.error_probability(caller));
        if let Some(error_type) = error_type {
            attributes.set("error.type", error_type);
        }
        self.apply_pattern(caller, &status, &mut attributes);

        self.record(SpanRecord {
            resource: caller.name.clone(),
            trace_id: self.ctx.trace_id(),
            span_id,
            parent_span_id: self.ctx.current_span(),
            name: format!("{} {}", verb, datastore.name),
            kind: SpanKind::Client,
            start_ns,
            end_ns,
            status,
            attributes,
        })
    }

    /// Records a message published by `caller` to a queue.
    fn publish(&mut self, caller: &Service, dep: &Dependency, queue: usize, start_ns: u64) -> u64 {
        let topology = self.topology;
        let queue = &topology.config().message_queues[queue];
        let span_id = self.ctx.next_span_id(self.rng);
        let end_ns = start_ns.saturating_add(sample_latency_ns(self.rng, dep.latency.as_ref()));

        let mut attributes = Attributes::new();
        attributes.set("messaging.system", queue.kind.as_str());
        attributes.set("messaging.destination.name", queue.name.as_str());
        attributes.set("messaging.operation", "publish");
        attributes.set(
            "messaging.message.body.size",
            self.rng.random_range(100i64..10_000),
        );

        let (status, error_type) = self.sample_status(self.error_probability(caller));
        if let Some(error_type) = error_type {
            attributes.set("error.type", error_type);
        }
        self.apply_pattern(caller, &status, &mut attributes);

        self.record(SpanRecord {
            resource: caller.name.clone(),
            trace_id: self.ctx.trace_id(),
            span_id,
            parent_span_id: self.ctx.current_span(),
            name: format!("PUBLISH {}", queue.name),
            kind: SpanKind::Producer,
            start_ns,
            end_ns,
            status,
            attributes,
        })
    }

    fn apply_pattern(&mut self, service: &Service, status: &SpanStatus, attributes: &mut Attributes) {
        let Some(pattern) = self.overlays.pattern_for(&service.name) else {
            return;
        };
        let values = if status.is_error() {
            &pattern.failure_values
        } else {
            &pattern.normal_values
        };
        if let Some(value) = choose(self.rng, values) {
            attributes.set(pattern.attribute_name.as_str(), value.as_str());
        }
    }

    fn record(&mut self, span: SpanRecord) -> u64 {
        let end_ns = span.end_ns;
        self.spans.push(span);
        end_ns
    }
}

/// Generates a value for a business data field.
fn business_value<R: Rng + ?Sized>(rng: &mut R, field: &BusinessDataField) -> Option<AttrValue> {
    let min = field.min_value.unwrap_or(0.0);
    let max = field.max_value.unwrap_or(1000.0).max(min);

    let value = match field.field_type {
        FieldType::String => match field.pattern.as_deref() {
            Some(pattern) => render_pattern(rng, pattern).into(),
            None => format!("{}_{}", field.name, hex(rng, 4)).into(),
        },
        FieldType::Number => {
            let value = if min < max { rng.random_range(min..=max) } else { min };
            ((value * 100.0).round() / 100.0).into()
        }
        FieldType::Integer => {
            let (min, max) = (min.ceil() as i64, max.floor() as i64);
            let value = if min < max { rng.random_range(min..=max) } else { min };
            value.into()
        }
        FieldType::Boolean => rng.random::<bool>().into(),
        FieldType::Enum => choose(rng, &field.values)?.as_str().into(),
    };
    Some(value)
}

/// Renders a string pattern, substituting each `{random}`, `{uuid}` and `{id}` placeholder with a fresh value.
fn render_pattern<R: Rng + ?Sized>(rng: &mut R, pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 16);
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let (replacement, consumed) = if tail.starts_with("{random}") {
            (rng.random_range(1000..100_000).to_string(), "{random}".len())
        } else if tail.starts_with("{uuid}") {
            (random_uuid(rng).to_string(), "{uuid}".len())
        } else if tail.starts_with("{id}") {
            (hex(rng, 4), "{id}".len())
        } else {
            ("{".to_string(), 1)
        };
        out.push_str(&replacement);
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out
}

fn http_method(span_name: &str) -> &'static str {
    const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];
    let verb = span_name.split_whitespace().next().unwrap_or_default();
    METHODS
        .iter()
        .find(|m| m.eq_ignore_ascii_case(verb))
        .copied()
        .unwrap_or("GET")
}

fn http_route(span_name: &str) -> String {
    match span_name.split_once(' ') {
        Some((_, route)) if route.starts_with('/') => route.to_string(),
        _ => "/".to_string(),
    }
}

fn rpc_service_name(service: &str) -> String {
    let mut name: String = service
        .split(|c| c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    if !name.ends_with("Service") {
        name.push_str("Service");
    }
    name
}
