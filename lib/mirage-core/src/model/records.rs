//! Internal signal records.
//!
//! These are produced by the generators and consumed by the OTLP encoder. They carry the owning resource by name, and
//! raw identifiers and timestamps, leaving wire formatting entirely to the encoder.

use std::fmt;

/// An attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    /// A string.
    String(String),

    /// A boolean.
    Bool(bool),

    /// A signed integer.
    Int(i64),

    /// A floating-point number.
    Double(f64),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Double(d) => write!(f, "{}", d),
        }
    }
}

/// An ordered set of attributes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes(Vec<(String, AttrValue)>);

impl Attributes {
    /// Creates an empty attribute set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets an attribute, replacing any existing value for the same key.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((key, value)),
        }
    }

    /// Returns the value of the given attribute, if present.
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns the value of the given string attribute, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(AttrValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns an iterator over the attributes, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The kind of a span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanKind {
    /// Internal operation.
    Internal,

    /// Server-side handling of a request.
    Server,

    /// Client-side call to a remote dependency.
    Client,

    /// Message publication.
    Producer,

    /// Message consumption.
    Consumer,
}

impl SpanKind {
    /// Returns the OTLP numeric value of this kind.
    pub fn to_otlp(self) -> i32 {
        match self {
            Self::Internal => 1,
            Self::Server => 2,
            Self::Client => 3,
            Self::Producer => 4,
            Self::Consumer => 5,
        }
    }
}

/// The status of a span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpanStatus {
    /// The operation completed successfully.
    Ok,

    /// The operation failed.
    Error {
        /// A description of the failure.
        message: String,
    },
}

impl SpanStatus {
    /// Returns `true` if this is an error status.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns the error message, if this is an error status.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Ok => None,
            Self::Error { message } => Some(message),
        }
    }
}

/// A generated span.
#[derive(Clone, Debug)]
pub struct SpanRecord {
    /// Name of the resource (service) that emitted the span.
    pub resource: String,

    /// Trace ID.
    pub trace_id: u128,

    /// Span ID.
    pub span_id: u64,

    /// Parent span ID, if this is not a root span.
    pub parent_span_id: Option<u64>,

    /// Span name.
    pub name: String,

    /// Span kind.
    pub kind: SpanKind,

    /// Start time, in nanoseconds since the Unix epoch.
    pub start_ns: u64,

    /// End time, in nanoseconds since the Unix epoch.
    pub end_ns: u64,

    /// Span status.
    pub status: SpanStatus,

    /// Span attributes.
    pub attributes: Attributes,
}

impl SpanRecord {
    /// Returns the duration of the span, in nanoseconds.
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Log severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Informational.
    Info,

    /// Error.
    Error,
}

impl Severity {
    /// Returns the OTLP severity number.
    pub fn to_otlp_number(self) -> i32 {
        match self {
            Self::Info => 9,
            Self::Error => 17,
        }
    }

    /// Returns the severity text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Error => "ERROR",
        }
    }
}

/// A generated log record, correlated with a span.
#[derive(Clone, Debug)]
pub struct LogRecord {
    /// Name of the resource (service) that emitted the log.
    pub resource: String,

    /// Timestamp, in nanoseconds since the Unix epoch.
    pub time_ns: u64,

    /// Severity.
    pub severity: Severity,

    /// Log body.
    pub body: String,

    /// Trace ID of the correlated span.
    pub trace_id: u128,

    /// Span ID of the correlated span.
    pub span_id: u64,

    /// Log attributes.
    pub attributes: Attributes,
}

/// A metric data point value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NumberValue {
    /// An integer value.
    Int(i64),

    /// A floating-point value.
    Double(f64),
}

impl NumberValue {
    /// Returns the value as a float.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Double(d) => d,
        }
    }
}

/// The shape of a metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    /// A point-in-time value.
    Gauge,

    /// A cumulative, monotonic sum.
    Sum,
}

/// A single metric data point.
#[derive(Clone, Debug)]
pub struct MetricRecord {
    /// Name of the resource that emitted the metric.
    pub resource: String,

    /// Metric name.
    pub name: &'static str,

    /// Metric unit.
    pub unit: &'static str,

    /// Metric shape.
    pub kind: MetricKind,

    /// Start of the cumulative window, for sums.
    pub start_ns: Option<u64>,

    /// Observation time, in nanoseconds since the Unix epoch.
    pub time_ns: u64,

    /// The observed value.
    pub value: NumberValue,
}

/// A generated trace, with its correlated logs.
#[derive(Clone, Debug, Default)]
pub struct GeneratedTrace {
    /// The spans of the trace, in completion order.
    pub spans: Vec<SpanRecord>,

    /// The log records of the trace.
    pub logs: Vec<LogRecord>,

    /// Whether any span in the trace errored.
    pub erroneous: bool,
}

impl GeneratedTrace {
    /// Returns the root span of the trace, if any.
    pub fn root(&self) -> Option<&SpanRecord> {
        self.spans.iter().find(|s| s.parent_span_id.is_none())
    }
}
