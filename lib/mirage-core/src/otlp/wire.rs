//! OTLP/JSON wire types.
//!
//! Field names follow the protobuf JSON mapping used by OTLP/HTTP: lowerCamelCase keys, trace and span IDs as
//! lowercase hex, and 64-bit integers as decimal strings.

use serde::{Deserialize, Serialize};

/// Span status code for a successful operation.
pub const STATUS_CODE_OK: i32 = 1;

/// Span status code for a failed operation.
pub const STATUS_CODE_ERROR: i32 = 2;

/// Aggregation temporality of cumulative sums.
pub const AGGREGATION_TEMPORALITY_CUMULATIVE: i32 = 2;

/// Traces export request.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTraceServiceRequest {
    /// Spans, grouped by resource.
    pub resource_spans: Vec<ResourceSpans>,
}

/// Logs export request.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportLogsServiceRequest {
    /// Log records, grouped by resource.
    pub resource_logs: Vec<ResourceLogs>,
}

/// Metrics export request.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetricsServiceRequest {
    /// Metrics, grouped by resource.
    pub resource_metrics: Vec<ResourceMetrics>,
}

/// A resource.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource attributes.
    pub attributes: Vec<KeyValue>,
}

/// The instrumentation scope that produced a set of records.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationScope {
    /// Scope name.
    pub name: String,

    /// Scope version.
    pub version: String,
}

/// A key/value attribute.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValue {
    /// Attribute key.
    pub key: String,

    /// Attribute value.
    pub value: AnyValue,
}

/// An attribute or log body value.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AnyValue {
    /// A string.
    StringValue(String),

    /// A boolean.
    BoolValue(bool),

    /// A 64-bit signed integer.
    IntValue(#[serde(with = "as_string")] i64),

    /// A double.
    DoubleValue(f64),
}

/// Spans of a single resource.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpans {
    /// The resource.
    pub resource: Resource,

    /// Spans, grouped by scope.
    pub scope_spans: Vec<ScopeSpans>,
}

/// Spans of a single scope.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSpans {
    /// The scope.
    pub scope: InstrumentationScope,

    /// Spans.
    pub spans: Vec<Span>,
}

/// A span.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Trace ID, as 32 hex characters.
    pub trace_id: String,

    /// Span ID, as 16 hex characters.
    pub span_id: String,

    /// Parent span ID, as 16 hex characters. Omitted for root spans.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_span_id: String,

    /// Span name.
    pub name: String,

    /// Span kind.
    pub kind: i32,

    /// Start time, in nanoseconds since the Unix epoch.
    #[serde(with = "as_string")]
    pub start_time_unix_nano: u64,

    /// End time, in nanoseconds since the Unix epoch.
    #[serde(with = "as_string")]
    pub end_time_unix_nano: u64,

    /// Span attributes.
    pub attributes: Vec<KeyValue>,

    /// Span status.
    pub status: Status,
}

/// A span status.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Status code.
    pub code: i32,

    /// Error message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Log records of a single resource.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLogs {
    /// The resource.
    pub resource: Resource,

    /// Log records, grouped by scope.
    pub scope_logs: Vec<ScopeLogs>,
}

/// Log records of a single scope.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeLogs {
    /// The scope.
    pub scope: InstrumentationScope,

    /// Log records.
    pub log_records: Vec<LogRecord>,
}

/// A log record.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Event time, in nanoseconds since the Unix epoch.
    #[serde(with = "as_string")]
    pub time_unix_nano: u64,

    /// Observation time, in nanoseconds since the Unix epoch.
    #[serde(with = "as_string")]
    pub observed_time_unix_nano: u64,

    /// Severity number.
    pub severity_number: i32,

    /// Severity text.
    pub severity_text: String,

    /// Log body.
    pub body: AnyValue,

    /// Log attributes.
    pub attributes: Vec<KeyValue>,

    /// Trace ID of the correlated span.
    pub trace_id: String,

    /// Span ID of the correlated span.
    pub span_id: String,
}

/// Metrics of a single resource.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    /// The resource.
    pub resource: Resource,

    /// Metrics, grouped by scope.
    pub scope_metrics: Vec<ScopeMetrics>,
}

/// Metrics of a single scope.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeMetrics {
    /// The scope.
    pub scope: InstrumentationScope,

    /// Metrics.
    pub metrics: Vec<Metric>,
}

/// A metric.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    /// Metric name.
    pub name: String,

    /// Metric unit.
    pub unit: String,

    /// Metric data.
    #[serde(flatten)]
    pub data: MetricData,
}

/// Metric data, by shape.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricData {
    /// A gauge.
    Gauge(Gauge),

    /// A sum.
    Sum(Sum),
}

/// Gauge data.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gauge {
    /// Data points.
    pub data_points: Vec<NumberDataPoint>,
}

/// Sum data.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sum {
    /// Data points.
    pub data_points: Vec<NumberDataPoint>,

    /// Aggregation temporality.
    pub aggregation_temporality: i32,

    /// Whether the sum only ever increases.
    pub is_monotonic: bool,
}

/// A numeric data point.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberDataPoint {
    /// Start of the aggregation window, in nanoseconds since the Unix epoch. Omitted for gauges.
    #[serde(default, skip_serializing_if = "is_zero", with = "as_string")]
    pub start_time_unix_nano: u64,

    /// Observation time, in nanoseconds since the Unix epoch.
    #[serde(with = "as_string")]
    pub time_unix_nano: u64,

    /// The value.
    #[serde(flatten)]
    pub value: PointValue,
}

/// A data point value.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PointValue {
    /// An integer value.
    AsInt(#[serde(with = "as_string")] i64),

    /// A double value.
    AsDouble(f64),
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// (De)serializes integers as decimal strings.
mod as_string {
    use std::{fmt::Display, str::FromStr};

    use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_shape_matches_otlp() {
        let metric = Metric {
            name: "http.server.request.count".to_string(),
            unit: "{request}".to_string(),
            data: MetricData::Sum(Sum {
                data_points: vec![NumberDataPoint {
                    start_time_unix_nano: 10,
                    time_unix_nano: 20,
                    value: PointValue::AsInt(3),
                }],
                aggregation_temporality: AGGREGATION_TEMPORALITY_CUMULATIVE,
                is_monotonic: true,
            }),
        };

        assert_eq!(
            serde_json::to_value(&metric).unwrap(),
            json!({
                "name": "http.server.request.count",
                "unit": "{request}",
                "sum": {
                    "dataPoints": [{ "startTimeUnixNano": "10", "timeUnixNano": "20", "asInt": "3" }],
                    "aggregationTemporality": 2,
                    "isMonotonic": true,
                },
            })
        );

        let attribute = KeyValue {
            key: "k8s.pod.ready".to_string(),
            value: AnyValue::IntValue(1),
        };
        assert_eq!(
            serde_json::to_value(&attribute).unwrap(),
            json!({ "key": "k8s.pod.ready", "value": { "intValue": "1" } })
        );
    }

    #[test]
    fn gauges_omit_start_time() {
        let point = NumberDataPoint {
            start_time_unix_nano: 0,
            time_unix_nano: 5,
            value: PointValue::AsDouble(0.5),
        };
        assert_eq!(
            serde_json::to_value(point).unwrap(),
            json!({ "timeUnixNano": "5", "asDouble": 0.5 })
        );
    }
}
