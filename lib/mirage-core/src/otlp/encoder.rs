use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use snafu::ResultExt as _;

use super::wire::{
    AnyValue, ExportLogsServiceRequest, ExportMetricsServiceRequest, ExportTraceServiceRequest, Gauge,
    InstrumentationScope, KeyValue, LogRecord, Metric, MetricData, NumberDataPoint, PointValue, Resource,
    ResourceLogs, ResourceMetrics, ResourceSpans, ScopeLogs, ScopeMetrics, ScopeSpans, Span, Status, Sum,
    AGGREGATION_TEMPORALITY_CUMULATIVE, STATUS_CODE_ERROR, STATUS_CODE_OK,
};
use crate::error::{DanglingParent, EncodeError, NegativeDuration, SerializePayload, UncorrelatedLog};
use crate::model::{self, AttrValue, Attributes, MetricKind, NumberValue, ResourceCatalog, SpanRecord, SpanStatus};

const SCOPE_NAME: &str = "mirage";

/// Encodes generated records into OTLP/JSON export requests.
///
/// Records are grouped by owning resource into one resource block per resource, in catalog order, each carrying a
/// single scope block. Resources without records are left out.
#[derive(Clone, Debug)]
pub struct OtlpEncoder {
    catalog: Arc<ResourceCatalog>,
}

impl OtlpEncoder {
    /// Creates a new encoder for the resources in the given catalog.
    pub fn new(catalog: Arc<ResourceCatalog>) -> Self {
        Self { catalog }
    }

    /// Returns the resource catalog.
    pub fn catalog(&self) -> &Arc<ResourceCatalog> {
        &self.catalog
    }

    /// Encodes the spans of a trace.
    ///
    /// # Errors
    ///
    /// If a span belongs to an unknown resource, ends before it starts, or has a parent that is not part of the same
    /// batch of spans, an error is returned.
    pub fn encode_traces(&self, spans: &[SpanRecord]) -> Result<ExportTraceServiceRequest, EncodeError> {
        let span_ids: HashSet<u64> = spans.iter().map(|s| s.span_id).collect();

        let mut groups = self.groups();
        for span in spans {
            if span.end_ns < span.start_ns {
                return NegativeDuration {
                    name: span.name.clone(),
                    start_ns: span.start_ns,
                    end_ns: span.end_ns,
                }
                .fail();
            }
            if let Some(parent_span_id) = span.parent_span_id {
                if !span_ids.contains(&parent_span_id) {
                    return DanglingParent {
                        span_id: span.span_id,
                        parent_span_id,
                    }
                    .fail();
                }
            }

            let (status_code, message) = match &span.status {
                SpanStatus::Ok => (STATUS_CODE_OK, String::new()),
                SpanStatus::Error { message } => (STATUS_CODE_ERROR, message.clone()),
            };
            groups[self.position(&span.resource)?].push(Span {
                trace_id: trace_id_hex(span.trace_id),
                span_id: span_id_hex(span.span_id),
                parent_span_id: span.parent_span_id.map(span_id_hex).unwrap_or_default(),
                name: span.name.clone(),
                kind: span.kind.to_otlp(),
                start_time_unix_nano: span.start_ns,
                end_time_unix_nano: span.end_ns,
                attributes: key_values(&span.attributes),
                status: Status {
                    code: status_code,
                    message,
                },
            });
        }

        let resource_spans = self
            .blocks(groups)
            .map(|(resource, spans)| ResourceSpans {
                resource,
                scope_spans: vec![ScopeSpans { scope: scope(), spans }],
            })
            .collect();
        Ok(ExportTraceServiceRequest { resource_spans })
    }

    /// Encodes the log records of a trace.
    ///
    /// # Errors
    ///
    /// If a log record belongs to an unknown resource, or references a span that is not in `spans`, an error is
    /// returned.
    pub fn encode_logs(
        &self, logs: &[model::LogRecord], spans: &[SpanRecord],
    ) -> Result<ExportLogsServiceRequest, EncodeError> {
        let span_ids: HashSet<u64> = spans.iter().map(|s| s.span_id).collect();

        let mut groups = self.groups();
        for log in logs {
            if !span_ids.contains(&log.span_id) {
                return UncorrelatedLog { span_id: log.span_id }.fail();
            }

            groups[self.position(&log.resource)?].push(LogRecord {
                time_unix_nano: log.time_ns,
                observed_time_unix_nano: log.time_ns,
                severity_number: log.severity.to_otlp_number(),
                severity_text: log.severity.as_str().to_string(),
                body: AnyValue::StringValue(log.body.clone()),
                attributes: key_values(&log.attributes),
                trace_id: trace_id_hex(log.trace_id),
                span_id: span_id_hex(log.span_id),
            });
        }

        let resource_logs = self
            .blocks(groups)
            .map(|(resource, log_records)| ResourceLogs {
                resource,
                scope_logs: vec![ScopeLogs {
                    scope: scope(),
                    log_records,
                }],
            })
            .collect();
        Ok(ExportLogsServiceRequest { resource_logs })
    }

    /// Encodes a snapshot of metrics.
    ///
    /// # Errors
    ///
    /// If a metric belongs to an unknown resource, an error is returned.
    pub fn encode_metrics(&self, metrics: &[model::MetricRecord]) -> Result<ExportMetricsServiceRequest, EncodeError> {
        let mut groups = self.groups();
        for metric in metrics {
            let point = NumberDataPoint {
                start_time_unix_nano: metric.start_ns.unwrap_or_default(),
                time_unix_nano: metric.time_ns,
                value: match metric.value {
                    NumberValue::Int(i) => PointValue::AsInt(i),
                    NumberValue::Double(d) => PointValue::AsDouble(d),
                },
            };
            let data = match metric.kind {
                MetricKind::Gauge => MetricData::Gauge(Gauge {
                    data_points: vec![point],
                }),
                MetricKind::Sum => MetricData::Sum(Sum {
                    data_points: vec![point],
                    aggregation_temporality: AGGREGATION_TEMPORALITY_CUMULATIVE,
                    is_monotonic: true,
                }),
            };

            groups[self.position(&metric.resource)?].push(Metric {
                name: metric.name.to_string(),
                unit: metric.unit.to_string(),
                data,
            });
        }

        let resource_metrics = self
            .blocks(groups)
            .map(|(resource, metrics)| ResourceMetrics {
                resource,
                scope_metrics: vec![ScopeMetrics {
                    scope: scope(),
                    metrics,
                }],
            })
            .collect();
        Ok(ExportMetricsServiceRequest { resource_metrics })
    }

    fn position(&self, resource: &str) -> Result<usize, EncodeError> {
        self.catalog.position(resource).ok_or_else(|| EncodeError::UnknownResource {
            resource: resource.to_string(),
        })
    }

    fn groups<T>(&self) -> Vec<Vec<T>> {
        std::iter::repeat_with(Vec::new).take(self.catalog.len()).collect()
    }

    fn blocks<'a, T: 'a>(&'a self, groups: Vec<Vec<T>>) -> impl Iterator<Item = (Resource, Vec<T>)> + 'a {
        self.catalog
            .iter()
            .zip(groups)
            .filter(|(_, records)| !records.is_empty())
            .map(|((_, resource), records)| {
                let resource = Resource {
                    attributes: key_values(&resource.attributes),
                };
                (resource, records)
            })
    }
}

/// Serializes an export request into a JSON payload.
pub fn to_payload<T: Serialize>(request: &T) -> Result<Bytes, EncodeError> {
    serde_json::to_vec(request).map(Bytes::from).context(SerializePayload)
}

fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: SCOPE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

fn key_values(attributes: &Attributes) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| KeyValue {
            key: key.to_string(),
            value: match value {
                AttrValue::String(s) => AnyValue::StringValue(s.clone()),
                AttrValue::Bool(b) => AnyValue::BoolValue(*b),
                AttrValue::Int(i) => AnyValue::IntValue(*i),
                AttrValue::Double(d) => AnyValue::DoubleValue(*d),
            },
        })
        .collect()
}

fn trace_id_hex(trace_id: u128) -> String {
    format!("{:032x}", trace_id)
}

fn span_id_hex(span_id: u64) -> String {
    format!("{:016x}", span_id)
}
