//! Log generator.

use rand::Rng;

use crate::model::{Attributes, LogRecord, Severity, SpanKind, SpanRecord, SpanStatus};

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Generator for logs correlated with spans.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogGenerator;

impl LogGenerator {
    /// Creates a new log generator.
    pub fn new() -> Self {
        Self
    }

    /// Generates one log record for each of the given spans.
    ///
    /// Each record carries the trace and span ID of its span, is stamped with the span's end time, and has a severity
    /// that mirrors the span's status.
    pub fn build_logs<R: Rng + ?Sized>(&self, rng: &mut R, spans: &[SpanRecord]) -> Vec<LogRecord> {
        spans.iter().map(|span| self.build_log(rng, span)).collect()
    }

    fn build_log<R: Rng + ?Sized>(&self, rng: &mut R, span: &SpanRecord) -> LogRecord {
        let mut attributes = Attributes::new();
        attributes.set("thread.id", rng.random_range(1i64..100));
        attributes.set("code.function", code_function(span));

        let (severity, body) = match &span.status {
            SpanStatus::Ok => (
                Severity::Info,
                format!(
                    "Operation '{}' handled in {} ms.",
                    span.name,
                    span.duration_ns() / NANOS_PER_MILLI
                ),
            ),
            SpanStatus::Error { message } => {
                let exception_type = span.attributes.get_str("error.type").unwrap_or("Error");
                attributes.set("exception.type", exception_type);
                attributes.set("exception.message", message.as_str());
                (
                    Severity::Error,
                    format!("Operation '{}' failed: {}", span.name, message),
                )
            }
        };

        attributes.set("request.id", format!("{:016x}", rng.random::<u64>()));

        LogRecord {
            resource: span.resource.clone(),
            time_ns: span.end_ns,
            severity,
            body,
            trace_id: span.trace_id,
            span_id: span.span_id,
            attributes,
        }
    }
}

fn code_function(span: &SpanRecord) -> &'static str {
    match span.kind {
        SpanKind::Server => "handle_request",
        SpanKind::Consumer => "handle_message",
        SpanKind::Producer => "publish_message",
        SpanKind::Client => "call_dependency",
        SpanKind::Internal => "process",
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::*;

    fn span(span_id: u64, status: SpanStatus) -> SpanRecord {
        let mut attributes = Attributes::new();
        if status.is_error() {
            attributes.set("error.type", "TimeoutError");
        }
        SpanRecord {
            resource: "checkout".to_string(),
            trace_id: 0xabc,
            span_id,
            parent_span_id: None,
            name: "POST /checkout".to_string(),
            kind: SpanKind::Server,
            start_ns: 1_000_000_000,
            end_ns: 1_042_000_000,
            status,
            attributes,
        }
    }

    #[test]
    fn one_correlated_log_per_span() {
        let spans = vec![
            span(1, SpanStatus::Ok),
            span(
                2,
                SpanStatus::Error {
                    message: "Upstream request timed out".to_string(),
                },
            ),
        ];
        let logs = LogGenerator::new().build_logs(&mut StdRng::seed_from_u64(1), &spans);
        assert_eq!(logs.len(), 2);

        let ok = &logs[0];
        assert_eq!(ok.span_id, 1);
        assert_eq!(ok.trace_id, 0xabc);
        assert_eq!(ok.time_ns, 1_042_000_000);
        assert_eq!(ok.severity, Severity::Info);
        assert_eq!(ok.body, "Operation 'POST /checkout' handled in 42 ms.");
        assert_eq!(ok.attributes.get_str("code.function"), Some("handle_request"));

        let failed = &logs[1];
        assert_eq!(failed.severity, Severity::Error);
        assert_eq!(failed.body, "Operation 'POST /checkout' failed: Upstream request timed out");
        assert_eq!(failed.attributes.get_str("exception.type"), Some("TimeoutError"));
    }
}
