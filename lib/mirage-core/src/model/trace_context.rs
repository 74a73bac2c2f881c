//! Trace context for a single generated trace.

use rand::Rng;

/// Context for building one trace.
///
/// Holds the trace ID shared by every span, and the stack of span IDs currently being built. The innermost is the
/// parent of any span created next.
#[derive(Clone, Debug)]
pub struct TraceContext {
    trace_id: u128,
    stack: Vec<u64>,
}

impl TraceContext {
    /// Creates a new trace context.
    pub fn new_root<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            // An all-zero trace ID is invalid.
            trace_id: rng.random::<u128>().max(1),
            stack: Vec::new(),
        }
    }

    /// Returns the trace ID.
    pub fn trace_id(&self) -> u128 {
        self.trace_id
    }

    /// Returns the span ID of the innermost open span, if any.
    pub fn current_span(&self) -> Option<u64> {
        self.stack.last().copied()
    }

    /// Returns the number of open spans.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Allocates a new span ID.
    pub fn next_span_id<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.random::<u64>().max(1)
    }

    /// Opens a span, making it the parent of subsequently created spans.
    pub fn enter(&mut self, span_id: u64) {
        self.stack.push(span_id);
    }

    /// Closes the innermost span.
    pub fn exit(&mut self) -> Option<u64> {
        self.stack.pop()
    }
}

/// Returns the current time in nanoseconds since Unix epoch.
pub fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
