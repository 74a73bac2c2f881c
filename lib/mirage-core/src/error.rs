//! Error types.
//!
//! Failures that callers are expected to branch on are typed (`snafu` enums): configuration errors, delivery errors,
//! encoder errors, and registry errors. Everything else flows as a [`GenericError`] with context attached through
//! [`ErrorContext`].

use std::fmt::Display;

use snafu::Snafu;

/// A type-erased error, used for plumbing where callers do not need to match on the failure.
pub type GenericError = anyhow::Error;

/// Macro for constructing a generic error.
///
/// Accepts a string literal, a format string with arguments (in the same order as `std::format!`), or a value which
/// implements `Debug` and `Display`.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::error::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::error::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::error::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

pub(crate) mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

/// Extension trait for attaching context to fallible results.
// Wraps `anyhow::Context` so the extension methods don't collide with `snafu::ResultExt`.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wrap the error value with additional context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wrap the error value with additional context that is evaluated lazily only once an error does occur.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        <Self as anyhow::Context<T, E>>::context(self, context)
    }

    fn with_error_context<C, F>(self, context: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        <Self as anyhow::Context<T, E>>::with_context(self, context)
    }
}

/// Scenario configuration errors.
///
/// These are raised when a scenario document is malformed or internally inconsistent, and are always reported before
/// any job state is created.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum ConfigError {
    /// The document could not be parsed.
    #[snafu(display("Failed to parse scenario document: {}", source))]
    Parse {
        /// The underlying parser error.
        source: GenericError,
    },

    /// The scenario declares no services.
    #[snafu(display("Scenario must declare at least one service."))]
    NoServices,

    /// Two entities share the same name.
    #[snafu(display("Duplicate name '{}' (names must be unique across services, databases and queues).", name))]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// A dependency references an entity that was never declared.
    #[snafu(display("Service '{}' depends on unknown {} '{}'.", service, kind, target))]
    UnresolvedDependency {
        /// The service declaring the dependency.
        service: String,

        /// The kind of entity that was expected.
        kind: &'static str,

        /// The unresolved target name.
        target: String,
    },

    /// A latency range is inverted.
    #[snafu(display("Invalid latency for {}: min_ms ({}) is greater than max_ms ({}).", location, min_ms, max_ms))]
    InvertedLatency {
        /// Where the latency configuration was found.
        location: String,

        /// Lower bound, in milliseconds.
        min_ms: u64,

        /// Upper bound, in milliseconds.
        max_ms: u64,
    },

    /// A latency exceeds the longest simulated duration.
    #[snafu(display("Invalid latency for {}: {} ms exceeds the maximum of {} ms.", location, value_ms, max_ms))]
    LatencyTooLarge {
        /// Where the latency configuration was found.
        location: String,

        /// The offending value, in milliseconds.
        value_ms: u64,

        /// The largest accepted value, in milliseconds.
        max_ms: u64,
    },

    /// A probability was NaN or infinite.
    #[snafu(display("Invalid probability for {}: {} is not a finite number.", location, value))]
    InvalidProbability {
        /// Where the probability was found.
        location: String,

        /// The offending value.
        value: f64,
    },

    /// A telemetry setting is out of range.
    #[snafu(display("Invalid telemetry setting '{}': {}", setting, reason))]
    InvalidTelemetry {
        /// The setting name.
        setting: &'static str,

        /// Why the value was rejected.
        reason: String,
    },

    /// The delivery endpoint is not a usable URL.
    #[snafu(display("Invalid delivery endpoint '{}': {}", endpoint, reason))]
    InvalidEndpoint {
        /// The endpoint as given.
        endpoint: String,

        /// Why the endpoint was rejected.
        reason: String,
    },

    /// A scenario overlay names services the job does not have.
    #[snafu(display("Scenario targets unknown service '{}'.", service))]
    UnknownTargetService {
        /// The unknown service name.
        service: String,
    },

    /// A scenario overlay has no target services.
    #[snafu(display("Scenario must target at least one service."))]
    NoTargetServices,

    /// No predefined scenario template has the given name.
    #[snafu(display("Unknown scenario template '{}'.", name))]
    UnknownTemplate {
        /// The requested template name.
        name: String,
    },

    /// The configuration provider failed to produce a document.
    #[snafu(display("Failed to acquire scenario configuration: {}", source))]
    Acquisition {
        /// The provider's error.
        source: GenericError,
    },
}

/// Payload encoding errors.
///
/// The encoder only fails when handed records that the signal builder should never produce, so these are internal
/// errors rather than runtime conditions.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum EncodeError {
    /// A record belongs to a resource the encoder doesn't know.
    #[snafu(display("Record references unknown resource '{}'.", resource))]
    UnknownResource {
        /// The resource name.
        resource: String,
    },

    /// A span ends before it starts.
    #[snafu(display("Span '{}' ends ({}) before it starts ({}).", name, end_ns, start_ns))]
    NegativeDuration {
        /// The span name.
        name: String,

        /// Start timestamp, in nanoseconds since the Unix epoch.
        start_ns: u64,

        /// End timestamp, in nanoseconds since the Unix epoch.
        end_ns: u64,
    },

    /// A span's parent is not part of the same trace.
    #[snafu(display("Span {:016x} references missing parent {:016x}.", span_id, parent_span_id))]
    DanglingParent {
        /// The span id.
        span_id: u64,

        /// The missing parent span id.
        parent_span_id: u64,
    },

    /// A log record is not correlated with any span of the trace.
    #[snafu(display("Log record references span {:016x}, which is not part of the trace.", span_id))]
    UncorrelatedLog {
        /// The span id carried by the log record.
        span_id: u64,
    },

    /// Serializing the payload to JSON failed.
    #[snafu(display("Failed to serialize payload: {}", source))]
    SerializePayload {
        /// The serializer error.
        source: serde_json::Error,
    },
}

/// Delivery errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum DeliveryError {
    /// The request could not be sent, or no response was received.
    #[snafu(display("Failed to send {} payload to {}: {}", signal, url, source))]
    Transport {
        /// The signal type being delivered.
        signal: &'static str,

        /// The URL the payload was posted to.
        url: String,

        /// The transport error.
        source: reqwest::Error,
    },

    /// The request did not complete within the per-request timeout.
    #[snafu(display("Timed out sending {} payload to {} after {:?}.", signal, url, timeout))]
    Timeout {
        /// The signal type being delivered.
        signal: &'static str,

        /// The URL the payload was posted to.
        url: String,

        /// The configured timeout.
        timeout: std::time::Duration,
    },

    /// The collector answered with a non-success status.
    #[snafu(display("Collector rejected {} payload with status {}: {}", signal, status, body))]
    Rejected {
        /// The signal type being delivered.
        signal: &'static str,

        /// The HTTP status code.
        status: u16,

        /// The (possibly truncated) response body.
        body: String,
    },

    /// The payload could not be encoded.
    #[snafu(display("Failed to encode {} payload: {}", signal, source))]
    Encode {
        /// The signal type being delivered.
        signal: &'static str,

        /// The encoder error.
        source: EncodeError,
    },
}

/// Job registry errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum RegistryError {
    /// The configuration was rejected.
    #[snafu(display("Invalid configuration: {}", source))]
    InvalidConfig {
        /// The configuration error.
        source: ConfigError,
    },

    /// A resource limit would be exceeded.
    #[snafu(display("Limit reached: {} ({} of {}).", limit, current, max))]
    LimitExceeded {
        /// The name of the limit.
        limit: &'static str,

        /// Current usage.
        current: usize,

        /// Configured maximum.
        max: usize,
    },

    /// No job has the given id.
    #[snafu(display("Job {} not found.", job_id))]
    JobNotFound {
        /// The requested job id.
        job_id: String,
    },

    /// No active scenario has the given id.
    #[snafu(display("Scenario {} not found.", scenario_id))]
    ScenarioNotFound {
        /// The requested scenario id.
        scenario_id: String,
    },

    /// The job is not in a state that allows the operation.
    #[snafu(display("Job {} is {}, cannot {}.", job_id, state, operation))]
    InvalidState {
        /// The job id.
        job_id: String,

        /// The job's current state.
        state: &'static str,

        /// The rejected operation.
        operation: &'static str,
    },
}

impl From<ConfigError> for RegistryError {
    fn from(source: ConfigError) -> Self {
        Self::InvalidConfig { source }
    }
}
