//! Service definition configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A service in the simulated topology.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Service {
    /// The unique name of this service.
    pub name: String,

    /// The language the service is "written" in.
    ///
    /// Drives the SDK/runtime resource attributes and which runtime metric set is emitted.
    #[serde(default)]
    pub language: Language,

    /// The role of the service, such as `frontend`.
    #[serde(default)]
    pub role: Option<String>,

    /// Business operations the service handles.
    #[serde(default)]
    pub operations: Vec<Operation>,

    /// Outgoing dependencies, in call order.
    #[serde(default, rename = "depends_on")]
    pub dependencies: Vec<Dependency>,
}

impl Service {
    /// Returns `true` if this service is declared as a frontend.
    pub fn is_frontend(&self) -> bool {
        self.role
            .as_deref()
            .is_some_and(|role| role.eq_ignore_ascii_case("frontend"))
    }
}

/// Language tag of a service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    /// Python.
    #[default]
    Python,

    /// Java (JVM).
    Java,

    /// Node.js, including JavaScript and TypeScript services.
    NodeJs,

    /// Go.
    Go,

    /// Ruby.
    Ruby,

    /// .NET.
    DotNet,

    /// Any other language. No runtime metric set is emitted for it.
    Other(String),
}

impl Language {
    /// Returns the `telemetry.sdk.language` value for this language.
    pub fn sdk_language(&self) -> &str {
        match self {
            Self::Python => "python",
            Self::Java => "java",
            Self::NodeJs => "nodejs",
            Self::Go => "go",
            Self::Ruby => "ruby",
            Self::DotNet => "dotnet",
            Self::Other(tag) => tag,
        }
    }

    /// Returns the simulated process runtime name and version.
    pub fn runtime(&self) -> (&str, &'static str) {
        match self {
            Self::Python => ("CPython", "3.11.5"),
            Self::Java => ("OpenJDK Runtime Environment", "17.0.5"),
            Self::NodeJs => ("node.js", "18.12.1"),
            Self::Go => ("go", "1.21.0"),
            Self::Ruby => ("ruby", "3.2.2"),
            Self::DotNet => (".NET", "7.0.0"),
            Self::Other(tag) => (tag, "1.0.0"),
        }
    }
}

impl From<String> for Language {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "python" => Self::Python,
            "java" => Self::Java,
            "nodejs" | "node" | "javascript" | "typescript" => Self::NodeJs,
            "go" | "golang" => Self::Go,
            "ruby" => Self::Ruby,
            "dotnet" | ".net" | "csharp" => Self::DotNet,
            _ => Self::Other(value),
        }
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.sdk_language().to_string()
    }
}

/// A business operation handled by a service.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Operation {
    /// A friendly name for the operation (e.g. `ProcessPayment`).
    pub name: String,

    /// The span name used when this operation handles a request (e.g. `POST /payments`).
    pub span_name: String,

    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Example database queries issued by this operation.
    #[serde(default)]
    pub db_queries: Vec<String>,

    /// Latency override for spans labelled by this operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyConfig>,

    /// Business fields attached to spans labelled by this operation.
    #[serde(default)]
    pub business_data: Vec<BusinessDataField>,
}

/// Longest latency, in milliseconds, that a scenario or a chaos overlay may configure: one hour.
pub const MAX_LATENCY_MS: u64 = 60 * 60 * 1000;

/// Latency characteristics for an operation or dependency.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct LatencyConfig {
    /// Minimum latency, in milliseconds.
    pub min_ms: u64,

    /// Maximum latency, in milliseconds.
    pub max_ms: u64,

    /// Fraction of invocations that draw from `[min_ms, max_ms]`. The rest use a fast baseline.
    #[serde(default = "default_probability")]
    pub probability: f64,
}

impl LatencyConfig {
    /// Creates a new `LatencyConfig`.
    pub fn new(min_ms: u64, max_ms: u64, probability: f64) -> Self {
        Self {
            min_ms,
            max_ms,
            probability,
        }
    }
}

fn default_probability() -> f64 {
    1.0
}

/// The kind of entity a dependency points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Another service. Calls recurse into it.
    Service,

    /// A database. Calls produce leaf spans.
    Db,

    /// A cache. Calls produce leaf spans.
    Cache,

    /// A message queue. Calls produce leaf producer spans.
    Queue,
}

impl DependencyKind {
    /// Returns the name of this dependency kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Db => "db",
            Self::Cache => "cache",
            Self::Queue => "queue",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing dependency of a service.
///
/// In scenario documents, the target and its kind are written as a single key (`service: b`, `db: orders-db`,
/// `cache: session-cache`, or `queue: events`).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(try_from = "RawDependency", into = "RawDependency")]
pub struct Dependency {
    /// Name of the target entity.
    pub target: String,

    /// Kind of the target entity.
    pub kind: DependencyKind,

    /// Call protocol for service dependencies (`http`, `grpc`, ...). Defaults to `http`.
    pub protocol: Option<String>,

    /// For service dependencies, the queue the call is routed through.
    pub via: Option<String>,

    /// Latency of the call.
    pub latency: Option<LatencyConfig>,

    /// Example queries, used for database and cache dependencies.
    pub example_queries: Vec<String>,

    /// Probability that the call happens on any given request. Defaults to always.
    pub call_probability: Option<f64>,
}

impl Dependency {
    /// Creates a dependency on the given target with default call settings.
    pub fn new<S: Into<String>>(kind: DependencyKind, target: S) -> Self {
        Self {
            target: target.into(),
            kind,
            protocol: None,
            via: None,
            latency: None,
            example_queries: Vec::new(),
            call_probability: None,
        }
    }

    /// Returns the call protocol, defaulting to `http`.
    pub fn protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or("http")
    }
}

#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawDependency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    db: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    via: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    latency: Option<LatencyConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    example_queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    call_probability: Option<f64>,
}

impl TryFrom<RawDependency> for Dependency {
    type Error = String;

    fn try_from(raw: RawDependency) -> Result<Self, Self::Error> {
        let mut targets = [
            (DependencyKind::Service, raw.service),
            (DependencyKind::Db, raw.db),
            (DependencyKind::Cache, raw.cache),
            (DependencyKind::Queue, raw.queue),
        ]
        .into_iter()
        .filter_map(|(kind, target)| target.map(|target| (kind, target)));

        let (kind, target) = targets
            .next()
            .ok_or_else(|| "dependency must name one of 'service', 'db', 'cache' or 'queue'".to_string())?;
        if let Some((other_kind, other_target)) = targets.next() {
            return Err(format!(
                "dependency on {} '{}' also names {} '{}'; declare them as separate dependencies",
                kind, target, other_kind, other_target
            ));
        }

        Ok(Self {
            target,
            kind,
            protocol: raw.protocol,
            via: raw.via,
            latency: raw.latency,
            example_queries: raw.example_queries,
            call_probability: raw.call_probability,
        })
    }
}

impl From<Dependency> for RawDependency {
    fn from(dep: Dependency) -> Self {
        let mut raw = RawDependency {
            protocol: dep.protocol,
            via: dep.via,
            latency: dep.latency,
            example_queries: dep.example_queries,
            call_probability: dep.call_probability,
            ..Default::default()
        };
        match dep.kind {
            DependencyKind::Service => raw.service = Some(dep.target),
            DependencyKind::Db => raw.db = Some(dep.target),
            DependencyKind::Cache => raw.cache = Some(dep.target),
            DependencyKind::Queue => raw.queue = Some(dep.target),
        }
        raw
    }
}

/// A business-relevant field added to spans as an attribute.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BusinessDataField {
    /// The attribute name (e.g. `cart_amount`).
    pub name: String,

    /// The type of generated values.
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Pattern for string values. `{random}`, `{uuid}` and `{id}` are substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Lower bound for numeric values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,

    /// Upper bound for numeric values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,

    /// Possible values for enum fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Value type of a business data field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// A string, optionally generated from a pattern.
    String,

    /// A floating-point number.
    Number,

    /// An integer.
    Integer,

    /// A boolean.
    Boolean,

    /// One of a fixed set of strings.
    Enum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_single_key_forms() {
        let deps: Vec<Dependency> = serde_yaml::from_str(
            r#"
- service: payments
  protocol: grpc
  latency: { min_ms: 10, max_ms: 50, probability: 0.05 }
- db: orders-db
  example_queries: ["SELECT * FROM orders"]
- cache: sessions
- queue: events
"#,
        )
        .unwrap();

        let kinds: Vec<_> = deps.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DependencyKind::Service,
                DependencyKind::Db,
                DependencyKind::Cache,
                DependencyKind::Queue
            ]
        );
        assert_eq!(deps[0].protocol(), "grpc");
        assert_eq!(deps[0].latency, Some(LatencyConfig::new(10, 50, 0.05)));
        assert_eq!(deps[1].example_queries.len(), 1);
        assert_eq!(deps[2].protocol(), "http");
    }

    #[test]
    fn dependency_requires_exactly_one_target() {
        assert!(serde_yaml::from_str::<Dependency>("protocol: http").is_err());
        assert!(serde_yaml::from_str::<Dependency>("{ service: a, db: b }").is_err());
    }

    #[test]
    fn dependency_serializes_back_to_single_key_form() {
        let dep = Dependency::new(DependencyKind::Cache, "sessions");
        let value = serde_json::to_value(&dep).unwrap();
        assert_eq!(value, serde_json::json!({ "cache": "sessions" }));
    }

    #[test]
    fn language_aliases() {
        assert_eq!(Language::from("TypeScript".to_string()), Language::NodeJs);
        assert_eq!(Language::from("golang".to_string()), Language::Go);
        assert_eq!(
            Language::from("elixir".to_string()),
            Language::Other("elixir".to_string())
        );
        assert_eq!(Language::default().sdk_language(), "python");
    }

    #[test]
    fn latency_probability_defaults_to_always() {
        let latency: LatencyConfig = serde_yaml::from_str("{ min_ms: 5, max_ms: 10 }").unwrap();
        assert_eq!(latency.probability, 1.0);
    }
}
