//! Predefined chaos scenarios.

use std::time::Duration;

use serde::Serialize;

use crate::config::serialize_duration;
use crate::model::{ContextualPattern, Modification};

/// A predefined chaos scenario.
///
/// Templates name a modification, a default duration, and the services it is usually aimed at. Applying a template
/// retargets it at the services of the job it is applied to.
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioTemplate {
    /// Template name.
    pub name: &'static str,

    /// What the template simulates.
    pub description: &'static str,

    /// `infrastructure` or `application`.
    pub category: &'static str,

    /// Services the template targets when none are given.
    pub default_targets: Vec<String>,

    /// The modification.
    pub modification: Modification,

    /// Optional contextual pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<ContextualPattern>,

    /// How long the scenario stays in effect when no duration is given.
    #[serde(serialize_with = "serialize_duration")]
    pub default_duration: Duration,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn pattern(attribute_name: &str, failure_values: &[&str], normal_values: &[&str]) -> Option<ContextualPattern> {
    Some(ContextualPattern {
        attribute_name: attribute_name.to_string(),
        failure_values: strings(failure_values),
        normal_values: strings(normal_values),
    })
}

const fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

/// Returns every predefined scenario template.
pub fn templates() -> Vec<ScenarioTemplate> {
    vec![
        ScenarioTemplate {
            name: "Database Latency Spike",
            description: "Database becomes slow and responses take 2-5 seconds",
            category: "infrastructure",
            default_targets: strings(&["user-service", "payment-service", "order-service"]),
            modification: Modification::DatabaseSlow {
                query_delay_ms: 3000,
                probability: 0.8,
            },
            pattern: pattern(
                "db.shard",
                &["shard_03", "shard_07"],
                &["shard_01", "shard_02", "shard_04", "shard_05"],
            ),
            default_duration: minutes(5),
        },
        ScenarioTemplate {
            name: "Service Error Spike",
            description: "Service starts returning 500 errors for 25% of requests",
            category: "application",
            default_targets: strings(&["api-gateway"]),
            modification: Modification::ErrorRate { error_rate: 0.25 },
            pattern: pattern(
                "cloud.region",
                &["us-west-2", "eu-central-1"],
                &["us-east-1", "ap-southeast-1", "eu-west-1"],
            ),
            default_duration: minutes(3),
        },
        ScenarioTemplate {
            name: "Payment Service Unavailable",
            description: "Payment service becomes completely unavailable",
            category: "application",
            default_targets: strings(&["payment-service"]),
            modification: Modification::ServiceUnavailable { probability: 1.0 },
            pattern: pattern(
                "payment.method",
                &["credit_card_amex", "paypal"],
                &["credit_card_visa", "bank_transfer", "crypto"],
            ),
            default_duration: minutes(2),
        },
        ScenarioTemplate {
            name: "Memory Pressure",
            description: "Service experiences high memory usage (90%+)",
            category: "infrastructure",
            default_targets: strings(&["user-service"]),
            modification: Modification::ResourcePressure {
                cpu_utilization: None,
                memory_utilization: Some(0.95),
            },
            pattern: None,
            default_duration: minutes(8),
        },
        // Partitions surface as added latency on calls into the targeted services.
        ScenarioTemplate {
            name: "Network Partition",
            description: "Network issues between frontend and backend services",
            category: "infrastructure",
            default_targets: strings(&["web-frontend", "api-gateway"]),
            modification: Modification::LatencySpike {
                min_ms: 500,
                max_ms: 1500,
                probability: 0.85,
            },
            pattern: None,
            default_duration: minutes(4),
        },
    ]
}

/// Finds a template by name, ignoring case.
pub fn find_template(name: &str) -> Option<ScenarioTemplate> {
    templates()
        .into_iter()
        .find(|template| template.name.eq_ignore_ascii_case(name.trim()))
}
