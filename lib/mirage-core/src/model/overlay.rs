//! Chaos overlays, as seen by the generators.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{check_latency_bound, check_latency_range, clamp_probability, LatencyConfig};
use crate::error::ConfigError;

/// A behavior modification applied to a set of services.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Modification {
    /// Replaces the latency of matching services' spans.
    LatencySpike {
        /// Minimum latency, in milliseconds.
        min_ms: u64,

        /// Maximum latency, in milliseconds.
        max_ms: u64,

        /// Fraction of spans affected.
        #[serde(default = "always")]
        probability: f64,
    },

    /// Raises the error probability of matching services' spans.
    ErrorRate {
        /// Overlay error probability, combined with the base rate by union.
        error_rate: f64,
    },

    /// Makes calls into matching services fail fast.
    ServiceUnavailable {
        /// Fraction of calls that fail.
        #[serde(default = "always")]
        probability: f64,
    },

    /// Adds delay to database and cache calls issued by matching services.
    DatabaseSlow {
        /// Added delay, in milliseconds.
        query_delay_ms: u64,

        /// Fraction of queries affected.
        #[serde(default = "always")]
        probability: f64,
    },

    /// Overrides the CPU and memory gauges of matching services.
    ResourcePressure {
        /// CPU utilization, as a fraction.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cpu_utilization: Option<f64>,

        /// Memory utilization, as a fraction.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memory_utilization: Option<f64>,
    },
}

const fn always() -> f64 {
    1.0
}

impl Modification {
    /// Returns the name of this modification kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LatencySpike { .. } => "latency_spike",
            Self::ErrorRate { .. } => "error_rate",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::DatabaseSlow { .. } => "database_slow",
            Self::ResourcePressure { .. } => "resource_pressure",
        }
    }

    /// Checks the parameters, clamping fractions into `[0, 1]`.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let kind = self.kind();
        let location = move || format!("{} scenario", kind);
        match self {
            Self::LatencySpike {
                min_ms,
                max_ms,
                probability,
            } => {
                check_latency_range(*min_ms, *max_ms, location)?;
                clamp_probability(probability, location)
            }
            Self::DatabaseSlow {
                query_delay_ms,
                probability,
            } => {
                check_latency_bound(*query_delay_ms, location)?;
                clamp_probability(probability, location)
            }
            Self::ErrorRate { error_rate: p } | Self::ServiceUnavailable { probability: p } => {
                clamp_probability(p, location)
            }
            Self::ResourcePressure {
                cpu_utilization,
                memory_utilization,
            } => {
                for value in [cpu_utilization, memory_utilization].into_iter().flatten() {
                    clamp_probability(value, location)?;
                }
                Ok(())
            }
        }
    }
}

/// A contextual attribute pattern.
///
/// Spans of matching services carry `attribute_name`, drawn from `failure_values` when the span errored and from
/// `normal_values` otherwise, so that failures correlate with a recognizable attribute value.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContextualPattern {
    /// The span attribute to set.
    pub attribute_name: String,

    /// Values used on errored spans.
    pub failure_values: Vec<String>,

    /// Values used on successful spans.
    pub normal_values: Vec<String>,
}

/// An overlay in effect: which services it targets and how it changes them.
#[derive(Clone, Debug)]
pub struct Overlay {
    /// Target service names.
    pub targets: Vec<String>,

    /// The modification.
    pub modification: Modification,

    /// Optional contextual pattern.
    pub pattern: Option<ContextualPattern>,
}

impl Overlay {
    fn targets(&self, service: &str) -> bool {
        self.targets.iter().any(|t| t == service)
    }
}

/// An immutable view of the overlays in effect at one instant.
#[derive(Clone, Debug, Default)]
pub struct OverlaySnapshot {
    overlays: Vec<Arc<Overlay>>,
}

impl OverlaySnapshot {
    /// Creates an empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a snapshot from the given overlays.
    pub fn new(overlays: Vec<Arc<Overlay>>) -> Self {
        Self { overlays }
    }

    /// Returns `true` if no overlay is in effect.
    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    /// Returns the number of overlays in effect.
    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    fn matching<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a Overlay> + 'a {
        self.overlays.iter().map(|o| o.as_ref()).filter(move |o| o.targets(service))
    }

    /// Returns the latency override for the given service, if a latency spike targets it.
    ///
    /// When several spikes target the same service, the most recently applied one wins.
    pub fn latency_for(&self, service: &str) -> Option<LatencyConfig> {
        self.matching(service)
            .filter_map(|o| match o.modification {
                Modification::LatencySpike {
                    min_ms,
                    max_ms,
                    probability,
                } => Some(LatencyConfig::new(min_ms, max_ms, probability)),
                _ => None,
            })
            .last()
    }

    /// Returns the combined overlay error probability for the given service.
    pub fn error_rate_for(&self, service: &str) -> f64 {
        self.matching(service)
            .filter_map(|o| match o.modification {
                Modification::ErrorRate { error_rate } => Some(error_rate),
                _ => None,
            })
            .fold(0.0, crate::generator::union_probability)
    }

    /// Returns the probability that calls into the given service fail fast.
    pub fn unavailable_probability(&self, service: &str) -> f64 {
        self.matching(service)
            .filter_map(|o| match o.modification {
                Modification::ServiceUnavailable { probability } => Some(probability),
                _ => None,
            })
            .fold(0.0, crate::generator::union_probability)
    }

    /// Returns the query delay (in milliseconds) and its probability for datastore calls issued by the given service.
    pub fn query_delay_for(&self, service: &str) -> Option<(u64, f64)> {
        self.matching(service)
            .filter_map(|o| match o.modification {
                Modification::DatabaseSlow {
                    query_delay_ms,
                    probability,
                } => Some((query_delay_ms, probability)),
                _ => None,
            })
            .last()
    }

    /// Returns the CPU and memory utilization overrides for the given service.
    pub fn resource_pressure_for(&self, service: &str) -> (Option<f64>, Option<f64>) {
        self.matching(service)
            .fold((None, None), |(cpu, mem), o| match o.modification {
                Modification::ResourcePressure {
                    cpu_utilization,
                    memory_utilization,
                } => (cpu_utilization.or(cpu), memory_utilization.or(mem)),
                _ => (cpu, mem),
            })
    }

    /// Returns the contextual pattern for the given service, if any.
    pub fn pattern_for(&self, service: &str) -> Option<&ContextualPattern> {
        self.overlays
            .iter()
            .filter(|o| o.targets(service))
            .filter_map(|o| o.pattern.as_ref())
            .last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_LATENCY_MS;

    fn overlay(targets: &[&str], modification: Modification) -> Arc<Overlay> {
        Arc::new(Overlay {
            targets: targets.iter().map(|s| s.to_string()).collect(),
            modification,
            pattern: None,
        })
    }

    #[test]
    fn queries_only_match_targets() {
        let snapshot = OverlaySnapshot::new(vec![
            overlay(
                &["payments"],
                Modification::LatencySpike {
                    min_ms: 500,
                    max_ms: 900,
                    probability: 1.0,
                },
            ),
            overlay(&["payments", "orders"], Modification::ErrorRate { error_rate: 0.5 }),
        ]);

        assert_eq!(snapshot.latency_for("payments"), Some(LatencyConfig::new(500, 900, 1.0)));
        assert_eq!(snapshot.latency_for("orders"), None);
        assert_eq!(snapshot.error_rate_for("orders"), 0.5);
        assert_eq!(snapshot.error_rate_for("web"), 0.0);
    }

    #[test]
    fn pattern_outlives_service_name() {
        let pattern = ContextualPattern {
            attribute_name: "payment.method".to_string(),
            failure_values: vec!["paypal".to_string()],
            normal_values: vec!["card".to_string()],
        };
        let snapshot = OverlaySnapshot::new(vec![
            overlay(&["checkout"], Modification::ErrorRate { error_rate: 0.2 }),
            Arc::new(Overlay {
                targets: vec!["payments".to_string()],
                modification: Modification::ErrorRate { error_rate: 0.4 },
                pattern: Some(pattern.clone()),
            }),
        ]);

        let found = {
            let service = String::from("payments");
            snapshot.pattern_for(&service)
        };
        assert_eq!(found, Some(&pattern));
        assert_eq!(snapshot.pattern_for("checkout"), None);
    }

    #[test]
    fn stacked_error_rates_combine_by_union() {
        let snapshot = OverlaySnapshot::new(vec![
            overlay(&["a"], Modification::ErrorRate { error_rate: 0.5 }),
            overlay(&["a"], Modification::ErrorRate { error_rate: 0.5 }),
        ]);
        assert!((snapshot.error_rate_for("a") - 0.75).abs() < 1e-12);
    }

    #[test]
    fn resource_pressure_merges_fields() {
        let snapshot = OverlaySnapshot::new(vec![
            overlay(
                &["a"],
                Modification::ResourcePressure {
                    cpu_utilization: Some(0.95),
                    memory_utilization: None,
                },
            ),
            overlay(
                &["a"],
                Modification::ResourcePressure {
                    cpu_utilization: None,
                    memory_utilization: Some(0.9),
                },
            ),
        ]);
        assert_eq!(snapshot.resource_pressure_for("a"), (Some(0.95), Some(0.9)));
        assert_eq!(snapshot.resource_pressure_for("b"), (None, None));
    }

    #[test]
    fn validation_clamps_and_rejects() {
        let mut spike = Modification::LatencySpike {
            min_ms: 10,
            max_ms: 5,
            probability: 1.0,
        };
        assert!(matches!(spike.validate(), Err(ConfigError::InvertedLatency { .. })));

        let mut errors = Modification::ErrorRate { error_rate: 1.7 };
        errors.validate().unwrap();
        assert_eq!(errors, Modification::ErrorRate { error_rate: 1.0 });

        let mut unavailable = Modification::ServiceUnavailable { probability: f64::NAN };
        assert!(matches!(
            unavailable.validate(),
            Err(ConfigError::InvalidProbability { .. })
        ));
    }

    #[test]
    fn validation_rejects_unbounded_delays() {
        let mut spike = Modification::LatencySpike {
            min_ms: u64::MAX / 2,
            max_ms: u64::MAX,
            probability: 1.0,
        };
        assert!(matches!(
            spike.validate(),
            Err(ConfigError::LatencyTooLarge { value_ms: u64::MAX, .. })
        ));

        let mut slow = Modification::DatabaseSlow {
            query_delay_ms: MAX_LATENCY_MS + 1,
            probability: 1.0,
        };
        assert!(matches!(slow.validate(), Err(ConfigError::LatencyTooLarge { .. })));

        let mut longest = Modification::LatencySpike {
            min_ms: MAX_LATENCY_MS,
            max_ms: MAX_LATENCY_MS,
            probability: 1.0,
        };
        longest.validate().unwrap();
    }

    #[test]
    fn deserializes_tagged_form() {
        let m: Modification = serde_json::from_str(r#"{"type":"database_slow","query_delay_ms":3000}"#).unwrap();
        assert_eq!(
            m,
            Modification::DatabaseSlow {
                query_delay_ms: 3000,
                probability: 1.0
            }
        );
    }
}
