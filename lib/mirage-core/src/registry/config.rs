use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{deserialize_duration, serialize_duration};
use crate::sender::DEFAULT_DELIVERY_TIMEOUT;

const fn default_max_active_jobs() -> usize {
    50
}

const fn default_max_jobs_per_owner() -> usize {
    3
}

const fn default_max_job_lifetime() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

const fn default_stopped_job_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

const fn default_reap_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_delivery_timeout() -> Duration {
    DEFAULT_DELIVERY_TIMEOUT
}

const fn default_max_scenarios_per_job() -> usize {
    10
}

/// Registry limits and timings.
///
/// Durations accept humane strings (`"30s"`, `"15m"`, `"24h"`) or a plain number of seconds.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Maximum number of active (pending or running) jobs.
    #[serde(default = "default_max_active_jobs")]
    pub max_active_jobs: usize,

    /// Maximum number of active jobs per owner.
    #[serde(default = "default_max_jobs_per_owner")]
    pub max_jobs_per_owner: usize,

    /// How long a job runs before it is force-stopped.
    #[serde(
        default = "default_max_job_lifetime",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub max_job_lifetime: Duration,

    /// How long stopped and failed jobs are kept before the reaper removes them.
    #[serde(
        default = "default_stopped_job_retention",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub stopped_job_retention: Duration,

    /// Time between two reaper passes.
    #[serde(
        default = "default_reap_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub reap_interval: Duration,

    /// Consecutive failed deliveries after which a job fails.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Per-request delivery timeout.
    #[serde(
        default = "default_delivery_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub delivery_timeout: Duration,

    /// Maximum number of chaos scenarios in effect per job.
    #[serde(default = "default_max_scenarios_per_job")]
    pub max_scenarios_per_job: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: default_max_active_jobs(),
            max_jobs_per_owner: default_max_jobs_per_owner(),
            max_job_lifetime: default_max_job_lifetime(),
            stopped_job_retention: default_stopped_job_retention(),
            reap_interval: default_reap_interval(),
            failure_threshold: default_failure_threshold(),
            delivery_timeout: default_delivery_timeout(),
            max_scenarios_per_job: default_max_scenarios_per_job(),
        }
    }
}
