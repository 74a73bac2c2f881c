//! Job identity, lifecycle and status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sender::Signal;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new, random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a generation job.
    JobId
);

uuid_id!(
    /// Identifier of an applied chaos scenario.
    ScenarioId
);

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, waiting for its task to start.
    Pending,

    /// Generating and delivering telemetry.
    Running,

    /// Stopped on request, or after reaching its maximum lifetime.
    Stopped,

    /// Stopped after too many consecutive delivery failures.
    Failed,
}

impl JobState {
    /// Returns the name of this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` if the job counts against the active job limits.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Returns `true` if the job is no longer generating.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery counters of a job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct JobCounters {
    /// Payloads accepted by the collector.
    pub payloads_sent: u64,

    /// Payloads that could not be delivered.
    pub payloads_failed: u64,

    /// Spans delivered.
    pub spans_emitted: u64,

    /// Log records delivered.
    pub logs_emitted: u64,

    /// Metric data points delivered.
    pub metrics_emitted: u64,
}

impl JobCounters {
    /// Records a delivered payload of `items` records.
    pub fn delivered(&mut self, signal: Signal, items: usize) {
        self.payloads_sent += 1;
        let items = items as u64;
        match signal {
            Signal::Traces => self.spans_emitted += items,
            Signal::Logs => self.logs_emitted += items,
            Signal::Metrics => self.metrics_emitted += items,
        }
    }

    /// Records a payload that could not be delivered.
    pub fn failed(&mut self) {
        self.payloads_failed += 1;
    }
}

/// The outcome of one delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attempt {
    /// The collector accepted a payload of `items` records.
    Delivered {
        /// The payload's signal type.
        signal: Signal,

        /// Number of records in the payload.
        items: usize,
    },

    /// The payload could not be delivered.
    Failed {
        /// The payload's signal type.
        signal: Signal,

        /// The delivery error, rendered.
        error: String,
    },
}

/// Whether a job's task keeps generating after reporting an attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Keep generating.
    Continue,

    /// End the task.
    Halt,
}

/// Mutable health of a job's current execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobStatus {
    /// Lifecycle state.
    pub state: JobState,

    /// Consecutive failed delivery attempts.
    pub consecutive_failures: u32,

    /// The most recent delivery error.
    pub last_error: Option<String>,

    /// Delivery counters.
    pub counters: JobCounters,
}

impl JobStatus {
    /// Creates the status of a job that has not started yet.
    pub fn pending() -> Self {
        Self {
            state: JobState::Pending,
            consecutive_failures: 0,
            last_error: None,
            counters: JobCounters::default(),
        }
    }

    /// Applies the outcome of a delivery attempt.
    ///
    /// A success resets the consecutive failure count, and a failure increments it and records the error. Once
    /// `failure_threshold` consecutive attempts have failed, the job transitions to [`JobState::Failed`]. Attempts
    /// reported while the job is not running are ignored.
    pub fn record(&mut self, attempt: Attempt, failure_threshold: u32) -> Verdict {
        if self.state != JobState::Running {
            return Verdict::Halt;
        }

        match attempt {
            Attempt::Delivered { signal, items } => {
                self.counters.delivered(signal, items);
                self.consecutive_failures = 0;
                Verdict::Continue
            }
            Attempt::Failed { error, .. } => {
                self.counters.failed();
                self.consecutive_failures += 1;
                self.last_error = Some(error);
                if self.consecutive_failures >= failure_threshold.max(1) {
                    self.state = JobState::Failed;
                    Verdict::Halt
                } else {
                    Verdict::Continue
                }
            }
        }
    }
}

/// A point-in-time view of a job.
#[derive(Clone, Debug, Serialize)]
pub struct JobInfo {
    /// The job id.
    pub id: JobId,

    /// The owner the job counts against.
    pub owner: String,

    /// Free-text description of the simulated system.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// The seed phrase, when generation is deterministic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,

    /// Lifecycle state.
    pub state: JobState,

    /// The collector base URL.
    pub endpoint: String,

    /// Names of the simulated services.
    pub services: Vec<String>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When the job's current execution started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the job last stopped or failed.
    pub stopped_at: Option<DateTime<Utc>>,

    /// When the current execution is force-stopped.
    pub deadline: Option<DateTime<Utc>>,

    /// How many times the job was restarted.
    pub restart_count: u32,

    /// Consecutive failed delivery attempts.
    pub consecutive_failures: u32,

    /// The most recent delivery error.
    pub last_error: Option<String>,

    /// Delivery counters of the current execution.
    pub counters: JobCounters,

    /// Number of chaos scenarios currently in effect.
    pub active_scenarios: usize,
}
