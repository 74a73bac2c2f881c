//! Job engine.
//!
//! Each running job owns one task that paces trace and metric generation, applies the chaos overlays in effect at
//! every tick, delivers the encoded payloads, and reports each delivery attempt back to its [`JobHost`]. Reaching the
//! consecutive failure threshold fails the job and ends its task.

mod job;
pub use self::job::{Attempt, JobCounters, JobId, JobInfo, JobState, JobStatus, ScenarioId, Verdict};

mod runner;
pub use self::runner::{JobHost, JobRunner};
