//! Job registry and chaos scenario manager.
//!
//! The registry owns every job and every applied chaos scenario. It is a cheap, cloneable handle over shared state:
//! a job table and a scenario table, each behind its own lock. Locks are never held across an `.await`, and when both
//! are needed the job table is always locked first.
//!
//! Creating a job validates its scenario, checks the active job limits, and starts its engine task. Scenarios can only
//! be applied to running jobs, and only target services the job simulates. A reaper periodically expires scenarios,
//! force-stops jobs that outlived their maximum lifetime, and removes terminal jobs past their retention period.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::OptionExt as _;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument as _};

use crate::config::{deserialize_duration, serialize_duration, ScenarioConfig, Seed};
use crate::engine::{Attempt, JobHost, JobId, JobInfo, JobRunner, JobState, JobStatus, ScenarioId, Verdict};
use crate::error::{
    ConfigError, GenericError, InvalidState, JobNotFound, LimitExceeded, RegistryError, ScenarioNotFound,
    UnknownTemplate,
};
use crate::model::{ContextualPattern, Modification, Overlay, OverlaySnapshot, Topology};
use crate::sender::{AuthScheme, Deliver, DeliveryTarget, HttpDelivery};

mod config;
pub use self::config::RegistryConfig;

mod templates;
pub use self::templates::{find_template, templates, ScenarioTemplate};

/// Creates the delivery client of a job.
pub trait DeliveryFactory: Send + Sync {
    /// Creates a client delivering to the given target.
    ///
    /// # Errors
    ///
    /// If the client cannot be created, an error is returned.
    fn connect(&self, target: &DeliveryTarget, timeout: Duration) -> Result<Arc<dyn Deliver>, GenericError>;
}

/// Delivers over OTLP/HTTP.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpDeliveryFactory;

impl DeliveryFactory for HttpDeliveryFactory {
    fn connect(&self, target: &DeliveryTarget, timeout: Duration) -> Result<Arc<dyn Deliver>, GenericError> {
        let delivery = HttpDelivery::new(target.clone(), timeout)?;
        Ok(Arc::new(delivery))
    }
}

/// A request to create a job.
#[derive(Clone, Debug)]
pub struct JobRequest {
    /// The owner the job counts against.
    pub owner: String,

    /// The scenario to simulate.
    pub config: ScenarioConfig,

    /// The collector base URL.
    pub endpoint: String,

    /// How requests to the collector are authenticated.
    pub auth: AuthScheme,

    /// Seed phrase for deterministic generation.
    pub seed: Option<String>,

    /// Free-text description of the simulated system.
    pub description: Option<String>,
}

impl JobRequest {
    /// Creates a request for an unauthenticated, randomly seeded job.
    pub fn new<O, E>(owner: O, config: ScenarioConfig, endpoint: E) -> Self
    where
        O: Into<String>,
        E: Into<String>,
    {
        Self {
            owner: owner.into(),
            config,
            endpoint: endpoint.into(),
            auth: AuthScheme::None,
            seed: None,
            description: None,
        }
    }

    /// Sets the authentication scheme.
    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the seed phrase.
    pub fn with_seed<S: Into<String>>(mut self, seed: S) -> Self {
        self.seed = Some(seed.into());
        self
    }

    /// Sets the description.
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A request to apply a chaos scenario to a running job.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScenarioRequest {
    /// Names of the targeted services.
    pub targets: Vec<String>,

    /// The modification.
    pub modification: Modification,

    /// Optional contextual pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<ContextualPattern>,

    /// How long the scenario stays in effect.
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub duration: Duration,
}

/// A point-in-time view of an applied chaos scenario.
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioInfo {
    /// The scenario id.
    pub id: ScenarioId,

    /// The job it applies to.
    pub job_id: JobId,

    /// The template it was created from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<&'static str>,

    /// Names of the targeted services.
    pub targets: Vec<String>,

    /// The modification.
    pub modification: Modification,

    /// Optional contextual pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<ContextualPattern>,

    /// When the scenario took effect.
    pub starts_at: DateTime<Utc>,

    /// When the scenario expires.
    pub ends_at: DateTime<Utc>,
}

/// Configured limits, and current usage.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LimitsReport {
    /// Maximum number of active jobs.
    pub max_active_jobs: usize,

    /// Maximum number of active jobs per owner.
    pub max_jobs_per_owner: usize,

    /// Maximum job lifetime.
    #[serde(serialize_with = "serialize_duration")]
    pub max_job_lifetime: Duration,

    /// Maximum number of scenarios in effect per job.
    pub max_scenarios_per_job: usize,

    /// Active (pending or running) jobs.
    pub active_jobs: usize,

    /// Known jobs, including stopped and failed ones.
    pub total_jobs: usize,

    /// Scenarios in effect.
    pub active_scenarios: usize,

    /// Active jobs per owner. Owners without active jobs are left out.
    pub active_jobs_by_owner: BTreeMap<String, usize>,
}

/// What a reaper pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Scenarios removed because they expired.
    pub expired_scenarios: usize,

    /// Jobs force-stopped because they reached their maximum lifetime.
    pub stopped_jobs: usize,

    /// Active jobs failed because their task ended unexpectedly.
    pub failed_jobs: usize,

    /// Terminal jobs removed after their retention period.
    pub removed_jobs: usize,
}

impl ReapReport {
    /// Returns `true` if the pass changed nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

struct Execution {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

struct JobEntry {
    id: JobId,
    owner: String,
    description: Option<String>,
    seed: Option<Seed>,
    topology: Arc<Topology>,
    target: DeliveryTarget,
    delivery: Arc<dyn Deliver>,
    status: JobStatus,
    generation: u64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    deadline: Option<DateTime<Utc>>,
    restart_count: u32,
    execution: Option<Execution>,
}

impl JobEntry {
    /// Ends the current execution, if any, returning its task handle.
    fn halt(&mut self, state: JobState, now: DateTime<Utc>) -> Option<JoinHandle<()>> {
        self.status.state = state;
        self.stopped_at = Some(now);
        self.execution.take().map(|execution| {
            execution.shutdown.cancel();
            execution.handle
        })
    }

    fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            owner: self.owner.clone(),
            description: self.description.clone(),
            seed: self.seed.as_ref().map(|seed| seed.phrase().to_string()),
            state: self.status.state,
            endpoint: self.target.endpoint().to_string(),
            services: self
                .topology
                .config()
                .services
                .iter()
                .map(|service| service.name.clone())
                .collect(),
            created_at: self.created_at,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            deadline: self.deadline,
            restart_count: self.restart_count,
            consecutive_failures: self.status.consecutive_failures,
            last_error: self.status.last_error.clone(),
            counters: self.status.counters,
            active_scenarios: 0,
        }
    }
}

struct ScenarioEntry {
    id: ScenarioId,
    job_id: JobId,
    template: Option<&'static str>,
    overlay: Arc<Overlay>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

impl ScenarioEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now < self.ends_at
    }

    fn info(&self) -> ScenarioInfo {
        ScenarioInfo {
            id: self.id,
            job_id: self.job_id,
            template: self.template,
            targets: self.overlay.targets.clone(),
            modification: self.overlay.modification.clone(),
            pattern: self.overlay.pattern.clone(),
            starts_at: self.starts_at,
            ends_at: self.ends_at,
        }
    }
}

struct Shared {
    config: RegistryConfig,
    delivery: Arc<dyn DeliveryFactory>,
    jobs: Mutex<IndexMap<JobId, JobEntry>>,
    scenarios: Mutex<IndexMap<ScenarioId, ScenarioEntry>>,
    shutdown: CancellationToken,
    clock: Clock,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Last error of a job whose task ended while the job was still active.
const ABANDONED_ERROR: &str = "generation task ended unexpectedly";

/// Wall-clock time, advanced by the Tokio clock.
///
/// Job deadlines and scenario windows follow the runtime's monotonic clock, including paused time in tests.
#[derive(Clone, Copy)]
struct Clock {
    wall: DateTime<Utc>,
    origin: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            wall: Utc::now(),
            origin: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        add_duration(self.wall, self.origin.elapsed())
    }
}

impl Shared {
    fn check_limits(&self, jobs: &IndexMap<JobId, JobEntry>, owner: &str) -> Result<(), RegistryError> {
        let active = jobs.values().filter(|job| job.status.state.is_active()).count();
        if active >= self.config.max_active_jobs {
            return LimitExceeded {
                limit: "max_active_jobs",
                current: active,
                max: self.config.max_active_jobs,
            }
            .fail();
        }

        let owned = jobs
            .values()
            .filter(|job| job.owner == owner && job.status.state.is_active())
            .count();
        if owned >= self.config.max_jobs_per_owner {
            return LimitExceeded {
                limit: "max_jobs_per_owner",
                current: owned,
                max: self.config.max_jobs_per_owner,
            }
            .fail();
        }

        Ok(())
    }

    /// Removes every scenario applied to the given job.
    fn clear_scenarios(&self, job_id: JobId) -> usize {
        let mut scenarios = lock(&self.scenarios);
        let before = scenarios.len();
        scenarios.retain(|_, scenario| scenario.job_id != job_id);
        before - scenarios.len()
    }

    /// Fails active jobs whose task has ended, and removes their scenarios.
    ///
    /// A task only ends on its own once its job is stopped or failed, so an active job without a live task means the
    /// task panicked.
    fn fail_abandoned(&self, jobs: &mut IndexMap<JobId, JobEntry>, now: DateTime<Utc>) -> usize {
        let mut failed = 0;
        for job in jobs.values_mut() {
            let finished = job
                .execution
                .as_ref()
                .is_some_and(|execution| execution.handle.is_finished());
            if !(job.status.state.is_active() && finished) {
                continue;
            }

            let _ = job.halt(JobState::Failed, now);
            job.status.last_error = Some(ABANDONED_ERROR.to_string());
            warn!(job_id = %job.id, "Job task ended unexpectedly. Marking job as failed.");
            self.clear_scenarios(job.id);
            failed += 1;
        }
        failed
    }

    fn scenario_counts(&self, infos: &mut [JobInfo]) {
        let now = self.clock.now();
        let scenarios = lock(&self.scenarios);
        for info in infos {
            info.active_scenarios = scenarios
                .values()
                .filter(|scenario| scenario.job_id == info.id && scenario.is_live(now))
                .count();
        }
    }
}

impl JobHost for Shared {
    fn overlays(&self, job_id: JobId) -> OverlaySnapshot {
        let now = self.clock.now();
        let mut scenarios = lock(&self.scenarios);
        scenarios.retain(|_, scenario| scenario.ends_at > now);

        let overlays: Vec<Arc<Overlay>> = scenarios
            .values()
            .filter(|scenario| scenario.job_id == job_id && scenario.is_live(now))
            .map(|scenario| Arc::clone(&scenario.overlay))
            .collect();
        if overlays.is_empty() {
            OverlaySnapshot::empty()
        } else {
            OverlaySnapshot::new(overlays)
        }
    }

    fn job_started(&self, job_id: JobId, generation: u64) -> bool {
        let mut jobs = lock(&self.jobs);
        let Some(job) = jobs.get_mut(&job_id) else {
            return false;
        };
        if job.generation != generation {
            return false;
        }

        match job.status.state {
            JobState::Pending => {
                job.status.state = JobState::Running;
                true
            }
            JobState::Running => true,
            JobState::Stopped | JobState::Failed => false,
        }
    }

    fn record_attempt(&self, job_id: JobId, generation: u64, attempt: Attempt) -> Verdict {
        let mut jobs = lock(&self.jobs);
        let Some(job) = jobs.get_mut(&job_id) else {
            return Verdict::Halt;
        };
        if job.generation != generation {
            return Verdict::Halt;
        }

        let was_running = job.status.state == JobState::Running;
        let verdict = job.status.record(attempt, self.config.failure_threshold);
        if was_running && job.status.state == JobState::Failed {
            // The task reporting this attempt ends on its own.
            let _ = job.halt(JobState::Failed, self.clock.now());
            warn!(
                job_id = %job_id,
                consecutive_failures = job.status.consecutive_failures,
                error = job.status.last_error.as_deref().unwrap_or_default(),
                "Job failed after repeated delivery failures."
            );
            self.clear_scenarios(job_id);
        }
        verdict
    }
}

/// The job registry.
///
/// Cloning the registry is cheap: clones share the same jobs and scenarios. Operations that start jobs must be called
/// from within a Tokio runtime.
#[derive(Clone)]
pub struct JobRegistry {
    shared: Arc<Shared>,
}

impl JobRegistry {
    /// Creates a registry whose jobs deliver over OTLP/HTTP.
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_delivery(config, Arc::new(HttpDeliveryFactory))
    }

    /// Creates a registry whose jobs deliver through clients created by the given factory.
    pub fn with_delivery(config: RegistryConfig, delivery: Arc<dyn DeliveryFactory>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                delivery,
                jobs: Mutex::new(IndexMap::new()),
                scenarios: Mutex::new(IndexMap::new()),
                shutdown: CancellationToken::new(),
                clock: Clock::new(),
            }),
        }
    }

    /// Returns the registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Returns the current time, as seen by job deadlines and scenario windows.
    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    /// Starts a new execution of the given job.
    ///
    /// Counters and failure state are reset, and the execution generation is bumped so that reports from any previous
    /// execution are ignored.
    fn launch(&self, job: &mut JobEntry, now: DateTime<Utc>) {
        if job.generation > 0 {
            job.restart_count += 1;
        }
        job.generation += 1;
        job.status = JobStatus::pending();
        job.started_at = Some(now);
        job.stopped_at = None;
        job.deadline = Some(add_duration(now, self.shared.config.max_job_lifetime));

        let runner = JobRunner::new(
            job.id,
            job.generation,
            Arc::clone(&job.topology),
            job.seed.as_ref(),
            Arc::clone(&job.delivery),
            Arc::clone(&self.shared) as Arc<dyn JobHost>,
        );
        let shutdown = self.shared.shutdown.child_token();
        let handle = runner.spawn(shutdown.clone());
        job.execution = Some(Execution { shutdown, handle });
    }

    /// Creates a job and starts it.
    ///
    /// # Errors
    ///
    /// If the scenario or the endpoint is invalid, or an active job limit would be exceeded, an error is returned and
    /// no job is created.
    pub fn create_job(&self, request: JobRequest) -> Result<JobInfo, RegistryError> {
        let config = Arc::new(request.config.validated()?);
        let topology = Arc::new(Topology::new(config)?);
        let target = DeliveryTarget::parse(&request.endpoint, request.auth)?;
        let delivery = self
            .shared
            .delivery
            .connect(&target, self.shared.config.delivery_timeout)
            .map_err(|e| ConfigError::InvalidEndpoint {
                endpoint: request.endpoint.clone(),
                reason: e.to_string(),
            })?;

        let now = self.now();
        let mut jobs = lock(&self.shared.jobs);
        self.shared.fail_abandoned(&mut jobs, now);
        self.shared.check_limits(&jobs, &request.owner)?;

        let mut job = JobEntry {
            id: JobId::new(),
            owner: request.owner,
            description: request.description,
            seed: request.seed.map(Seed::new),
            topology,
            target,
            delivery,
            status: JobStatus::pending(),
            generation: 0,
            created_at: now,
            started_at: None,
            stopped_at: None,
            deadline: None,
            restart_count: 0,
            execution: None,
        };
        self.launch(&mut job, now);
        info!(job_id = %job.id, owner = %job.owner, endpoint = %job.target.endpoint(), "Job created.");

        let info = job.info();
        jobs.insert(job.id, job);
        Ok(info)
    }

    /// Starts a stopped or failed job.
    ///
    /// # Errors
    ///
    /// If the job does not exist, is already active, or an active job limit would be exceeded, an error is returned.
    pub fn start_job(&self, job_id: JobId) -> Result<JobInfo, RegistryError> {
        let now = self.now();
        let mut jobs = lock(&self.shared.jobs);
        self.shared.fail_abandoned(&mut jobs, now);
        let job = jobs.get(&job_id).context(JobNotFound {
            job_id: job_id.to_string(),
        })?;
        if job.status.state.is_active() {
            return InvalidState {
                job_id: job_id.to_string(),
                state: job.status.state.as_str(),
                operation: "start",
            }
            .fail();
        }
        let owner = job.owner.clone();
        self.shared.check_limits(&jobs, &owner)?;

        let job = jobs.get_mut(&job_id).context(JobNotFound {
            job_id: job_id.to_string(),
        })?;
        self.launch(job, now);
        info!(job_id = %job_id, restart_count = job.restart_count, "Job started.");
        Ok(job.info())
    }

    /// Stops an active job, and removes its scenarios.
    ///
    /// The job's task observes the stop at its next tick; a delivery in flight completes first.
    ///
    /// # Errors
    ///
    /// If the job does not exist, or is already stopped or failed, an error is returned.
    pub fn stop_job(&self, job_id: JobId) -> Result<JobInfo, RegistryError> {
        let mut jobs = lock(&self.shared.jobs);
        let job = jobs.get_mut(&job_id).context(JobNotFound {
            job_id: job_id.to_string(),
        })?;
        if job.status.state.is_terminal() {
            return InvalidState {
                job_id: job_id.to_string(),
                state: job.status.state.as_str(),
                operation: "stop",
            }
            .fail();
        }

        let _ = job.halt(JobState::Stopped, self.now());
        self.shared.clear_scenarios(job_id);
        info!(job_id = %job_id, "Job stopped.");
        Ok(job.info())
    }

    /// Restarts a job: stops it if it is active, removes its scenarios, then starts a new execution.
    ///
    /// # Errors
    ///
    /// If the job does not exist, or it is not active and an active job limit would be exceeded, an error is returned.
    pub fn restart_job(&self, job_id: JobId) -> Result<JobInfo, RegistryError> {
        let now = self.now();
        let mut jobs = lock(&self.shared.jobs);
        self.shared.fail_abandoned(&mut jobs, now);
        let job = jobs.get(&job_id).context(JobNotFound {
            job_id: job_id.to_string(),
        })?;
        if job.status.state.is_terminal() {
            let owner = job.owner.clone();
            self.shared.check_limits(&jobs, &owner)?;
        }

        let job = jobs.get_mut(&job_id).context(JobNotFound {
            job_id: job_id.to_string(),
        })?;
        if job.status.state.is_active() {
            let _ = job.halt(JobState::Stopped, now);
        }
        self.shared.clear_scenarios(job_id);
        self.launch(job, now);
        info!(job_id = %job_id, restart_count = job.restart_count, "Job restarted.");
        Ok(job.info())
    }

    /// Stops a job if it is active, then removes it and its scenarios.
    ///
    /// # Errors
    ///
    /// If the job does not exist, an error is returned.
    pub fn delete_job(&self, job_id: JobId) -> Result<(), RegistryError> {
        let mut jobs = lock(&self.shared.jobs);
        let mut job = jobs.shift_remove(&job_id).context(JobNotFound {
            job_id: job_id.to_string(),
        })?;
        if job.status.state.is_active() {
            let _ = job.halt(JobState::Stopped, self.now());
        }
        self.shared.clear_scenarios(job_id);
        info!(job_id = %job_id, "Job deleted.");
        Ok(())
    }

    /// Lists jobs in creation order, optionally only those of the given owner.
    pub fn list_jobs(&self, owner: Option<&str>) -> Vec<JobInfo> {
        let mut infos: Vec<JobInfo> = {
            let mut jobs = lock(&self.shared.jobs);
            self.shared.fail_abandoned(&mut jobs, self.now());
            jobs.values()
                .filter(|job| owner.is_none_or(|owner| job.owner == owner))
                .map(JobEntry::info)
                .collect()
        };
        self.shared.scenario_counts(&mut infos);
        infos
    }

    /// Returns a job.
    ///
    /// # Errors
    ///
    /// If the job does not exist, an error is returned.
    pub fn get_job(&self, job_id: JobId) -> Result<JobInfo, RegistryError> {
        let info = {
            let mut jobs = lock(&self.shared.jobs);
            self.shared.fail_abandoned(&mut jobs, self.now());
            jobs.get(&job_id).map(JobEntry::info).context(JobNotFound {
                job_id: job_id.to_string(),
            })?
        };

        let mut infos = [info];
        self.shared.scenario_counts(&mut infos);
        let [info] = infos;
        Ok(info)
    }

    /// Applies a chaos scenario to a running job.
    ///
    /// # Errors
    ///
    /// If the job does not exist or is not running, the scenario is invalid or targets services the job does not
    /// simulate, or the job already has the maximum number of scenarios in effect, an error is returned.
    pub fn apply_scenario(&self, job_id: JobId, request: ScenarioRequest) -> Result<ScenarioInfo, RegistryError> {
        self.apply(job_id, request, None)
    }

    /// Applies a predefined chaos scenario to a running job.
    ///
    /// The template is aimed at `targets`, or at its default targets when none are given, and stays in effect for
    /// `duration`, or for its default duration.
    ///
    /// # Errors
    ///
    /// If the template does not exist, or the scenario cannot be applied (see [`JobRegistry::apply_scenario`]), an
    /// error is returned.
    pub fn apply_template(
        &self, job_id: JobId, name: &str, targets: Vec<String>, duration: Option<Duration>,
    ) -> Result<ScenarioInfo, RegistryError> {
        let template = find_template(name).context(UnknownTemplate { name })?;
        let request = ScenarioRequest {
            targets: if targets.is_empty() {
                template.default_targets
            } else {
                targets
            },
            modification: template.modification,
            pattern: template.pattern,
            duration: duration.unwrap_or(template.default_duration),
        };
        self.apply(job_id, request, Some(template.name))
    }

    fn apply(
        &self, job_id: JobId, mut request: ScenarioRequest, template: Option<&'static str>,
    ) -> Result<ScenarioInfo, RegistryError> {
        request.modification.validate()?;
        if request.targets.is_empty() {
            return Err(ConfigError::NoTargetServices.into());
        }

        let now = self.now();
        let jobs = lock(&self.shared.jobs);
        let job = jobs.get(&job_id).context(JobNotFound {
            job_id: job_id.to_string(),
        })?;
        if job.status.state != JobState::Running {
            return InvalidState {
                job_id: job_id.to_string(),
                state: job.status.state.as_str(),
                operation: "apply a scenario",
            }
            .fail();
        }
        if let Some(unknown) = request
            .targets
            .iter()
            .find(|target| job.topology.service_index(target).is_none())
        {
            return Err(ConfigError::UnknownTargetService {
                service: unknown.clone(),
            }
            .into());
        }

        let mut scenarios = lock(&self.shared.scenarios);
        scenarios.retain(|_, scenario| scenario.ends_at > now);
        let active = scenarios.values().filter(|scenario| scenario.job_id == job_id).count();
        if active >= self.shared.config.max_scenarios_per_job {
            return LimitExceeded {
                limit: "max_scenarios_per_job",
                current: active,
                max: self.shared.config.max_scenarios_per_job,
            }
            .fail();
        }

        let scenario = ScenarioEntry {
            id: ScenarioId::new(),
            job_id,
            template,
            overlay: Arc::new(Overlay {
                targets: request.targets,
                modification: request.modification,
                pattern: request.pattern,
            }),
            starts_at: now,
            ends_at: add_duration(now, request.duration),
        };
        info!(
            job_id = %job_id,
            scenario_id = %scenario.id,
            kind = scenario.overlay.modification.kind(),
            targets = ?scenario.overlay.targets,
            ends_at = %scenario.ends_at,
            "Scenario applied."
        );

        let info = scenario.info();
        scenarios.insert(scenario.id, scenario);
        Ok(info)
    }

    /// Stops a scenario before it expires.
    ///
    /// # Errors
    ///
    /// If no scenario with the given id is in effect, an error is returned.
    pub fn stop_scenario(&self, scenario_id: ScenarioId) -> Result<ScenarioInfo, RegistryError> {
        let scenario = lock(&self.shared.scenarios)
            .shift_remove(&scenario_id)
            .context(ScenarioNotFound {
                scenario_id: scenario_id.to_string(),
            })?;
        info!(job_id = %scenario.job_id, scenario_id = %scenario_id, "Scenario stopped.");
        Ok(scenario.info())
    }

    /// Lists the scenarios in effect for a job, removing expired ones.
    ///
    /// # Errors
    ///
    /// If the job does not exist, an error is returned.
    pub fn list_active_scenarios(&self, job_id: JobId) -> Result<Vec<ScenarioInfo>, RegistryError> {
        let jobs = lock(&self.shared.jobs);
        if !jobs.contains_key(&job_id) {
            return JobNotFound {
                job_id: job_id.to_string(),
            }
            .fail();
        }

        let now = self.now();
        let mut scenarios = lock(&self.shared.scenarios);
        scenarios.retain(|_, scenario| scenario.ends_at > now);
        Ok(scenarios
            .values()
            .filter(|scenario| scenario.job_id == job_id && scenario.is_live(now))
            .map(ScenarioEntry::info)
            .collect())
    }

    /// Returns the configured limits and current usage.
    pub fn limits(&self) -> LimitsReport {
        let config = &self.shared.config;
        let mut report = LimitsReport {
            max_active_jobs: config.max_active_jobs,
            max_jobs_per_owner: config.max_jobs_per_owner,
            max_job_lifetime: config.max_job_lifetime,
            max_scenarios_per_job: config.max_scenarios_per_job,
            active_jobs: 0,
            total_jobs: 0,
            active_scenarios: 0,
            active_jobs_by_owner: BTreeMap::new(),
        };

        let mut jobs = lock(&self.shared.jobs);
        self.shared.fail_abandoned(&mut jobs, self.now());
        report.total_jobs = jobs.len();
        for job in jobs.values().filter(|job| job.status.state.is_active()) {
            report.active_jobs += 1;
            *report.active_jobs_by_owner.entry(job.owner.clone()).or_default() += 1;
        }

        let now = self.now();
        report.active_scenarios = lock(&self.shared.scenarios)
            .values()
            .filter(|scenario| scenario.is_live(now))
            .count();
        report
    }

    /// Runs one reaper pass, as of `now`.
    ///
    /// Active jobs whose task ended unexpectedly are failed, expired scenarios are removed, active jobs past their
    /// deadline are stopped, and terminal jobs that stopped more than the retention period before `now` are removed.
    pub fn reap_at(&self, now: DateTime<Utc>) -> ReapReport {
        let mut report = ReapReport::default();
        let retention = self.shared.config.stopped_job_retention;

        let mut jobs = lock(&self.shared.jobs);
        report.failed_jobs = self.shared.fail_abandoned(&mut jobs, now);

        let mut ended = Vec::new();
        for job in jobs.values_mut() {
            if job.status.state.is_active() && job.deadline.is_some_and(|deadline| deadline <= now) {
                let _ = job.halt(JobState::Stopped, now);
                info!(job_id = %job.id, "Job reached its maximum lifetime and was stopped.");
                ended.push(job.id);
            }
        }
        report.stopped_jobs = ended.len();

        let before = jobs.len();
        jobs.retain(|job_id, job| {
            let expired = job.status.state.is_terminal()
                && job
                    .stopped_at
                    .is_some_and(|stopped_at| add_duration(stopped_at, retention) <= now);
            if expired {
                debug!(job_id = %job_id, "Removing job past its retention period.");
                ended.push(*job_id);
            }
            !expired
        });
        report.removed_jobs = before - jobs.len();

        let mut scenarios = lock(&self.shared.scenarios);
        scenarios.retain(|_, scenario| {
            if ended.contains(&scenario.job_id) {
                return false;
            }
            if scenario.ends_at <= now {
                report.expired_scenarios += 1;
                return false;
            }
            true
        });

        report
    }

    /// Spawns the reaper, which runs a pass every `reap_interval` until the registry is shut down.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let shutdown = self.shared.shutdown.clone();
        let period = self.shared.config.reap_interval.max(Duration::from_secs(1));

        let reaper = async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticks.tick() => {
                        let report = registry.reap_at(registry.now());
                        if !report.is_empty() {
                            info!(
                                expired_scenarios = report.expired_scenarios,
                                stopped_jobs = report.stopped_jobs,
                                failed_jobs = report.failed_jobs,
                                removed_jobs = report.removed_jobs,
                                "Reaper pass complete."
                            );
                        }
                    }
                }
            }

            debug!("Reaper stopped.");
        };
        tokio::spawn(reaper.instrument(info_span!("reaper")))
    }

    /// Stops every active job and the reaper, and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();

        let now = self.now();
        let handles: Vec<JoinHandle<()>> = lock(&self.shared.jobs)
            .values_mut()
            .filter(|job| job.status.state.is_active())
            .filter_map(|job| job.halt(JobState::Stopped, now))
            .collect();
        lock(&self.shared.scenarios).clear();

        info!(jobs = handles.len(), "Waiting for jobs to stop.");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Job task did not finish cleanly.");
            }
        }
    }
}
