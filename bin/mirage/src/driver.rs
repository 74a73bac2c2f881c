//! Command implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mirage_core::config::ScenarioConfig;
use mirage_core::engine::{JobId, JobInfo, JobState};
use mirage_core::error::{ErrorContext as _, GenericError};
use mirage_core::generic_error;
use mirage_core::model::Topology;
use mirage_core::registry::{templates, JobRegistry, JobRequest, RegistryConfig};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{info, warn};

use crate::cli::RunArgs;

const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(50);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Validates a scenario file and prints a summary of its topology.
pub fn validate(path: &Path) -> Result<(), GenericError> {
    let config = Arc::new(ScenarioConfig::try_from_file(path)?);
    let topology = Topology::new(Arc::clone(&config)).error_context("Failed to resolve topology.")?;

    println!(
        "Scenario '{}' is valid: {} services, {} databases, {} message queues.",
        path.display(),
        config.services.len(),
        config.databases.len(),
        config.message_queues.len()
    );
    println!("Entry point: {}", topology.service(topology.root()).name);

    for service in &config.services {
        let role = service.role.as_deref().unwrap_or("service");
        println!("  {} ({}, {})", service.name, role, service.language.sdk_language());
        for dependency in &service.dependencies {
            match &dependency.via {
                Some(queue) => println!("    -> {} {} via {}", dependency.kind, dependency.target, queue),
                None => println!(
                    "    -> {} {} ({})",
                    dependency.kind,
                    dependency.target,
                    dependency.protocol()
                ),
            }
        }
    }

    let telemetry = &config.telemetry;
    println!(
        "Telemetry: {} traces/s, base error rate {}, metrics every {}s, logs {}.",
        telemetry.trace_rate,
        telemetry.error_rate,
        telemetry.metrics_interval,
        if telemetry.include_logs { "on" } else { "off" }
    );
    if let Some(kubernetes) = &config.kubernetes {
        println!(
            "Kubernetes: cluster '{}' ({}), namespace '{}', {} nodes.",
            kubernetes.cluster_name, kubernetes.platform, kubernetes.namespace, kubernetes.node_count
        );
    }

    Ok(())
}

/// Prints the predefined chaos scenario templates.
pub fn list_templates() {
    for template in templates() {
        println!(
            "{} [{}, {}, {} for {:?}]",
            template.name,
            template.category,
            template.modification.kind(),
            template.default_targets.join(", "),
            template.default_duration
        );
        println!("    {}", template.description);
    }
}

/// Runs a single job until interrupted, or until it fails.
pub async fn run(settings: RegistryConfig, args: RunArgs) -> Result<(), GenericError> {
    let config = ScenarioConfig::try_from_file(&args.scenario)?;

    let registry = JobRegistry::new(settings);
    let reaper = registry.spawn_reaper();

    let mut request = JobRequest::new(args.owner.clone(), config, args.endpoint.clone()).with_auth(args.auth());
    if let Some(seed) = &args.seed {
        request = request.with_seed(seed.clone());
    }
    if let Some(description) = &args.description {
        request = request.with_description(description.clone());
    }

    let job = registry.create_job(request).error_context("Failed to create job.")?;
    info!(job_id = %job.id, endpoint = %job.endpoint, services = job.services.len(), "Job created.");

    let result = supervise(&registry, job.id, &args).await;

    registry.shutdown().await;
    if let Err(e) = reaper.await {
        warn!(error = %e, "Reaper did not finish cleanly.");
    }

    result
}

async fn supervise(registry: &JobRegistry, job_id: JobId, args: &RunArgs) -> Result<(), GenericError> {
    if let Some(template) = &args.chaos {
        wait_until_running(registry, job_id).await?;
        let scenario = registry
            .apply_template(job_id, template, args.chaos_targets.clone(), args.chaos_duration)
            .with_error_context(|| format!("Failed to apply chaos scenario '{}'.", template))?;
        info!(
            scenario_id = %scenario.id,
            targets = ?scenario.targets,
            ends_at = %scenario.ends_at,
            "Chaos scenario '{}' applied.",
            template
        );
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut status = interval(args.status_interval);
    status.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.error_context("Failed to listen for interrupts.")?;
                info!("Interrupted. Stopping job...");
                return Ok(());
            }
            _ = status.tick() => {
                let job = registry.get_job(job_id)?;
                report(&job);

                match job.state {
                    JobState::Failed => {
                        return Err(generic_error!(
                            "Job failed after {} consecutive delivery failures. Last error: {}",
                            job.consecutive_failures,
                            job.last_error.as_deref().unwrap_or("unknown")
                        ));
                    }
                    JobState::Stopped => {
                        info!("Job reached its maximum lifetime.");
                        return Ok(());
                    }
                    JobState::Pending | JobState::Running => {}
                }
            }
        }
    }
}

async fn wait_until_running(registry: &JobRegistry, job_id: JobId) -> Result<(), GenericError> {
    let attempts = STARTUP_TIMEOUT.as_millis() / STARTUP_POLL_INTERVAL.as_millis();
    for _ in 0..attempts {
        if registry.get_job(job_id)?.state == JobState::Running {
            return Ok(());
        }
        sleep(STARTUP_POLL_INTERVAL).await;
    }
    Err(generic_error!("Job did not start within {:?}.", STARTUP_TIMEOUT))
}

fn report(job: &JobInfo) {
    let counters = &job.counters;
    info!(
        state = %job.state,
        spans = counters.spans_emitted,
        logs = counters.logs_emitted,
        metrics = counters.metrics_emitted,
        payloads_sent = counters.payloads_sent,
        payloads_failed = counters.payloads_failed,
        consecutive_failures = job.consecutive_failures,
        scenarios = job.active_scenarios,
        "Job status."
    );
}
