use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument as _};

use super::{Attempt, JobId, Verdict};
use crate::config::{job_rng, Seed};
use crate::error::{DeliveryError, EncodeError};
use crate::generator::{ClusterMetricGenerator, MetricGenerator, TraceGenerator};
use crate::model::{trace_context, OverlaySnapshot, ResourceCatalog, Topology};
use crate::otlp::{to_payload, OtlpEncoder};
use crate::sender::{Deliver, Signal};

const MIN_TRACE_PERIOD: Duration = Duration::from_millis(1);

/// The side of a job that lives outside its task.
///
/// Every call carries the execution generation the task was started with, so that a superseded task (stopped, then
/// restarted) cannot overwrite the state of the execution that replaced it.
pub trait JobHost: Send + Sync {
    /// Returns the chaos overlays currently in effect for the job.
    fn overlays(&self, job_id: JobId) -> OverlaySnapshot;

    /// Marks the job as running. Returns `false` if the execution was superseded before it could start.
    fn job_started(&self, job_id: JobId, generation: u64) -> bool;

    /// Records the outcome of a delivery attempt.
    fn record_attempt(&self, job_id: JobId, generation: u64, attempt: Attempt) -> Verdict;
}

/// Returned by a tick when the task must end.
struct Halted;

/// The generation loop of a single job execution.
///
/// Traces are generated every `1 / trace_rate` seconds and metric snapshots every `metrics_interval` seconds, both on
/// the same task. Every delivery attempt is reported to the [`JobHost`], which decides whether the loop continues.
pub struct JobRunner {
    job_id: JobId,
    generation: u64,
    topology: Arc<Topology>,
    traces: TraceGenerator,
    metrics: MetricGenerator,
    cluster: ClusterMetricGenerator,
    encoder: OtlpEncoder,
    delivery: Arc<dyn Deliver>,
    host: Arc<dyn JobHost>,
    rng: StdRng,
}

impl JobRunner {
    /// Creates the runner for one execution of a job.
    ///
    /// With a seed, generation is deterministic: resource attributes and every sampled value derive from it.
    pub fn new(
        job_id: JobId, generation: u64, topology: Arc<Topology>, seed: Option<&Seed>, delivery: Arc<dyn Deliver>,
        host: Arc<dyn JobHost>,
    ) -> Self {
        let mut rng = job_rng(seed);
        let catalog = Arc::new(ResourceCatalog::new(topology.config(), &mut rng));
        let start_ns = trace_context::now_ns();

        Self {
            job_id,
            generation,
            traces: TraceGenerator::new(Arc::clone(&topology)),
            metrics: MetricGenerator::new(Arc::clone(&topology), start_ns),
            cluster: ClusterMetricGenerator::new(Arc::clone(&topology), start_ns),
            encoder: OtlpEncoder::new(catalog),
            topology,
            delivery,
            host,
            rng,
        }
    }

    /// Spawns the generation loop on the current runtime.
    ///
    /// The loop ends when `shutdown` is cancelled, when the host halts it, or when the execution is superseded.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let span = info_span!("job", job_id = %self.job_id);
        tokio::spawn(self.run(shutdown).instrument(span))
    }

    async fn run(mut self, shutdown: CancellationToken) {
        if !self.host.job_started(self.job_id, self.generation) {
            debug!(generation = self.generation, "Execution superseded before start.");
            return;
        }

        let telemetry = &self.topology.config().telemetry;
        let mut trace_ticks = trace_period(telemetry.trace_rate).map(|period| {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks
        });
        let metrics_period = Duration::from_secs(telemetry.metrics_interval.max(1));
        let mut metrics_ticks = interval_at(Instant::now() + metrics_period, metrics_period);
        metrics_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            services = self.topology.service_count(),
            trace_rate = telemetry.trace_rate,
            metrics_interval = metrics_period.as_secs(),
            "Job started."
        );

        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Stop requested.");
                    break;
                }
                _ = next_tick(&mut trace_ticks) => self.trace_tick().await,
                _ = metrics_ticks.tick() => self.metrics_tick().await,
            };

            if result.is_err() {
                break;
            }
        }

        info!("Job task finished.");
    }

    async fn trace_tick(&mut self) -> Result<(), Halted> {
        let overlays = self.host.overlays(self.job_id);
        let trace = self
            .traces
            .build_trace(&overlays, &mut self.rng, trace_context::now_ns());
        self.metrics.observe(&trace);

        let payload = self
            .encoder
            .encode_traces(&trace.spans)
            .and_then(|request| to_payload(&request));
        self.send(Signal::Traces, payload, trace.spans.len()).await?;

        if !trace.logs.is_empty() {
            let payload = self
                .encoder
                .encode_logs(&trace.logs, &trace.spans)
                .and_then(|request| to_payload(&request));
            self.send(Signal::Logs, payload, trace.logs.len()).await?;
        }

        Ok(())
    }

    async fn metrics_tick(&mut self) -> Result<(), Halted> {
        let overlays = self.host.overlays(self.job_id);
        let now_ns = trace_context::now_ns();

        let metrics = self.metrics.build_metrics(&overlays, &mut self.rng, now_ns);
        let payload = self
            .encoder
            .encode_metrics(&metrics)
            .and_then(|request| to_payload(&request));
        self.send(Signal::Metrics, payload, metrics.len()).await?;

        let cluster = self
            .cluster
            .build_cluster_metrics(self.encoder.catalog(), &overlays, &mut self.rng, now_ns);
        if !cluster.is_empty() {
            let payload = self
                .encoder
                .encode_metrics(&cluster)
                .and_then(|request| to_payload(&request));
            self.send(Signal::Metrics, payload, cluster.len()).await?;
        }

        Ok(())
    }

    async fn send(&self, signal: Signal, payload: Result<Bytes, EncodeError>, items: usize) -> Result<(), Halted> {
        let result = match payload {
            Ok(payload) => self.delivery.deliver(signal, payload).await,
            Err(source) => {
                error!(%signal, error = %source, "Generated records could not be encoded.");
                Err(DeliveryError::Encode {
                    signal: signal.as_str(),
                    source,
                })
            }
        };

        let attempt = match result {
            Ok(()) => Attempt::Delivered { signal, items },
            Err(e) => {
                debug!(%signal, error = %e, "Delivery failed.");
                Attempt::Failed {
                    signal,
                    error: e.to_string(),
                }
            }
        };

        match self.host.record_attempt(self.job_id, self.generation, attempt) {
            Verdict::Continue => Ok(()),
            Verdict::Halt => Err(Halted),
        }
    }
}

/// Returns the time between two traces, or `None` when trace generation is disabled.
fn trace_period(trace_rate: f64) -> Option<Duration> {
    if !trace_rate.is_finite() || trace_rate <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(1.0 / trace_rate).max(MIN_TRACE_PERIOD))
}

async fn next_tick(ticks: &mut Option<Interval>) {
    match ticks {
        Some(ticks) => {
            ticks.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::config::ScenarioConfig;
    use crate::engine::{JobState, JobStatus};

    const SHOP: &str = r#"
services:
  - name: frontend
    role: frontend
    depends_on:
      - service: checkout
  - name: checkout
    depends_on:
      - db: orders
databases:
  - name: orders
    type: postgres
telemetry:
  trace_rate: 2
  metrics_interval: 1
  include_logs: true
"#;

    /// A collector stand-in that keeps every payload it receives.
    #[derive(Default)]
    struct Sink {
        reject: bool,
        received: Mutex<Vec<(Signal, Value)>>,
    }

    impl Sink {
        fn rejecting() -> Self {
            Self {
                reject: true,
                ..Self::default()
            }
        }

        fn received(&self) -> Vec<(Signal, Value)> {
            self.received.lock().unwrap().clone()
        }

        fn count(&self, signal: Signal) -> usize {
            self.received().iter().filter(|(s, _)| *s == signal).count()
        }
    }

    #[async_trait]
    impl Deliver for Sink {
        async fn deliver(&self, signal: Signal, payload: Bytes) -> Result<(), DeliveryError> {
            let document = serde_json::from_slice(&payload).unwrap();
            self.received.lock().unwrap().push((signal, document));
            if self.reject {
                return Err(DeliveryError::Rejected {
                    signal: signal.as_str(),
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    struct TestHost {
        status: Mutex<JobStatus>,
        failure_threshold: u32,
        superseded: bool,
    }

    impl TestHost {
        fn new(failure_threshold: u32) -> Self {
            Self {
                status: Mutex::new(JobStatus::pending()),
                failure_threshold,
                superseded: false,
            }
        }

        fn status(&self) -> JobStatus {
            self.status.lock().unwrap().clone()
        }
    }

    impl JobHost for TestHost {
        fn overlays(&self, _job_id: JobId) -> OverlaySnapshot {
            OverlaySnapshot::empty()
        }

        fn job_started(&self, _job_id: JobId, _generation: u64) -> bool {
            if self.superseded {
                return false;
            }
            self.status.lock().unwrap().state = JobState::Running;
            true
        }

        fn record_attempt(&self, _job_id: JobId, _generation: u64, attempt: Attempt) -> Verdict {
            self.status.lock().unwrap().record(attempt, self.failure_threshold)
        }
    }

    fn runner(raw: &str, sink: &Arc<Sink>, host: &Arc<TestHost>) -> JobRunner {
        let topology = Arc::new(Topology::new(Arc::new(ScenarioConfig::from_yaml(raw).unwrap())).unwrap());
        JobRunner::new(
            JobId::new(),
            1,
            topology,
            Some(&Seed::new("runner")),
            Arc::clone(sink) as Arc<dyn Deliver>,
            Arc::clone(host) as Arc<dyn JobHost>,
        )
    }

    fn trace_ids(document: &Value, records: &str, scope: &str) -> Vec<String> {
        document[records]
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|resource| resource[scope].as_array().unwrap())
            .flat_map(|scope_block| {
                let key = if scope == "scopeSpans" { "spans" } else { "logRecords" };
                scope_block[key].as_array().unwrap()
            })
            .map(|record| record["traceId"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_job_keeps_running() {
        let sink = Arc::new(Sink::default());
        let host = Arc::new(TestHost::new(5));
        let shutdown = CancellationToken::new();
        let handle = runner(SHOP, &sink, &host).spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(host.status().state, JobState::Running);

        shutdown.cancel();
        handle.await.unwrap();

        // Ticks at 0, 0.5, ..., 3.0 seconds, and metric snapshots at 1, 2 and 3 seconds.
        assert_eq!(sink.count(Signal::Traces), 7);
        assert_eq!(sink.count(Signal::Logs), 7);
        assert_eq!(sink.count(Signal::Metrics), 3);

        let status = host.status();
        assert_eq!(status.state, JobState::Running);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_error, None);
        assert_eq!(status.counters.payloads_sent, 17);
        assert_eq!(status.counters.spans_emitted, 7 * 3);
        assert_eq!(status.counters.logs_emitted, 7 * 3);

        // Logs follow the trace they describe.
        let received = sink.received();
        assert_eq!(received[0].0, Signal::Traces);
        assert_eq!(received[1].0, Signal::Logs);
        let spans = trace_ids(&received[0].1, "resourceSpans", "scopeSpans");
        let logs = trace_ids(&received[1].1, "resourceLogs", "scopeLogs");
        assert_eq!(spans.len(), 3);
        assert_eq!(logs.len(), 3);
        assert!(logs.iter().all(|id| *id == spans[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_fails_after_threshold() {
        let sink = Arc::new(Sink::rejecting());
        let host = Arc::new(TestHost::new(5));
        let handle = runner(SHOP, &sink, &host).spawn(CancellationToken::new());

        tokio::time::timeout(Duration::from_secs(60), handle)
            .await
            .expect("task should end on its own")
            .unwrap();

        let status = host.status();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.consecutive_failures, 5);
        assert_eq!(status.counters.payloads_failed, 5);
        assert!(status.last_error.unwrap().contains("503"));
        assert_eq!(sink.received().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_trace_rate_only_emits_metrics() {
        let raw = SHOP.replace("trace_rate: 2", "trace_rate: 0");
        let sink = Arc::new(Sink::default());
        let host = Arc::new(TestHost::new(5));
        let shutdown = CancellationToken::new();
        let handle = runner(&raw, &sink, &host).spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(sink.count(Signal::Traces), 0);
        assert_eq!(sink.count(Signal::Metrics), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn kubernetes_jobs_send_cluster_snapshots() {
        let raw = format!("{}kubernetes:\n  cluster_name: shop\n  node_count: 1\n", SHOP);
        let sink = Arc::new(Sink::default());
        let host = Arc::new(TestHost::new(5));
        let shutdown = CancellationToken::new();
        let handle = runner(&raw, &sink, &host).spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let metric_names: Vec<String> = sink
            .received()
            .into_iter()
            .filter(|(signal, _)| *signal == Signal::Metrics)
            .flat_map(|(_, document)| {
                document["resourceMetrics"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .flat_map(|resource| resource["scopeMetrics"][0]["metrics"].as_array().unwrap().clone())
                    .map(|metric| metric["name"].as_str().unwrap().to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        assert_eq!(sink.count(Signal::Metrics), 2);
        assert!(metric_names.iter().any(|name| name == "system.cpu.utilization"));
        assert!(metric_names.iter().any(|name| name == "k8s.node.condition_ready"));
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_execution_never_delivers() {
        let sink = Arc::new(Sink::default());
        let host = Arc::new(TestHost {
            superseded: true,
            ..TestHost::new(5)
        });
        runner(SHOP, &sink, &host)
            .spawn(CancellationToken::new())
            .await
            .unwrap();

        assert!(sink.received().is_empty());
        assert_eq!(host.status().state, JobState::Pending);
    }

    #[test]
    fn trace_periods() {
        assert_eq!(trace_period(0.0), None);
        assert_eq!(trace_period(f64::NAN), None);
        assert_eq!(trace_period(4.0), Some(Duration::from_millis(250)));
        assert_eq!(trace_period(1e9), Some(MIN_TRACE_PERIOD));
    }
}
