//! Cluster resource metric generator.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;

use super::metric::MetricPoint;
use super::sampling::coin;
use crate::model::{MetricRecord, NumberValue, OverlaySnapshot, ResourceCatalog, Topology};

const POD_MEMORY_LIMIT_BYTES: f64 = 512.0 * 1024.0 * 1024.0;
const NODE_SYSTEM_MEMORY_BYTES: i64 = 1536 * 1024 * 1024;

/// Memory fraction above which a container is at risk of being OOM-killed.
const MEMORY_PRESSURE_THRESHOLD: f64 = 0.9;
const RESTART_PROBABILITY_UNDER_PRESSURE: f64 = 0.2;
const RESTART_PROBABILITY: f64 = 0.001;

#[derive(Clone, Debug, Default)]
struct PodCounters {
    rx_bytes: i64,
    tx_bytes: i64,
    restarts: i64,
}

#[derive(Default)]
struct NodeUsage {
    cpu_total: f64,
    pods: usize,
    memory_bytes: i64,
}

/// Generator for Kubernetes pod and node metrics.
///
/// Each service runs as a single pod, scheduled on the node recorded in the job's resource catalog.
#[derive(Clone, Debug)]
pub struct ClusterMetricGenerator {
    topology: Arc<Topology>,
    start_ns: u64,
    pods: Vec<PodCounters>,
}

impl ClusterMetricGenerator {
    /// Creates a new cluster metric generator whose cumulative sums start at `start_ns`.
    pub fn new(topology: Arc<Topology>, start_ns: u64) -> Self {
        let pods = vec![PodCounters::default(); topology.service_count()];
        Self {
            topology,
            start_ns,
            pods,
        }
    }

    /// Builds one snapshot of pod and node metrics, observed at `now_ns`.
    ///
    /// Returns no metrics when the scenario has no Kubernetes settings.
    pub fn build_cluster_metrics<R: Rng + ?Sized>(
        &mut self, catalog: &ResourceCatalog, overlays: &OverlaySnapshot, rng: &mut R, now_ns: u64,
    ) -> Vec<MetricRecord> {
        let topology = Arc::clone(&self.topology);
        if !topology.config().is_kubernetes() {
            return Vec::new();
        }

        let mut metrics = Vec::new();
        let mut nodes: HashMap<&str, NodeUsage> = HashMap::new();

        for (index, service) in topology.config().services.iter().enumerate() {
            let (cpu_override, memory_override) = overlays.resource_pressure_for(&service.name);
            let point = MetricPoint {
                resource: &service.name,
                start_ns: self.start_ns,
                time_ns: now_ns,
            };

            let cpu = cpu_override.unwrap_or_else(|| rng.random_range(0.05..0.65));
            let memory_fraction = memory_override.unwrap_or_else(|| rng.random_range(0.2..0.7));
            let memory_bytes = (memory_fraction * POD_MEMORY_LIMIT_BYTES) as i64;
            let ready = !coin(rng, overlays.unavailable_probability(&service.name));

            let pod = &mut self.pods[index];
            pod.rx_bytes += rng.random_range(10_000..500_000);
            pod.tx_bytes += rng.random_range(10_000..500_000);
            let restart_probability = if memory_fraction >= MEMORY_PRESSURE_THRESHOLD {
                RESTART_PROBABILITY_UNDER_PRESSURE
            } else {
                RESTART_PROBABILITY
            };
            if coin(rng, restart_probability) {
                pod.restarts += 1;
            }

            metrics.push(point.gauge("k8s.pod.cpu.utilization", "1", NumberValue::Double(cpu)));
            metrics.push(point.gauge("k8s.pod.memory.usage", "By", NumberValue::Int(memory_bytes)));
            metrics.push(point.sum("k8s.pod.network.rx", "By", NumberValue::Int(pod.rx_bytes)));
            metrics.push(point.sum("k8s.pod.network.tx", "By", NumberValue::Int(pod.tx_bytes)));
            metrics.push(point.gauge("k8s.pod.ready", "1", NumberValue::Int(i64::from(ready))));
            metrics.push(point.sum(
                "k8s.container.restarts",
                "{restart}",
                NumberValue::Int(pod.restarts),
            ));

            if let Some(node) = catalog.node_of(index) {
                let usage = nodes.entry(node).or_default();
                usage.cpu_total += cpu;
                usage.pods += 1;
                usage.memory_bytes += memory_bytes;
            }
        }

        for node in catalog.nodes() {
            let usage = nodes.remove(node).unwrap_or_default();
            let point = MetricPoint {
                resource: node,
                start_ns: self.start_ns,
                time_ns: now_ns,
            };

            let cpu = if usage.pods == 0 {
                rng.random_range(0.05..0.15)
            } else {
                (usage.cpu_total / usage.pods as f64 + rng.random_range(0.0..0.1)).min(1.0)
            };

            metrics.push(point.gauge("k8s.node.cpu.utilization", "1", NumberValue::Double(cpu)));
            metrics.push(point.gauge(
                "k8s.node.memory.usage",
                "By",
                NumberValue::Int(usage.memory_bytes + NODE_SYSTEM_MEMORY_BYTES),
            ));
            metrics.push(point.gauge("k8s.node.condition_ready", "1", NumberValue::Int(1)));
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::*;
    use crate::config::ScenarioConfig;
    use crate::model::{MetricKind, Modification, Overlay};

    const K8S: &str = r#"
services:
  - name: web
  - name: api
  - name: worker
kubernetes:
  cluster_name: test
  node_count: 2
"#;

    fn setup(raw: &str) -> (ClusterMetricGenerator, ResourceCatalog, StdRng) {
        let config = Arc::new(ScenarioConfig::from_yaml(raw).unwrap());
        let mut rng = StdRng::seed_from_u64(5);
        let catalog = ResourceCatalog::new(&config, &mut rng);
        let generator = ClusterMetricGenerator::new(Arc::new(Topology::new(config).unwrap()), 0);
        (generator, catalog, rng)
    }

    fn value(metrics: &[MetricRecord], resource: &str, name: &str) -> NumberValue {
        metrics
            .iter()
            .find(|m| m.resource == resource && m.name == name)
            .map(|m| m.value)
            .unwrap_or_else(|| panic!("{} has no {}", resource, name))
    }

    #[test]
    fn no_cluster_metrics_without_kubernetes() {
        let (mut generator, catalog, mut rng) = setup("services: [{ name: web }]");
        assert!(generator
            .build_cluster_metrics(&catalog, &OverlaySnapshot::empty(), &mut rng, 10)
            .is_empty());
    }

    #[test]
    fn pods_and_nodes_are_reported() {
        let (mut generator, catalog, mut rng) = setup(K8S);
        let metrics = generator.build_cluster_metrics(&catalog, &OverlaySnapshot::empty(), &mut rng, 10);

        // Six metrics per pod, three per node.
        assert_eq!(metrics.len(), 3 * 6 + 2 * 3);
        for pod in ["web", "api", "worker"] {
            assert_eq!(value(&metrics, pod, "k8s.pod.ready"), NumberValue::Int(1));
        }

        let nodes: Vec<&str> = catalog.nodes().collect();
        let node_memory: i64 = nodes
            .iter()
            .map(|node| match value(&metrics, node, "k8s.node.memory.usage") {
                NumberValue::Int(bytes) => bytes - NODE_SYSTEM_MEMORY_BYTES,
                other => panic!("unexpected value {:?}", other),
            })
            .sum();
        let pod_memory: i64 = ["web", "api", "worker"]
            .iter()
            .map(|pod| match value(&metrics, pod, "k8s.pod.memory.usage") {
                NumberValue::Int(bytes) => bytes,
                other => panic!("unexpected value {:?}", other),
            })
            .sum();
        assert_eq!(node_memory, pod_memory);

        let restarts = metrics.iter().find(|m| m.name == "k8s.container.restarts").unwrap();
        assert_eq!(restarts.kind, MetricKind::Sum);
    }

    #[test]
    fn network_counters_accumulate() {
        let (mut generator, catalog, mut rng) = setup(K8S);
        let first = generator.build_cluster_metrics(&catalog, &OverlaySnapshot::empty(), &mut rng, 10);
        let second = generator.build_cluster_metrics(&catalog, &OverlaySnapshot::empty(), &mut rng, 20);
        let rx = |metrics: &[MetricRecord]| value(metrics, "api", "k8s.pod.network.rx").as_f64();
        assert!(rx(&second) > rx(&first));
    }

    #[test]
    fn overlays_shape_pod_health() {
        let (mut generator, catalog, mut rng) = setup(K8S);
        let overlays = OverlaySnapshot::new(vec![
            Arc::new(Overlay {
                targets: vec!["api".to_string()],
                modification: Modification::ResourcePressure {
                    cpu_utilization: None,
                    memory_utilization: Some(1.0),
                },
                pattern: None,
            }),
            Arc::new(Overlay {
                targets: vec!["worker".to_string()],
                modification: Modification::ServiceUnavailable { probability: 1.0 },
                pattern: None,
            }),
        ]);

        let metrics = generator.build_cluster_metrics(&catalog, &overlays, &mut rng, 10);
        assert_eq!(
            value(&metrics, "api", "k8s.pod.memory.usage"),
            NumberValue::Int(POD_MEMORY_LIMIT_BYTES as i64)
        );
        assert_eq!(value(&metrics, "worker", "k8s.pod.ready"), NumberValue::Int(0));
        assert_eq!(value(&metrics, "web", "k8s.pod.ready"), NumberValue::Int(1));
    }
}
