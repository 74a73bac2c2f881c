//! Resource identities.

use indexmap::IndexMap;
use rand::Rng;

use super::Attributes;
use crate::config::{KubernetesSettings, ScenarioConfig};

const SERVICE_NAMESPACE: &str = "mirage";
const SERVICE_VERSION: &str = "1.2.3";
const SDK_NAME: &str = "opentelemetry";
const SDK_VERSION: &str = "1.24.0";
const KUBELET_VERSION: &str = "v1.28.3";

/// What a resource represents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    /// A service, by index in the scenario.
    Service(usize),

    /// A simulated Kubernetes node.
    Node,
}

/// A telemetry-emitting entity and its identifying attributes.
#[derive(Clone, Debug)]
pub struct Resource {
    /// What the resource represents.
    pub kind: ResourceKind,

    /// Resource attributes.
    pub attributes: Attributes,
}

/// The resources of a job.
///
/// Instance identifiers (instance IDs, host names, pod names and so on) are drawn once when the catalog is created, so
/// every payload of a job describes the same simulated instances. Services come first, in scenario order, followed by
/// Kubernetes nodes when the scenario has Kubernetes settings.
#[derive(Clone, Debug)]
pub struct ResourceCatalog {
    resources: IndexMap<String, Resource>,
    pod_nodes: Vec<Option<String>>,
}

struct CloudProfile {
    provider: &'static str,
    region: &'static str,
    platform: &'static str,
}

fn cloud_profile(k8s: Option<&KubernetesSettings>) -> CloudProfile {
    match k8s.map(|k| k.platform.to_ascii_lowercase()).as_deref() {
        Some("gke") => CloudProfile {
            provider: "gcp",
            region: "us-central1",
            platform: "gcp_kubernetes_engine",
        },
        Some("aks") => CloudProfile {
            provider: "azure",
            region: "eastus",
            platform: "azure_aks",
        },
        Some(_) => CloudProfile {
            provider: "aws",
            region: "us-west-2",
            platform: "aws_eks",
        },
        None => CloudProfile {
            provider: "aws",
            region: "us-west-2",
            platform: "aws_ec2",
        },
    }
}

impl ResourceCatalog {
    /// Creates the resource catalog for a scenario.
    pub fn new<R: Rng + ?Sized>(config: &ScenarioConfig, rng: &mut R) -> Self {
        let k8s = config.kubernetes.as_ref();
        let cloud = cloud_profile(k8s);

        let node_names: Vec<String> = match k8s {
            Some(k8s) => (0..k8s.node_count.max(1))
                .map(|i| node_name(rng, k8s, &cloud, i))
                .collect(),
            None => Vec::new(),
        };

        let mut resources = IndexMap::new();
        let mut pod_nodes = Vec::with_capacity(config.services.len());

        for (index, service) in config.services.iter().enumerate() {
            let (runtime_name, runtime_version) = service.language.runtime();

            let mut attrs = Attributes::new();
            attrs.set("service.name", service.name.as_str());
            attrs.set(
                "service.namespace",
                k8s.map(|k| k.namespace.as_str()).unwrap_or(SERVICE_NAMESPACE),
            );
            attrs.set("service.version", SERVICE_VERSION);
            attrs.set("service.instance.id", format!("{}-{}", service.name, hex(rng, 6)));
            attrs.set("telemetry.sdk.language", service.language.sdk_language());
            attrs.set("telemetry.sdk.name", SDK_NAME);
            attrs.set("telemetry.sdk.version", SDK_VERSION);
            attrs.set("process.runtime.name", runtime_name);
            attrs.set("process.runtime.version", runtime_version);
            attrs.set("cloud.provider", cloud.provider);
            attrs.set("cloud.region", cloud.region);
            attrs.set("deployment.environment", "production");
            attrs.set("os.type", "linux");

            let node = match k8s {
                Some(k8s) => {
                    let node = node_names[index % node_names.len()].clone();
                    attrs.set("host.name", node.as_str());
                    attrs.set("cloud.platform", cloud.platform);
                    attrs.set("k8s.cluster.name", k8s.cluster_name.as_str());
                    attrs.set("k8s.namespace.name", k8s.namespace.as_str());
                    attrs.set("k8s.deployment.name", service.name.as_str());
                    attrs.set(
                        "k8s.pod.name",
                        format!("{}-{}-{}", service.name, hex(rng, 5), hex(rng, 3)),
                    );
                    attrs.set("k8s.pod.uid", random_uuid(rng).to_string());
                    attrs.set("k8s.node.name", node.as_str());
                    Some(node)
                }
                None => {
                    attrs.set("host.name", format!("{}-{}", service.name, hex(rng, 2)));
                    None
                }
            };

            pod_nodes.push(node);
            resources.insert(
                service.name.clone(),
                Resource {
                    kind: ResourceKind::Service(index),
                    attributes: attrs,
                },
            );
        }

        if let Some(k8s) = k8s {
            for node in &node_names {
                let mut attrs = Attributes::new();
                attrs.set("k8s.node.name", node.as_str());
                attrs.set("k8s.node.uid", random_uuid(rng).to_string());
                attrs.set("k8s.cluster.name", k8s.cluster_name.as_str());
                attrs.set("k8s.kubelet.version", KUBELET_VERSION);
                attrs.set("host.name", node.as_str());
                attrs.set("cloud.provider", cloud.provider);
                attrs.set("cloud.region", cloud.region);
                attrs.set("cloud.platform", cloud.platform);
                attrs.set("os.type", "linux");
                resources.insert(
                    node.clone(),
                    Resource {
                        kind: ResourceKind::Node,
                        attributes: attrs,
                    },
                );
            }
        }

        Self { resources, pod_nodes }
    }

    /// Returns the resource with the given name, if any.
    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    /// Returns the position of the named resource in catalog order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.resources.get_index_of(name)
    }

    /// Returns an iterator over all resources, in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Resource)> {
        self.resources.iter().map(|(name, r)| (name.as_str(), r))
    }

    /// Returns the number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns `true` if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Returns the names of the simulated Kubernetes nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.resources
            .iter()
            .filter(|(_, r)| r.kind == ResourceKind::Node)
            .map(|(name, _)| name.as_str())
    }

    /// Returns the node the given service's pod is scheduled on, if the scenario runs on Kubernetes.
    pub fn node_of(&self, service_index: usize) -> Option<&str> {
        self.pod_nodes.get(service_index).and_then(|n| n.as_deref())
    }
}

fn node_name<R: Rng + ?Sized>(rng: &mut R, k8s: &KubernetesSettings, cloud: &CloudProfile, i: usize) -> String {
    match cloud.provider {
        "gcp" => format!("gke-{}-pool-{}-{}", k8s.cluster_name, i, hex(rng, 4)),
        "azure" => format!("aks-agentpool-{}-vmss00000{}", hex(rng, 4), i),
        _ => format!(
            "ip-10-0-{}-{}.{}.compute.internal",
            10 + i,
            rng.random_range(10..200),
            cloud.region
        ),
    }
}

/// Returns `bytes` random bytes, hex-encoded.
pub(crate) fn hex<R: Rng + ?Sized>(rng: &mut R, bytes: usize) -> String {
    (0..bytes).map(|_| format!("{:02x}", rng.random::<u8>())).collect()
}

/// Returns a random (version 4) UUID drawn from the given RNG.
pub(crate) fn random_uuid<R: Rng + ?Sized>(rng: &mut R) -> uuid::Uuid {
    uuid::Builder::from_random_bytes(rng.random()).into_uuid()
}
