//! Resolved service topology.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Dependency, DependencyKind, ScenarioConfig, Service};
use crate::error::ConfigError;

/// What a dependency resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// A service, by index.
    Service(usize),

    /// A datastore, by index.
    Datastore(usize),

    /// A queue, by index.
    Queue(usize),
}

/// A dependency with its target resolved.
#[derive(Clone, Debug)]
pub struct Edge {
    /// Index of the dependency in the declaring service's `depends_on` list.
    pub dependency: usize,

    /// The resolved target.
    pub target: Target,

    /// Index of the queue a service call is routed through, if any.
    pub via: Option<usize>,
}

/// A scenario with every name resolved to an index.
#[derive(Clone, Debug)]
pub struct Topology {
    config: Arc<ScenarioConfig>,
    edges: Vec<Vec<Edge>>,
    root: usize,
}

impl Topology {
    /// Resolves the given scenario.
    ///
    /// # Errors
    ///
    /// If a dependency cannot be resolved, an error is returned. Validated scenarios always resolve.
    pub fn new(config: Arc<ScenarioConfig>) -> Result<Self, ConfigError> {
        if config.services.is_empty() {
            return Err(ConfigError::NoServices);
        }

        let services: HashMap<&str, usize> = index_by_name(config.services.iter().map(|s| s.name.as_str()));
        let datastores = index_by_name(config.databases.iter().map(|d| d.name.as_str()));
        let queues = index_by_name(config.message_queues.iter().map(|q| q.name.as_str()));

        let edges = config
            .services
            .iter()
            .map(|service| {
                service
                    .dependencies
                    .iter()
                    .enumerate()
                    .map(|(i, dep)| {
                        let unresolved = |target: &str| ConfigError::UnresolvedDependency {
                            service: service.name.clone(),
                            kind: dep.kind.as_str(),
                            target: target.to_string(),
                        };
                        let target = match dep.kind {
                            DependencyKind::Service => services.get(dep.target.as_str()).map(|&idx| Target::Service(idx)),
                            DependencyKind::Db | DependencyKind::Cache => {
                                datastores.get(dep.target.as_str()).map(|&idx| Target::Datastore(idx))
                            }
                            DependencyKind::Queue => queues.get(dep.target.as_str()).map(|&idx| Target::Queue(idx)),
                        }
                        .ok_or_else(|| unresolved(&dep.target))?;
                        let via = match dep.via.as_deref() {
                            Some(via) => Some(*queues.get(via).ok_or_else(|| unresolved(via))?),
                            None => None,
                        };
                        Ok(Edge {
                            dependency: i,
                            target,
                            via,
                        })
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let root = find_root(&config.services, &edges);

        Ok(Self { config, edges, root })
    }

    /// Returns the underlying scenario.
    pub fn config(&self) -> &Arc<ScenarioConfig> {
        &self.config
    }

    /// Returns the index of the service every trace starts at.
    ///
    /// This is the first frontend service, else the first service no other service depends on, else the first
    /// service.
    pub fn root(&self) -> usize {
        self.root
    }

    /// Returns the number of services.
    pub fn service_count(&self) -> usize {
        self.config.services.len()
    }

    /// Returns the service at the given index.
    pub fn service(&self, index: usize) -> &Service {
        &self.config.services[index]
    }

    /// Returns the resolved outgoing edges of the service at the given index, in declaration order.
    pub fn edges(&self, index: usize) -> impl Iterator<Item = (&Edge, &Dependency)> {
        let service = &self.config.services[index];
        self.edges[index]
            .iter()
            .map(move |edge| (edge, &service.dependencies[edge.dependency]))
    }

    /// Returns the index of the named service, if it exists.
    pub fn service_index(&self, name: &str) -> Option<usize> {
        self.config.services.iter().position(|s| s.name == name)
    }
}

fn index_by_name<'a>(names: impl Iterator<Item = &'a str>) -> HashMap<&'a str, usize> {
    names.enumerate().map(|(i, name)| (name, i)).collect()
}

fn find_root(services: &[Service], edges: &[Vec<Edge>]) -> usize {
    if let Some(frontend) = services.iter().position(Service::is_frontend) {
        return frontend;
    }

    let mut has_incoming = vec![false; services.len()];
    for edge in edges.iter().flatten() {
        if let Target::Service(i) = edge.target {
            has_incoming[i] = true;
        }
    }

    has_incoming.iter().position(|has| !has).unwrap_or(0)
}
