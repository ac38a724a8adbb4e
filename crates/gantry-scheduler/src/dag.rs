//! Dependency graph over expanded job instances.

use crate::matrix::{BarrierRequest, Expansion, JobInstance};
use gantry_core::ids::{DescriptorId, InstanceId};
use gantry_core::ConfigError;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Why one instance waits on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeKind {
    /// The upstream must succeed.
    Hard,
    /// The upstream must merely reach a terminal state.
    FanIn,
}

/// A fan-in dependency resolved against the expanded instance set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierSpec {
    pub target: InstanceId,
    pub upstream: DescriptorId,
    matched: BTreeSet<InstanceId>,
}

impl BarrierSpec {
    /// Every instance expanded from the upstream descriptor. Frozen at build.
    pub fn matched_upstream(&self) -> &BTreeSet<InstanceId> {
        &self.matched
    }
}

/// Validated, acyclic graph of job instances.
///
/// Edges point from a dependency to its dependent.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<JobInstance, EdgeKind>,
    index: HashMap<InstanceId, NodeIndex>,
    barriers: Vec<BarrierSpec>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn instance(&self, id: &InstanceId) -> Option<&JobInstance> {
        self.index.get(id).and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.index.contains_key(id)
    }

    /// All instances in expansion order.
    pub fn instances(&self) -> impl Iterator<Item = &JobInstance> {
        self.graph.node_weights()
    }

    /// Instances expanded from one descriptor, in axis order.
    pub fn instances_of<'a>(
        &'a self,
        descriptor: &'a DescriptorId,
    ) -> impl Iterator<Item = &'a JobInstance> + 'a {
        self.instances()
            .filter(move |instance| &instance.descriptor_id == descriptor)
    }

    /// Instances with no dependency of any kind.
    pub fn roots(&self) -> Vec<&JobInstance> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Upstream instances of the given kind.
    pub fn dependencies(&self, id: &InstanceId, kind: EdgeKind) -> Vec<&JobInstance> {
        self.neighbors(id, Direction::Incoming, Some(kind))
    }

    /// Downstream instances of the given kind.
    pub fn dependents(&self, id: &InstanceId, kind: EdgeKind) -> Vec<&JobInstance> {
        self.neighbors(id, Direction::Outgoing, Some(kind))
    }

    /// Every instance reachable from `id` through hard edges, excluding `id`.
    pub fn transitive_hard_dependents(&self, id: &InstanceId) -> Vec<&JobInstance> {
        let Some(&start) = self.index.get(id) else {
            return vec![];
        };

        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut found = Vec::new();

        while let Some(idx) = queue.pop_front() {
            for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                if *edge.weight() != EdgeKind::Hard || !seen.insert(edge.target()) {
                    continue;
                }
                queue.push_back(edge.target());
                if let Some(instance) = self.graph.node_weight(edge.target()) {
                    found.push(instance);
                }
            }
        }

        found
    }

    pub fn barriers(&self) -> &[BarrierSpec] {
        &self.barriers
    }

    pub fn barriers_for(&self, target: &InstanceId) -> impl Iterator<Item = &BarrierSpec> {
        self.barriers.iter().filter(move |b| &b.target == target)
    }

    /// Instances in a dependency-respecting order.
    pub fn topological_order(&self) -> Result<Vec<&JobInstance>, ConfigError> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|_| ConfigError::CycleDetected {
                cycle: self.find_cycle(),
            })
    }

    /// Every edge as `(dependency, dependent, kind)`, sorted.
    pub fn edges(&self) -> Vec<(InstanceId, InstanceId, EdgeKind)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|edge| {
                (
                    self.graph[edge.source()].instance_id.clone(),
                    self.graph[edge.target()].instance_id.clone(),
                    *edge.weight(),
                )
            })
            .collect();
        edges.sort();
        edges
    }

    fn neighbors(
        &self,
        id: &InstanceId,
        direction: Direction,
        kind: Option<EdgeKind>,
    ) -> Vec<&JobInstance> {
        let Some(&idx) = self.index.get(id) else {
            return vec![];
        };
        self.graph
            .edges_directed(idx, direction)
            .filter(|edge| kind.is_none_or(|k| *edge.weight() == k))
            .map(|edge| match direction {
                Direction::Incoming => edge.source(),
                Direction::Outgoing => edge.target(),
            })
            .filter_map(|n| self.graph.node_weight(n))
            .collect()
    }

    /// Walk one cycle in dependency direction: each entry depends on the next.
    fn find_cycle(&self) -> Vec<InstanceId> {
        let component = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1
                    || scc
                        .first()
                        .is_some_and(|&n| self.graph.find_edge(n, n).is_some())
            })
            .min_by_key(|scc| scc.iter().copied().min());

        let Some(component) = component else {
            return vec![];
        };
        let members: HashSet<NodeIndex> = component.iter().copied().collect();
        let Some(&start) = component.iter().min() else {
            return vec![];
        };

        // Breadth-first from `start` along dependency edges until it comes back around.
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut closing = None;
        'search: while let Some(idx) = queue.pop_front() {
            let mut upstream: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter(|n| members.contains(n))
                .collect();
            upstream.sort();
            for next in upstream {
                if next == start {
                    closing = Some(idx);
                    break 'search;
                }
                if !parent.contains_key(&next) {
                    parent.insert(next, idx);
                    queue.push_back(next);
                }
            }
        }

        let mut path = Vec::new();
        let mut cursor = closing;
        while let Some(idx) = cursor {
            path.push(self.graph[idx].instance_id.clone());
            cursor = if idx == start {
                None
            } else {
                parent.get(&idx).copied()
            };
        }
        path.reverse();
        path
    }
}

/// Builder for constructing dependency graphs.
pub struct GraphBuilder;

impl GraphBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build and validate a graph from a committed expansion.
    pub fn build(&self, expansion: Expansion) -> Result<DependencyGraph, ConfigError> {
        let Expansion {
            instances,
            barriers: requests,
        } = expansion;

        if instances.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for instance in instances {
            let id = instance.instance_id.clone();
            if index.contains_key(&id) {
                return Err(ConfigError::InvalidDefinition(format!(
                    "duplicate instance id {}",
                    id
                )));
            }
            let idx = graph.add_node(instance);
            index.insert(id, idx);
        }

        // Forward edges from declared dependencies
        let mut hard_edges = Vec::new();
        for idx in graph.node_indices() {
            let instance = &graph[idx];
            for dep in &instance.depends_on {
                let dep_idx = index.get(dep).ok_or_else(|| ConfigError::DanglingDependency {
                    instance: instance.instance_id.clone(),
                    dependency: dep.clone(),
                })?;
                hard_edges.push((*dep_idx, idx));
            }
        }
        for (from, to) in hard_edges {
            graph.add_edge(from, to, EdgeKind::Hard);
        }

        let mut dag = DependencyGraph {
            graph,
            index,
            barriers: Vec::new(),
        };

        // Fan-in sets are only knowable now that expansion has committed.
        for request in requests {
            let spec = Self::resolve_barrier(&dag, request)?;
            let target_idx = dag.index[&spec.target];
            for upstream in &spec.matched {
                let upstream_idx = dag.index[upstream];
                dag.graph.add_edge(upstream_idx, target_idx, EdgeKind::FanIn);
            }
            dag.barriers.push(spec);
        }

        dag.topological_order()?;

        Ok(dag)
    }

    fn resolve_barrier(
        dag: &DependencyGraph,
        request: BarrierRequest,
    ) -> Result<BarrierSpec, ConfigError> {
        if !dag.contains(&request.target) {
            return Err(ConfigError::DanglingDependency {
                instance: request.target.clone(),
                dependency: InstanceId::new(request.upstream.as_str()),
            });
        }

        let matched: BTreeSet<InstanceId> = dag
            .instances_of(&request.upstream)
            .map(|instance| instance.instance_id.clone())
            .collect();

        if matched.is_empty() {
            return Err(ConfigError::EmptyBarrier {
                target: request.target,
                upstream: request.upstream,
            });
        }

        Ok(BarrierSpec {
            target: request.target,
            upstream: request.upstream,
            matched,
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixExpander;
    use gantry_core::pipeline::{Dependency, JobDescriptor};

    fn build(descriptors: &[JobDescriptor]) -> Result<DependencyGraph, ConfigError> {
        let expansion = MatrixExpander::new().expand_all(descriptors)?;
        GraphBuilder::new().build(expansion)
    }

    fn instance(id: &str, deps: &[&str]) -> JobInstance {
        JobInstance {
            instance_id: InstanceId::new(id),
            descriptor_id: DescriptorId::new(id),
            display_name: id.to_string(),
            command: Some("true".to_string()),
            assignment: None,
            variables: Default::default(),
            depends_on: deps.iter().map(|d| InstanceId::new(*d)).collect::<BTreeSet<_>>(),
            timeout: None,
            contributes: true,
        }
    }

    fn scenario() -> Vec<JobDescriptor> {
        vec![
            JobDescriptor::new("lint").with_run("lint"),
            JobDescriptor::new("test")
                .with_run("test")
                .with_matrix(["3.9", "3.10", "3.11"]),
            JobDescriptor::new("report").with_dependency(Dependency::barrier("test")),
        ]
    }

    #[test]
    fn test_linear_graph() {
        let dag = build(&[
            JobDescriptor::new("build"),
            JobDescriptor::new("test").with_dependency(Dependency::job("build")),
            JobDescriptor::new("deploy").with_dependency(Dependency::job("test")),
        ])
        .unwrap();

        let roots = dag.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].instance_id.as_str(), "build");

        let order: Vec<&str> = dag
            .topological_order()
            .unwrap()
            .iter()
            .map(|i| i.instance_id.as_str())
            .collect();
        assert_eq!(order, vec!["build", "test", "deploy"]);
    }

    #[test]
    fn test_barrier_matches_full_fan_out() {
        let dag = build(&scenario()).unwrap();

        assert_eq!(dag.len(), 5);
        let barrier = &dag.barriers()[0];
        assert_eq!(barrier.target.as_str(), "report");
        let matched: Vec<&str> = barrier.matched_upstream().iter().map(|i| i.as_str()).collect();
        assert_eq!(matched, vec!["test[3.10]", "test[3.11]", "test[3.9]"]);

        assert_eq!(dag.dependencies(&InstanceId::new("report"), EdgeKind::FanIn).len(), 3);
        assert!(dag.dependencies(&InstanceId::new("report"), EdgeKind::Hard).is_empty());
    }

    #[test]
    fn test_two_node_cycle_detected() {
        let err = build(&[
            JobDescriptor::new("a").with_dependency(Dependency::job("b")),
            JobDescriptor::new("b").with_dependency(Dependency::job("a")),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            ConfigError::CycleDetected {
                cycle: vec![InstanceId::new("a"), InstanceId::new("b")],
            }
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = build(&[JobDescriptor::new("a").with_dependency(Dependency::job("a"))])
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::CycleDetected {
                cycle: vec![InstanceId::new("a")],
            }
        );
    }

    #[test]
    fn test_barrier_cycle_detected() {
        let err = build(&[
            JobDescriptor::new("test")
                .with_matrix(["x", "y"])
                .with_dependency(Dependency::job("report")),
            JobDescriptor::new("report").with_dependency(Dependency::barrier("test")),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::CycleDetected { cycle } if cycle.len() == 2));
    }

    #[test]
    fn test_dangling_instance_dependency() {
        let expansion = Expansion {
            instances: vec![instance("deploy", &["build"])],
            barriers: vec![],
        };
        assert_eq!(
            GraphBuilder::new().build(expansion).unwrap_err(),
            ConfigError::DanglingDependency {
                instance: InstanceId::new("deploy"),
                dependency: InstanceId::new("build"),
            }
        );
    }

    #[test]
    fn test_empty_barrier_rejected() {
        let expansion = Expansion {
            instances: vec![instance("report", &[])],
            barriers: vec![BarrierRequest {
                target: InstanceId::new("report"),
                upstream: DescriptorId::new("test"),
            }],
        };
        assert!(matches!(
            GraphBuilder::new().build(expansion).unwrap_err(),
            ConfigError::EmptyBarrier { .. }
        ));
    }

    #[test]
    fn test_rebuild_is_isomorphic() {
        let first = build(&scenario()).unwrap();
        let second = build(&scenario()).unwrap();

        let ids = |dag: &DependencyGraph| {
            dag.instances()
                .map(|i| i.instance_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.edges(), second.edges());
    }

    #[test]
    fn test_transitive_hard_dependents() {
        let dag = build(&[
            JobDescriptor::new("lint"),
            JobDescriptor::new("test")
                .with_matrix(["a", "b"])
                .with_dependency(Dependency::job("lint")),
            JobDescriptor::new("package").with_dependency(Dependency::job("test")),
            JobDescriptor::new("report").with_dependency(Dependency::barrier("test")),
        ])
        .unwrap();

        let mut downstream: Vec<&str> = dag
            .transitive_hard_dependents(&InstanceId::new("lint"))
            .iter()
            .map(|i| i.instance_id.as_str())
            .collect();
        downstream.sort();
        assert_eq!(downstream, vec!["package", "test[a]", "test[b]"]);
    }
}
