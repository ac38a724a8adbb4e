//! Matrix expansion: job descriptors into concrete job instances.

use gantry_core::ids::{DescriptorId, InstanceId};
use gantry_core::pipeline::JobDescriptor;
use gantry_core::ConfigError;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

/// One matrix assignment carried by an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixAssignment {
    pub axis: String,
    pub value: String,
}

/// A concrete, schedulable unit derived from a descriptor.
///
/// Immutable after expansion; run status lives in the run's status table.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub instance_id: InstanceId,
    pub descriptor_id: DescriptorId,
    pub display_name: String,
    pub command: Option<String>,
    pub assignment: Option<MatrixAssignment>,
    pub variables: HashMap<String, String>,
    pub depends_on: BTreeSet<InstanceId>,
    pub timeout: Option<Duration>,
    /// Whether this instance's artifacts feed matching barriers.
    pub contributes: bool,
}

impl JobInstance {
    /// True when dispatching this instance runs nothing on the backend.
    pub fn is_signal(&self) -> bool {
        self.command.is_none()
    }
}

/// A fan-in dependency waiting for graph construction to be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierRequest {
    pub target: InstanceId,
    pub upstream: DescriptorId,
}

/// Result of expanding a whole descriptor set.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub instances: Vec<JobInstance>,
    pub barriers: Vec<BarrierRequest>,
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand one descriptor into its instances, in axis declaration order.
    ///
    /// Dependencies are left empty; see [`MatrixExpander::expand_all`].
    pub fn expand(&self, descriptor: &JobDescriptor) -> Result<Vec<JobInstance>, ConfigError> {
        let Some(matrix) = descriptor.matrix.as_ref() else {
            return Ok(vec![self.instance(descriptor, None)]);
        };

        if matrix.values.is_empty() {
            return Err(ConfigError::EmptyMatrix(descriptor.id.clone()));
        }

        let mut seen = HashSet::new();
        matrix
            .values
            .iter()
            .map(|value| {
                if !seen.insert(value.as_str()) {
                    return Err(ConfigError::DuplicateMatrixValue {
                        descriptor: descriptor.id.clone(),
                        value: value.clone(),
                    });
                }
                Ok(self.instance(
                    descriptor,
                    Some(MatrixAssignment {
                        axis: matrix.axis.clone(),
                        value: value.clone(),
                    }),
                ))
            })
            .collect()
    }

    /// Expand every descriptor and resolve hard dependencies against the
    /// full instance set of the named descriptor.
    pub fn expand_all(&self, descriptors: &[JobDescriptor]) -> Result<Expansion, ConfigError> {
        if descriptors.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }

        let mut expanded: Vec<(&JobDescriptor, Vec<JobInstance>)> = Vec::new();
        let mut by_descriptor: HashMap<&DescriptorId, Vec<InstanceId>> = HashMap::new();

        for descriptor in descriptors {
            if by_descriptor.contains_key(&descriptor.id) {
                return Err(ConfigError::DuplicateDescriptor(descriptor.id.clone()));
            }
            let instances = self.expand(descriptor)?;
            by_descriptor.insert(
                &descriptor.id,
                instances.iter().map(|i| i.instance_id.clone()).collect(),
            );
            expanded.push((descriptor, instances));
        }

        let mut expansion = Expansion::default();

        for (descriptor, instances) in expanded {
            let mut hard = BTreeSet::new();
            for dep in descriptor.hard_dependencies() {
                let ids = by_descriptor.get(dep).ok_or_else(|| ConfigError::UnknownDependency {
                    descriptor: descriptor.id.clone(),
                    dependency: dep.clone(),
                })?;
                hard.extend(ids.iter().cloned());
            }

            let upstreams: Vec<&DescriptorId> = descriptor.barrier_dependencies().collect();
            for upstream in &upstreams {
                if !by_descriptor.contains_key(*upstream) {
                    return Err(ConfigError::UnknownDependency {
                        descriptor: descriptor.id.clone(),
                        dependency: (*upstream).clone(),
                    });
                }
            }

            for mut instance in instances {
                instance.depends_on = hard.clone();
                for upstream in &upstreams {
                    expansion.barriers.push(BarrierRequest {
                        target: instance.instance_id.clone(),
                        upstream: (*upstream).clone(),
                    });
                }
                expansion.instances.push(instance);
            }
        }

        Ok(expansion)
    }

    fn instance(
        &self,
        descriptor: &JobDescriptor,
        assignment: Option<MatrixAssignment>,
    ) -> JobInstance {
        let instance_id =
            InstanceId::derive(&descriptor.id, assignment.as_ref().map(|a| a.value.as_str()));
        let display_name = self.format_display_name(descriptor, assignment.as_ref());

        JobInstance {
            instance_id,
            descriptor_id: descriptor.id.clone(),
            display_name,
            command: descriptor.run.clone(),
            assignment,
            variables: descriptor.variables.clone(),
            depends_on: BTreeSet::new(),
            timeout: descriptor.timeout_seconds.map(Duration::from_secs),
            contributes: descriptor.coverage,
        }
    }

    fn format_display_name(
        &self,
        descriptor: &JobDescriptor,
        assignment: Option<&MatrixAssignment>,
    ) -> String {
        let base = descriptor
            .display_name
            .clone()
            .unwrap_or_else(|| descriptor.id.to_string());
        match assignment {
            Some(a) => format!("{} ({}={})", base, a.axis, a.value),
            None => base,
        }
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::pipeline::Dependency;

    fn ids(instances: &[JobInstance]) -> Vec<&str> {
        instances.iter().map(|i| i.instance_id.as_str()).collect()
    }

    #[test]
    fn test_matrix_expansion_follows_axis_order() {
        let descriptor = JobDescriptor::new("test")
            .with_run("pytest")
            .with_matrix(["3.11", "3.9", "3.10"]);

        let instances = MatrixExpander::new().expand(&descriptor).unwrap();

        assert_eq!(ids(&instances), vec!["test[3.11]", "test[3.9]", "test[3.10]"]);
        assert_eq!(instances[0].display_name, "test (version=3.11)");
        assert_eq!(instances[1].assignment.as_ref().unwrap().value, "3.9");
    }

    #[test]
    fn test_axis_free_descriptor_is_one_instance() {
        let instances = MatrixExpander::new()
            .expand(&JobDescriptor::new("lint").with_run("ruff check"))
            .unwrap();
        assert_eq!(ids(&instances), vec!["lint"]);
        assert!(instances[0].assignment.is_none());
    }

    #[test]
    fn test_empty_and_duplicate_values_rejected() {
        let expander = MatrixExpander::new();
        let empty = JobDescriptor::new("test").with_matrix(Vec::<String>::new());
        assert_eq!(
            expander.expand(&empty).unwrap_err(),
            ConfigError::EmptyMatrix(DescriptorId::new("test"))
        );

        let dup = JobDescriptor::new("test").with_matrix(["3.9", "3.9"]);
        assert!(matches!(
            expander.expand(&dup).unwrap_err(),
            ConfigError::DuplicateMatrixValue { .. }
        ));
    }

    #[test]
    fn test_dependencies_fan_out_to_every_instance() {
        let descriptors = vec![
            JobDescriptor::new("test").with_matrix(["a", "b", "c"]),
            JobDescriptor::new("package").with_dependency(Dependency::job("test")),
        ];

        let expansion = MatrixExpander::new().expand_all(&descriptors).unwrap();
        let package = expansion
            .instances
            .iter()
            .find(|i| i.instance_id.as_str() == "package")
            .unwrap();

        let deps: Vec<&str> = package.depends_on.iter().map(|d| d.as_str()).collect();
        assert_eq!(deps, vec!["test[a]", "test[b]", "test[c]"]);
        assert!(expansion.barriers.is_empty());
    }

    #[test]
    fn test_barrier_dependencies_are_deferred() {
        let descriptors = vec![
            JobDescriptor::new("test").with_matrix(["a", "b"]),
            JobDescriptor::new("report").with_dependency(Dependency::barrier("test")),
        ];

        let expansion = MatrixExpander::new().expand_all(&descriptors).unwrap();
        assert_eq!(
            expansion.barriers,
            vec![BarrierRequest {
                target: InstanceId::new("report"),
                upstream: DescriptorId::new("test"),
            }]
        );
        assert!(expansion.instances[2].depends_on.is_empty());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let descriptors = vec![JobDescriptor::new("deploy").with_dependency(Dependency::job("build"))];
        assert_eq!(
            MatrixExpander::new().expand_all(&descriptors).unwrap_err(),
            ConfigError::UnknownDependency {
                descriptor: DescriptorId::new("deploy"),
                dependency: DescriptorId::new("build"),
            }
        );

        let barrier = vec![JobDescriptor::new("report").with_dependency(Dependency::barrier("test"))];
        assert!(matches!(
            MatrixExpander::new().expand_all(&barrier).unwrap_err(),
            ConfigError::UnknownDependency { .. }
        ));
    }

    #[test]
    fn test_duplicate_descriptor_rejected() {
        let descriptors = vec![JobDescriptor::new("lint"), JobDescriptor::new("lint")];
        assert_eq!(
            MatrixExpander::new().expand_all(&descriptors).unwrap_err(),
            ConfigError::DuplicateDescriptor(DescriptorId::new("lint"))
        );
    }
}
