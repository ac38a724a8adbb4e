//! Trigger events and pipeline-level trigger matching.

use gantry_core::pipeline::{PipelineDefinition, TriggerConfig, TriggerType};
use serde::{Deserialize, Serialize};

/// The event that started a run. Recorded for the run; never filters jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerType,
    pub git_ref: String,
}

impl TriggerEvent {
    pub fn push(git_ref: impl Into<String>) -> Self {
        Self {
            kind: TriggerType::Push,
            git_ref: git_ref.into(),
        }
    }

    pub fn pull_request(git_ref: impl Into<String>) -> Self {
        Self {
            kind: TriggerType::PullRequest,
            git_ref: git_ref.into(),
        }
    }

    /// Branch name with any `refs/heads/` prefix removed.
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }
}

/// Decides whether a pipeline should run for an event at all.
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// A pipeline without triggers matches every event.
    pub fn matches(&self, pipeline: &PipelineDefinition, event: &TriggerEvent) -> bool {
        if pipeline.triggers.is_empty() {
            return true;
        }

        pipeline
            .triggers
            .iter()
            .any(|trigger| self.trigger_matches(trigger, event))
    }

    fn trigger_matches(&self, trigger: &TriggerConfig, event: &TriggerEvent) -> bool {
        trigger.trigger_type == event.kind && self.branch_matches(&trigger.branches, event.branch())
    }

    fn branch_matches(&self, patterns: &[String], branch: &str) -> bool {
        if patterns.is_empty() {
            return true;
        }
        patterns.iter().any(|p| self.glob_match(p, branch))
    }

    fn glob_match(&self, pattern: &str, text: &str) -> bool {
        if pattern == "*" || pattern == "**" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix("/**") {
            return text.starts_with(&format!("{}/", prefix));
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            return text
                .strip_prefix(&format!("{}/", prefix))
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));
        }
        if let Some((head, tail)) = pattern.split_once('*') {
            if !tail.contains('*') {
                return text.len() >= head.len() + tail.len()
                    && text.starts_with(head)
                    && text.ends_with(tail);
            }
        }
        pattern == text
    }
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(triggers: &str) -> PipelineDefinition {
        let yaml = format!(
            "version: \"1\"\nname: t\n{}\njobs:\n  - id: build\n    run: make\n",
            triggers
        );
        PipelineDefinition::from_yaml(&yaml).unwrap()
    }

    #[test]
    fn test_branch_strips_refs_heads() {
        assert_eq!(TriggerEvent::push("refs/heads/main").branch(), "main");
        assert_eq!(TriggerEvent::push("main").branch(), "main");
    }

    #[test]
    fn test_branch_match_glob() {
        let matcher = TriggerMatcher::new();
        assert!(matcher.branch_matches(&["feature/*".to_string()], "feature/foo"));
        assert!(!matcher.branch_matches(&["feature/*".to_string()], "feature/foo/bar"));
        assert!(matcher.branch_matches(&["release/**".to_string()], "release/v1/hotfix"));
        assert!(matcher.branch_matches(&["v*-rc".to_string()], "v1.2-rc"));
        assert!(!matcher.branch_matches(&["main".to_string()], "develop"));
    }

    #[test]
    fn test_no_triggers_matches_everything() {
        let pipeline = pipeline("");
        let matcher = TriggerMatcher::new();
        assert!(matcher.matches(&pipeline, &TriggerEvent::push("main")));
        assert!(matcher.matches(&pipeline, &TriggerEvent::pull_request("feature/x")));
    }

    #[test]
    fn test_trigger_type_and_branch() {
        let pipeline = pipeline("triggers:\n  - type: push\n    branches: [main, \"release/*\"]");
        let matcher = TriggerMatcher::new();
        assert!(matcher.matches(&pipeline, &TriggerEvent::push("refs/heads/release/1.0")));
        assert!(!matcher.matches(&pipeline, &TriggerEvent::push("develop")));
        assert!(!matcher.matches(&pipeline, &TriggerEvent::pull_request("main")));
    }
}
