//! `${{ ... }}` substitution in job commands and variables.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("placeholder regex"));

/// Values visible to a single instance's command.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Pipeline and job variables
    pub variables: HashMap<String, String>,
    /// Matrix assignment: axis name -> value
    pub matrix: HashMap<String, String>,
    /// `job.id`, `job.instance`
    pub job: HashMap<String, String>,
    /// `trigger.event`, `trigger.ref`
    pub trigger: HashMap<String, String>,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpolate placeholders in a string.
    ///
    /// Supports:
    /// - `${{ variable }}` - direct variable lookup
    /// - `${{ env.VAR }}` - variable, then process environment
    /// - `${{ matrix.key }}` - matrix value
    /// - `${{ job.id }}`, `${{ job.instance }}`
    /// - `${{ trigger.event }}`, `${{ trigger.ref }}`
    ///
    /// Unknown expressions resolve to the empty string.
    pub fn interpolate(&self, input: &str) -> String {
        PLACEHOLDER
            .replace_all(input, |caps: &regex::Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.resolve_expression(expr)
            })
            .to_string()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        if let Some(var_name) = expr.strip_prefix("env.") {
            return self
                .variables
                .get(var_name)
                .cloned()
                .or_else(|| std::env::var(var_name).ok())
                .unwrap_or_default();
        }

        let scoped = [
            ("matrix.", &self.matrix),
            ("job.", &self.job),
            ("trigger.", &self.trigger),
        ];
        for (prefix, values) in scoped {
            if let Some(key) = expr.strip_prefix(prefix) {
                return values.get(key).cloned().unwrap_or_default();
            }
        }

        self.variables.get(expr).cloned().unwrap_or_default()
    }
}
