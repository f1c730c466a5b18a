//! Engine Configuration
//!
//! Settings an embedder would otherwise hard-code: worker count, failure
//! and cycle handling, and where the graph snapshot lives. Loaded from a
//! JSON document or from `TRELLIS_*` environment variables; anything not
//! set keeps its default.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::eval::{default_parallelism, CyclePolicy, EvaluationOptions};

/// Environment variable for [`EngineConfig::jobs`].
pub const JOBS_VAR: &str = "TRELLIS_JOBS";
/// Environment variable for [`EngineConfig::keep_going`].
pub const KEEP_GOING_VAR: &str = "TRELLIS_KEEP_GOING";
/// Environment variable for [`EngineConfig::error_on_cycle`].
pub const ERROR_ON_CYCLE_VAR: &str = "TRELLIS_ERROR_ON_CYCLE";
/// Environment variable for [`EngineConfig::snapshot_path`].
pub const SNAPSHOT_VAR: &str = "TRELLIS_SNAPSHOT";

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of node functions running at once.
    pub jobs: usize,
    /// Keep evaluating independent nodes after a failure.
    pub keep_going: bool,
    /// Fail the whole evaluation when a cycle is found.
    pub error_on_cycle: bool,
    /// Snapshot file used by [`Engine::save`](crate::Engine::save) and
    /// [`Engine::open`](crate::Engine::open).
    pub snapshot_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jobs: default_parallelism(),
            keep_going: false,
            error_on_cycle: false,
            snapshot_path: None,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validated()
    }

    /// Read `TRELLIS_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(JOBS_VAR) {
            config.jobs = value.trim().parse().map_err(|err: std::num::ParseIntError| {
                ConfigError::Invalid {
                    var: JOBS_VAR,
                    value: value.clone(),
                    reason: err.to_string(),
                }
            })?;
        }
        if let Some(value) = lookup(KEEP_GOING_VAR) {
            config.keep_going = parse_flag(KEEP_GOING_VAR, &value)?;
        }
        if let Some(value) = lookup(ERROR_ON_CYCLE_VAR) {
            config.error_on_cycle = parse_flag(ERROR_ON_CYCLE_VAR, &value)?;
        }
        if let Some(value) = lookup(SNAPSHOT_VAR).filter(|value| !value.is_empty()) {
            config.snapshot_path = Some(PathBuf::from(value));
        }
        config.validated()
    }

    /// Evaluation options carrying these settings.
    pub fn evaluation_options(&self) -> EvaluationOptions {
        let cycle_policy = if self.error_on_cycle {
            CyclePolicy::Fail
        } else {
            CyclePolicy::Report
        };
        EvaluationOptions::default()
            .keep_going(self.keep_going)
            .max_parallelism(self.jobs)
            .cycle_policy(cycle_policy)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.jobs == 0 {
            return Err(ConfigError::Invalid {
                var: JOBS_VAR,
                value: "0".to_string(),
                reason: "at least one job is required".to_string(),
            });
        }
        Ok(self)
    }
}

impl From<&EngineConfig> for EvaluationOptions {
    fn from(config: &EngineConfig) -> Self {
        config.evaluation_options()
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn reads_every_variable() {
        let config = EngineConfig::from_lookup(lookup(&[
            (JOBS_VAR, "3"),
            (KEEP_GOING_VAR, "yes"),
            (ERROR_ON_CYCLE_VAR, "TRUE"),
            (SNAPSHOT_VAR, "/tmp/graph.snapshot"),
        ]))
        .unwrap();

        assert_eq!(config.jobs, 3);
        assert!(config.keep_going);
        assert!(config.error_on_cycle);
        assert_eq!(config.snapshot_path, Some(PathBuf::from("/tmp/graph.snapshot")));

        let options = config.evaluation_options();
        assert_eq!(options.max_parallelism, 3);
        assert!(options.keep_going);
        assert_eq!(options.cycle_policy, CyclePolicy::Fail);
    }

    #[test]
    fn rejects_bad_values() {
        let err = EngineConfig::from_lookup(lookup(&[(JOBS_VAR, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: JOBS_VAR, .. }));

        let err = EngineConfig::from_lookup(lookup(&[(KEEP_GOING_VAR, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: KEEP_GOING_VAR, .. }));

        let err = EngineConfig::from_lookup(lookup(&[(JOBS_VAR, "0")])).unwrap_err();
        assert!(err.to_string().contains("at least one job"));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = EngineConfig::from_json(r#"{ "jobs": 2, "keep_going": true }"#).unwrap();
        assert_eq!(config.jobs, 2);
        assert!(config.keep_going);
        assert!(!config.error_on_cycle);
        assert!(config.snapshot_path.is_none());

        assert!(matches!(
            EngineConfig::from_json(r#"{ "workers": 2 }"#),
            Err(ConfigError::Json(_))
        ));
    }
}
