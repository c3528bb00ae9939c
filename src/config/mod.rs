//! Agent configuration (C12): a typed settings snapshot loaded from a JSON
//! file, overridable per-parameter by `<SECTION>__<PARAMETER>` environment
//! variables, and finally by CLI flags at the call site.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("target list at {path} is invalid: {reason}")]
    InvalidTargetList { path: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverManagerSection {
    pub observer_loop_sleep_seconds: u64,
    pub observer_execution_timeout_seconds: u64,
    pub enable_verbose_logging: bool,
    pub health_report_ttl_seconds: u64,
}

impl Default for ObserverManagerSection {
    fn default() -> Self {
        Self {
            observer_loop_sleep_seconds: 30,
            observer_execution_timeout_seconds: 60,
            enable_verbose_logging: false,
            health_report_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeObserverSection {
    pub enabled: bool,
    pub cpu_warning_pct: f64,
    pub cpu_error_pct: f64,
    pub memory_warning_mb: f64,
    pub memory_error_mb: f64,
    pub memory_warning_pct: f64,
    pub memory_error_pct: f64,
    pub active_ports_warning: f64,
    pub active_ports_error: f64,
    pub ephemeral_ports_warning: f64,
    pub ephemeral_ports_error: f64,
    pub firewall_rules_warning: f64,
    pub firewall_rules_error: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiskObserverSection {
    pub enabled: bool,
    pub disk_space_percent_warning: f64,
    pub disk_space_percent_error: f64,
    pub disk_space_mb_warning: f64,
    pub disk_space_mb_error: f64,
    pub average_queue_length_warning: f64,
    pub average_queue_length_error: f64,
    pub drives_to_skip: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FabricSystemObserverSection {
    pub enabled: bool,
    pub cpu_warning_pct: f64,
    pub cpu_error_pct: f64,
    pub memory_warning_mb: f64,
    pub memory_error_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppObserverSection {
    pub enabled: bool,
    pub target_list_path: String,
    pub monitor_duration_seconds: u64,
    pub monitor_sleep_duration_milliseconds: u64,
    pub enable_child_process_monitoring: bool,
    pub max_child_procs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DumpSection {
    pub dump_on_error: bool,
    pub max_dumps_per_process: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub observer_manager: ObserverManagerSection,
    pub node_observer: NodeObserverSection,
    pub disk_observer: DiskObserverSection,
    pub fabric_system_observer: FabricSystemObserverSection,
    pub app_observer: AppObserverSection,
    pub dump: DumpSection,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            observer_manager: ObserverManagerSection::default(),
            node_observer: NodeObserverSection::default(),
            disk_observer: DiskObserverSection::default(),
            fabric_system_observer: FabricSystemObserverSection::default(),
            app_observer: AppObserverSection::default(),
            dump: DumpSection::default(),
        }
    }
}

impl AgentConfig {
    /// Loads from `path`, then applies any `SECTION__PARAMETER` environment
    /// variable overrides found in `env`.
    pub fn load(path: &Path, env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut value: serde_json::Value = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        apply_env_overrides(&mut value, env);
        serde_json::from_value(value).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Looks up a value by `Section.Parameter`, the scoped-accessor form used
    /// by observers that only need one setting.
    pub fn get(&self, section: &str, parameter: &str) -> Option<serde_json::Value> {
        let full = serde_json::to_value(self).ok()?;
        full.get(to_snake(section))?.get(to_snake(parameter)).cloned()
    }
}

fn to_snake(s: &str) -> String {
    let mut out = String::new();
    for (i, c) in s.char_indices() {
        if c.is_uppercase() && i != 0 {
            out.push('_');
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

fn apply_env_overrides(value: &mut serde_json::Value, env: &HashMap<String, String>) {
    let serde_json::Value::Object(sections) = value else {
        return;
    };
    for (key, raw) in env {
        let Some((section, parameter)) = key.split_once("__") else {
            continue;
        };
        let Some(serde_json::Value::Object(section_map)) = sections.get_mut(&to_snake(section)) else {
            continue;
        };
        let param_key = to_snake(parameter);
        if let Some(existing) = section_map.get(&param_key) {
            let parsed = match existing {
                serde_json::Value::Bool(_) => raw.parse::<bool>().ok().map(serde_json::Value::Bool),
                serde_json::Value::Number(_) => raw
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number),
                _ => Some(serde_json::Value::String(raw.clone())),
            };
            if let Some(v) = parsed {
                section_map.insert(param_key, v);
            }
        }
    }
}

/// One entry in an AppObserver target list file. `target_app` of `"*"` or
/// `"all"` (case-insensitive) is the wildcard record: it expands to every
/// non-system deployed application on the node, and its threshold fields
/// serve as the fallback for any other target whose own threshold is left
/// at zero.
#[derive(Debug, Clone, Deserialize)]
pub struct ObserverTarget {
    pub target_app: Option<String>,
    pub target_app_type: Option<String>,
    #[serde(default)]
    pub service_include_list: Option<String>,
    #[serde(default)]
    pub service_exclude_list: Option<String>,
    #[serde(default)]
    pub cpu_warning_pct: Option<f64>,
    #[serde(default)]
    pub cpu_error_pct: Option<f64>,
    #[serde(default)]
    pub memory_warning_mb: Option<f64>,
    #[serde(default)]
    pub memory_error_mb: Option<f64>,
    #[serde(default)]
    pub memory_warning_pct: Option<f64>,
    #[serde(default)]
    pub memory_error_pct: Option<f64>,
    #[serde(default)]
    pub active_ports_warning: Option<f64>,
    #[serde(default)]
    pub active_ports_error: Option<f64>,
    #[serde(default)]
    pub ephemeral_ports_warning: Option<f64>,
    #[serde(default)]
    pub ephemeral_ports_error: Option<f64>,
    /// Per-target override for dumping on a breach. Defaults to `false`;
    /// the global `DumpSection::dump_on_error` is only a fallback used by
    /// observers that have no per-target notion of a dump flag.
    #[serde(default)]
    pub dump_on_error: bool,
}

/// Reads and validates an AppObserver target list. A file at or below 42
/// bytes (an empty `[]` plus whitespace/BOM noise) is treated as "no targets
/// configured" rather than a parse error. Each target must name exactly one
/// of `target_app` / `target_app_type`.
pub fn load_target_list(path: &Path) -> Result<Vec<ObserverTarget>, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    if bytes.len() <= 42 {
        return Ok(Vec::new());
    }
    let targets: Vec<ObserverTarget> = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    for t in &targets {
        match (&t.target_app, &t.target_app_type) {
            (Some(_), None) | (None, Some(_)) => {}
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidTargetList {
                    path: path.display().to_string(),
                    reason: "target_app and target_app_type are mutually exclusive".to_string(),
                })
            }
            (None, None) => {
                return Err(ConfigError::InvalidTargetList {
                    path: path.display().to_string(),
                    reason: "target must name target_app or target_app_type".to_string(),
                })
            }
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn env_override_applies_to_matching_section_and_parameter() {
        let mut value = serde_json::json!({
            "observer_manager": { "observer_loop_sleep_seconds": 30, "enable_verbose_logging": false }
        });
        let mut env = HashMap::new();
        env.insert("ObserverManager__ObserverLoopSleepSeconds".to_string(), "5".to_string());
        env.insert("ObserverManager__EnableVerboseLogging".to_string(), "true".to_string());
        apply_env_overrides(&mut value, &env);
        assert_eq!(value["observer_manager"]["observer_loop_sleep_seconds"], 5.0);
        assert_eq!(value["observer_manager"]["enable_verbose_logging"], true);
    }

    #[test]
    fn empty_target_list_file_is_treated_as_no_targets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(&path, "[]").unwrap();
        let targets = load_target_list(&path).unwrap();
        assert!(targets.is_empty());
    }

    #[test]
    fn target_naming_both_app_and_type_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(
            &path,
            r#"[{"target_app": "fabric:/app1", "target_app_type": "AppType", "padding_to_exceed_forty_two_bytes": true}]"#,
        )
        .unwrap();
        assert!(load_target_list(&path).is_err());
    }

    #[test]
    fn load_reads_file_and_applies_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = AgentConfig::default();
        std::fs::write(&path, serde_json::to_string(&cfg).unwrap()).unwrap();
        let mut env = HashMap::new();
        env.insert("ObserverManager__ObserverLoopSleepSeconds".to_string(), "7".to_string());
        let loaded = AgentConfig::load(&path, &env).unwrap();
        assert_eq!(loaded.observer_manager.observer_loop_sleep_seconds, 7);
    }
}
