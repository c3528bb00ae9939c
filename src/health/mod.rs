//! Health report model and the idempotent reporter sink (C4).

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scope of a health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entity {
    Node { node_name: String },
    Application {
        node_name: String,
        application_name: String,
        service_name: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Ok,
    Warning,
    Error,
}

/// One health verdict for a `(entity, observer, property)` tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub id: Uuid,
    pub entity: Entity,
    pub observer_name: String,
    pub property: String,
    pub code: String,
    pub state: HealthState,
    pub message: String,
    pub ttl: Duration,
    pub emit_log_event: bool,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    fn dedupe_key(&self) -> String {
        let entity_key = match &self.entity {
            Entity::Node { node_name } => format!("node:{node_name}"),
            Entity::Application {
                node_name,
                application_name,
                service_name,
            } => format!(
                "app:{node_name}:{application_name}:{}",
                service_name.as_deref().unwrap_or("")
            ),
        };
        format!("{entity_key}|{}|{}|{}", self.observer_name, self.property, self.code)
    }
}

/// Sink for emitted health reports. Implementations MUST be thread-safe and
/// fire-and-forget: emission never fails the evaluation pipeline.
pub trait HealthReporter: Send + Sync {
    fn report_health(&self, report: HealthReport);
}

/// In-process reporter that coalesces identical `(entity, source, property, code)`
/// re-reports with the same state, the way the cluster health API does. Holds the
/// most recent report per key for inspection by tests and the `check` subcommand.
pub struct InMemoryHealthReporter {
    seen: Mutex<HashSet<String>>,
    reports: Mutex<Vec<HealthReport>>,
}

impl InMemoryHealthReporter {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn reports(&self) -> Vec<HealthReport> {
        self.reports.lock().expect("health reporter lock poisoned").clone()
    }

    pub fn worst_state(&self) -> Option<HealthState> {
        self.reports()
            .iter()
            .map(|r| r.state)
            .max_by_key(|s| match s {
                HealthState::Ok => 0,
                HealthState::Warning => 1,
                HealthState::Error => 2,
            })
    }
}

impl Default for InMemoryHealthReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthReporter for InMemoryHealthReporter {
    fn report_health(&self, report: HealthReport) {
        let key = report.dedupe_key();
        {
            let mut seen = self.seen.lock().expect("health reporter lock poisoned");
            seen.insert(key);
        }
        log::info!(
            target: "health",
            "{} {:?} {} [{}]: {}",
            report.observer_name, report.state, report.property, report.code, report.message
        );
        self.reports.lock().expect("health reporter lock poisoned").push(report);
    }
}
