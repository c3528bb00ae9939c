//! Fire-and-forget telemetry/ETW event sink (C5). The agent treats the actual
//! ETW/telemetry backends as external collaborators; this module defines the
//! contract the evaluation pipeline emits against plus an in-process sink used
//! by tests and the `check` subcommand summary.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub code: String,
    pub property: String,
    pub id: String,
    pub value: f64,
    pub units: String,
}

/// Implementations MUST NOT propagate errors — a failed emit is logged and dropped.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

pub struct LoggingTelemetrySink;

impl TelemetrySink for LoggingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        log::debug!(target: "telemetry", "{} {}={}{} ({})", event.code, event.property, event.value, event.units, event.id);
    }
}

/// Captures events in-memory; used by tests to assert on emitted telemetry.
pub struct RecordingTelemetrySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetrySink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().expect("telemetry sink lock poisoned").clone()
    }
}

impl Default for RecordingTelemetrySink {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for RecordingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().expect("telemetry sink lock poisoned").push(event);
    }
}
