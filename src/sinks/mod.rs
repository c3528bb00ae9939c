//! Durable CSV and structured-log sinks for health emissions (C15). Both are
//! append-only, flush per write, and never fail the evaluation pipeline — a
//! write error is logged and swallowed. One row per notable
//! record, fields escaped for embedded commas and quotes.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::health::{HealthReport, HealthState};

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Appends `(timestamp, metric, id, avg|peak, value)` rows, one file per observer per day.
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, observer_name: &str) -> PathBuf {
        let day = Utc::now().format("%Y-%m-%d");
        self.dir.join(format!("{observer_name}-{day}.csv"))
    }

    /// `id` and `avg` describe the series the report came from. "Peak" is the max
    /// sample seen in the window, not the peak of per-window averages — intentional,
    /// since averaging away the spike is exactly what the peak column exists to avoid.
    pub fn append(&self, report: &HealthReport, id: &str, avg: f64, peak: f64) {
        if let Err(e) = self.try_append(report, id, avg, peak) {
            log::warn!(target: "sinks", "CSV sink write failed for {id}: {e}");
        }
    }

    fn try_append(&self, report: &HealthReport, id: &str, avg: f64, peak: f64) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&report.observer_name);
        let is_new = !path.exists();
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        if is_new {
            writeln!(f, "timestamp,metric,id,avg,peak")?;
        }
        writeln!(
            f,
            "{},{},{},{},{}",
            report.timestamp.to_rfc3339(),
            escape_csv(&report.property),
            escape_csv(id),
            avg,
            peak
        )?;
        Ok(())
    }
}

/// Appends the full `HealthReport` payload as newline-delimited JSON.
pub struct LogFileSink {
    path: PathBuf,
}

impl LogFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, report: &HealthReport) {
        if let Err(e) = self.try_append(report) {
            log::warn!(target: "sinks", "log file sink write failed: {e}");
        }
    }

    fn try_append(&self, report: &HealthReport) -> std::io::Result<()> {
        if let Some(parent) = Path::new(&self.path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string());
        writeln!(f, "{line}")?;
        Ok(())
    }
}

/// Returns the worst state across a set of reports, `None` if empty.
pub fn worst_state(reports: &[HealthReport]) -> Option<HealthState> {
    reports
        .iter()
        .map(|r| r.state)
        .max_by_key(|s| match s {
            HealthState::Ok => 0,
            HealthState::Warning => 1,
            HealthState::Error => 2,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Entity;
    use std::time::Duration;
    use tempfile::tempdir;

    fn report(state: HealthState) -> HealthReport {
        HealthReport {
            id: uuid::Uuid::new_v4(),
            entity: Entity::Node {
                node_name: "node-1".to_string(),
            },
            observer_name: "NodeObserver".to_string(),
            property: "TotalCpuTime".to_string(),
            code: "FO002".to_string(),
            state,
            message: "cpu high".to_string(),
            ttl: Duration::from_secs(300),
            emit_log_event: true,
            data: serde_json::json!({}),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn csv_sink_writes_header_once_and_appends_rows() {
        let dir = tempdir().unwrap();
        let sink = CsvSink::new(dir.path());
        sink.append(&report(HealthState::Warning), "node:cpu", 72.3, 81.0);
        sink.append(&report(HealthState::Error), "node:cpu", 91.0, 95.0);
        let day = Utc::now().format("%Y-%m-%d");
        let path = dir.path().join(format!("NodeObserver-{day}.csv"));
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.starts_with("timestamp,metric,id,avg,peak"));
    }

    #[test]
    fn log_file_sink_appends_one_json_line_per_report() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("health.ndjson");
        let sink = LogFileSink::new(&path);
        sink.append(&report(HealthState::Ok));
        sink.append(&report(HealthState::Error));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        for line in contents.lines() {
            let _: serde_json::Value = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn worst_state_picks_highest_severity() {
        let reports = vec![report(HealthState::Ok), report(HealthState::Warning)];
        assert_eq!(worst_state(&reports), Some(HealthState::Warning));
        assert_eq!(worst_state(&[]), None);
    }
}
