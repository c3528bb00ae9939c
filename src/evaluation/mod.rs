//! Resource-usage evaluation pipeline (C6): turns a sampled series into an
//! Ok-clear or a Warning/Error health report plus telemetry, and optionally
//! requests a live dump.

pub mod codes;

use std::time::Duration;

use chrono::Utc;

use crate::dump::{DumpKind, DumpRequest, DumpWriter};
use crate::health::{Entity, HealthReport, HealthReporter, HealthState};
use crate::series::{MetricProperty, SamplingSeries};
use crate::sinks::CsvSink;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Warning/error thresholds for one series. Either may be zero, meaning that
/// tier is disabled. When both are non-zero, `0 < warn <= err`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdPair {
    pub warn: f64,
    pub err: f64,
}

impl ThresholdPair {
    pub fn new(warn: f64, err: f64) -> Self {
        Self { warn, err }
    }

    fn classify(&self, avg: f64) -> HealthState {
        if self.err > 0.0 && avg >= self.err {
            HealthState::Error
        } else if self.warn > 0.0 && avg >= self.warn {
            HealthState::Warning
        } else {
            HealthState::Ok
        }
    }
}

/// Replica/instance identity, required to request a dump on an Error verdict.
#[derive(Debug, Clone)]
pub struct ReplicaInfo {
    pub application_name: String,
    pub service_name: String,
    pub host_process_id: u32,
}

/// Everything the pipeline needs to evaluate one series and fan out emissions.
pub struct EvaluationContext<'a> {
    pub observer_name: &'a str,
    pub node_name: &'a str,
    pub entity: Entity,
    pub thresholds: ThresholdPair,
    pub ttl: Duration,
    pub replica: Option<ReplicaInfo>,
    pub dump_on_error: bool,
    pub health_reporter: &'a dyn HealthReporter,
    pub telemetry: &'a dyn TelemetrySink,
    pub dump_writer: &'a dyn DumpWriter,
    pub csv_sink: Option<&'a CsvSink>,
}

/// Classifies `series`, emits health and telemetry for a breach or a recovery,
/// optionally requests a dump on Error, then clears the series regardless of
/// outcome. Returns the verdict reached, or `None` if the series had no
/// samples (no emission, no state change — "clear on empty").
pub fn evaluate(series: &mut SamplingSeries, ctx: &EvaluationContext) -> Option<HealthState> {
    let avg = series.avg();
    let avg = match avg {
        Some(v) => v,
        None => return None,
    };
    let peak = series.max().unwrap_or(avg);

    let state = ctx.thresholds.classify(avg);
    let metric = series.metric_property;

    match state {
        HealthState::Error | HealthState::Warning => {
            let tier = if state == HealthState::Error {
                codes::Tier::Error
            } else {
                codes::Tier::Warning
            };
            let code = codes::code_for(&ctx.entity, metric, tier).to_string();
            series.active_error_or_warning = true;
            series.active_code = Some(code.clone());

            let threshold = if state == HealthState::Error {
                ctx.thresholds.err
            } else {
                ctx.thresholds.warn
            };
            let message = format_breach_message(metric, threshold, avg);

            let report = build_report(series, ctx, state, code.clone(), message, ctx.ttl);
            ctx.health_reporter.report_health(report);
            ctx.telemetry.emit(TelemetryEvent {
                code,
                property: metric.label().to_string(),
                id: series.id.clone(),
                value: avg,
                units: metric.units().to_string(),
            });
            if let Some(sink) = ctx.csv_sink {
                sink.append(&last_report_snapshot(series, ctx, state), &series.id, avg, peak);
            }

            if state == HealthState::Error && ctx.dump_on_error {
                if let Some(replica) = &ctx.replica {
                    ctx.dump_writer.request_dump(DumpRequest {
                        pid: replica.host_process_id,
                        kind: DumpKind::MiniPlus,
                        process_name: series.id.clone(),
                    });
                }
            }
        }
        HealthState::Ok => {
            if series.active_error_or_warning {
                let report = build_report(
                    series,
                    ctx,
                    HealthState::Ok,
                    codes::OK_CODE.to_string(),
                    format!("{} has returned to normal range", metric.label()),
                    Duration::ZERO,
                );
                ctx.health_reporter.report_health(report);
                ctx.telemetry.emit(TelemetryEvent {
                    code: codes::OK_CODE.to_string(),
                    property: metric.label().to_string(),
                    id: series.id.clone(),
                    value: avg,
                    units: metric.units().to_string(),
                });
                series.active_error_or_warning = false;
                series.active_code = None;
            }
        }
    }

    series.clear();
    Some(state)
}

fn format_breach_message(metric: MetricProperty, threshold: f64, avg: f64) -> String {
    let limit_kind = "Maximum";
    format!(
        "{} is at or above the {} limit ({}{}) — {}: {}{}",
        metric.label(),
        limit_kind,
        fmt_num(threshold),
        metric.units(),
        metric.label(),
        fmt_num(avg),
        metric.units()
    )
}

fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn build_report(
    series: &SamplingSeries,
    ctx: &EvaluationContext,
    state: HealthState,
    code: String,
    message: String,
    ttl: Duration,
) -> HealthReport {
    HealthReport {
        id: uuid::Uuid::new_v4(),
        entity: ctx.entity.clone(),
        observer_name: ctx.observer_name.to_string(),
        property: series.id.clone(),
        code,
        state,
        message,
        ttl,
        emit_log_event: true,
        data: serde_json::json!({
            "metric": series.metric_property.label(),
            "id": series.id,
        }),
        timestamp: Utc::now(),
    }
}

fn last_report_snapshot(series: &SamplingSeries, ctx: &EvaluationContext, state: HealthState) -> HealthReport {
    build_report(
        series,
        ctx,
        state,
        series.active_code.clone().unwrap_or_default(),
        String::new(),
        ctx.ttl,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::NoopDumpWriter;
    use crate::health::InMemoryHealthReporter;
    use crate::series::SeriesMode;
    use crate::telemetry::RecordingTelemetrySink;

    fn node_ctx<'a>(
        reporter: &'a InMemoryHealthReporter,
        telemetry: &'a RecordingTelemetrySink,
        dump: &'a NoopDumpWriter,
        thresholds: ThresholdPair,
    ) -> EvaluationContext<'a> {
        EvaluationContext {
            observer_name: "NodeObserver",
            node_name: "node-1",
            entity: Entity::Node {
                node_name: "node-1".to_string(),
            },
            thresholds,
            ttl: Duration::from_secs(300),
            replica: None,
            dump_on_error: false,
            health_reporter: reporter,
            telemetry,
            dump_writer: dump,
            csv_sink: None,
        }
    }

    #[test]
    fn empty_series_emits_nothing_and_is_unchanged() {
        let mut series = SamplingSeries::new(MetricProperty::TotalCpuTime, "n1", 10, SeriesMode::List);
        let reporter = InMemoryHealthReporter::new();
        let telemetry = RecordingTelemetrySink::new();
        let dump = NoopDumpWriter::new();
        let ctx = node_ctx(&reporter, &telemetry, &dump, ThresholdPair::new(50.0, 90.0));
        let result = evaluate(&mut series, &ctx);
        assert!(result.is_none());
        assert!(reporter.reports().is_empty());
        assert!(!series.active_error_or_warning);
    }

    #[test]
    fn monotonic_classification_warn_err_ok() {
        let reporter = InMemoryHealthReporter::new();
        let telemetry = RecordingTelemetrySink::new();
        let dump = NoopDumpWriter::new();
        let thresholds = ThresholdPair::new(50.0, 90.0);

        let mut below = SamplingSeries::new(MetricProperty::TotalCpuTime, "n1", 10, SeriesMode::List);
        below.append(10.0);
        let ctx = node_ctx(&reporter, &telemetry, &dump, thresholds);
        assert_eq!(evaluate(&mut below, &ctx), Some(HealthState::Ok));

        let mut warn = SamplingSeries::new(MetricProperty::TotalCpuTime, "n2", 10, SeriesMode::List);
        warn.append(60.0);
        assert_eq!(evaluate(&mut warn, &ctx), Some(HealthState::Warning));

        let mut err = SamplingSeries::new(MetricProperty::TotalCpuTime, "n3", 10, SeriesMode::List);
        err.append(95.0);
        assert_eq!(evaluate(&mut err, &ctx), Some(HealthState::Error));
    }

    #[test]
    fn exactly_at_threshold_is_the_higher_tier() {
        let reporter = InMemoryHealthReporter::new();
        let telemetry = RecordingTelemetrySink::new();
        let dump = NoopDumpWriter::new();
        let ctx = node_ctx(&reporter, &telemetry, &dump, ThresholdPair::new(50.0, 90.0));
        let mut at_warn = SamplingSeries::new(MetricProperty::TotalCpuTime, "n1", 10, SeriesMode::List);
        at_warn.append(50.0);
        assert_eq!(evaluate(&mut at_warn, &ctx), Some(HealthState::Warning));

        let mut at_err = SamplingSeries::new(MetricProperty::TotalCpuTime, "n2", 10, SeriesMode::List);
        at_err.append(90.0);
        assert_eq!(evaluate(&mut at_err, &ctx), Some(HealthState::Error));
    }

    #[test]
    fn ok_after_active_warning_emits_clear_and_resets_flag() {
        let reporter = InMemoryHealthReporter::new();
        let telemetry = RecordingTelemetrySink::new();
        let dump = NoopDumpWriter::new();
        let ctx = node_ctx(&reporter, &telemetry, &dump, ThresholdPair::new(50.0, 90.0));

        let mut series = SamplingSeries::new(MetricProperty::TotalCpuTime, "n1", 10, SeriesMode::List);
        series.append(95.0);
        evaluate(&mut series, &ctx);
        assert!(series.active_error_or_warning);

        series.append(10.0);
        let result = evaluate(&mut series, &ctx);
        assert_eq!(result, Some(HealthState::Ok));
        assert!(!series.active_error_or_warning);
        let reports = reporter.reports();
        assert_eq!(reports.last().unwrap().code, codes::OK_CODE);
        assert_eq!(reports.last().unwrap().ttl, Duration::ZERO);
    }

    #[test]
    fn error_with_dump_on_error_requests_exactly_one_dump() {
        let reporter = InMemoryHealthReporter::new();
        let telemetry = RecordingTelemetrySink::new();
        let dump = NoopDumpWriter::new();
        let mut ctx = node_ctx(&reporter, &telemetry, &dump, ThresholdPair::new(50.0, 90.0));
        ctx.dump_on_error = true;
        ctx.replica = Some(ReplicaInfo {
            application_name: "fabric:/app1".to_string(),
            service_name: "svc".to_string(),
            host_process_id: 4242,
        });

        let mut series = SamplingSeries::new(MetricProperty::TotalCpuTime, "fabric:/app1:host", 10, SeriesMode::List);
        for v in [92.0, 95.0, 94.0] {
            series.append(v);
        }
        evaluate(&mut series, &ctx);
        assert_eq!(dump.requests().len(), 1);
        assert_eq!(dump.requests()[0].pid, 4242);
    }
}
