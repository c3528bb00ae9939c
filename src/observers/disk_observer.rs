//! Fixed-drive space (percent, used/available/total MB) and queue-length
//! observer (C9).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::evaluation::{evaluate, EvaluationContext, ThresholdPair};
use crate::health::Entity;
use crate::observer::{AgentContext, Observer, ObserverError};
use crate::series::{MetricProperty, SamplingSeries};

pub struct DiskObserver {
    usage_series: Mutex<HashMap<String, SamplingSeries>>,
    queue_series: Mutex<HashMap<String, SamplingSeries>>,
    mb_series: Mutex<HashMap<(String, MetricProperty), SamplingSeries>>,
}

impl DiskObserver {
    pub fn new() -> Self {
        Self {
            usage_series: Mutex::new(HashMap::new()),
            queue_series: Mutex::new(HashMap::new()),
            mb_series: Mutex::new(HashMap::new()),
        }
    }

    fn should_check_drive(&self, ctx: &AgentContext, drive: &str) -> bool {
        !ctx.config.disk_observer.drives_to_skip.iter().any(|skip| skip == drive)
    }
}

impl Default for DiskObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Observer for DiskObserver {
    fn name(&self) -> &'static str {
        "DiskObserver"
    }

    fn enabled(&self, ctx: &AgentContext) -> bool {
        ctx.config.disk_observer.enabled
    }

    fn run_interval(&self, ctx: &AgentContext) -> Duration {
        Duration::from_secs(ctx.config.observer_manager.observer_loop_sleep_seconds)
    }

    async fn observe(&self, ctx: &AgentContext) -> Result<(), ObserverError> {
        let cfg = &ctx.config.disk_observer;
        let drives = ctx.os_probe.enumerate_fixed_drives()?;
        let entity = Entity::Node {
            node_name: ctx.node_name.clone(),
        };
        let ttl = Duration::from_secs(ctx.config.observer_manager.health_report_ttl_seconds);
        let csv_sink = ctx.csv_sink.as_deref();

        for drive in &drives {
            if !self.should_check_drive(ctx, &drive.name) {
                continue;
            }
            let used_pct = ctx.os_probe.disk_space_used_percent(&drive.name)?;
            let queue_len = ctx.os_probe.avg_disk_queue_length(&drive.name)?;

            let mut usage = self.usage_series.lock().unwrap();
            let usage_s = usage
                .entry(drive.name.clone())
                .or_insert_with(|| SamplingSeries::new(MetricProperty::DiskSpaceUsagePercentage, drive.name.clone(), 10, crate::series::SeriesMode::Ring));
            usage_s.append(used_pct);
            let eval_ctx = EvaluationContext {
                observer_name: self.name(),
                node_name: &ctx.node_name,
                entity: entity.clone(),
                thresholds: ThresholdPair::new(cfg.disk_space_percent_warning, cfg.disk_space_percent_error),
                ttl,
                replica: None,
                dump_on_error: false,
                health_reporter: ctx.health_reporter.as_ref(),
                telemetry: ctx.telemetry.as_ref(),
                dump_writer: ctx.dump_writer.as_ref(),
                csv_sink,
            };
            evaluate(usage_s, &eval_ctx);
            drop(usage);

            let mut queue = self.queue_series.lock().unwrap();
            let queue_s = queue
                .entry(drive.name.clone())
                .or_insert_with(|| SamplingSeries::new(MetricProperty::DiskAverageQueueLength, drive.name.clone(), 10, crate::series::SeriesMode::Ring));
            queue_s.append(queue_len);
            let eval_ctx = EvaluationContext {
                observer_name: self.name(),
                node_name: &ctx.node_name,
                entity: entity.clone(),
                thresholds: ThresholdPair::new(cfg.average_queue_length_warning, cfg.average_queue_length_error),
                ttl,
                replica: None,
                dump_on_error: false,
                health_reporter: ctx.health_reporter.as_ref(),
                telemetry: ctx.telemetry.as_ref(),
                dump_writer: ctx.dump_writer.as_ref(),
                csv_sink,
            };
            evaluate(queue_s, &eval_ctx);
            drop(queue);

            let used_mb = drive.total_mb - drive.available_mb;
            let mb_thresholds = ThresholdPair::new(cfg.disk_space_mb_warning, cfg.disk_space_mb_error);
            let mut mb = self.mb_series.lock().unwrap();
            for (metric, value) in [
                (MetricProperty::DiskSpaceUsageMb, used_mb),
                (MetricProperty::DiskSpaceAvailableMb, drive.available_mb),
                (MetricProperty::DiskSpaceTotalMb, drive.total_mb),
            ] {
                let s = mb.entry((drive.name.clone(), metric)).or_insert_with(|| {
                    SamplingSeries::new(metric, drive.name.clone(), 10, crate::series::SeriesMode::Ring)
                });
                s.append(value);
                let eval_ctx = EvaluationContext {
                    observer_name: self.name(),
                    node_name: &ctx.node_name,
                    entity: entity.clone(),
                    thresholds: mb_thresholds,
                    ttl,
                    replica: None,
                    dump_on_error: false,
                    health_reporter: ctx.health_reporter.as_ref(),
                    telemetry: ctx.telemetry.as_ref(),
                    dump_writer: ctx.dump_writer.as_ref(),
                    csv_sink,
                };
                evaluate(s, &eval_ctx);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::dump::NoopDumpWriter;
    use crate::health::InMemoryHealthReporter;
    use crate::probes::{DriveInfo, FakeClusterQueryClient, FakeOsProbe};
    use crate::telemetry::RecordingTelemetrySink;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn context_with(probe: Arc<FakeOsProbe>, mut cfg: AgentConfig) -> (AgentContext, Arc<InMemoryHealthReporter>) {
        cfg.disk_observer.enabled = true;
        let reporter = Arc::new(InMemoryHealthReporter::new());
        let ctx = AgentContext {
            node_name: "node-1".to_string(),
            config: Arc::new(cfg),
            cluster_query: Arc::new(FakeClusterQueryClient::new()),
            os_probe: probe,
            health_reporter: reporter.clone(),
            telemetry: Arc::new(RecordingTelemetrySink::new()),
            dump_writer: Arc::new(NoopDumpWriter::new()),
            csv_sink: None,
            log_file_sink: None,
            cancellation: CancellationToken::new(),
        };
        (ctx, reporter)
    }

    #[tokio::test]
    async fn skipped_drive_is_never_sampled() {
        let probe = Arc::new(FakeOsProbe::new());
        probe.drives.lock().unwrap().push(DriveInfo {
            name: "D:".to_string(),
            total_mb: 1000.0,
            available_mb: 10.0,
        });
        probe.disk_used_pct.lock().unwrap().insert("D:".to_string(), 99.0);

        let mut cfg = AgentConfig::default();
        cfg.disk_observer.drives_to_skip = vec!["D:".to_string()];
        cfg.disk_observer.disk_space_percent_error = 90.0;
        let (ctx, reporter) = context_with(probe, cfg);

        let observer = DiskObserver::new();
        observer.observe(&ctx).await.unwrap();
        assert!(reporter.reports().is_empty());
    }

    #[tokio::test]
    async fn high_usage_on_unskipped_drive_raises_error() {
        let probe = Arc::new(FakeOsProbe::new());
        probe.drives.lock().unwrap().push(DriveInfo {
            name: "C:".to_string(),
            total_mb: 1000.0,
            available_mb: 10.0,
        });
        probe.disk_used_pct.lock().unwrap().insert("C:".to_string(), 95.0);

        let mut cfg = AgentConfig::default();
        cfg.disk_observer.disk_space_percent_warning = 70.0;
        cfg.disk_observer.disk_space_percent_error = 90.0;
        let (ctx, reporter) = context_with(probe, cfg);

        let observer = DiskObserver::new();
        observer.observe(&ctx).await.unwrap();
        assert!(!reporter.reports().is_empty());
    }

    #[tokio::test]
    async fn low_available_mb_raises_a_used_mb_breach() {
        let probe = Arc::new(FakeOsProbe::new());
        probe.drives.lock().unwrap().push(DriveInfo {
            name: "C:".to_string(),
            total_mb: 1000.0,
            available_mb: 10.0,
        });
        probe.disk_used_pct.lock().unwrap().insert("C:".to_string(), 99.0);

        let mut cfg = AgentConfig::default();
        cfg.disk_observer.disk_space_mb_warning = 500.0;
        cfg.disk_observer.disk_space_mb_error = 900.0;
        let (ctx, reporter) = context_with(probe, cfg);

        let observer = DiskObserver::new();
        observer.observe(&ctx).await.unwrap();
        let reports = reporter.reports();
        assert!(reports.iter().any(|r| r.data["metric"] == "DiskSpaceUsageMb"));
    }
}
