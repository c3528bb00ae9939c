//! Per-application resource observer (C8): samples CPU, memory, and port
//! usage for the processes backing deployed service replicas and evaluates
//! each series against per-target thresholds.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::config::{load_target_list, ObserverTarget};
use crate::evaluation::{evaluate, EvaluationContext, ReplicaInfo, ThresholdPair};
use crate::health::Entity;
use crate::observer::{AgentContext, Observer, ObserverError};
use crate::series::{MetricProperty, SamplingSeries};

/// A replica resolved from a target entry, after wildcard expansion and the
/// include/exclude service filter.
struct ResolvedReplica {
    application_name: String,
    service_name: String,
    host_process_id: u32,
    dump_on_error: bool,
    thresholds: ReplicaThresholds,
}

#[derive(Default)]
struct ReplicaThresholds {
    cpu: ThresholdPair,
    memory_mb: ThresholdPair,
    memory_pct: ThresholdPair,
    active_ports: ThresholdPair,
    ephemeral_ports: ThresholdPair,
}

/// `true` when `target_app` names the wildcard record ("*" or "all",
/// case-insensitive), which expands to every non-system deployed application.
fn is_wildcard_target(app_name: &str) -> bool {
    matches!(app_name.to_ascii_lowercase().as_str(), "*" | "all")
}

/// Platform-owned applications (the `fabric:/System` tree) never match a
/// wildcard target; they're covered by `FabricSystemObserver` instead.
fn is_system_app(app_name: &str) -> bool {
    app_name.to_ascii_lowercase().starts_with("fabric:/system")
}

/// Fills any zero-valued threshold field on a non-wildcard target from the
/// wildcard record's corresponding field, if one is configured. A per-app
/// value other than zero always wins.
fn apply_wildcard_defaults(targets: &[ObserverTarget]) -> Vec<ObserverTarget> {
    let Some(wildcard) = targets
        .iter()
        .find(|t| t.target_app.as_deref().is_some_and(is_wildcard_target))
    else {
        return targets.to_vec();
    };
    targets
        .iter()
        .map(|t| {
            if t.target_app.as_deref().is_some_and(is_wildcard_target) {
                return t.clone();
            }
            let mut t = t.clone();
            inherit(&mut t.cpu_warning_pct, wildcard.cpu_warning_pct);
            inherit(&mut t.cpu_error_pct, wildcard.cpu_error_pct);
            inherit(&mut t.memory_warning_mb, wildcard.memory_warning_mb);
            inherit(&mut t.memory_error_mb, wildcard.memory_error_mb);
            inherit(&mut t.memory_warning_pct, wildcard.memory_warning_pct);
            inherit(&mut t.memory_error_pct, wildcard.memory_error_pct);
            inherit(&mut t.active_ports_warning, wildcard.active_ports_warning);
            inherit(&mut t.active_ports_error, wildcard.active_ports_error);
            inherit(&mut t.ephemeral_ports_warning, wildcard.ephemeral_ports_warning);
            inherit(&mut t.ephemeral_ports_error, wildcard.ephemeral_ports_error);
            t
        })
        .collect()
}

fn inherit(value: &mut Option<f64>, fallback: Option<f64>) {
    if value.unwrap_or(0.0) == 0.0 {
        *value = fallback;
    }
}

/// Upper bound on replicas sampled at once within a single tick.
const MAX_CONCURRENT_REPLICA_SAMPLES: usize = 8;

pub struct AppObserver {
    series: Mutex<HashMap<(String, MetricProperty), SamplingSeries>>,
}

impl AppObserver {
    pub fn new() -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves every configured target to the concrete replicas it currently
    /// covers. A `target_app` names one application, or the wildcard record
    /// ("*"/"all"), which expands to every non-system deployed application; a
    /// `target_app_type` expands to every deployed application reporting that
    /// type. Threshold fields left at zero on a non-wildcard target inherit
    /// from the wildcard record first. Replica selection keeps stateful
    /// Primary and stateless replicas only, then applies the include/exclude
    /// substring filter: an include list wins outright, an exclude list is
    /// applied only when no include list is present, and an empty list of
    /// either means "no filtering".
    fn resolve_targets(&self, ctx: &AgentContext, targets: &[ObserverTarget]) -> Result<Vec<ResolvedReplica>, ObserverError> {
        let targets = apply_wildcard_defaults(targets);
        let mut resolved = Vec::new();
        for target in &targets {
            let app_names = match (&target.target_app, &target.target_app_type) {
                (Some(app), _) if is_wildcard_target(app) => ctx
                    .cluster_query
                    .get_deployed_applications_on_node(&ctx.node_name)?
                    .into_iter()
                    .filter(|name| !is_system_app(name))
                    .collect(),
                (Some(app), _) => vec![app.clone()],
                (None, Some(_app_type)) => ctx.cluster_query.get_deployed_applications_on_node(&ctx.node_name)?,
                (None, None) => continue,
            };
            for app_name in app_names {
                let replicas = ctx
                    .cluster_query
                    .get_deployed_replicas_on_node(&ctx.node_name, &app_name)?;
                for replica in replicas {
                    if replica.role == crate::probes::ReplicaRole::ActiveSecondary {
                        continue;
                    }
                    if !passes_service_filter(&replica.service_name, target) {
                        continue;
                    }
                    resolved.push(ResolvedReplica {
                        application_name: replica.application_name,
                        service_name: replica.service_name,
                        host_process_id: replica.host_process_id,
                        dump_on_error: target.dump_on_error,
                        thresholds: ReplicaThresholds {
                            cpu: ThresholdPair::new(
                                target.cpu_warning_pct.unwrap_or(0.0),
                                target.cpu_error_pct.unwrap_or(0.0),
                            ),
                            memory_mb: ThresholdPair::new(
                                target.memory_warning_mb.unwrap_or(0.0),
                                target.memory_error_mb.unwrap_or(0.0),
                            ),
                            memory_pct: ThresholdPair::new(
                                target.memory_warning_pct.unwrap_or(0.0),
                                target.memory_error_pct.unwrap_or(0.0),
                            ),
                            active_ports: ThresholdPair::new(
                                target.active_ports_warning.unwrap_or(0.0),
                                target.active_ports_error.unwrap_or(0.0),
                            ),
                            ephemeral_ports: ThresholdPair::new(
                                target.ephemeral_ports_warning.unwrap_or(0.0),
                                target.ephemeral_ports_error.unwrap_or(0.0),
                            ),
                        },
                    });
                }
            }
        }
        Ok(resolved)
    }
}

impl Default for AppObserver {
    fn default() -> Self {
        Self::new()
    }
}

fn passes_service_filter(service_name: &str, target: &ObserverTarget) -> bool {
    let service_name = service_name.to_ascii_lowercase();
    if let Some(include) = target.service_include_list.as_deref().filter(|s| !s.is_empty()) {
        return include.split(',').any(|p| service_name.contains(&p.trim().to_ascii_lowercase()));
    }
    if let Some(exclude) = target.service_exclude_list.as_deref().filter(|s| !s.is_empty()) {
        return !exclude.split(',').any(|p| service_name.contains(&p.trim().to_ascii_lowercase()));
    }
    true
}

#[async_trait]
impl Observer for AppObserver {
    fn name(&self) -> &'static str {
        "AppObserver"
    }

    fn enabled(&self, ctx: &AgentContext) -> bool {
        ctx.config.app_observer.enabled
    }

    fn run_interval(&self, ctx: &AgentContext) -> Duration {
        Duration::from_secs(ctx.config.observer_manager.observer_loop_sleep_seconds)
    }

    async fn observe(&self, ctx: &AgentContext) -> Result<(), ObserverError> {
        let target_path = std::path::Path::new(&ctx.config.app_observer.target_list_path);
        let targets = load_target_list(target_path).map_err(|e| ObserverError::Configuration(e.to_string()))?;
        if targets.is_empty() {
            return Ok(());
        }

        let replicas = self.resolve_targets(ctx, &targets)?;
        let monitor_duration = Duration::from_secs(ctx.config.app_observer.monitor_duration_seconds.max(1));
        let sleep_between = Duration::from_millis(ctx.config.app_observer.monitor_sleep_duration_milliseconds.max(1));
        let deadline = tokio::time::Instant::now() + monitor_duration;

        while tokio::time::Instant::now() < deadline {
            if ctx.is_cancelled() {
                return Err(ObserverError::Cancelled);
            }
            self.sample_tick(ctx, &replicas).await;
            tokio::select! {
                _ = tokio::time::sleep(sleep_between) => {}
                _ = ctx.cancellation.cancelled() => return Err(ObserverError::Cancelled),
            }
        }

        for replica in &replicas {
            self.evaluate_replica(ctx, replica);
        }
        Ok(())
    }
}

impl AppObserver {
    /// Samples every replica once, up to `MAX_CONCURRENT_REPLICA_SAMPLES` at a
    /// time. A vanished process or a probe failure is logged and skipped —
    /// it never aborts sampling for the rest of the tick.
    async fn sample_tick(&self, ctx: &AgentContext, replicas: &[ResolvedReplica]) {
        stream::iter(replicas.iter())
            .for_each_concurrent(MAX_CONCURRENT_REPLICA_SAMPLES, |replica| async move {
                if let Err(e) = self.sample_once(ctx, replica) {
                    match e {
                        ObserverError::TargetVanished(pid) => {
                            log::info!(target: "observers", "process {pid} for {} has exited, skipping", replica.service_name);
                        }
                        other => log::warn!(target: "observers", "sampling {} failed: {other}", replica.service_name),
                    }
                }
            })
            .await;
    }

    fn sample_once(&self, ctx: &AgentContext, replica: &ResolvedReplica) -> Result<(), ObserverError> {
        if !ctx.os_probe.process_exists(replica.host_process_id) {
            return Err(ObserverError::TargetVanished(replica.host_process_id));
        }
        let cpu = ctx.os_probe.process_cpu_percent(replica.host_process_id)?;
        let mem_mb = ctx.os_probe.process_private_working_set_mb(replica.host_process_id)?;
        let node_mem = ctx.os_probe.node_memory_info()?;
        let mem_pct = pct_of_total(mem_mb, node_mem.total_mb);
        let active_ports = ctx.os_probe.process_active_port_count(replica.host_process_id)? as f64;
        let ephemeral_ports = ctx.os_probe.process_active_ephemeral_port_count(replica.host_process_id)? as f64;

        let mut cpu_children = Vec::new();
        let mut mem_children = Vec::new();
        let mut mem_pct_children = Vec::new();
        let mut active_ports_children = Vec::new();
        let mut ephemeral_ports_children = Vec::new();
        if ctx.config.app_observer.enable_child_process_monitoring {
            let children = ctx.os_probe.child_pids(replica.host_process_id)?;
            for child in children.into_iter().take(ctx.config.app_observer.max_child_procs as usize) {
                if let Ok(c) = ctx.os_probe.process_cpu_percent(child) {
                    cpu_children.push(c);
                }
                if let Ok(m) = ctx.os_probe.process_private_working_set_mb(child) {
                    mem_children.push(m);
                    mem_pct_children.push(pct_of_total(m, node_mem.total_mb));
                }
                if let Ok(p) = ctx.os_probe.process_active_port_count(child) {
                    active_ports_children.push(p as f64);
                }
                if let Ok(e) = ctx.os_probe.process_active_ephemeral_port_count(child) {
                    ephemeral_ports_children.push(e as f64);
                }
            }
        }

        let id = series_id(replica);
        let mut series = self.series.lock().expect("app observer series lock poisoned");
        append_with_children(&mut series, &id, MetricProperty::TotalCpuTime, cpu, &cpu_children);
        append_with_children(&mut series, &id, MetricProperty::TotalMemoryConsumptionMb, mem_mb, &mem_children);
        append_with_children(&mut series, &id, MetricProperty::TotalMemoryConsumptionPct, mem_pct, &mem_pct_children);
        append_with_children(&mut series, &id, MetricProperty::TotalActivePorts, active_ports, &active_ports_children);
        append_with_children(
            &mut series,
            &id,
            MetricProperty::TotalEphemeralPorts,
            ephemeral_ports,
            &ephemeral_ports_children,
        );
        Ok(())
    }

    fn evaluate_replica(&self, ctx: &AgentContext, replica: &ResolvedReplica) {
        let id = series_id(replica);
        let entity = Entity::Application {
            node_name: ctx.node_name.clone(),
            application_name: replica.application_name.clone(),
            service_name: Some(replica.service_name.clone()),
        };
        let replica_info = ReplicaInfo {
            application_name: replica.application_name.clone(),
            service_name: replica.service_name.clone(),
            host_process_id: replica.host_process_id,
        };
        let ttl = Duration::from_secs(ctx.config.observer_manager.health_report_ttl_seconds);
        let csv_sink = ctx.csv_sink.as_deref();

        let metrics = [
            (MetricProperty::TotalCpuTime, replica.thresholds.cpu),
            (MetricProperty::TotalMemoryConsumptionMb, replica.thresholds.memory_mb),
            (MetricProperty::TotalMemoryConsumptionPct, replica.thresholds.memory_pct),
            (MetricProperty::TotalActivePorts, replica.thresholds.active_ports),
            (MetricProperty::TotalEphemeralPorts, replica.thresholds.ephemeral_ports),
        ];

        let mut series = self.series.lock().expect("app observer series lock poisoned");
        for (metric, thresholds) in metrics {
            if let Some(s) = series.get_mut(&(id.clone(), metric)) {
                let eval_ctx = EvaluationContext {
                    observer_name: self.name(),
                    node_name: &ctx.node_name,
                    entity: entity.clone(),
                    thresholds,
                    ttl,
                    replica: Some(replica_info.clone()),
                    dump_on_error: replica.dump_on_error,
                    health_reporter: ctx.health_reporter.as_ref(),
                    telemetry: ctx.telemetry.as_ref(),
                    dump_writer: ctx.dump_writer.as_ref(),
                    csv_sink,
                };
                evaluate(s, &eval_ctx);
            }
        }
    }
}

fn pct_of_total(value: f64, total: f64) -> f64 {
    if total > 0.0 {
        value / total * 100.0
    } else {
        0.0
    }
}

fn append_with_children(
    series: &mut HashMap<(String, MetricProperty), SamplingSeries>,
    id: &str,
    metric: MetricProperty,
    value: f64,
    children: &[f64],
) {
    let s = series
        .entry((id.to_string(), metric))
        .or_insert_with(|| SamplingSeries::new(metric, id.to_string(), usize::MAX, crate::series::SeriesMode::List));
    s.append(value);
    if !children.is_empty() {
        s.merge_additive(children);
    }
}

fn series_id(replica: &ResolvedReplica) -> String {
    format!("{}:{}:{}", replica.application_name, replica.service_name, replica.host_process_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObserverTarget;

    fn target_with(include: Option<&str>, exclude: Option<&str>) -> ObserverTarget {
        target_named("fabric:/app1", include, exclude)
    }

    fn target_named(app: &str, include: Option<&str>, exclude: Option<&str>) -> ObserverTarget {
        ObserverTarget {
            target_app: Some(app.to_string()),
            target_app_type: None,
            service_include_list: include.map(String::from),
            service_exclude_list: exclude.map(String::from),
            cpu_warning_pct: None,
            cpu_error_pct: None,
            memory_warning_mb: None,
            memory_error_mb: None,
            memory_warning_pct: None,
            memory_error_pct: None,
            active_ports_warning: None,
            active_ports_error: None,
            ephemeral_ports_warning: None,
            ephemeral_ports_error: None,
            dump_on_error: false,
        }
    }

    #[test]
    fn include_list_wins_over_exclude_list() {
        let target = target_with(Some("Gateway"), Some("Gateway"));
        assert!(passes_service_filter("fabric:/app1/Gateway", &target));
    }

    #[test]
    fn exclude_list_applies_only_without_include() {
        let target = target_with(None, Some("Internal"));
        assert!(!passes_service_filter("fabric:/app1/InternalWorker", &target));
        assert!(passes_service_filter("fabric:/app1/Gateway", &target));
    }

    #[test]
    fn no_filters_means_everything_passes() {
        let target = target_with(None, None);
        assert!(passes_service_filter("fabric:/app1/Anything", &target));
    }

    #[test]
    fn service_filter_is_case_insensitive() {
        let target = target_with(Some("gateway"), None);
        assert!(passes_service_filter("fabric:/app1/GATEWAY", &target));

        let target = target_with(None, Some("INTERNAL"));
        assert!(!passes_service_filter("fabric:/app1/internalworker", &target));
    }

    #[test]
    fn wildcard_target_name_matches_star_and_all_case_insensitively() {
        assert!(is_wildcard_target("*"));
        assert!(is_wildcard_target("All"));
        assert!(is_wildcard_target("ALL"));
        assert!(!is_wildcard_target("fabric:/app1"));
    }

    #[test]
    fn system_app_is_recognized_by_name_prefix() {
        assert!(is_system_app("fabric:/System"));
        assert!(is_system_app("fabric:/System/ClusterManagerService"));
        assert!(!is_system_app("fabric:/MyApp"));
    }

    #[test]
    fn zero_threshold_inherits_from_wildcard_record() {
        let mut wildcard = target_named("*", None, None);
        wildcard.cpu_warning_pct = Some(50.0);
        wildcard.cpu_error_pct = Some(80.0);

        let mut explicit = target_named("fabric:/app1", None, None);
        explicit.cpu_warning_pct = Some(0.0);
        explicit.cpu_error_pct = Some(95.0);

        let resolved = apply_wildcard_defaults(&[wildcard, explicit]);
        let app1 = resolved.iter().find(|t| t.target_app.as_deref() == Some("fabric:/app1")).unwrap();
        assert_eq!(app1.cpu_warning_pct, Some(50.0));
        assert_eq!(app1.cpu_error_pct, Some(95.0));
    }

    #[test]
    fn series_id_is_stable_per_replica() {
        let replica = ResolvedReplica {
            application_name: "fabric:/app1".to_string(),
            service_name: "fabric:/app1/Gateway".to_string(),
            host_process_id: 1234,
            dump_on_error: false,
            thresholds: ReplicaThresholds::default(),
        };
        assert_eq!(series_id(&replica), "fabric:/app1:fabric:/app1/Gateway:1234");
    }
}
