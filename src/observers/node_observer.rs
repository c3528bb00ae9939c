//! Host-level CPU, memory, and port observer (C9).

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::evaluation::{evaluate, EvaluationContext, ThresholdPair};
use crate::health::Entity;
use crate::observer::{AgentContext, Observer, ObserverError};
use crate::series::{MetricProperty, SamplingSeries};

pub struct NodeObserver {
    cpu: Mutex<SamplingSeries>,
    memory_mb: Mutex<SamplingSeries>,
    memory_pct: Mutex<SamplingSeries>,
    active_ports: Mutex<SamplingSeries>,
    ephemeral_ports: Mutex<SamplingSeries>,
    firewall_rules: Mutex<SamplingSeries>,
}

impl NodeObserver {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let series = |m: MetricProperty| Mutex::new(SamplingSeries::new(m, id.clone(), 10, crate::series::SeriesMode::Ring));
        Self {
            cpu: series(MetricProperty::TotalCpuTime),
            memory_mb: series(MetricProperty::TotalMemoryConsumptionMb),
            memory_pct: series(MetricProperty::TotalMemoryConsumptionPct),
            active_ports: series(MetricProperty::TotalActivePorts),
            ephemeral_ports: series(MetricProperty::TotalEphemeralPorts),
            firewall_rules: series(MetricProperty::TotalActiveFirewallRules),
        }
    }
}

#[async_trait]
impl Observer for NodeObserver {
    fn name(&self) -> &'static str {
        "NodeObserver"
    }

    fn enabled(&self, ctx: &AgentContext) -> bool {
        ctx.config.node_observer.enabled
    }

    fn run_interval(&self, ctx: &AgentContext) -> Duration {
        Duration::from_secs(ctx.config.observer_manager.observer_loop_sleep_seconds)
    }

    async fn observe(&self, ctx: &AgentContext) -> Result<(), ObserverError> {
        let cfg = &ctx.config.node_observer;
        let mem = ctx.os_probe.node_memory_info()?;

        self.cpu.lock().unwrap().append(ctx.os_probe.node_cpu_percent()?);
        self.memory_mb.lock().unwrap().append(mem.used_mb);
        self.memory_pct.lock().unwrap().append(mem.used_pct);
        self.active_ports.lock().unwrap().append(ctx.os_probe.active_tcp_port_count()? as f64);
        self.ephemeral_ports
            .lock()
            .unwrap()
            .append(ctx.os_probe.active_ephemeral_tcp_port_count()? as f64);
        self.firewall_rules.lock().unwrap().append(ctx.os_probe.firewall_rules_count()? as f64);

        let entity = Entity::Node {
            node_name: ctx.node_name.clone(),
        };
        let ttl = Duration::from_secs(ctx.config.observer_manager.health_report_ttl_seconds);
        let csv_sink = ctx.csv_sink.as_deref();

        let mut checks: Vec<(&Mutex<SamplingSeries>, ThresholdPair)> = vec![
            (&self.cpu, ThresholdPair::new(cfg.cpu_warning_pct, cfg.cpu_error_pct)),
            (&self.memory_mb, ThresholdPair::new(cfg.memory_warning_mb, cfg.memory_error_mb)),
            (&self.memory_pct, ThresholdPair::new(cfg.memory_warning_pct, cfg.memory_error_pct)),
            (
                &self.active_ports,
                ThresholdPair::new(cfg.active_ports_warning, cfg.active_ports_error),
            ),
            (
                &self.ephemeral_ports,
                ThresholdPair::new(cfg.ephemeral_ports_warning, cfg.ephemeral_ports_error),
            ),
            (
                &self.firewall_rules,
                ThresholdPair::new(cfg.firewall_rules_warning, cfg.firewall_rules_error),
            ),
        ];

        for (series_lock, thresholds) in checks.drain(..) {
            let mut series = series_lock.lock().unwrap();
            let eval_ctx = EvaluationContext {
                observer_name: self.name(),
                node_name: &ctx.node_name,
                entity: entity.clone(),
                thresholds,
                ttl,
                replica: None,
                dump_on_error: false,
                health_reporter: ctx.health_reporter.as_ref(),
                telemetry: ctx.telemetry.as_ref(),
                dump_writer: ctx.dump_writer.as_ref(),
                csv_sink,
            };
            evaluate(&mut series, &eval_ctx);
        }
        Ok(())
    }
}
