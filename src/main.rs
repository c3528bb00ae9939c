use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use node_observer_agent::cli::{Args, Commands, LogFormat};
use node_observer_agent::config::AgentConfig;
use node_observer_agent::dump::{BudgetedDumpWriter, NoopDumpWriter};
use node_observer_agent::health::{HealthState, InMemoryHealthReporter};
use node_observer_agent::observer::AgentContext;
use node_observer_agent::observers::{AppObserver, DiskObserver, FabricSystemObserver, NodeObserver};
use node_observer_agent::probes::{FakeClusterQueryClient, FakeOsProbe};
use node_observer_agent::scheduler::Scheduler;
use node_observer_agent::sinks::{CsvSink, LogFileSink};
use node_observer_agent::telemetry::LoggingTelemetrySink;

fn init_logging(format: LogFormat, verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    if format == LogFormat::Json {
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                r#"{{"level":"{}","target":"{}","message":"{}"}}"#,
                record.level(),
                record.target(),
                record.args()
            )
        });
    }
    builder.init();
}

fn node_name(args: &Args) -> String {
    args.node_name.clone().unwrap_or_else(hostname_fallback)
}

fn hostname_fallback() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown-node".to_string())
}

fn build_context(args: &Args, cancellation: CancellationToken) -> Result<(AgentContext, Arc<InMemoryHealthReporter>)> {
    let env_vars: HashMap<String, String> = std::env::vars().collect();
    let config_path = std::path::Path::new(&args.config);
    let config = if config_path.exists() {
        AgentConfig::load(config_path, &env_vars).with_context(|| format!("loading configuration from {}", args.config))?
    } else {
        log::warn!("configuration file {} not found, using defaults", args.config);
        AgentConfig::default()
    };

    let reporter = Arc::new(InMemoryHealthReporter::new());
    let csv_sink = Some(Arc::new(CsvSink::new("logs/csv")));
    let log_file_sink = Some(Arc::new(LogFileSink::new("logs/health.ndjson")));
    let dump_writer = Arc::new(BudgetedDumpWriter::new(NoopDumpWriter::new(), config.dump.max_dumps_per_process.max(1)));

    let ctx = AgentContext {
        node_name: node_name(args),
        config: Arc::new(config),
        // Real cluster-query and OS-probe backends are external collaborators
        // (out of scope for this crate); the hosting environment is expected
        // to supply them. These stand in so the scheduler loop still runs.
        cluster_query: Arc::new(FakeClusterQueryClient::new()),
        os_probe: Arc::new(FakeOsProbe::new()),
        health_reporter: reporter.clone(),
        telemetry: Arc::new(LoggingTelemetrySink),
        dump_writer,
        csv_sink,
        log_file_sink,
        cancellation,
    };
    Ok((ctx, reporter))
}

fn build_scheduler(observer_filter: &[String]) -> Scheduler {
    let all: Vec<Box<dyn node_observer_agent::observer::Observer>> = vec![
        Box::new(NodeObserver::new("node")),
        Box::new(DiskObserver::new()),
        Box::new(FabricSystemObserver::new()),
        Box::new(AppObserver::new()),
    ];
    let selected = if observer_filter.is_empty() {
        all
    } else {
        all.into_iter()
            .filter(|o| observer_filter.iter().any(|f| f.as_str() == o.name()))
            .collect()
    };
    Scheduler::new(selected)
}

async fn wait_for_shutdown_signal(cancellation: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    log::info!("shutdown signal received, cancelling in-flight work");
    cancellation.cancel();
}

fn exit_code_for(state: Option<HealthState>) -> ExitCode {
    match state {
        None | Some(HealthState::Ok) => ExitCode::from(0),
        Some(HealthState::Warning) => ExitCode::from(1),
        Some(HealthState::Error) => ExitCode::from(2),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_format, args.verbose);

    let cancellation = CancellationToken::new();
    let (ctx, reporter) = match build_context(&args, cancellation.clone()) {
        Ok(v) => v,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::from(3);
        }
    };
    let scheduler = build_scheduler(&args.observers);

    match args.command {
        Commands::Run => {
            let shutdown = tokio::spawn(wait_for_shutdown_signal(cancellation.clone()));
            let result = scheduler.run_forever(&ctx).await;
            shutdown.abort();
            match result {
                Ok(()) => ExitCode::from(0),
                Err(e) => {
                    log::error!("agent stopped: {e}");
                    ExitCode::from(3)
                }
            }
        }
        Commands::Check { output, format } => {
            println!("{}", "Running a single observation pass...".cyan());
            match scheduler.run_once(&ctx).await {
                Ok(()) => {}
                Err(e) => {
                    log::error!("check pass failed: {e}");
                    return ExitCode::from(3);
                }
            }
            let reports = reporter.reports();
            let worst = reporter.worst_state();
            render_check_summary(&reports, worst);
            if let Some(path) = output {
                let rendered = render_report_file(&reports, format);
                if let Err(e) = std::fs::write(&path, rendered) {
                    log::warn!("failed to write check output to {path}: {e}");
                }
            }
            exit_code_for(worst)
        }
    }
}

fn render_report_file(reports: &[node_observer_agent::health::HealthReport], format: node_observer_agent::cli::CheckFormat) -> String {
    use node_observer_agent::cli::CheckFormat;
    match format {
        CheckFormat::Json => serde_json::to_string_pretty(reports).unwrap_or_default(),
        CheckFormat::Csv => {
            let mut out = String::from("timestamp,code,observer,property,state,message\n");
            for r in reports {
                out.push_str(&format!(
                    "{},{},{},{},{:?},\"{}\"\n",
                    r.timestamp.to_rfc3339(),
                    r.code,
                    r.observer_name,
                    r.property,
                    r.state,
                    r.message.replace('"', "\"\"")
                ));
            }
            out
        }
        CheckFormat::Md => {
            let mut out = String::from("# Node observation report\n\n| Code | Observer | Property | State | Message |\n|---|---|---|---|---|\n");
            for r in reports {
                out.push_str(&format!(
                    "| {} | {} | {} | {:?} | {} |\n",
                    r.code, r.observer_name, r.property, r.state, r.message
                ));
            }
            out
        }
    }
}

fn render_check_summary(reports: &[node_observer_agent::health::HealthReport], worst: Option<HealthState>) {
    if reports.is_empty() {
        println!("{}", "No health reports emitted — everything within thresholds.".green());
        return;
    }
    for report in reports {
        let line = format!("[{}] {} {}: {}", report.code, report.observer_name, report.property, report.message);
        match report.state {
            HealthState::Ok => println!("{}", line.green()),
            HealthState::Warning => println!("{}", line.yellow()),
            HealthState::Error => println!("{}", line.red()),
        }
    }
    match worst {
        Some(HealthState::Error) => println!("{}", "Result: ERROR".red().bold()),
        Some(HealthState::Warning) => println!("{}", "Result: WARNING".yellow().bold()),
        _ => println!("{}", "Result: OK".green().bold()),
    }
}
