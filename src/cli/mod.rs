//! Command-line surface (C13): `run` starts the continuous scheduler loop,
//! `check` performs one scheduler pass and exits with a status reflecting
//! the worst health state observed.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "node-observer-agent", version, about = "Per-node resource observation agent")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the agent configuration file.
    #[arg(long, global = true, default_value = "config/settings.json")]
    pub config: String,

    /// Node identity to report health against. Defaults to the machine hostname.
    #[arg(long, global = true)]
    pub node_name: Option<String>,

    /// Restrict the run to a comma-separated subset of observer names.
    #[arg(long, global = true, value_delimiter = ',')]
    pub observers: Vec<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the scheduler loop until interrupted.
    Run,
    /// Run one scheduler pass and exit with a status code for the worst
    /// health state observed: 0 Ok, 1 Warning, 2 Error, 3 agent failure.
    Check {
        /// Write the pass's health reports to this path, rendered per `--format`.
        #[arg(long)]
        output: Option<String>,

        /// Report file format when `--output` is set. The console summary is
        /// always colorized text regardless of this choice.
        #[arg(long, value_enum, default_value_t = CheckFormat::Md)]
        format: CheckFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CheckFormat {
    Md,
    Json,
    Csv,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_subcommand_parses_with_defaults() {
        let args = Args::parse_from(["node-observer-agent", "run"]);
        assert!(matches!(args.command, Commands::Run));
        assert_eq!(args.config, "config/settings.json");
    }

    #[test]
    fn check_subcommand_parses_output_and_format() {
        let args = Args::parse_from([
            "node-observer-agent",
            "check",
            "--output",
            "report.json",
            "--format",
            "json",
        ]);
        match args.command {
            Commands::Check { output, format } => {
                assert_eq!(output.as_deref(), Some("report.json"));
                assert_eq!(format, CheckFormat::Json);
            }
            _ => panic!("expected Check"),
        }
    }

    #[test]
    fn check_format_defaults_to_md() {
        let args = Args::parse_from(["node-observer-agent", "check"]);
        match args.command {
            Commands::Check { format, .. } => assert_eq!(format, CheckFormat::Md),
            _ => panic!("expected Check"),
        }
    }

    #[test]
    fn check_format_accepts_csv() {
        let args = Args::parse_from(["node-observer-agent", "check", "--format", "csv"]);
        match args.command {
            Commands::Check { format, .. } => assert_eq!(format, CheckFormat::Csv),
            _ => panic!("expected Check"),
        }
    }

    #[test]
    fn observers_filter_splits_on_comma() {
        let args = Args::parse_from(["node-observer-agent", "--observers", "NodeObserver,DiskObserver", "run"]);
        assert_eq!(args.observers, vec!["NodeObserver", "DiskObserver"]);
    }
}
