// Command line arguments of the pulse trigger

use clap::{Parser, ValueEnum};
use common::config::{DEFAULT_COMMAND_CONFIG_PATH, DEFAULT_TRIGGER_CONFIG_PATH};
use common::telemetry::LogFormat;
use std::path::PathBuf;

/// Periodically publish Hasal test tasks to the pulse queue.
#[derive(Debug, Clone, Parser)]
#[command(name = "pulse-trigger", version, long_about = None)]
pub struct CliArgs {
    /// Trigger config: broker credentials, log filters and B2 bucket
    #[arg(long, value_name = "PATH", default_value = DEFAULT_TRIGGER_CONFIG_PATH)]
    pub config: PathBuf,

    /// Command config: the jobs to trigger and their commands
    #[arg(long, value_name = "PATH", default_value = DEFAULT_COMMAND_CONFIG_PATH)]
    pub cmd_config: PathBuf,

    /// Purge pending tasks of every configured topic before the first dispatch
    #[arg(long)]
    pub clean: bool,

    /// Do not dispatch on startup, wait one interval first
    #[arg(long)]
    pub skip_first_query: bool,

    /// Base log level. `RUST_LOG` takes precedence when set.
    #[arg(long, value_enum, value_name = "LEVEL", default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Text)]
    pub log_format: OutputFormat,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<OutputFormat> for LogFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Text => LogFormat::Text,
            OutputFormat::Json => LogFormat::Json,
        }
    }
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["pulse-trigger"]).unwrap();
        assert_eq!(args.config, PathBuf::from("configs/trigger_config.json"));
        assert_eq!(args.cmd_config, PathBuf::from("configs/cmd_config.json"));
        assert!(!args.clean);
        assert!(!args.skip_first_query);
        assert_eq!(args.log_level, LogLevel::Info);
        assert_eq!(args.log_format, OutputFormat::Text);
    }

    #[test]
    fn test_all_flags() {
        let args = CliArgs::try_parse_from([
            "pulse-trigger",
            "--config",
            "/etc/pulse/trigger.json",
            "--cmd-config",
            "/etc/pulse/cmd.json",
            "--clean",
            "--skip-first-query",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(args.config, PathBuf::from("/etc/pulse/trigger.json"));
        assert_eq!(args.cmd_config, PathBuf::from("/etc/pulse/cmd.json"));
        assert!(args.clean);
        assert!(args.skip_first_query);
        assert_eq!(args.log_level.as_str(), "debug");
        assert_eq!(LogFormat::from(args.log_format), LogFormat::Json);
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert!(CliArgs::try_parse_from(["pulse-trigger", "--log-format", "xml"]).is_err());
    }
}
