//! Command-line interface of the development host.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Options that override the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the plugin data directory
    pub data_dir: Option<PathBuf>,
    /// Optional session script to replay
    pub script: Option<PathBuf>,
    /// Optional override for the log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("flats_host.toml")),
            data_dir: matches.get_one::<String>("data").map(PathBuf::from),
            script: matches.get_one::<String>("script").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

pub fn command() -> Command {
    Command::new("Flats Host")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runs the Flats plugin on a tick loop for local testing")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("flats_host.toml"),
        )
        .arg(
            Arg::new("data")
                .short('d')
                .long("data")
                .value_name("DIR")
                .help("Plugin data directory (settings.toml, flats.json)"),
        )
        .arg(
            Arg::new("script")
                .short('s')
                .long("script")
                .value_name("FILE")
                .help("Session script to replay (JSON lines)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_flags() {
        let matches = command().try_get_matches_from(["flats_host"]).unwrap();
        let args = CliArgs::from_matches(&matches);
        assert_eq!(args.config_path, PathBuf::from("flats_host.toml"));
        assert_eq!(args.data_dir, None);
        assert!(!args.json_logs);
    }

    #[test]
    fn flags_override() {
        let matches = command()
            .try_get_matches_from([
                "flats_host", "-c", "dev.toml", "--data", "run", "-s", "demo.jsonl", "-l", "debug",
                "--json-logs",
            ])
            .unwrap();
        let args = CliArgs::from_matches(&matches);
        assert_eq!(args.config_path, PathBuf::from("dev.toml"));
        assert_eq!(args.data_dir, Some(PathBuf::from("run")));
        assert_eq!(args.script, Some(PathBuf::from("demo.jsonl")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }
}
