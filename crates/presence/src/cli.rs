//! Command-line interface for the presence relay.

use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// Every option except the config path overrides the matching setting in the
/// configuration file.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the pointer pool size (0 disables it)
    pub num_pointers: Option<usize>,
}

impl CliArgs {
    /// Parses the process arguments.
    pub fn parse() -> Self {
        Self::from_matches(build_command().get_matches())
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            num_pointers: matches.get_one::<usize>("pointers").copied(),
        }
    }
}

fn build_command() -> Command {
    Command::new("Presence Relay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time presence relay for shared multiuser experiences")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 0.0.0.0:8080)"),
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
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("pointers")
                .short('p')
                .long("pointers")
                .value_name("COUNT")
                .help("Pointer pool size; 0 identifies clients by slot")
                .value_parser(value_parser!(usize)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::from_matches(build_command().get_matches_from(args))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["presence"]);
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert!(args.bind_address.is_none());
        assert!(args.log_level.is_none());
        assert!(!args.json_logs);
        assert!(args.num_pointers.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = parse(&[
            "presence",
            "-c",
            "relay.toml",
            "--bind",
            "0.0.0.0:9000",
            "--log-level",
            "debug",
            "--json-logs",
            "--pointers",
            "0",
        ]);
        assert_eq!(args.config_path, PathBuf::from("relay.toml"));
        assert_eq!(args.bind_address.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.num_pointers, Some(0));
    }

    #[test]
    fn test_pointers_must_be_numeric() {
        let result = build_command().try_get_matches_from(["presence", "--pointers", "many"]);
        assert!(result.is_err());
    }
}
