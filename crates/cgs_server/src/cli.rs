//! Command-line argument parsing for the server binary.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command line arguments. Every option here overrides the matching
/// field of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub plugin_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub json_logs: bool,
    pub tick_rate: Option<u32>,
}

impl CliArgs {
    pub fn parse() -> Self {
        let matches = Command::new("cgs-server")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Unified game server with ECS and plugin architecture")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.yaml"),
            )
            .arg(
                Arg::new("plugins")
                    .short('p')
                    .long("plugins")
                    .value_name("DIR")
                    .help("Plugin directory path"),
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
            .arg(
                Arg::new("tick-rate")
                    .short('t')
                    .long("tick-rate")
                    .value_name("HZ")
                    .help("Simulation tick rate in Hz")
                    .value_parser(clap::value_parser!(u32)),
            )
            .get_matches();

        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.yaml")),
            plugin_dir: matches.get_one::<String>("plugins").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            tick_rate: matches.get_one::<u32>("tick-rate").copied(),
        }
    }
}
