//! Command-line interface definitions and parsing.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// What the relay does once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Expose the configured services over WebSocket
    Serve,
    /// Connect to a relay and log the subscribed events
    Connect,
}

/// Command-line arguments for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub mode: Mode,
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the bind address (`serve`)
    pub bind_address: Option<String>,
    /// Optional override for the server url (`connect`)
    pub url: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

fn command() -> Command {
    Command::new("ngevents-relay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Shares event emitters between processes over WebSocket")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("relay.toml")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .global(true),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("serve").about("Expose the configured services (default)").arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Bind address (e.g., 127.0.0.1:12345)"),
            ),
        )
        .subcommand(
            Command::new("connect").about("Subscribe to a relay and log its events").arg(
                Arg::new("url")
                    .short('u')
                    .long("url")
                    .value_name("URL")
                    .help("Server url (e.g., ws://127.0.0.1:12345)"),
            ),
        )
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        // global args propagate down into the subcommand matches
        let scoped = matches.subcommand().map_or(matches, |(_, sub)| sub);
        let (mode, bind_address, url) = match matches.subcommand() {
            Some(("connect", sub)) => (Mode::Connect, None, sub.get_one::<String>("url").cloned()),
            Some(("serve", sub)) => (Mode::Serve, sub.get_one::<String>("bind").cloned(), None),
            _ => (Mode::Serve, None, None),
        };

        Self {
            mode,
            config_path: PathBuf::from(
                scoped
                    .get_one::<String>("config")
                    .map_or("relay.toml", String::as_str),
            ),
            bind_address,
            url,
            log_level: scoped.get_one::<String>("log-level").cloned(),
            json_logs: scoped.get_flag("json-logs"),
        }
    }
}
