// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use clap::{builder::ValueParser, Parser};
use std::{path::PathBuf, sync::LazyLock};

#[cfg(not(test))]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::parse);

#[cfg(test)]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::new_for_test);

#[derive(Debug, Parser)]
#[clap(
    name = "rustmailrelay",
    about = "A store-and-forward SMTP/POP3 relay: spool management, filter chain, \
    forward driver and POP3 view over a filesystem-backed message store.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Settings {
    /// Log level (default: "info")
    #[clap(long, default_value = "info", env, help = "Set the log level")]
    pub relay_log_level: String,

    /// Enable ANSI-colored logs (default: true)
    #[clap(long, default_value = "true", env, help = "Enable ANSI formatted logs")]
    pub relay_ansi_logs: bool,

    /// Enable log file output; otherwise logs go to stdout (default: false)
    #[clap(
        long,
        default_value = "false",
        env,
        help = "Enable log file output (otherwise logs go to stdout)"
    )]
    pub relay_log_to_file: bool,

    /// Enable JSON-formatted logs (default: false)
    #[clap(long, default_value = "false", env, help = "Enable JSON formatted logs")]
    pub relay_json_logs: bool,

    /// Maximum number of rotated server log files to retain (default: 5)
    #[clap(
        long,
        default_value = "5",
        env,
        help = "Set the maximum number of server log files"
    )]
    pub relay_max_server_log_files: usize,

    /// Directory for rolling log files, used only when `relay_log_to_file` is set.
    #[clap(
        long,
        default_value = "logs",
        env,
        help = "Set the log directory (used when log-to-file is enabled)"
    )]
    pub relay_log_dir: String,

    /// The spool directory: a single directory holding every `<id>.content`
    /// / `<id>.envelope*` pair, plus one sub-directory per pop-by-name user.
    #[clap(
        long,
        env,
        help = "Set the spool directory (must be an existing, absolute directory)",
        value_parser = ValueParser::new(|s: &str| {
            let path = PathBuf::from(s);
            if !path.is_absolute() {
                return Err("spool directory must be an absolute path".to_string());
            }
            if !path.exists() {
                return Err(format!("spool directory {:?} does not exist", path));
            }
            if !path.is_dir() {
                return Err(format!("spool path {:?} is not a directory", path));
            }
            Ok(s.to_string())
        })
    )]
    pub relay_spool_dir: String,

    /// Maximum content size in bytes accepted per message (0 = unlimited).
    #[clap(
        long,
        env,
        default_value = "0",
        help = "Maximum content size in bytes per message (0 = unlimited)"
    )]
    pub relay_max_message_size: u64,

    /// Enable per-user pop-by-name sub-directories under the spool.
    #[clap(
        long,
        env,
        default_value = "false",
        help = "Enable per-user pop-by-name sub-directories"
    )]
    pub relay_pop_by_name: bool,

    /// Auto-create a user's pop-by-name sub-directory on first authentication.
    #[clap(
        long,
        env,
        default_value = "true",
        help = "Auto-create pop-by-name sub-directories on first authentication"
    )]
    pub relay_pop_by_name_mkdir: bool,

    /// Default upstream SMTP host used when an envelope has neither
    /// `ForwardToAddress` nor `ForwardTo` set.
    #[clap(long, env, help = "Default upstream SMTP host")]
    pub relay_forward_default_host: Option<String>,

    /// Default upstream SMTP port.
    #[clap(long, env, default_value = "25", help = "Default upstream SMTP port")]
    pub relay_forward_default_port: u16,

    /// Forward driver tick interval, in seconds.
    #[clap(
        long,
        env,
        default_value = "10",
        help = "Forward driver tick interval in seconds",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub relay_forward_tick_interval_secs: u64,

    /// Per-filter execution timeout, in seconds.
    #[clap(
        long,
        env,
        default_value = "30",
        help = "Per-filter execution timeout in seconds"
    )]
    pub relay_filter_timeout_secs: u64,

    /// Ordered, comma-separated list of server-side (pre-commit) filters.
    /// Each entry is either an absolute path to an executable, or `net:host:port`
    /// for a network filter, or one of the built-ins `copy`, `msgid`, `mx`.
    #[clap(
        long,
        env,
        default_value = "",
        help = "Comma-separated ordered list of server-side filters",
        value_parser = ValueParser::new(|s: &str| -> Result<Vec<String>, String> {
            Ok(s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        })
    )]
    pub relay_server_filters: Vec<String>,

    /// Ordered, comma-separated list of client-side (pre-forward) filters.
    /// Same syntax as `relay_server_filters`.
    #[clap(
        long,
        env,
        default_value = "",
        help = "Comma-separated ordered list of client-side filters",
        value_parser = ValueParser::new(|s: &str| -> Result<Vec<String>, String> {
            Ok(s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        })
    )]
    pub relay_client_filters: Vec<String>,

    /// DNS nameserver addresses (`ip:port`) used by the mx-lookup filter;
    /// empty means the system resolver configuration is used.
    #[clap(
        long,
        env,
        default_value = "",
        help = "Comma-separated nameserver ip:port list for the mx-lookup filter",
        value_parser = ValueParser::new(|s: &str| -> Result<Vec<String>, String> {
            Ok(s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        })
    )]
    pub relay_nameservers: Vec<String>,
}

impl Settings {
    #[cfg(test)]
    fn new_for_test() -> Self {
        Self {
            relay_log_level: "info".to_string(),
            relay_ansi_logs: false,
            relay_log_to_file: false,
            relay_json_logs: false,
            relay_max_server_log_files: 5,
            relay_log_dir: std::env::temp_dir().to_string_lossy().to_string(),
            relay_spool_dir: std::env::temp_dir().to_string_lossy().to_string(),
            relay_max_message_size: 0,
            relay_pop_by_name: false,
            relay_pop_by_name_mkdir: true,
            relay_forward_default_host: None,
            relay_forward_default_port: 25,
            relay_forward_tick_interval_secs: 10,
            relay_filter_timeout_secs: 30,
            relay_server_filters: Vec::new(),
            relay_client_filters: Vec::new(),
            relay_nameservers: Vec::new(),
        }
    }
}
