use clap::{ArgAction, Parser, builder::BoolishValueParser};
use ronin_core::DefenseConfig;
use ronin_core::alignment::DEFAULT_ALIGNMENT_THRESHOLD;
use ronin_core::framing::DEFAULT_INSTRUCTION_THRESHOLD;
use ronin_core::sequence::{DEFAULT_BURST_WINDOW, DEFAULT_MAX_HISTORY};
use ronin_mcp::DEFAULT_SERVER_NAME;
use ronin_mcp::ide_config::DEFENSE_ENTRY_NAME;
use ronin_mcp::server::DEFAULT_MCP_HTTP_ADDR;
use ronin_mcp::upstream::DEFAULT_UPSTREAM_URL;
use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser, Debug)]
#[command(name = "ronin-mcpd", version, about = "Ronin MCP defense proxy daemon.")]
#[allow(clippy::struct_excessive_bools)]
struct CliArgs {
    #[arg(long, env = "RONIN_UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL)]
    upstream_url: String,

    #[arg(long, env = "RONIN_SERVER_NAME", default_value = DEFAULT_SERVER_NAME)]
    server_name: String,

    #[arg(
        long = "stdio",
        env = "RONIN_ENABLE_STDIO",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    enable_stdio: bool,

    #[arg(
        long,
        env = "RONIN_MCP_SERVE",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    mcp_serve: bool,

    #[arg(long, env = "RONIN_MCP_HTTP_ADDR", default_value = DEFAULT_MCP_HTTP_ADDR)]
    mcp_http_addr: SocketAddr,

    #[arg(
        long,
        env = "RONIN_ALIGNMENT_THRESHOLD",
        default_value_t = DEFAULT_ALIGNMENT_THRESHOLD
    )]
    alignment_threshold: f64,

    #[arg(
        long,
        env = "RONIN_INSTRUCTION_THRESHOLD",
        default_value_t = DEFAULT_INSTRUCTION_THRESHOLD
    )]
    instruction_threshold: f64,

    #[arg(long, env = "RONIN_MAX_HISTORY", default_value_t = DEFAULT_MAX_HISTORY)]
    max_history: usize,

    #[arg(
        long,
        env = "RONIN_BURST_WINDOW_SECS",
        default_value_t = DEFAULT_BURST_WINDOW.as_secs_f64()
    )]
    burst_window_secs: f64,

    #[arg(
        long,
        env = "RONIN_STAMP",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    stamp: bool,

    #[arg(long, env = "RONIN_LOG", default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,

    /// Print the IDE registration JSON for the HTTP endpoint and exit.
    #[arg(long, default_value_t = false)]
    print_ide_config: bool,

    /// Existing IDE settings file to merge the registration into.
    #[arg(long, env = "RONIN_IDE_CONFIG")]
    ide_config: Option<PathBuf>,

    #[arg(long, env = "RONIN_IDE_ENTRY_NAME", default_value = DEFENSE_ENTRY_NAME)]
    ide_entry_name: String,

    /// Run the interactive sanitiser on stdin instead of serving.
    #[arg(long, default_value_t = false)]
    sanitise_repl: bool,
}

/// What the daemon does once configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    PrintIdeConfig { merge_into: Option<PathBuf> },
    SanitiseRepl,
}

/// Runtime configuration loaded from CLI arguments and environment variables.
#[derive(Debug, Clone)]
pub struct RoninConfig {
    pub upstream_url: String,
    pub server_name: String,
    pub enable_stdio: bool,
    pub mcp_serve: bool,
    pub mcp_http_addr: SocketAddr,
    pub defense: DefenseConfig,
    pub log_filter: String,
    pub ide_entry_name: String,
    pub mode: RunMode,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingSetting(&'static str),
    InvalidSetting { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSetting(name) => write!(f, "missing required setting: {name}"),
            Self::InvalidSetting { name, value } => {
                write!(f, "invalid {name} value: {value}")
            }
        }
    }
}

impl Error for ConfigError {}

impl RoninConfig {
    pub fn from_args() -> Result<Self, ConfigError> {
        let args = CliArgs::parse();
        Self::try_from(args)
    }
}

fn check_unit_interval(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidSetting {
            name,
            value: value.to_string(),
        })
    }
}

impl TryFrom<CliArgs> for RoninConfig {
    type Error = ConfigError;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let upstream_url = args.upstream_url.trim().to_string();
        if upstream_url.is_empty() {
            return Err(ConfigError::MissingSetting("RONIN_UPSTREAM_URL"));
        }
        if !(upstream_url.starts_with("http://") || upstream_url.starts_with("https://")) {
            return Err(ConfigError::InvalidSetting {
                name: "RONIN_UPSTREAM_URL",
                value: upstream_url,
            });
        }

        if args.server_name.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                name: "RONIN_SERVER_NAME",
                value: args.server_name,
            });
        }

        let alignment_threshold =
            check_unit_interval("RONIN_ALIGNMENT_THRESHOLD", args.alignment_threshold)?;
        let instruction_threshold =
            check_unit_interval("RONIN_INSTRUCTION_THRESHOLD", args.instruction_threshold)?;

        if args.max_history == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "RONIN_MAX_HISTORY",
                value: args.max_history.to_string(),
            });
        }

        let burst_window = Duration::try_from_secs_f64(args.burst_window_secs)
            .ok()
            .filter(|window| !window.is_zero())
            .ok_or_else(|| ConfigError::InvalidSetting {
                name: "RONIN_BURST_WINDOW_SECS",
                value: args.burst_window_secs.to_string(),
            })?;

        let mode = if args.sanitise_repl {
            RunMode::SanitiseRepl
        } else if args.print_ide_config {
            RunMode::PrintIdeConfig {
                merge_into: args.ide_config,
            }
        } else {
            RunMode::Serve
        };

        if mode == RunMode::Serve && !args.enable_stdio && !args.mcp_serve {
            return Err(ConfigError::MissingSetting(
                "RONIN_ENABLE_STDIO or RONIN_MCP_SERVE",
            ));
        }

        if args.ide_entry_name.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                name: "RONIN_IDE_ENTRY_NAME",
                value: args.ide_entry_name,
            });
        }

        let defense = DefenseConfig::default()
            .with_alignment_threshold(alignment_threshold)
            .with_instruction_threshold(instruction_threshold)
            .with_max_history(args.max_history)
            .with_burst_window(burst_window)
            .with_stamp(args.stamp);

        Ok(Self {
            upstream_url,
            server_name: args.server_name,
            enable_stdio: args.enable_stdio,
            mcp_serve: args.mcp_serve,
            mcp_http_addr: args.mcp_http_addr,
            defense,
            log_filter: args.log_filter,
            ide_entry_name: args.ide_entry_name,
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs {
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            enable_stdio: true,
            mcp_serve: false,
            mcp_http_addr: DEFAULT_MCP_HTTP_ADDR.parse().expect("valid MCP addr"),
            alignment_threshold: DEFAULT_ALIGNMENT_THRESHOLD,
            instruction_threshold: DEFAULT_INSTRUCTION_THRESHOLD,
            max_history: DEFAULT_MAX_HISTORY,
            burst_window_secs: DEFAULT_BURST_WINDOW.as_secs_f64(),
            stamp: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            print_ide_config: false,
            ide_config: None,
            ide_entry_name: DEFENSE_ENTRY_NAME.to_string(),
            sanitise_repl: false,
        }
    }

    #[test]
    fn defaults_front_the_hosted_upstream() {
        let config = RoninConfig::try_from(base_args()).expect("config should parse");

        assert_eq!(config.upstream_url, "https://ronin-mcp-v1.fastmcp.app/mcp");
        assert_eq!(config.mode, RunMode::Serve);
        assert!(config.enable_stdio);
        assert_eq!(config.defense, DefenseConfig::default());
    }

    #[test]
    fn cli_parses_long_flags() {
        let args = CliArgs::try_parse_from([
            "ronin-mcpd",
            "--stdio",
            "false",
            "--mcp-serve",
            "true",
            "--alignment-threshold",
            "0.25",
            "--burst-window-secs",
            "2.5",
        ])
        .expect("args should parse");
        let config = RoninConfig::try_from(args).expect("config should parse");

        assert!(!config.enable_stdio);
        assert!(config.mcp_serve);
        assert!((config.defense.alignment_threshold - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.defense.burst_window, Duration::from_millis(2500));
    }

    #[test]
    fn rejects_non_http_upstream() {
        let mut args = base_args();
        args.upstream_url = "ftp://example.com/mcp".to_string();
        assert!(matches!(
            RoninConfig::try_from(args),
            Err(ConfigError::InvalidSetting { name: "RONIN_UPSTREAM_URL", .. })
        ));
    }

    #[test]
    fn rejects_thresholds_outside_unit_interval() {
        let mut args = base_args();
        args.instruction_threshold = 1.5;
        assert!(matches!(
            RoninConfig::try_from(args),
            Err(ConfigError::InvalidSetting { name: "RONIN_INSTRUCTION_THRESHOLD", .. })
        ));
    }

    #[test]
    fn rejects_zero_history_and_window() {
        let mut args = base_args();
        args.max_history = 0;
        assert!(RoninConfig::try_from(args).is_err());

        let mut args = base_args();
        args.burst_window_secs = 0.0;
        assert!(RoninConfig::try_from(args).is_err());
    }

    #[test]
    fn serving_requires_a_transport() {
        let mut args = base_args();
        args.enable_stdio = false;
        assert!(matches!(
            RoninConfig::try_from(args),
            Err(ConfigError::MissingSetting(_))
        ));
    }

    #[test]
    fn one_shot_modes_skip_transport_check() {
        let mut args = base_args();
        args.enable_stdio = false;
        args.sanitise_repl = true;
        let config = RoninConfig::try_from(args).expect("config should parse");
        assert_eq!(config.mode, RunMode::SanitiseRepl);
    }
}
