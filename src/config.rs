use std::fs::read_to_string;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
    pub path: Option<PathBuf>,
}

/// Unix socket paths and the home/dot-dir realm the daemon runs under
/// (spec.md §6.4's `$DOT_DIR/mixer.$USER.{ws,cons,lock}`).
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    #[serde(default = "Server::home")]
    pub home: PathBuf,
    #[serde(default = "Server::dot_dir")]
    pub dot_dir: PathBuf,
    #[serde(default)]
    pub console: bool,
    #[serde(default)]
    pub local_console: bool,
}

impl Server {
    fn home() -> PathBuf {
        std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/"))
    }

    fn dot_dir() -> PathBuf {
        Self::home().join(".mixer")
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            home: Self::home(),
            dot_dir: Self::dot_dir(),
            console: false,
            local_console: false,
        }
    }
}

/// Embedded relational Store location (spec §3.6, §6.5).
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    #[serde(default)]
    pub no_db: bool,
    pub db: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { no_db: false, db: None }
    }
}

/// SSH-session-layer defaults (spec §4.5 Session open).
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct SshConfig {
    #[serde(default = "SshConfig::keep_alive")]
    pub keep_alive: u32,
    #[serde(default)]
    pub use_known_hosts: bool,
    #[serde(default = "SshConfig::use_agent")]
    pub use_agent: bool,
}

impl SshConfig {
    fn keep_alive() -> u32 {
        30
    }

    fn use_agent() -> bool {
        true
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            keep_alive: Self::keep_alive(),
            use_known_hosts: false,
            use_agent: Self::use_agent(),
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub log: Log,
}

/// Mixer's CLI flags (spec.md §6.4, unchanged flag set).
#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    #[arg(short, long)]
    pub console: bool,
    #[arg(long)]
    pub db: Option<PathBuf>,
    #[arg(long)]
    pub debug: bool,
    #[arg(long = "dot-dir")]
    pub dot_dir: Option<PathBuf>,
    #[arg(long)]
    pub fork: bool,
    #[arg(long)]
    pub home: Option<PathBuf>,
    #[arg(short, long = "keep-alive")]
    pub keep_alive: Option<u32>,
    #[arg(long = "local-console")]
    pub local_console: bool,
    #[arg(long)]
    pub log: Option<PathBuf>,
    #[arg(long)]
    pub login: Option<String>,
    #[arg(long = "no-console")]
    pub no_console: bool,
    #[arg(long = "no-db")]
    pub no_db: bool,
    #[arg(long)]
    pub password: bool,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub server: Option<String>,
    #[arg(short = 'K', long = "use-known-hosts")]
    pub use_known_hosts: bool,
    #[arg(long)]
    pub verbose: bool,

    /// A config file is optional; every setting has a CLI/default fallback,
    /// unlike the teacher's single mandatory `--config`.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// The subset of CLI flags that select a one-shot direct connection
/// (`mixer --server host --login user`) rather than daemon mode, kept
/// out of [`Config`] since they describe an invocation, not persistent
/// state (spec.md §6.4's flag list does not distinguish the two, but
/// `server.c`'s CLI entry point does — it dispatches to either the
/// daemon loop or a single-target connect path).
#[derive(Debug, Clone, Default)]
pub struct DirectConnect {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub login: Option<String>,
    pub password: bool,
    pub fork: bool,
}

impl Config {
    /// Loads a config file if `--config` names one, then overlays CLI
    /// flags on top (CLI wins), mirroring the teacher's `Config::load`
    /// but generalized since mixer's flag set outgrew a single
    /// mandatory `--config` (see DESIGN.md's Open Question resolution).
    /// Returns the direct-connect flags alongside the daemon Config so
    /// `main.rs` can choose which mode to run.
    pub fn load() -> Result<(Self, DirectConnect)> {
        let cli = Cli::parse();

        let mut config = match &cli.config {
            Some(path) => toml::from_str::<Config>(&read_to_string(path)?)?,
            None => Config::default(),
        };

        if let Some(home) = cli.home {
            config.server.home = home;
        }
        if let Some(dot_dir) = cli.dot_dir {
            config.server.dot_dir = dot_dir;
        }
        config.server.console = config.server.console || cli.console;
        config.server.local_console = config.server.local_console || cli.local_console;
        if cli.no_console {
            config.server.console = false;
        }

        if let Some(db) = cli.db {
            config.store.db = Some(db);
        }
        config.store.no_db = config.store.no_db || cli.no_db;

        if let Some(keep_alive) = cli.keep_alive {
            config.ssh.keep_alive = keep_alive;
        }
        config.ssh.use_known_hosts = config.ssh.use_known_hosts || cli.use_known_hosts;

        if let Some(log_path) = cli.log {
            config.log.path = Some(log_path);
        }
        if cli.debug {
            config.log.level = LogLevel::Debug;
        }
        if cli.verbose {
            config.log.level = LogLevel::Trace;
        }

        let direct = DirectConnect {
            server: cli.server,
            port: cli.port,
            login: cli.login,
            password: cli.password,
            fork: cli.fork,
        };

        Ok((config, direct))
    }
}
