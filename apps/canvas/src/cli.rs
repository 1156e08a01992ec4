use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "canvas",
    about = "Follow and draw on a shared pixel canvas",
    author,
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "CANVAS_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "CANVAS_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,

    #[arg(
        long = "trace-frames",
        global = true,
        env = "CANVAS_TRACE_FRAMES",
        help = "Trace connection events and dump rejected frames regardless of --log-level"
    )]
    pub trace_frames: bool,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
            trace_frames: self.trace_frames,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the canvas and report grid and viewer changes
    Watch(WatchArgs),
    /// Place one pixel through the HTTP API
    Draw(DrawArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    #[arg(
        long = "config",
        value_name = "FILE",
        env = "CANVAS_CONFIG",
        conflicts_with = "config_url",
        help = "Read the client configuration from a JSON file"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "config-url",
        value_name = "URL",
        env = "CANVAS_CONFIG_URL",
        help = "Fetch the client configuration from the server (falls back to defaults)"
    )]
    pub config_url: Option<String>,

    #[arg(
        long = "token",
        value_name = "TOKEN",
        env = "CANVAS_TOKEN",
        hide_env_values = true,
        help = "Session token; the public token is used when auth is disabled"
    )]
    pub token: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(
        long = "report-interval",
        value_name = "SECS",
        default_value_t = 5,
        help = "Seconds between grid summaries"
    )]
    pub report_interval: u64,
}

#[derive(Args, Debug, Clone)]
pub struct DrawArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    pub x: u32,
    pub y: u32,
    /// Palette index
    pub color: u8,
}
