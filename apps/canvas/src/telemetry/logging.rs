use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Overrides the computed filter entirely when set.
pub const LOG_FILTER_ENV: &str = "CANVAS_LOG_FILTER";
/// Lets socket and HTTP dependencies log at trace level too.
pub const TRACE_DEPS_ENV: &str = "CANVAS_TRACE_DEPS";

/// Target of the connection manager, whose trace output carries the dumps of
/// frames the codec rejected.
const FRAME_TARGET: &str = "canvas_client_core::session";
const CANVAS_TARGETS: [&str; 2] = ["canvas_client_core", "canvas"];
const NOISY_DEPENDENCIES: &[&str] = &[
    "hyper",
    "hyper_util",
    "tokio_tungstenite",
    "tungstenite",
    "reqwest",
    "rustls",
    "mio",
    "h2",
];

/// Frames longer than this are cut short in [`hexdump`]; a full snapshot can
/// run to megabytes.
const DUMP_LIMIT: usize = 256;
const DUMP_WIDTH: usize = 16;

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
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

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
    /// Trace the connection manager (rejected-frame dumps included) whatever
    /// `level` says.
    pub trace_frames: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

/// Filter directives for one run of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FilterPlan {
    canvas: LogLevel,
    trace_frames: bool,
    quiet_dependencies: bool,
}

impl FilterPlan {
    fn new(config: &LogConfig, allow_dependency_traces: bool) -> Self {
        Self {
            canvas: config.level,
            trace_frames: config.trace_frames,
            quiet_dependencies: config.level == LogLevel::Trace && !allow_dependency_traces,
        }
    }

    /// Everything outside the canvas crates stays at `info` or quieter.
    fn directives(&self) -> String {
        let baseline = self.canvas.min(LogLevel::Info);
        let mut directives = vec![baseline.as_str().to_owned()];
        if self.canvas > baseline {
            directives.extend(
                CANVAS_TARGETS
                    .iter()
                    .map(|target| format!("{target}={}", self.canvas.as_str())),
            );
        }
        if self.trace_frames && self.canvas < LogLevel::Trace {
            directives.push(format!("{FRAME_TARGET}=trace"));
        }
        if self.quiet_dependencies {
            directives.extend(NOISY_DEPENDENCIES.iter().map(|dep| format!("{dep}=info")));
        }
        directives.join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        match std::env::var(LOG_FILTER_ENV) {
            Ok(filter) => EnvFilter::new(filter),
            Err(_) => EnvFilter::new(self.directives()),
        }
    }
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let plan = FilterPlan::new(config, super::env_truthy(TRACE_DEPS_ENV).unwrap_or(false));
    let (writer, guard) = match &config.file {
        Some(path) => {
            let open = || -> std::io::Result<fs::File> {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                OpenOptions::new().create(true).append(true).open(path)
            };
            let file = open().map_err(|source| InitError::Io {
                path: path.clone(),
                source,
            })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let verbose = config.level >= LogLevel::Debug || config.trace_frames;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(plan.env_filter())
        .with_target(verbose)
        .with_thread_names(config.level >= LogLevel::Trace)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;
    let _ = GUARD.set(guard);

    tracing::debug!(level = config.level.as_str(), file = ?config.file, "logging ready");
    if plan.quiet_dependencies {
        tracing::debug!(
            "dependency traces held at info; set {TRACE_DEPS_ENV}=1 or {LOG_FILTER_ENV} to override"
        );
    }
    Ok(())
}

/// Offset, hex and ASCII columns, 16 bytes per row, cut off after
/// 256 bytes.
pub fn hexdump(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(DUMP_LIMIT)];
    let mut out: String = shown
        .chunks(DUMP_WIDTH)
        .enumerate()
        .map(|(row, chunk)| {
            let hex: Vec<String> = chunk.iter().map(|byte| format!("{byte:02x}")).collect();
            let ascii: String = chunk
                .iter()
                .map(|&byte| {
                    if byte.is_ascii_graphic() || byte == b' ' {
                        byte as char
                    } else {
                        '.'
                    }
                })
                .collect();
            format!(
                "{:04x}  {:<width$}  |{ascii}|\n",
                row * DUMP_WIDTH,
                hex.join(" "),
                width = DUMP_WIDTH * 3 - 1
            )
        })
        .collect();
    if bytes.len() > shown.len() {
        out.push_str(&format!("... {} more bytes\n", bytes.len() - shown.len()));
    }
    out
}
