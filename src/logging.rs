use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const DEFAULT_CONSOLE_LEVEL: &str = "info";
pub const DEFAULT_FILE_LEVEL: &str = "debug";

#[derive(Clone, Debug)]
pub struct LogOptions {
    pub console_level: String,
    pub file_level: String,
    pub log_file: Option<String>,
    pub no_color: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            console_level: DEFAULT_CONSOLE_LEVEL.to_string(),
            file_level: DEFAULT_FILE_LEVEL.to_string(),
            log_file: None,
            no_color: false,
        }
    }
}

pub fn parse_level(raw: &str) -> Result<LevelFilter, String> {
    raw.trim()
        .to_lowercase()
        .parse::<LevelFilter>()
        .map_err(|_| "expected trace, debug, info, warn, error or off".to_string())
}

fn crate_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::default()
        .add_directive(LevelFilter::WARN.into())
        .add_directive(
            format!("xsprobe={level}")
                .parse()
                .unwrap_or_else(|_| LevelFilter::INFO.into()),
        )
}

/// Installs the console layer and, when a log file is set, a plain-text file layer.
///
/// `RUST_LOG` overrides the console level when present.
pub fn init(options: &LogOptions) -> Result<(), String> {
    let console_level = parse_level(&options.console_level)?;
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| crate_filter(console_level));
    let console = fmt::layer()
        .with_target(false)
        .with_ansi(!options.no_color)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let file = match options.log_file.as_deref() {
        Some(path) => {
            let level = parse_level(&options.file_level)?;
            let handle = open_log_file(Path::new(path))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(handle))
                    .with_filter(crate_filter(level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| format!("failed to initialize logging: {e}"))
}

fn open_log_file(path: &Path) -> Result<File, String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create log directory '{}': {e}", parent.display()))?;
    }
    File::create(path).map_err(|e| format!("failed to open log file '{}': {e}", path.display()))
}
