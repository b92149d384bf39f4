//! tracing subscriber setup for the CLI and the Lambda bootstrap
//!
//! Everything is written to stderr so stdout stays clean for definitions
//! and ARNs. Runner operations run inside spans; a span's close event
//! reports how long the backend round trip took.

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_tracing(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Colored output; off where logs are shipped to CloudWatch
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Configuration for the Lambda `bootstrap` binary.
    ///
    /// Level from `AWS_LAMBDA_LOG_LEVEL`, then `RUST_LOG`; unparsable values
    /// fall back to info.
    pub fn lambda() -> Self {
        let level = std::env::var("AWS_LAMBDA_LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok();
        Self::lambda_with_level(level.as_deref())
    }

    fn lambda_with_level(level: Option<&str>) -> Self {
        Self {
            level: level
                .and_then(|value| value.parse().ok())
                .unwrap_or(LogLevel::Info),
            format: LogFormat::Json,
            ansi: false,
        }
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(config.level.as_tracing())
        .with_ansi(config.ansi)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.finish())?,
    }
    Ok(())
}
