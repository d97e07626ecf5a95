//! Subscriber configuration and installation.
//!
//! A [`LogConfig`] describes where runtime events go and how they look.
//! [`setup_logging`] turns it into one global `tracing` subscriber: an
//! [`EnvFilter`] built from the base level plus per-target directives, and a
//! single fmt layer writing to stdout, stderr or a rolling file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::{self as tfmt, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::{TelemetryError, TelemetryResult};

/// Target name of the runtime core crate, for [`LogConfig::with_runtime_level`].
pub const RUNTIME_TARGET: &str = "trellis_plugins";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Base verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Scan and resolution detail.
    Trace,
    /// Per-candidate decisions.
    Debug,
    /// Lifecycle milestones.
    #[default]
    Info,
    /// Per-module failures.
    Warn,
    /// Fatal startup failures only.
    Error,
}

impl LogLevel {
    /// Lowercase name, as accepted by `EnvFilter`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    const fn filter(self) -> LevelFilter {
        match self {
            Self::Trace => LevelFilter::TRACE,
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(TelemetryError::UnknownValue {
                kind: "log level",
                value: s.to_owned(),
            }),
        }
    }
}

/// Event rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored; meant for a developer's terminal.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
    /// The fmt crate's default single-line layout.
    Full,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            "full" => Ok(Self::Full),
            other => Err(TelemetryError::UnknownValue {
                kind: "log format",
                value: other.to_owned(),
            }),
        }
    }
}

/// Where events are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Standard output.
    Stdout,
    /// Standard error.
    #[default]
    Stderr,
    /// Rolling files inside this directory.
    File(PathBuf),
}

/// How often a new log file is started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    /// One file per day.
    #[default]
    Daily,
    /// One file per hour.
    Hourly,
    /// One file per minute.
    Minutely,
    /// A single file.
    Never,
}

impl From<FileRotation> for Rotation {
    fn from(rotation: FileRotation) -> Self {
        match rotation {
            FileRotation::Daily => Self::DAILY,
            FileRotation::Hourly => Self::HOURLY,
            FileRotation::Minutely => Self::MINUTELY,
            FileRotation::Never => Self::NEVER,
        }
    }
}

/// Naming and retention of rolling log files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    /// File name prefix; files are named `<prefix>.<date>.log`.
    pub prefix: String,
    /// When to roll over.
    pub rotation: FileRotation,
    /// Oldest files beyond this count are deleted. `None` keeps everything.
    pub max_files: Option<usize>,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            prefix: "trellis".to_owned(),
            rotation: FileRotation::Daily,
            max_files: None,
        }
    }
}

/// Complete subscriber description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct LogConfig {
    /// Base level for every target without a directive.
    pub level: LogLevel,
    /// Rendering.
    pub format: LogFormat,
    /// Destination.
    pub target: LogTarget,
    /// Rolling file settings, used with [`LogTarget::File`].
    pub file: FileLogConfig,
    /// Prefix each event with a timestamp.
    pub timestamps: bool,
    /// Include the source file and line.
    pub source_location: bool,
    /// Include the emitting thread's id.
    pub thread_ids: bool,
    /// Emit span open and close events.
    pub span_events: bool,
    /// Color output.
    pub ansi: bool,
    /// Extra `EnvFilter` directives such as `trellis_plugins=debug`.
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            target: LogTarget::Stderr,
            file: FileLogConfig::default(),
            timestamps: true,
            source_location: false,
            thread_ids: false,
            span_events: false,
            ansi: true,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Defaults at the given base level.
    #[must_use]
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Change the rendering.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Change the destination.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Write rolling files into `directory`. Turns colors off.
    #[must_use]
    pub fn with_file_logging(
        mut self,
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
        rotation: FileRotation,
    ) -> Self {
        self.target = LogTarget::File(directory.into());
        self.file.prefix = prefix.into();
        self.file.rotation = rotation;
        self.ansi = false;
        self
    }

    /// Keep at most `count` rolled files.
    #[must_use]
    pub fn with_max_files(mut self, count: usize) -> Self {
        self.file.max_files = Some(count);
        self
    }

    /// Append a raw filter directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Set the runtime core's own level independently of the base level.
    #[must_use]
    pub fn with_runtime_level(self, level: LogLevel) -> Self {
        self.with_directive(format!("{RUNTIME_TARGET}={level}"))
    }

    /// Drop timestamps, e.g. when a supervisor adds its own.
    #[must_use]
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Include source file and line.
    #[must_use]
    pub fn with_file_info(mut self) -> Self {
        self.source_location = true;
        self
    }

    /// Log span open and close.
    #[must_use]
    pub fn with_span_events(mut self) -> Self {
        self.span_events = true;
        self
    }

    /// Plain output.
    #[must_use]
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    fn env_filter(&self) -> TelemetryResult<EnvFilter> {
        self.directives.iter().try_fold(
            EnvFilter::default().add_directive(self.level.filter().into()),
            |filter, raw| {
                let directive = raw.parse::<Directive>().map_err(|e| {
                    TelemetryError::InvalidDirective {
                        directive: raw.clone(),
                        message: e.to_string(),
                    }
                })?;
                Ok(filter.add_directive(directive))
            },
        )
    }

    fn layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let span_events = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = tfmt::layer()
            .with_writer(writer)
            .with_ansi(self.ansi)
            .with_file(self.source_location)
            .with_line_number(self.source_location)
            .with_thread_ids(self.thread_ids)
            .with_span_events(span_events);

        match (self.format, self.timestamps) {
            (LogFormat::Pretty, true) => layer.pretty().boxed(),
            (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
            (LogFormat::Compact, true) => layer.compact().boxed(),
            (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
            (LogFormat::Json, true) => layer.json().boxed(),
            (LogFormat::Json, false) => layer.json().without_time().boxed(),
            (LogFormat::Full, true) => layer.boxed(),
            (LogFormat::Full, false) => layer.without_time().boxed(),
        }
    }

    fn appender(&self, dir: &Path) -> TelemetryResult<RollingFileAppender> {
        std::fs::create_dir_all(dir).map_err(|source| TelemetryError::LogDirectory {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut builder = RollingFileAppender::builder()
            .rotation(self.file.rotation.into())
            .filename_prefix(&self.file.prefix)
            .filename_suffix("log");
        if let Some(count) = self.file.max_files {
            builder = builder.max_log_files(count);
        }
        builder
            .build(dir)
            .map_err(|e| TelemetryError::Appender(e.to_string()))
    }
}

#[cfg(feature = "config")]
impl LogConfig {
    /// Convert the `[logging]` section of the trellis configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::UnknownValue`] for an unrecognized level or
    /// format.
    pub fn from_section(section: &trellis_config::LoggingSection) -> TelemetryResult<Self> {
        Ok(Self {
            level: section.level.parse()?,
            format: section.format.parse()?,
            directives: section.directives.clone(),
            ..Self::default()
        })
    }
}

/// Install `config` as the global subscriber.
///
/// # Errors
///
/// Returns an error for an invalid directive, an unusable log directory, or
/// when a global subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.env_filter()?;
    let layer = match &config.target {
        LogTarget::Stdout => config.layer(std::io::stdout),
        LogTarget::Stderr => config.layer(std::io::stderr),
        LogTarget::File(dir) => config.layer(config.appender(dir)?),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}

/// Install the default subscriber: `info`, pretty, stderr.
///
/// # Errors
///
/// Returns an error when a global subscriber is already installed.
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_suit_an_interactive_host() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.target, LogTarget::Stderr);
        assert!(config.timestamps && config.ansi);
        assert!(config.file.max_files.is_none());
    }

    #[test]
    fn level_parsing_is_lenient_about_case() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" debug ".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        let err = "loud".parse::<LogLevel>().unwrap_err();
        assert_eq!(err.to_string(), "unknown log level 'loud'");
    }

    #[test]
    fn format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Full);
        assert!(matches!(
            "xml".parse::<LogFormat>(),
            Err(TelemetryError::UnknownValue { kind: "log format", .. })
        ));
    }

    #[test]
    fn runtime_level_becomes_a_directive() {
        let config = LogConfig::new(LogLevel::Warn)
            .with_runtime_level(LogLevel::Trace)
            .with_directive("hyper=off");
        assert_eq!(config.directives, ["trellis_plugins=trace", "hyper=off"]);
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn malformed_directive_is_reported() {
        let config = LogConfig::default().with_directive("[invalid=syntax");
        let err = config.env_filter().unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::InvalidDirective { ref directive, .. } if directive == "[invalid=syntax"
        ));
    }

    #[test]
    fn file_logging_turns_colors_off() {
        let config = LogConfig::default()
            .with_file_logging("/var/log/host", "host", FileRotation::Hourly)
            .with_max_files(7);
        assert_eq!(config.target, LogTarget::File(PathBuf::from("/var/log/host")));
        assert_eq!(config.file.prefix, "host");
        assert_eq!(config.file.rotation, FileRotation::Hourly);
        assert_eq!(config.file.max_files, Some(7));
        assert!(!config.ansi);
    }

    #[test]
    fn appender_creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs").join("runtime");
        let config = LogConfig::default().with_file_logging(&dir, "trellis", FileRotation::Never);

        config.appender(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn unusable_log_directory_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("logs");
        std::fs::write(&blocker, b"file").unwrap();
        let config = LogConfig::default();

        let err = config.appender(&blocker.join("nested")).unwrap_err();
        assert!(matches!(err, TelemetryError::LogDirectory { .. }));
    }

    #[test]
    fn config_round_trips_through_json_with_partial_input() {
        let parsed: LogConfig =
            serde_json::from_str(r#"{"level":"debug","format":"compact"}"#).unwrap();
        assert_eq!(parsed.level, LogLevel::Debug);
        assert_eq!(parsed.format, LogFormat::Compact);
        assert_eq!(parsed.target, LogTarget::Stderr);
        assert!(parsed.timestamps);

        let json = serde_json::to_value(&parsed).unwrap();
        assert_eq!(json["level"], "debug");
    }

    #[cfg(feature = "config")]
    #[test]
    fn section_conversion() {
        let section = trellis_config::LoggingSection {
            level: "debug".into(),
            format: "json".into(),
            directives: vec!["trellis_plugins=trace".into()],
        };
        let config = LogConfig::from_section(&section).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.directives, ["trellis_plugins=trace"]);

        let bad = trellis_config::LoggingSection {
            format: "yaml".into(),
            ..section
        };
        assert!(LogConfig::from_section(&bad).is_err());
    }
}
