use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

fn default_max_files() -> usize {
    2
}

/// Logging setup for the demo binaries and embedding applications.
///
/// Without a `file_dir` everything goes to stdout; with one, output rolls
/// into files under that directory and the returned guard must be held for
/// the process lifetime so buffered lines are flushed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggerConfig {
    pub level: String,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    /// "minutely", "hourly" or "daily" (the default).
    pub rotation: Option<String>,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl LoggerConfig {
    /// Reads LOOPMQ_LOG_LEVEL, LOOPMQ_LOG_DIR, LOOPMQ_LOG_PREFIX,
    /// LOOPMQ_LOG_ROTATION and LOOPMQ_LOG_MAX_FILES. Unset or unparsable
    /// variables fall back to the defaults.
    pub fn from_env() -> Self {
        let max_files = std::env::var("LOOPMQ_LOG_MAX_FILES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_max_files);

        Self {
            level: std::env::var("LOOPMQ_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            file_dir: std::env::var("LOOPMQ_LOG_DIR").ok(),
            file_prefix: std::env::var("LOOPMQ_LOG_PREFIX").ok(),
            rotation: std::env::var("LOOPMQ_LOG_ROTATION").ok(),
            max_files,
        }
    }

    fn rotation(&self) -> Rotation {
        match self.rotation.as_deref() {
            Some("minutely") => Rotation::MINUTELY,
            Some("hourly") => Rotation::HOURLY,
            _ => Rotation::DAILY,
        }
    }

    pub fn init(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let level = Level::from_str(&self.level).unwrap_or(Level::INFO);

        let Some(dir) = self.file_dir.as_deref() else {
            let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
            return Ok(None);
        };

        let appender: RollingFileAppender = RollingFileAppender::builder()
            .rotation(self.rotation())
            .max_log_files(self.max_files)
            .filename_prefix(self.file_prefix.as_deref().unwrap_or("loopmq"))
            .build(dir)
            .with_context(|| format!("failed to create rolling appender in {}", dir))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(writer)
            .try_init();

        tracing::info!(dir, rotation = ?self.rotation, "logging to rolling files");
        Ok(Some(guard))
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            file_prefix: None,
            rotation: None,
            max_files: default_max_files(),
        }
    }
}
