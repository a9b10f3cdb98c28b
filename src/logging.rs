//! Tracing subscriber setup.
//!
//! The dashboard owns the terminal, so it logs to a daily rolling file.
//! Plain subcommands log to stderr.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "FLEETSYNC_LOG";

pub enum LogTarget {
  Stderr,
  /// Daily rolling files in this directory
  File(PathBuf),
}

impl LogTarget {
  /// Rolling file target under the platform data directory.
  pub fn default_file() -> Result<Self> {
    let dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory for logs"))?;
    Ok(LogTarget::File(dir.join("fleetsync").join("logs")))
  }
}

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until exit, otherwise buffered file output
/// is lost.
pub fn init(target: LogTarget) -> Result<Option<WorkerGuard>> {
  match target {
    LogTarget::Stderr => {
      tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(None)
    }
    LogTarget::File(dir) => {
      std::fs::create_dir_all(&dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(&dir, "fleetsync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(Some(guard))
    }
  }
}
