mod app;
mod event;
mod ui;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use fleetsync::cache::{CacheResult, CacheSource};
use fleetsync::config::Config;
use fleetsync::logging::{self, LogTarget};
use fleetsync::remote::NewAnalysisJob;
use fleetsync::SyncSession;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "fleetsync")]
#[command(about = "Local-first sensor fleet monitor with analysis job tracking")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fleetsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Interactive dashboard (default)
  Watch,
  /// List sensors
  Sensors,
  /// Show readings of one sensor
  Readings {
    sensor_id: String,
    /// Inclusive lower bound, RFC 3339
    #[arg(long)]
    start: Option<DateTime<Utc>>,
    /// Inclusive upper bound, RFC 3339
    #[arg(long)]
    end: Option<DateTime<Utc>>,
  },
  /// Delete all readings of a sensor, remotely and locally
  DeleteReadings { sensor_id: String },
  /// List analysis jobs
  Jobs,
  /// Submit an analysis job
  CreateJob {
    sensor_id: String,
    analysis_type: String,
    /// Extra parameters as a JSON object
    #[arg(long)]
    params: Option<String>,
  },
  /// Delete an analysis job
  DeleteJob { analytics_id: String },
  /// Download the reading history of every sensor into the local cache
  Warm {
    /// Maximum parallel requests
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
  },
  /// Wipe the local cache
  ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let command = args.command.unwrap_or(Command::Watch);

  // The dashboard owns the terminal, so its logs go to a file
  let target = match command {
    Command::Watch => LogTarget::default_file()?,
    _ => LogTarget::Stderr,
  };
  let _log_guard = logging::init(target)?;

  let config = Config::load(args.config.as_deref())?;
  let token = Config::get_api_token()?;
  let session = SyncSession::open(&config, Some(token))?;

  match command {
    Command::Watch => {
      let mut app = app::App::new(session, config.api.url.clone());
      let result = app.run().await;
      app.shutdown().await;
      return result;
    }
    Command::Sensors => {
      let result = session.sensors().await?;
      print_source(&result);
      for sensor in &result.data {
        println!(
          "{:<24} {:<28} {:>6} {}",
          sensor.sensor_id,
          sensor.name,
          sensor
            .battery_level
            .map(|b| format!("{:.0}%", b))
            .unwrap_or_else(|| "-".into()),
          sensor.location.as_deref().unwrap_or("")
        );
      }
    }
    Command::Readings {
      sensor_id,
      start,
      end,
    } => {
      let result = session
        .readings(&sensor_id, start, end, &CancellationToken::new())
        .await?;
      print_source(&result);
      for reading in &result.data {
        println!(
          "{}  temp={}  humidity={}  soil={}  light={}",
          reading.timestamp.to_rfc3339(),
          fmt_value(reading.air_temperature),
          fmt_value(reading.air_humidity),
          fmt_value(reading.soil_moisture),
          fmt_value(reading.brightness),
        );
      }
    }
    Command::DeleteReadings { sensor_id } => {
      let deleted = session.delete_readings(&sensor_id).await?;
      println!("Deleted {} readings of {}", deleted, sensor_id);
    }
    Command::Jobs => {
      for job in session.list_jobs().await? {
        println!(
          "{:<24} {:<12} {:<16} {:<24} {}",
          job.analytics_id,
          job.status,
          job.analysis_type,
          job.sensor_id,
          job.updated_at.to_rfc3339()
        );
      }
    }
    Command::CreateJob {
      sensor_id,
      analysis_type,
      params,
    } => {
      let parameters = params
        .map(|raw| serde_json::from_str(&raw).map_err(|e| eyre!("Invalid --params JSON: {}", e)))
        .transpose()?;
      let job = session
        .create_job(&NewAnalysisJob {
          sensor_id,
          analysis_type,
          parameters,
        })
        .await?;
      println!("Created job {} ({})", job.analytics_id, job.status);
    }
    Command::DeleteJob { analytics_id } => {
      if session.delete_job(&analytics_id).await? {
        println!("Deleted job {}", analytics_id);
      } else {
        return Err(eyre!("Job {} was not deleted", analytics_id));
      }
    }
    Command::Warm { concurrency } => {
      let sensors = session.sensors().await?;
      let ids: Vec<String> = sensors.data.into_iter().map(|s| s.sensor_id).collect();
      let report = session.warm_readings(&ids, concurrency).await;
      println!("Cached readings for {} sensors", report.warmed);
      for (sensor_id, error) in &report.failed {
        eprintln!("  {}: {}", sensor_id, error);
      }
    }
    Command::ClearCache => {
      session.clear_cache().await?;
      println!("Local cache cleared");
    }
  }

  session.close().await;
  Ok(())
}

fn print_source<T>(result: &CacheResult<T>) {
  let when = result
    .cached_at
    .map(|at| at.to_rfc3339())
    .unwrap_or_default();
  match result.source {
    CacheSource::Network => {}
    CacheSource::Cache => eprintln!("(from local cache, {})", when),
    CacheSource::Offline => eprintln!("(API unreachable, showing cache from {})", when),
  }
}

fn fmt_value(value: Option<f64>) -> String {
  value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into())
}
