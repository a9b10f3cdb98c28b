//! Adaptive background polling of analysis jobs.
//!
//! The poller lists jobs, notifies once per observed status transition, and
//! picks its next delay from what it saw: the short active interval while any
//! job is pending or processing, the regular interval otherwise or after a
//! failed fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::remote::{AnalysisJob, JobStatus, RemoteService};

/// Poll cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
  /// Delay while any job is still running
  pub active_interval: Duration,
  /// Delay when everything is settled, and after failures
  pub regular_interval: Duration,
}

impl Default for PollerConfig {
  fn default() -> Self {
    Self {
      active_interval: Duration::from_secs(5),
      regular_interval: Duration::from_secs(30),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
  /// Started, first fetch not finished yet
  Idle,
  Regular,
  Active,
  Stopped,
}

/// What the poller will do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
  pub phase: PollPhase,
  pub next_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
  Success,
  Error,
  Info,
}

impl NotificationLevel {
  fn for_status(status: JobStatus) -> Self {
    match status {
      JobStatus::Completed => NotificationLevel::Success,
      JobStatus::Failed => NotificationLevel::Error,
      JobStatus::Pending | JobStatus::Processing => NotificationLevel::Info,
    }
  }
}

/// One observed job status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub analytics_id: String,
  pub analysis_type: String,
  pub sensor_id: String,
  pub from: JobStatus,
  pub to: JobStatus,
  pub level: NotificationLevel,
}

impl Notification {
  pub fn message(&self) -> String {
    let what = format!("{} analysis for {}", self.analysis_type, self.sensor_id);
    match self.to {
      JobStatus::Completed => format!("{} completed", what),
      JobStatus::Failed => format!("{} failed", what),
      JobStatus::Processing => format!("{} is processing", what),
      JobStatus::Pending => format!("{} is pending again", what),
    }
  }
}

/// Remembers the last seen status of every job.
#[derive(Debug, Default)]
pub struct StatusNotifier {
  previous: HashMap<String, JobStatus>,
}

impl StatusNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  /// Notifications for jobs whose status differs from the previous snapshot.
  ///
  /// Jobs seen for the first time are recorded without a notification. The
  /// previous snapshot is then replaced by `jobs` as a whole.
  pub fn diff(&mut self, jobs: &[AnalysisJob]) -> Vec<Notification> {
    let notifications = jobs
      .iter()
      .filter_map(|job| {
        let from = *self.previous.get(&job.analytics_id)?;
        (from != job.status).then(|| Notification {
          analytics_id: job.analytics_id.clone(),
          analysis_type: job.analysis_type.clone(),
          sensor_id: job.sensor_id.clone(),
          from,
          to: job.status,
          level: NotificationLevel::for_status(job.status),
        })
      })
      .collect();

    self.previous = jobs
      .iter()
      .map(|job| (job.analytics_id.clone(), job.status))
      .collect();

    notifications
  }

  pub fn tracked(&self) -> usize {
    self.previous.len()
  }
}

/// Result of feeding one successful fetch into [`PollerState`].
#[derive(Debug, Clone)]
pub struct CycleOutcome {
  pub next_delay: Duration,
  pub notifications: Vec<Notification>,
  /// Whether the held job list was replaced
  pub changed: bool,
}

/// The poller's decision logic, independent of timers and tasks.
#[derive(Debug)]
pub struct PollerState {
  config: PollerConfig,
  notifier: StatusNotifier,
  jobs: Vec<AnalysisJob>,
  phase: PollPhase,
}

impl PollerState {
  pub fn new(config: PollerConfig) -> Self {
    Self {
      config,
      notifier: StatusNotifier::new(),
      jobs: Vec::new(),
      phase: PollPhase::Idle,
    }
  }

  pub fn jobs(&self) -> &[AnalysisJob] {
    &self.jobs
  }

  pub fn phase(&self) -> PollPhase {
    self.phase
  }

  pub fn on_success(&mut self, jobs: Vec<AnalysisJob>) -> CycleOutcome {
    // Diff against what was fetched, whether or not the held list changes
    let notifications = self.notifier.diff(&jobs);

    self.phase = if jobs.iter().any(|job| job.status.is_active()) {
      PollPhase::Active
    } else {
      PollPhase::Regular
    };

    let changed = jobs != self.jobs;
    if changed {
      self.jobs = jobs;
    }

    CycleOutcome {
      next_delay: self.interval(),
      notifications,
      changed,
    }
  }

  /// A failed fetch keeps the held jobs and falls back to the regular interval.
  pub fn on_failure(&mut self) -> Duration {
    self.phase = PollPhase::Regular;
    self.interval()
  }

  fn interval(&self) -> Duration {
    match self.phase {
      PollPhase::Active => self.config.active_interval,
      _ => self.config.regular_interval,
    }
  }
}

/// Background job poller.
///
/// Dropping the poller stops it. A restarted poller begins with an empty
/// status history, so jobs that already existed do not notify.
pub struct JobPoller {
  cancel: CancellationToken,
  wake: Arc<Notify>,
  handle: JoinHandle<()>,
  jobs: watch::Receiver<Vec<AnalysisJob>>,
  schedule: watch::Receiver<Schedule>,
  notifications: Option<mpsc::UnboundedReceiver<Notification>>,
}

impl JobPoller {
  /// Spawn the polling task. The first fetch happens immediately.
  pub fn start(remote: Arc<dyn RemoteService>, config: PollerConfig) -> Self {
    let cancel = CancellationToken::new();
    let wake = Arc::new(Notify::new());
    let (jobs_tx, jobs_rx) = watch::channel(Vec::new());
    let (schedule_tx, schedule_rx) = watch::channel(Schedule {
      phase: PollPhase::Idle,
      next_delay: Duration::ZERO,
    });
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();

    info!(
      active_secs = config.active_interval.as_secs_f64(),
      regular_secs = config.regular_interval.as_secs_f64(),
      "Starting job poller"
    );

    let handle = tokio::spawn(run_poller(
      remote,
      PollerState::new(config),
      cancel.clone(),
      Arc::clone(&wake),
      jobs_tx,
      schedule_tx,
      notify_tx,
    ));

    Self {
      cancel,
      wake,
      handle,
      jobs: jobs_rx,
      schedule: schedule_rx,
      notifications: Some(notify_rx),
    }
  }

  /// Latest job list; only updated when it actually changes.
  pub fn jobs(&self) -> watch::Receiver<Vec<AnalysisJob>> {
    self.jobs.clone()
  }

  pub fn schedule(&self) -> watch::Receiver<Schedule> {
    self.schedule.clone()
  }

  /// Take the notification stream. Only the first caller gets it.
  pub fn take_notifications(&mut self) -> Option<mpsc::UnboundedReceiver<Notification>> {
    self.notifications.take()
  }

  /// Skip the rest of the current delay and poll again.
  pub fn poll_now(&self) {
    self.wake.notify_one();
  }

  /// Signal the polling task to stop. Idempotent.
  pub fn stop(&self) {
    self.cancel.cancel();
  }

  pub fn is_running(&self) -> bool {
    !self.handle.is_finished()
  }

  /// Stop and wait for the polling task to exit.
  pub async fn shutdown(mut self) {
    self.cancel.cancel();
    if let Err(e) = (&mut self.handle).await {
      warn!(error = %e, "Job poller task ended abnormally");
    }
  }
}

impl Drop for JobPoller {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

async fn run_poller(
  remote: Arc<dyn RemoteService>,
  mut state: PollerState,
  cancel: CancellationToken,
  wake: Arc<Notify>,
  jobs_tx: watch::Sender<Vec<AnalysisJob>>,
  schedule_tx: watch::Sender<Schedule>,
  notify_tx: mpsc::UnboundedSender<Notification>,
) {
  loop {
    let fetched = tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      result = remote.list_jobs() => result,
    };

    let delay = match fetched {
      Ok(jobs) => {
        let outcome = state.on_success(jobs);
        for notification in outcome.notifications {
          info!(
            job = %notification.analytics_id,
            from = %notification.from,
            to = %notification.to,
            "Job status changed"
          );
          // Nobody listening is fine
          let _ = notify_tx.send(notification);
        }
        if outcome.changed {
          jobs_tx.send_replace(state.jobs().to_vec());
        }
        outcome.next_delay
      }
      Err(e) => {
        warn!(error = %e, "Job poll failed");
        state.on_failure()
      }
    };

    debug!(phase = ?state.phase(), delay_ms = delay.as_millis() as u64, "Next job poll scheduled");
    schedule_tx.send_replace(Schedule {
      phase: state.phase(),
      next_delay: delay,
    });

    tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      _ = wake.notified() => debug!("Early job poll requested"),
      _ = tokio::time::sleep(delay) => {}
    }
  }

  schedule_tx.send_replace(Schedule {
    phase: PollPhase::Stopped,
    next_delay: Duration::ZERO,
  });
  info!("Job poller stopped");
}
