use crate::event::{Event, EventHandler};
use crate::ui;
use chrono::Utc;
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use fleetsync::cache::{CacheResult, CacheSource};
use fleetsync::poller::{NotificationLevel, Schedule};
use fleetsync::query::Query;
use fleetsync::remote::{AnalysisJob, ReadingRecord, SensorRecord};
use fleetsync::SyncSession;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Request session of the readings pane
const READINGS_SESSION: &str = "readings-panel";

/// How far back the readings pane looks
const READINGS_WINDOW_HOURS: i64 = 24;

pub type ReadingsQuery = Query<CacheResult<Vec<ReadingRecord>>>;

/// Line shown in the status bar until replaced
#[derive(Debug, Clone)]
pub struct Notice {
  pub level: NotificationLevel,
  pub text: String,
}

/// Main application state
pub struct App {
  session: SyncSession,
  api_url: String,

  sensors: Vec<SensorRecord>,
  sensors_source: Option<CacheSource>,
  sensors_loading: bool,
  selected: usize,

  /// Readings of the selected sensor; replaced on every selection change
  readings: Option<ReadingsQuery>,

  jobs: Option<watch::Receiver<Vec<AnalysisJob>>>,
  schedule: Option<watch::Receiver<Schedule>>,
  notice: Option<Notice>,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(session: SyncSession, api_url: String) -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();

    Self {
      session,
      api_url,
      sensors: Vec::new(),
      sensors_source: None,
      sensors_loading: true,
      selected: 0,
      readings: None,
      jobs: None,
      schedule: None,
      notice: None,
      event_tx: tx,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = self.event_loop(&mut terminal).await;

    // Cleanup terminal, even if the loop failed
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>) -> Result<()> {
    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();

    self.start_poller();
    self.load_sensors();

    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }

    Ok(())
  }

  /// Stop background work and release the session.
  pub async fn shutdown(self) {
    self.session.close().await;
  }

  fn start_poller(&mut self) {
    let poller = self.session.start_poller();
    self.jobs = Some(poller.jobs());
    self.schedule = Some(poller.schedule());

    if let Some(mut notifications) = poller.take_notifications() {
      let tx = self.event_tx.clone();
      tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
          if tx.send(Event::Job(notification)).is_err() {
            break;
          }
        }
      });
    }
  }

  fn load_sensors(&mut self) {
    self.sensors_loading = true;
    let cache = self.session.cache().clone();
    let tx = self.event_tx.clone();

    tokio::spawn(async move {
      let result = cache.fetch_sensor_list().await.map_err(|e| e.to_string());
      let _ = tx.send(Event::Sensors(result));
    });
  }

  /// Point the readings pane at the selected sensor.
  ///
  /// The new query shares the pane's request session, so a fetch still
  /// running for the previously selected sensor is canceled.
  fn load_readings(&mut self) {
    let Some(sensor) = self.sensors.get(self.selected) else {
      self.readings = None;
      return;
    };

    let cache = self.session.cache().clone();
    let sensor_id = sensor.sensor_id.clone();
    let mut query = Query::new(
      self.session.registry().clone(),
      READINGS_SESSION,
      move |cancel| {
        let cache = cache.clone();
        let sensor_id = sensor_id.clone();
        async move {
          let start = Utc::now() - chrono::Duration::hours(READINGS_WINDOW_HOURS);
          cache
            .fetch_readings(&sensor_id, Some(start), None, &cancel)
            .await
        }
      },
    );
    query.fetch();
    self.readings = Some(query);
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {
        if let Some(query) = &mut self.readings {
          query.poll();
        }
      }
      Event::Sensors(result) => self.handle_sensors(result),
      Event::Job(notification) => {
        self.notice = Some(Notice {
          level: notification.level,
          text: notification.message(),
        });
      }
      Event::Message(text) => {
        self.notice = Some(Notice {
          level: NotificationLevel::Info,
          text,
        });
      }
    }
  }

  fn handle_sensors(&mut self, result: Result<CacheResult<Vec<SensorRecord>>, String>) {
    self.sensors_loading = false;
    match result {
      Ok(loaded) => {
        let previous = self.selected_sensor_id().map(str::to_string);
        self.sensors = loaded.data;
        self.sensors_source = Some(loaded.source);

        // Stay on the same sensor if it is still listed
        self.selected = previous
          .and_then(|id| self.sensors.iter().position(|s| s.sensor_id == id))
          .unwrap_or(0);

        if self.readings.is_none() {
          self.load_readings();
        }
      }
      Err(e) => {
        self.notice = Some(Notice {
          level: NotificationLevel::Error,
          text: e,
        });
      }
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }

      // Navigation
      KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
      KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),

      KeyCode::Char('r') => {
        self.load_sensors();
        if let Some(query) = &mut self.readings {
          query.refetch();
        }
      }
      KeyCode::Char('x') => {
        if let Some(query) = &mut self.readings {
          query.cancel();
        }
      }
      KeyCode::Char('p') => {
        if let Some(poller) = self.session.poller() {
          poller.poll_now();
        }
      }
      KeyCode::Char('C') => self.clear_cache(),

      _ => {}
    }
  }

  /// Wipe the store once background refreshes have been abandoned.
  fn clear_cache(&mut self) {
    let cache = self.session.cache().clone();
    let tx = self.event_tx.clone();

    tokio::spawn(async move {
      let text = match cache.clear().await {
        Ok(()) => {
          info!("Local store cleared from the dashboard");
          "Local cache cleared".to_string()
        }
        Err(e) => format!("Failed to clear cache: {}", e),
      };
      let _ = tx.send(Event::Message(text));
    });
  }

  fn move_selection(&mut self, delta: i32) {
    let len = self.sensors.len();
    if len == 0 {
      return;
    }
    let next = (self.selected as i32 + delta).rem_euclid(len as i32) as usize;
    if next != self.selected {
      self.selected = next;
      self.load_readings();
    }
  }

  fn selected_sensor_id(&self) -> Option<&str> {
    self.sensors.get(self.selected).map(|s| s.sensor_id.as_str())
  }

  // Accessors for UI rendering
  pub fn api_url(&self) -> &str {
    &self.api_url
  }

  pub fn is_network_only(&self) -> bool {
    self.session.is_network_only()
  }

  pub fn sensors(&self) -> &[SensorRecord] {
    &self.sensors
  }

  pub fn sensors_source(&self) -> Option<CacheSource> {
    self.sensors_source
  }

  pub fn sensors_loading(&self) -> bool {
    self.sensors_loading
  }

  pub fn selected(&self) -> usize {
    self.selected
  }

  pub fn selected_sensor(&self) -> Option<&SensorRecord> {
    self.sensors.get(self.selected)
  }

  pub fn readings(&self) -> Option<&ReadingsQuery> {
    self.readings.as_ref()
  }

  pub fn jobs(&self) -> Vec<AnalysisJob> {
    self
      .jobs
      .as_ref()
      .map(|rx| rx.borrow().clone())
      .unwrap_or_default()
  }

  pub fn schedule(&self) -> Option<Schedule> {
    self.schedule.as_ref().map(|rx| *rx.borrow())
  }

  pub fn notice(&self) -> Option<&Notice> {
    self.notice.as_ref()
  }
}
