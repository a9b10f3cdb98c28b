mod renderfns;
mod views;

use crate::app::App;
use fleetsync::poller::NotificationLevel;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1),  // Header
      Constraint::Min(8),     // Sensors and readings
      Constraint::Length(10), // Jobs
      Constraint::Length(1),  // Status bar
    ])
    .split(frame.area());

  renderfns::draw_header(frame, chunks[0], app.api_url(), app.schedule(), app.is_network_only());

  let body = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
    .split(chunks[1]);

  views::sensors::draw_sensor_list(
    frame,
    body[0],
    app.sensors(),
    app.selected(),
    app.sensors_loading(),
    app.sensors_source(),
  );
  views::readings::draw_readings(frame, body[1], app.selected_sensor(), app.readings());
  views::jobs::draw_job_table(frame, chunks[2], &app.jobs());

  draw_status_bar(frame, chunks[3], app);
}

fn draw_status_bar(frame: &mut Frame, area: Rect, app: &App) {
  let (content, style) = match app.notice() {
    Some(notice) => {
      let color = match notice.level {
        NotificationLevel::Success => Color::Green,
        NotificationLevel::Error => Color::Red,
        NotificationLevel::Info => Color::Yellow,
      };
      (format!(" {}", notice.text), Style::default().fg(color))
    }
    None => {
      let hint = " j/k:nav  r:refresh  x:cancel  p:poll jobs  C:clear cache  q:quit";
      (hint.to_string(), Style::default().fg(Color::DarkGray))
    }
  };

  let paragraph = Paragraph::new(content).style(style);
  frame.render_widget(paragraph, area);
}
