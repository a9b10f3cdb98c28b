use fleetsync::poller::{PollPhase, Schedule};
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Draw the header bar with logo, API host and poller state
pub fn draw_header(
  frame: &mut Frame,
  area: Rect,
  api_url: &str,
  schedule: Option<Schedule>,
  network_only: bool,
) {
  let domain = extract_domain(api_url);

  let mut spans = vec![
    Span::styled(" fleetsync ", Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(format!(" {} ", domain), Style::default().fg(Color::White)),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" {} ", poll_label(schedule)),
      Style::default().fg(Color::Yellow),
    ),
  ];

  if network_only {
    spans.push(Span::styled("│", Style::default().fg(Color::DarkGray)));
    spans.push(Span::styled(" no local cache ", Style::default().fg(Color::Red)));
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));

  frame.render_widget(paragraph, area);
}

fn poll_label(schedule: Option<Schedule>) -> String {
  match schedule {
    None => "jobs: off".to_string(),
    Some(s) => match s.phase {
      PollPhase::Idle => "jobs: loading".to_string(),
      PollPhase::Active => format!("jobs: active, every {}s", s.next_delay.as_secs()),
      PollPhase::Regular => format!("jobs: every {}s", s.next_delay.as_secs()),
      PollPhase::Stopped => "jobs: stopped".to_string(),
    },
  }
}

/// Extract host from the API URL
fn extract_domain(url: &str) -> &str {
  url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url)
    .split('/')
    .next()
    .unwrap_or(url)
}
