use crate::ui::renderfns::{job_status_color, truncate};
use fleetsync::remote::AnalysisJob;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table};

pub fn draw_job_table(frame: &mut Frame, area: Rect, jobs: &[AnalysisJob]) {
  let block = Block::default()
    .title(format!(" Analysis jobs ({}) ", jobs.len()))
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  if jobs.is_empty() {
    let paragraph = Paragraph::new("No analysis jobs.")
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let header = Row::new(vec!["Job", "Sensor", "Type", "Status", "Progress", "Updated"])
    .style(Style::default().fg(Color::Yellow).bold());

  let rows: Vec<Row> = jobs
    .iter()
    .map(|job| {
      let progress = job
        .progress
        .as_ref()
        .map(|p| format!("{}/{}", p.current_step, p.total_steps))
        .unwrap_or_default();

      Row::new(vec![
        Line::from(truncate(&job.analytics_id, 12)),
        Line::from(truncate(&job.sensor_id, 12)),
        Line::from(truncate(&job.analysis_type, 14)),
        Line::from(Span::styled(
          job.status.as_str(),
          Style::default().fg(job_status_color(job.status)),
        )),
        Line::from(progress),
        Line::from(job.updated_at.format("%H:%M:%S").to_string()),
      ])
    })
    .collect();

  let table = Table::new(
    rows,
    [
      Constraint::Length(12),
      Constraint::Length(12),
      Constraint::Length(14),
      Constraint::Length(11),
      Constraint::Length(9),
      Constraint::Length(9),
    ],
  )
  .header(header)
  .block(block);

  frame.render_widget(table, area);
}
