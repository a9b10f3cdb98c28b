use crate::app::ReadingsQuery;
use crate::ui::renderfns::measurement;
use fleetsync::cache::CacheSource;
use fleetsync::query::QueryState;
use fleetsync::remote::{ReadingRecord, SensorRecord};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table};

pub fn draw_readings(
  frame: &mut Frame,
  area: Rect,
  sensor: Option<&SensorRecord>,
  query: Option<&ReadingsQuery>,
) {
  let name = sensor.map(|s| s.name.as_str()).unwrap_or("-");
  let block = Block::default()
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let (title, readings) = match query.map(|q| q.state()) {
    None | Some(QueryState::Idle) => (format!(" Readings [{}] ", name), None),
    Some(QueryState::Loading) => (format!(" Readings [{}] (loading...) ", name), None),
    Some(QueryState::Error(e)) => {
      let paragraph = Paragraph::new(e.as_str())
        .block(block.title(format!(" Readings [{}] ", name)))
        .style(Style::default().fg(Color::Red));
      frame.render_widget(paragraph, area);
      return;
    }
    Some(QueryState::Success(result)) => {
      let age = match (result.source, result.cached_at) {
        (CacheSource::Network, _) => "live".to_string(),
        (CacheSource::Cache, Some(at)) => format!("cached {}", at.format("%H:%M:%S")),
        (CacheSource::Offline, Some(at)) => format!("offline, cached {}", at.format("%H:%M:%S")),
        (_, None) => "cached".to_string(),
      };
      (
        format!(" Readings [{}] ({}, {}) ", name, result.data.len(), age),
        Some(result.data.as_slice()),
      )
    }
  };

  let block = block.title(title);

  let Some(readings) = readings.filter(|r| !r.is_empty()) else {
    let paragraph = Paragraph::new("No readings in the last 24 hours.")
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  };

  let header = Row::new(vec!["Time", "Air °C", "Air %RH", "Soil", "Light", "Batt %"])
    .style(Style::default().fg(Color::Yellow).bold());

  // Newest first
  let rows: Vec<Row> = readings.iter().rev().map(reading_row).collect();

  let table = Table::new(
    rows,
    [
      Constraint::Length(19),
      Constraint::Length(8),
      Constraint::Length(8),
      Constraint::Length(8),
      Constraint::Length(8),
      Constraint::Length(7),
    ],
  )
  .header(header)
  .block(block);

  frame.render_widget(table, area);
}

fn reading_row(reading: &ReadingRecord) -> Row<'static> {
  Row::new(vec![
    reading.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
    measurement(reading.air_temperature, 1),
    measurement(reading.air_humidity, 1),
    measurement(reading.soil_moisture, 2),
    measurement(reading.brightness, 0),
    measurement(reading.battery_level, 0),
  ])
}
