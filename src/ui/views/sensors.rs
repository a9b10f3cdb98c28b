use crate::ui::renderfns::{measurement, truncate};
use fleetsync::cache::CacheSource;
use fleetsync::remote::SensorRecord;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};

pub fn draw_sensor_list(
  frame: &mut Frame,
  area: Rect,
  sensors: &[SensorRecord],
  selected: usize,
  loading: bool,
  source: Option<CacheSource>,
) {
  let title = if loading && sensors.is_empty() {
    " Sensors (loading...) ".to_string()
  } else {
    format!(" Sensors ({}){} ", sensors.len(), source_suffix(source))
  };

  let block = Block::default()
    .title(title)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  if sensors.is_empty() && !loading {
    let paragraph = Paragraph::new("No sensors registered.")
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let items: Vec<ListItem> = sensors
    .iter()
    .map(|sensor| {
      let battery_color = match sensor.battery_level {
        Some(level) if level < 20.0 => Color::Red,
        Some(_) => Color::Green,
        None => Color::DarkGray,
      };

      let line = Line::from(vec![
        Span::styled(
          format!("{:<20}", truncate(&sensor.name, 20)),
          Style::default().fg(Color::Cyan),
        ),
        Span::raw(" "),
        Span::styled(
          format!("{:>5}%", measurement(sensor.battery_level, 0)),
          Style::default().fg(battery_color),
        ),
      ]);
      ListItem::new(line)
    })
    .collect();

  let list = List::new(items)
    .block(block)
    .highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

  let mut state = ListState::default();
  state.select(Some(selected));

  frame.render_stateful_widget(list, area, &mut state);
}

fn source_suffix(source: Option<CacheSource>) -> &'static str {
  match source {
    Some(CacheSource::Cache) => " cached",
    Some(CacheSource::Offline) => " offline",
    Some(CacheSource::Network) | None => "",
  }
}
