use fleetsync::remote::JobStatus;
use ratatui::prelude::Color;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

pub fn job_status_color(status: JobStatus) -> Color {
  match status {
    JobStatus::Completed => Color::Green,
    JobStatus::Failed => Color::Red,
    JobStatus::Processing => Color::Yellow,
    JobStatus::Pending => Color::White,
  }
}

/// Format an optional measurement, blank when missing
pub fn measurement(value: Option<f64>, precision: usize) -> String {
  value
    .map(|v| format!("{:.*}", precision, v))
    .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_short_string() {
    assert_eq!(truncate("hello", 10), "hello");
    assert_eq!(truncate("hello", 5), "hello");
  }

  #[test]
  fn test_truncate_long_string() {
    assert_eq!(truncate("hello world", 8), "hello...");
  }

  #[test]
  fn test_truncate_multibyte() {
    assert_eq!(truncate("Gewächshaus Nord", 8), "Gewäc...");
  }

  #[test]
  fn test_job_status_color() {
    assert_eq!(job_status_color(JobStatus::Completed), Color::Green);
    assert_eq!(job_status_color(JobStatus::Failed), Color::Red);
    assert_eq!(job_status_color(JobStatus::Processing), Color::Yellow);
  }

  #[test]
  fn test_measurement() {
    assert_eq!(measurement(Some(21.456), 1), "21.5");
    assert_eq!(measurement(None, 1), "-");
  }
}
