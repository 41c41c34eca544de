use std::time::Duration;

use chrono::{DateTime, Local, Utc};

pub fn time_millis() -> i64 {
    let time: DateTime<chrono::Utc> = Utc::now();
    time.timestamp_millis()
}

pub fn now_local() -> DateTime<Local> {
    Local::now()
}

/// Formats a duration as `HH:MM:SS`; hours are not wrapped at 24.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Rounds seconds to millisecond precision.
pub fn round_secs(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_hms(Duration::from_secs(3661)), "01:01:01");
        assert_eq!(format_hms(Duration::from_secs(90_000)), "25:00:00");
    }

    #[test]
    fn test_round_secs() {
        assert_eq!(round_secs(Duration::from_millis(1234)), 1.234);
        assert_eq!(round_secs(Duration::from_micros(1_234_567)), 1.235);
    }
}
