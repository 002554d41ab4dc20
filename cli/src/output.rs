//! Table and value formatting for CLI output.

use chrono::{DateTime, Utc};
use comfy_table::{presets, ContentArrangement, Table};

/// Borderless table with the given headers, like `docker images`.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers);
    table
}

/// Human-readable byte count (binary units).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Relative "ago" string for a timestamp.
pub fn format_ago(dt: &DateTime<Utc>) -> String {
    let secs = Utc::now().signed_duration_since(*dt).num_seconds();
    if secs < 1 {
        return "just now".to_string();
    }

    let (count, unit) = match secs {
        s if s < 60 => (s, "second"),
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s if s < 30 * 86_400 => (s / 86_400, "day"),
        s if s < 365 * 86_400 => (s / (30 * 86_400), "month"),
        s => (s / (365 * 86_400), "year"),
    };
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(format_bytes(2048 * 1024 * 1024 * 1024), "2.0 TB");
    }

    #[test]
    fn test_format_ago() {
        let now = Utc::now();
        assert_eq!(format_ago(&(now + Duration::seconds(30))), "just now");
        assert_eq!(format_ago(&(now - Duration::seconds(45))), "45 seconds ago");
        assert_eq!(format_ago(&(now - Duration::minutes(1))), "1 minute ago");
        assert_eq!(format_ago(&(now - Duration::hours(5))), "5 hours ago");
        assert_eq!(format_ago(&(now - Duration::days(3))), "3 days ago");
        assert_eq!(format_ago(&(now - Duration::days(90))), "3 months ago");
        assert_eq!(format_ago(&(now - Duration::days(800))), "2 years ago");
    }

    #[test]
    fn test_new_table_renders_headers() {
        let mut table = new_table(&["REPOSITORY", "TAG"]);
        table.add_row(vec!["demo", "1.0"]);
        let rendered = table.to_string();
        assert!(rendered.contains("REPOSITORY"));
        assert!(rendered.contains("demo"));
    }
}
