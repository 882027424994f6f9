//! Formatting helpers for bucket labels and log lines.

use std::time::Duration;

/// Format byte count as human-readable size.
///
/// `"512B"`, `"50.0K"`, `"100.3M"`, `"1.5G"`, `"2.0T"`
pub fn format_bytes(bytes: u64) -> String {
    const K: u64 = 1024;
    const M: u64 = K * 1024;
    const G: u64 = M * 1024;
    const T: u64 = G * 1024;

    let f = bytes as f64;
    if bytes >= T {
        format!("{:.1}T", f / T as f64)
    } else if bytes >= G {
        format!("{:.1}G", f / G as f64)
    } else if bytes >= M {
        format!("{:.1}M", f / M as f64)
    } else if bytes >= K {
        format!("{:.1}K", f / K as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Format a walk duration: `"850ms"`, `"12.4s"`, `"3m5s"`, `"1h2m"`.
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    let secs = duration.as_secs();
    if ms < 1000 {
        format!("{}ms", ms)
    } else if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0B");
        assert_eq!(format_bytes(1000), "1000B");
        assert_eq!(format_bytes(2000), "2.0K");
        assert_eq!(format_bytes(4000), "3.9K");
        assert_eq!(format_bytes(10_000_000), "9.5M");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0G");
        assert_eq!(format_bytes(1024u64.pow(4)), "1.0T");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(12_400)), "12.4s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m5s");
        assert_eq!(format_duration(Duration::from_secs(3720)), "1h2m");
    }
}
