//! Compact time strings for sleep scheduling, e.g. `"1h30m"`.

use std::time::Duration;

const UNITS: &[(u64, &str)] = &[
    (60 * 60 * 24 * 7, "w"),
    (60 * 60 * 24, "d"),
    (60 * 60, "h"),
    (60, "m"),
    (1, "s"),
];

/// Render a duration as a compact time string. Sub-second durations
/// round down; zero renders as `"0s"`.
pub fn to_time_str(duration: Duration) -> String {
    let mut seconds = duration.as_secs();
    if seconds == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit_seconds, suffix) in UNITS {
        let count = seconds / unit_seconds;
        if count > 0 {
            out.push_str(&count.to_string());
            out.push_str(suffix);
            seconds %= unit_seconds;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_units() {
        assert_eq!(to_time_str(Duration::from_secs(45)), "45s");
        assert_eq!(to_time_str(Duration::from_secs(60)), "1m");
        assert_eq!(to_time_str(Duration::from_secs(3600)), "1h");
        assert_eq!(to_time_str(Duration::from_secs(86_400)), "1d");
        assert_eq!(to_time_str(Duration::from_secs(604_800)), "1w");
    }

    #[test]
    fn test_composed_units() {
        assert_eq!(to_time_str(Duration::from_secs(5400)), "1h30m");
        assert_eq!(to_time_str(Duration::from_secs(90_061)), "1d1h1m1s");
    }

    #[test]
    fn test_zero_and_subsecond() {
        assert_eq!(to_time_str(Duration::ZERO), "0s");
        assert_eq!(to_time_str(Duration::from_millis(400)), "0s");
    }
}
