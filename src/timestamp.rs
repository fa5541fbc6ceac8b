//! Conversion between whole-second positions and persisted `HH:MM:SS` timestamps.

use crate::error::TimestampError;

/// Formats a position as zero-padded `HH:MM:SS`.
///
/// Hours are not wrapped at 24, so `359_999` seconds renders as `99:59:59`.
pub fn seconds_to_timestamp(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Parses an `HH:MM:SS` timestamp back into whole seconds.
pub fn timestamp_to_seconds(timestamp: &str) -> Result<u64, TimestampError> {
    let malformed = || TimestampError::Malformed(timestamp.to_string());

    let mut parts = timestamp.split(':');
    let (Some(hours), Some(minutes), Some(secs), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };

    let parse_field = |field: &str| -> Result<u64, TimestampError> {
        if field.len() < 2 || !field.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(malformed());
        }
        field.parse::<u64>().map_err(|_| malformed())
    };

    let hours = parse_field(hours)?;
    let minutes = parse_field(minutes)?;
    let secs = parse_field(secs)?;
    if minutes > 59 || secs > 59 {
        return Err(malformed());
    }

    hours
        .checked_mul(3600)
        .and_then(|hours| hours.checked_add(minutes * 60 + secs))
        .ok_or_else(malformed)
}

/// Formats a media duration where `-1` (or any negative value) means unknown.
pub fn duration_to_timestamp(duration_secs: i64) -> String {
    if duration_secs < 0 {
        return "--:--:--".to_string();
    }
    seconds_to_timestamp(duration_secs as u64)
}

#[cfg(test)]
mod tests {
    use super::{duration_to_timestamp, seconds_to_timestamp, timestamp_to_seconds};
    use proptest::prelude::*;

    #[test]
    fn test_formats_zero_padded_fields() {
        assert_eq!(seconds_to_timestamp(0), "00:00:00");
        assert_eq!(seconds_to_timestamp(42), "00:00:42");
        assert_eq!(seconds_to_timestamp(900), "00:15:00");
        assert_eq!(seconds_to_timestamp(3_661), "01:01:01");
        assert_eq!(seconds_to_timestamp(359_999), "99:59:59");
    }

    #[test]
    fn test_parses_valid_timestamps() {
        assert_eq!(timestamp_to_seconds("00:00:42"), Ok(42));
        assert_eq!(timestamp_to_seconds("00:15:00"), Ok(900));
        assert_eq!(timestamp_to_seconds("99:59:59"), Ok(359_999));
    }

    #[test]
    fn test_rejects_malformed_timestamps() {
        for raw in [
            "", "1:2:3", "00:00", "00:00:00:00", "00:60:00", "00:00:60", "-1:00:00", "aa:bb:cc",
            "00:00:4.5",
            "9999999999999999:00:00",
        ] {
            assert!(timestamp_to_seconds(raw).is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn test_unknown_duration_renders_placeholder() {
        assert_eq!(duration_to_timestamp(-1), "--:--:--");
        assert_eq!(duration_to_timestamp(600), "00:10:00");
    }

    proptest! {
        #[test]
        fn timestamp_round_trip_is_stable(seconds in 0u64..=359_999) {
            let formatted = seconds_to_timestamp(seconds);
            let parsed = timestamp_to_seconds(&formatted).expect("formatted timestamp parses");
            prop_assert_eq!(parsed, seconds);
            prop_assert_eq!(seconds_to_timestamp(parsed), formatted);
        }
    }
}
