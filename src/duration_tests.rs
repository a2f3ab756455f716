// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for human-readable duration parsing

#[cfg(test)]
mod tests {
    use super::super::{format_duration, parse_duration};
    use std::time::Duration;

    // ========================================================================
    // Valid Duration Parsing Tests
    // ========================================================================

    #[test]
    fn test_parse_duration_single_units() {
        assert_eq!(
            parse_duration("30s").unwrap(),
            Duration::from_secs(30),
            "30 seconds should be 30 seconds"
        );
        assert_eq!(
            parse_duration("5m").unwrap(),
            Duration::from_secs(300),
            "5 minutes should be 300 seconds"
        );
        assert_eq!(
            parse_duration("2h").unwrap(),
            Duration::from_secs(7200),
            "2 hours should be 7200 seconds"
        );
        assert_eq!(
            parse_duration("7d").unwrap(),
            Duration::from_secs(604_800),
            "7 days should be 604800 seconds"
        );
        assert_eq!(
            parse_duration("1w").unwrap(),
            Duration::from_secs(604_800),
            "1 week should be 604800 seconds"
        );
    }

    #[test]
    fn test_parse_duration_multi_component() {
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::from_secs(5400),
            "1h30m should be 5400 seconds"
        );
        assert_eq!(
            parse_duration("1d12h").unwrap(),
            Duration::from_secs(129_600),
            "1d12h should be 129600 seconds"
        );
        assert_eq!(
            parse_duration("1m30s").unwrap(),
            Duration::from_secs(90),
            "1m30s should be 90 seconds"
        );
    }

    #[test]
    fn test_parse_duration_zero() {
        assert_eq!(
            parse_duration("0s").unwrap(),
            Duration::from_secs(0),
            "0s is a valid zero duration"
        );
    }

    // ========================================================================
    // Invalid Format Tests
    // ========================================================================

    #[test]
    fn test_parse_duration_empty_string() {
        let result = parse_duration("");
        assert!(result.is_err(), "Empty string should return an error");
        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("cannot be empty"),
            "Error should mention empty string"
        );
    }

    #[test]
    fn test_parse_duration_no_unit() {
        let result = parse_duration("10");
        assert!(
            result.is_err(),
            "Duration without unit should return an error"
        );
        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("must end with a unit"),
            "Error should mention missing unit"
        );
    }

    #[test]
    fn test_parse_duration_invalid_unit() {
        let result = parse_duration("10x");
        assert!(
            result.is_err(),
            "Duration with invalid unit should return an error"
        );
        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("Unsupported duration unit"),
            "Error should mention unsupported unit"
        );
    }

    #[test]
    fn test_parse_duration_unit_without_value() {
        let result = parse_duration("h");
        assert!(
            result.is_err(),
            "A bare unit with no value should return an error"
        );
    }

    #[test]
    fn test_parse_duration_negative_value() {
        let result = parse_duration("-5h");
        assert!(result.is_err(), "Negative duration should return an error");
    }

    #[test]
    fn test_parse_duration_whitespace() {
        let result = parse_duration(" 5m ");
        assert!(
            result.is_err(),
            "Duration with whitespace should return an error"
        );
    }

    // ========================================================================
    // Formatting Tests
    // ========================================================================

    #[test]
    fn test_format_duration_round_trips() {
        for raw in ["30s", "5m", "2h", "1h30m", "7d", "1w", "0s"] {
            let parsed = parse_duration(raw).unwrap();
            let formatted = format_duration(parsed);
            assert_eq!(
                parse_duration(&formatted).unwrap(),
                parsed,
                "formatting '{raw}' should round-trip through the parser"
            );
        }
    }

    #[test]
    fn test_format_duration_collapses_to_largest_units() {
        assert_eq!(format_duration(Duration::from_secs(604_800)), "1w");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
    }
}
