// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Parsing for human-readable duration strings.
//!
//! Supports single-unit values (`"30s"`, `"5m"`, `"2h"`, `"7d"`, `"1w"`) and
//! multi-component values (`"1h30m"`). Used for all durations in the
//! configuration file.

use anyhow::{bail, Context, Result};
use std::time::Duration;

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 3600;
const SECONDS_PER_DAY: u64 = 86400;
const SECONDS_PER_WEEK: u64 = 604_800;

/// Parse a human-readable duration string into a Rust `Duration`.
///
/// Supported units:
/// - `s` (seconds): "30s"
/// - `m` (minutes): "5m"
/// - `h` (hours): "2h"
/// - `d` (days): "7d"
/// - `w` (weeks): "1w"
///
/// Components may be concatenated: "1h30m" is 90 minutes. Whitespace between
/// components is not accepted.
///
/// # Examples
///
/// ```
/// use namespace_manager::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
/// assert!(parse_duration("10").is_err());  // Missing unit
/// ```
///
/// # Errors
///
/// Returns an error if the string is empty, a component is missing its unit,
/// a unit is unknown, or the total overflows.
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    if duration_str.is_empty() {
        bail!("Duration string cannot be empty");
    }

    let mut total: u64 = 0;
    let mut rest = duration_str;

    while !rest.is_empty() {
        let split_pos = rest
            .chars()
            .position(|c| !c.is_ascii_digit())
            .with_context(|| {
                format!("Duration '{duration_str}' must end with a unit (s, m, h, d or w)")
            })?;

        if split_pos == 0 {
            bail!("Duration '{duration_str}' has a unit with no value");
        }

        let (value_str, unit_rest) = rest.split_at(split_pos);
        let value: u64 = value_str
            .parse()
            .context("Duration value must be a positive integer")?;

        let unit = &unit_rest[..1];
        let per_unit = match unit {
            "s" => 1,
            "m" => SECONDS_PER_MINUTE,
            "h" => SECONDS_PER_HOUR,
            "d" => SECONDS_PER_DAY,
            "w" => SECONDS_PER_WEEK,
            _ => bail!(
                "Unsupported duration unit '{unit}' in '{duration_str}'. \
                 Use 's', 'm', 'h', 'd' or 'w'"
            ),
        };

        let seconds = value
            .checked_mul(per_unit)
            .context("Duration value too large (overflow)")?;
        total = total
            .checked_add(seconds)
            .context("Duration value too large (overflow)")?;

        rest = &unit_rest[1..];
    }

    Ok(Duration::from_secs(total))
}

/// Format a `Duration` back into the shortest human-readable string that
/// [`parse_duration`] accepts.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    let mut rest = secs;
    for (per_unit, unit) in [
        (SECONDS_PER_WEEK, "w"),
        (SECONDS_PER_DAY, "d"),
        (SECONDS_PER_HOUR, "h"),
        (SECONDS_PER_MINUTE, "m"),
        (1, "s"),
    ] {
        if rest >= per_unit {
            out.push_str(&format!("{}{unit}", rest / per_unit));
            rest %= per_unit;
        }
    }

    out
}

/// Serde adapter serializing durations as human-readable strings.
///
/// Use with `#[serde(with = "crate::duration::serde_str")]`.
pub mod serde_str {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize a duration as a human-readable string.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        format_duration(*value).serialize(serializer)
    }

    /// Deserialize a duration from a human-readable string.
    ///
    /// # Errors
    ///
    /// Fails when the string is not a valid duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<Duration>` fields.
///
/// Use with `#[serde(with = "crate::duration::serde_opt_str", default)]`.
pub mod serde_opt_str {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize an optional duration as a human-readable string.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.map(format_duration).serialize(serializer)
    }

    /// Deserialize an optional duration from a human-readable string.
    ///
    /// # Errors
    ///
    /// Fails when the string is present but not a valid duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
#[path = "duration_tests.rs"]
mod duration_tests;
