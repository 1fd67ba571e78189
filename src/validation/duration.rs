// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Go-style duration strings.
//!
//! Validation config files write durations the way Go's `time.Duration` prints them
//! (e.g., "3m0s", "20s", "1h30m", "500ms"). This module parses and formats that syntax
//! and provides a serde adapter for config fields.

use anyhow::{bail, Context, Result};
use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MINUTE: u128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MINUTE;

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SECOND),
        "m" => Some(NANOS_PER_MINUTE),
        "h" => Some(NANOS_PER_HOUR),
        _ => None,
    }
}

/// Parse a Go-style duration string into a Rust `Duration`.
///
/// A duration is a sequence of decimal numbers, each with an optional fraction and a unit
/// suffix: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. `"0"` is accepted on its own.
///
/// # Examples
///
/// ```
/// use multus::validation::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3m0s").unwrap(), Duration::from_secs(180));
/// assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
/// assert!(parse_duration("10").is_err()); // Missing unit
/// ```
///
/// # Errors
///
/// Returns an error for an empty string, a missing or unknown unit, a negative value or
/// a value that overflows.
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let s = duration_str.trim();
    if s.is_empty() {
        bail!("Duration string cannot be empty");
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.starts_with('-') {
        bail!("Duration '{duration_str}' must not be negative");
    }
    let mut rest = s.strip_prefix('+').unwrap_or(s);

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .with_context(|| format!("Duration '{duration_str}' must end with a unit"))?;
        if number_len == 0 {
            bail!("Duration '{duration_str}' is missing a number before a unit");
        }
        let (number, after) = rest.split_at(number_len);

        let unit_len = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let (unit, after) = after.split_at(unit_len);
        let scale = unit_nanos(unit).with_context(|| {
            format!("Unsupported duration unit '{unit}' in '{duration_str}'. Use h, m, s, ms, us or ns")
        })?;

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            bail!("Duration '{duration_str}' has an invalid number '{number}'");
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .with_context(|| format!("Duration '{duration_str}' has an invalid number '{number}'"))?
        };
        let mut nanos = whole
            .checked_mul(scale)
            .context("Duration value too large (overflow)")?;

        let mut place = scale;
        for digit in fraction.chars() {
            let digit = u128::from(
                digit
                    .to_digit(10)
                    .with_context(|| format!("Duration '{duration_str}' has an invalid number '{number}'"))?,
            );
            place /= 10;
            nanos += digit * place;
        }

        total = total
            .checked_add(nanos)
            .context("Duration value too large (overflow)")?;
        rest = after;
    }

    let secs = u64::try_from(total / NANOS_PER_SECOND).context("Duration value too large (overflow)")?;
    let subsec = u32::try_from(total % NANOS_PER_SECOND).unwrap_or(0);
    Ok(Duration::new(secs, subsec))
}

/// Format a duration the way Go prints a `time.Duration`.
///
/// ```
/// use multus::validation::duration::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(180)), "3m0s");
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
/// assert_eq!(format_duration(Duration::ZERO), "0s");
/// ```
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < NANOS_PER_SECOND {
        let (scale, unit) = if nanos < NANOS_PER_MICRO {
            (1, "ns")
        } else if nanos < NANOS_PER_MILLI {
            (NANOS_PER_MICRO, "µs")
        } else {
            (NANOS_PER_MILLI, "ms")
        };
        return format!("{}{unit}", decimal(nanos, scale));
    }

    let hours = nanos / NANOS_PER_HOUR;
    let minutes = (nanos % NANOS_PER_HOUR) / NANOS_PER_MINUTE;
    let seconds = decimal(nanos % NANOS_PER_MINUTE, NANOS_PER_SECOND);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// `value / scale` with the fraction written out and trailing zeros trimmed.
fn decimal(value: u128, scale: u128) -> String {
    let whole = value / scale;
    let fraction = value % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let width = scale.to_string().len() - 1;
    let digits = format!("{fraction:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

/// Serde adapter for `Duration` fields written as Go-style strings.
pub mod go_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// # Errors
    ///
    /// Never fails for a string serializer.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    /// # Errors
    ///
    /// Fails when the string is not a valid duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(|e| serde::de::Error::custom(format!("{e:#}")))
    }
}

#[cfg(test)]
#[path = "duration_tests.rs"]
mod duration_tests;
