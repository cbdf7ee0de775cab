//! Compact duration strings: `90s`, `5m`, `1h30m`, `2d`, `250ms`.
//!
//! Pure functions only.

use std::time::Duration;

use crate::domain::error::ConfigurationError;

/// Parse a duration such as `1h30m`.
///
/// Units: `d`, `h`, `m`, `s`, `ms`. At least one component is required and
/// every component needs a unit.
///
/// # Errors
///
/// Returns [`ConfigurationError::InvalidDuration`] for anything else.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigurationError> {
    let invalid = || ConfigurationError::InvalidDuration(input.to_string());
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.chars().take_while(char::is_ascii_alphabetic).count();
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let secs_per_unit: u64 = match unit {
            "d" => 86_400,
            "h" => 3_600,
            "m" => 60,
            "s" => 1,
            "ms" => {
                total = total
                    .checked_add(Duration::from_millis(value))
                    .ok_or_else(invalid)?;
                continue;
            }
            _ => return Err(invalid()),
        };
        let secs = value.checked_mul(secs_per_unit).ok_or_else(invalid)?;
        total = total
            .checked_add(Duration::from_secs(secs))
            .ok_or_else(invalid)?;
    }
    Ok(total)
}

/// Render a duration in the same compact form, dropping zero components.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let mut secs = d.as_secs();
    if secs == 0 {
        return if d.subsec_millis() > 0 {
            format!("{}ms", d.subsec_millis())
        } else {
            "0s".to_string()
        };
    }
    let mut out = String::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{unit}", secs / size));
            secs %= size;
        }
    }
    out
}
