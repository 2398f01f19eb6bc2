//! Five-field cron schedule for the daily reminder trigger.
//!
//! Supports `*`, `*/N`, comma lists and single values on the minute and hour
//! fields. Day-of-month, month and weekday must be `*`: the reminder batch is
//! a daily job and anything finer-grained is a configuration mistake we want
//! to reject at startup rather than silently approximate.

use chrono::{DateTime, Duration, FixedOffset, Timelike};

#[derive(Debug, Clone)]
pub struct Schedule {
    expression: String,
    minutes: Vec<u32>,
    hours: Vec<u32>,
}

impl Schedule {
    /// Parse an expression like `"30 18 * * *"` (18:30 every day, local time).
    pub fn parse(expression: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "expected 5 fields (minute hour day month weekday), got {}",
                fields.len()
            ));
        }

        let minutes = parse_field(fields[0], 0, 59)
            .ok_or_else(|| format!("invalid minute field '{}'", fields[0]))?;
        let hours = parse_field(fields[1], 0, 23)
            .ok_or_else(|| format!("invalid hour field '{}'", fields[1]))?;

        for (name, field) in [("day", fields[2]), ("month", fields[3]), ("weekday", fields[4])] {
            if field != "*" {
                return Err(format!(
                    "{name} field '{field}' is not supported; only '*' is accepted"
                ));
            }
        }

        Ok(Self {
            expression: expression.to_string(),
            minutes,
            hours,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Next firing strictly after `after`, in the operational timezone.
    pub fn next_after(&self, after: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let mut candidate = after + Duration::minutes(1);
        candidate = candidate
            .with_second(0)
            .and_then(|c| c.with_nanosecond(0))
            .unwrap_or(candidate);

        // Validated fields always match within 24h; the bound is a backstop.
        for _ in 0..=(24 * 60) {
            if self.minutes.contains(&candidate.minute()) && self.hours.contains(&candidate.hour())
            {
                return candidate;
            }
            candidate += Duration::minutes(1);
        }
        candidate
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    if field.contains(',') {
        let values: Result<Vec<u32>, _> = field.split(',').map(|s| s.trim().parse()).collect();
        let values = values.ok()?;
        if values.iter().any(|v| *v < min || *v > max) {
            return None;
        }
        return Some(values);
    }

    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max {
        Some(vec![n])
    } else {
        None
    }
}
