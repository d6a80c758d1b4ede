//! Five-field cron patterns evaluated against local wall-clock time.

use crate::error::Error;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use std::fmt;
use std::str::FromStr;

// Enough iterations to cover several leap-year cycles of day skips.
const MAX_STEPS: usize = 100_000;

/// A set of allowed values for one cron field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    restricted: bool,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }

    fn parse(expr: &str, min: u32, max: u32) -> Result<Self, Error> {
        let mut bits = 0u64;

        for part in expr.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| invalid(expr, "step is not a number"))?;
                    if step == 0 {
                        return Err(invalid(expr, "step must be positive"));
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                (parse_value(a, expr)?, parse_value(b, expr)?)
            } else {
                let value = parse_value(range, expr)?;
                // `N/S` runs from N to the end of the field.
                if part.contains('/') {
                    (value, max)
                } else {
                    (value, value)
                }
            };

            if start < min || end > max || start > end {
                return Err(invalid(expr, "value out of range"));
            }

            let mut value = start;
            while value <= end {
                bits |= 1u64 << value;
                value += step;
            }
        }

        // Star-prefixed fields such as `*/2` count as unrestricted for the day rule.
        Ok(Self {
            bits,
            restricted: !expr.starts_with('*'),
        })
    }
}

fn parse_value(value: &str, expr: &str) -> Result<u32, Error> {
    value
        .parse()
        .map_err(|_| invalid(expr, "value is not a number"))
}

fn invalid(expr: &str, reason: &str) -> Error {
    Error::Config(format!("invalid cron field '{}': {}", expr, reason))
}

/// `minute hour day-of-month month day-of-week`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronPattern {
    source: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronPattern {
    /// First matching local minute strictly after `after`.
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        for _ in 0..MAX_STEPS {
            if !self.month.contains(t.month()) {
                t = first_of_next_month(t.date())?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hour.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }

    // When both day fields are restricted either one may match.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.day_of_month.contains(date.day());
        let dow = self
            .day_of_week
            .contains(date.weekday().num_days_from_sunday());

        match (self.day_of_month.restricted, self.day_of_week.restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

impl FromStr for CronPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(Error::Config(format!(
                "cron pattern '{}' must have 5 fields, found {}",
                s,
                fields.len()
            )));
        };

        let mut day_of_week = Field::parse(dow, 0, 7)?;
        // 7 is an alias for Sunday.
        if day_of_week.contains(7) {
            day_of_week.bits |= 1;
        }

        Ok(Self {
            source: fields.join(" "),
            minute: Field::parse(minute, 0, 59)?,
            hour: Field::parse(hour, 0, 23)?,
            day_of_month: Field::parse(dom, 1, 31)?,
            month: Field::parse(month, 1, 12)?,
            day_of_week,
        })
    }
}

impl fmt::Display for CronPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    fn next(pattern: &str, after: NaiveDateTime) -> Option<NaiveDateTime> {
        pattern.parse::<CronPattern>().unwrap().next_after(after)
    }

    #[test]
    fn test_every_minute() {
        assert_eq!(
            next("* * * * *", at(2024, 3, 1, 10, 15, 42)),
            Some(at(2024, 3, 1, 10, 16, 0))
        );
    }

    #[test]
    fn test_strictly_after() {
        assert_eq!(
            next("30 10 * * *", at(2024, 3, 1, 10, 30, 0)),
            Some(at(2024, 3, 2, 10, 30, 0))
        );
    }

    #[test]
    fn test_midnight_rolls_over_year() {
        assert_eq!(
            next("0 0 * * *", at(2024, 12, 31, 23, 59, 59)),
            Some(at(2025, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_steps_ranges_and_lists() {
        assert_eq!(
            next("*/15 9-17 * * *", at(2024, 3, 1, 17, 50, 0)),
            Some(at(2024, 3, 2, 9, 0, 0))
        );
        assert_eq!(
            next("5,35 * * * *", at(2024, 3, 1, 8, 6, 0)),
            Some(at(2024, 3, 1, 8, 35, 0))
        );
        assert_eq!(
            next("10/20 * * * *", at(2024, 3, 1, 8, 11, 0)),
            Some(at(2024, 3, 1, 8, 30, 0))
        );
    }

    #[test]
    fn test_day_of_week() {
        // 2024-03-01 is a Friday.
        assert_eq!(
            next("0 12 * * 1", at(2024, 3, 1, 0, 0, 0)),
            Some(at(2024, 3, 4, 12, 0, 0))
        );
        assert_eq!(
            next("0 0 * * 7", at(2024, 3, 1, 0, 0, 0)),
            Some(at(2024, 3, 3, 0, 0, 0))
        );
    }

    #[test]
    fn test_restricted_day_fields_match_either() {
        // The 15th or any Monday, whichever comes first.
        assert_eq!(
            next("0 0 15 * 1", at(2024, 3, 1, 0, 0, 0)),
            Some(at(2024, 3, 4, 0, 0, 0))
        );
    }

    #[test]
    fn test_leap_day() {
        assert_eq!(
            next("0 0 29 2 *", at(2025, 1, 1, 0, 0, 0)),
            Some(at(2028, 2, 29, 0, 0, 0))
        );
    }

    #[test]
    fn test_impossible_pattern_never_fires() {
        assert_eq!(next("0 0 31 2 *", at(2024, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn test_invalid_patterns() {
        for pattern in ["* * * *", "60 * * * *", "* 24 * * *", "*/0 * * * *", "a * * * *", "5-1 * * * *"] {
            assert!(pattern.parse::<CronPattern>().is_err(), "{pattern}");
        }
    }

    #[test]
    fn test_display_normalizes_whitespace() {
        let pattern: CronPattern = "0   3 *  * *".parse().unwrap();
        assert_eq!(pattern.to_string(), "0 3 * * *");
    }

    #[test]
    fn test_stepped_star_day_field_is_unrestricted() {
        // 2024-03-01 is a Friday. With `*/2` as the day of month only Mondays match.
        assert_eq!(
            next("0 0 */2 * 1", at(2024, 3, 1, 12, 0, 0)),
            Some(at(2024, 3, 4, 0, 0, 0))
        );
        // An explicit day-of-month list still combines with the weekday.
        assert_eq!(
            next("0 0 3 * 1", at(2024, 3, 1, 12, 0, 0)),
            Some(at(2024, 3, 3, 0, 0, 0))
        );
    }
}
