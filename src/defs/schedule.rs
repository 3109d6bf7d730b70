//! Five-field cron schedules with a minimum cadence.

use std::str::FromStr;

use chrono::{DateTime, TimeDelta, TimeZone, Timelike, Utc};

/// Fire times closer together than this are rejected at load time.
pub const MIN_CADENCE: TimeDelta = TimeDelta::minutes(5);

/// Upcoming fire times inspected by the cadence check.
const CADENCE_SAMPLE: usize = 6;

/// A parsed `minute hour day-of-month month day-of-week` expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: cron::Schedule,
}

impl CronSchedule {
    /// Parse a five-field expression and reject sub-five-minute cadences.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "expected 5 fields (minute hour day month weekday), got {}",
                fields.len()
            ));
        }

        // The cron crate wants a leading seconds field and numbers weekdays from 1 = Sunday.
        let weekday = translate_day_of_week(fields[4])?;
        let full = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], weekday
        );
        let schedule =
            cron::Schedule::from_str(&full).map_err(|e| format!("invalid cron: {e}"))?;

        let fires: Vec<DateTime<Utc>> = schedule.upcoming(Utc).take(CADENCE_SAMPLE).collect();
        if fires.is_empty() {
            return Err("schedule never fires".to_string());
        }
        if let Some(gap) = fires.windows(2).map(|w| w[1] - w[0]).min()
            && gap < MIN_CADENCE
        {
            return Err(format!(
                "fires every {} minute(s); the minimum interval is {} minutes",
                gap.num_minutes(),
                MIN_CADENCE.num_minutes()
            ));
        }

        Ok(Self { schedule })
    }

    /// True iff the minute containing `now` is one of the fire times.
    pub fn is_due<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        let Some(minute) = now.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
            return false;
        };
        let probe = minute.clone() - TimeDelta::seconds(1);
        self.schedule.after(&probe).next() == Some(minute)
    }
}

/// Map standard weekday numbers (0 or 7 = Sunday) onto the cron crate's 1..=7.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    let mut parts = Vec::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };
        let with_step = |r: String| match step {
            Some(step) => format!("{r}/{step}"),
            None => r,
        };

        if range == "*" || range == "?" || range.chars().any(|c| c.is_ascii_alphabetic()) {
            parts.push(with_step(range.to_string()));
            continue;
        }

        match range.split_once('-') {
            Some((start, end)) => {
                let start = weekday_number(start)?;
                let end = weekday_number(end)?;
                if end == 7 && start > 0 {
                    // a-7 runs through Sunday, which wraps to the front.
                    parts.push(with_step(format!("{}-7", start + 1)));
                    parts.push("1".to_string());
                } else {
                    parts.push(with_step(format!("{}-{}", start + 1, end % 7 + 1)));
                }
            }
            None => {
                let day = weekday_number(range)?;
                parts.push(with_step((day % 7 + 1).to_string()));
            }
        }
    }
    Ok(parts.join(","))
}

fn weekday_number(raw: &str) -> Result<u32, String> {
    match raw.parse::<u32>() {
        Ok(n) if n <= 7 => Ok(n),
        _ => Err(format!("invalid day of week '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, h, m, 0).unwrap()
    }

    #[test]
    fn every_five_minutes_is_due_at_ten_past() {
        let five = CronSchedule::parse("*/5 * * * *").unwrap();
        let midnight = CronSchedule::parse("0 0 * * *").unwrap();
        let now = at(10, 10);
        assert!(five.is_due(&now));
        assert!(!midnight.is_due(&now));
    }

    #[test]
    fn due_ignores_seconds_within_the_minute() {
        let five = CronSchedule::parse("*/5 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 10, 10, 42).unwrap();
        assert!(five.is_due(&now));
        assert!(!five.is_due(&at(10, 11)));
    }

    #[test]
    fn rejects_sub_five_minute_cadence() {
        assert!(CronSchedule::parse("* * * * *").is_err());
        assert!(CronSchedule::parse("*/2 * * * *").is_err());
        assert!(CronSchedule::parse("0,1 * * * *").is_err());
        assert!(CronSchedule::parse("*/5 * * * *").is_ok());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::parse("0 0 * * * *").is_err());
        assert!(CronSchedule::parse("0 0").is_err());
    }

    #[test]
    fn standard_weekday_numbers() {
        // 2026-10-19 is a Monday.
        let monday = CronSchedule::parse("0 9 * * 1").unwrap();
        let fire = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        assert_eq!(fire.weekday(), chrono::Weekday::Mon);
        assert!(monday.is_due(&fire));

        let sunday = CronSchedule::parse("0 9 * * 0").unwrap();
        let fire = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        assert!(sunday.is_due(&fire));
        assert!(!sunday.is_due(&Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()));
    }

    #[test]
    fn weekday_translation() {
        assert_eq!(translate_day_of_week("*").unwrap(), "*");
        assert_eq!(translate_day_of_week("1-5").unwrap(), "2-6");
        assert_eq!(translate_day_of_week("0,6").unwrap(), "1,7");
        assert_eq!(translate_day_of_week("5-7").unwrap(), "6-7,1");
        assert_eq!(translate_day_of_week("MON-FRI").unwrap(), "MON-FRI");
        assert!(translate_day_of_week("9").is_err());
    }
}
