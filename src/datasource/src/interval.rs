//! Minimum interval and step resolution.
//!
//! A query carries up to three interval hints (`interval`, `intervalMs` and
//! `timeInterval`) and the datasource may configure its own `timeInterval`.
//! [`IntervalResolver`] picks the first usable one and turns it into the step
//! used for range evaluation.

use std::time::Duration;

use crate::query::Query;
use crate::template::{VAR_INTERVAL, VAR_INTERVAL_MS, VAR_RATE_INTERVAL};

const MS: u64 = 1;
const SECOND: u64 = 1_000 * MS;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const MONTH: u64 = 30 * DAY;
const YEAR: u64 = 365 * DAY;

/// Upper bound (inclusive) in milliseconds and the value it rounds to
const STAIRCASE: &[(u64, u64)] = &[
    (10, MS),
    (15, 10 * MS),
    (35, 20 * MS),
    (75, 50 * MS),
    (150, 100 * MS),
    (350, 200 * MS),
    (750, 500 * MS),
    (1_500, SECOND),
    (3_500, 2 * SECOND),
    (7_500, 5 * SECOND),
    (12_500, 10 * SECOND),
    (17_500, 15 * SECOND),
    (25_000, 20 * SECOND),
    (45_000, 30 * SECOND),
    (90_000, MINUTE),
    (210_000, 2 * MINUTE),
    (450_000, 5 * MINUTE),
    (750_000, 10 * MINUTE),
    (1_050_000, 15 * MINUTE),
    (1_500_000, 20 * MINUTE),
    (2_700_000, 30 * MINUTE),
    (5_400_000, HOUR),
    (9_000_000, 2 * HOUR),
    (16_200_000, 3 * HOUR),
    (32_400_000, 6 * HOUR),
    (86_400_000, 12 * HOUR),
    (172_800_000, DAY),
    (604_800_000, DAY),
    (1_814_400_000, WEEK),
];

/// Anything below this bound and above the staircase rounds to 30 days.
const MONTH_BOUND: u64 = 3_628_800_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalError {
    #[error("failed to parse interval {input:?}: {reason}")]
    Parse { input: String, reason: String },
}

impl IntervalError {
    fn parse(input: &str, reason: impl ToString) -> Self {
        Self::Parse {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Ambient defaults of step resolution, passed in rather than read from globals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverDefaults {
    /// Minimum interval of range queries when no hint resolves
    pub default_scrape_interval: Duration,
    /// Step of instant queries when no hint resolves
    pub instant_default_step: Duration,
    /// Number of points a range query aims for when `maxDataPoints` is unset
    pub default_resolution: u64,
    /// Scrape interval assumed by `$__rate_interval` when no hint resolves
    pub rate_scrape_fallback: Duration,
}

impl Default for ResolverDefaults {
    fn default() -> Self {
        Self {
            default_scrape_interval: Duration::from_secs(15),
            instant_default_step: Duration::from_secs(5 * 60),
            default_resolution: 1500,
            rate_scrape_fallback: Duration::from_secs(15),
        }
    }
}

/// Which hint produced the minimum interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalSource {
    IntervalMs,
    Interval,
    TimeInterval,
    Default,
}

/// Outcome of [`IntervalResolver::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub min_interval: Duration,
    pub source: IntervalSource,
    pub step: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct IntervalResolver {
    defaults: ResolverDefaults,
}

impl IntervalResolver {
    pub fn new(defaults: ResolverDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &ResolverDefaults {
        &self.defaults
    }

    /// Resolves both the minimum interval and the step of `query`.
    ///
    /// `datasource_interval` is the datasource-level `timeInterval`, used when
    /// the query does not carry its own.
    pub fn resolve(
        &self,
        query: &Query,
        datasource_interval: &str,
    ) -> Result<Resolution, IntervalError> {
        let (min_interval, source) = self.min_interval(query, datasource_interval)?;
        let step = self.step(query, min_interval);

        Ok(Resolution {
            min_interval,
            source,
            step,
        })
    }

    /// First usable hint wins: `intervalMs`, `interval`, `timeInterval`, then the defaults.
    ///
    /// An `interval` of `"0s"` or one of the interval placeholders counts as unset.
    pub fn min_interval(
        &self,
        query: &Query,
        datasource_interval: &str,
    ) -> Result<(Duration, IntervalSource), IntervalError> {
        let interval = query.interval.trim();
        let interval_unset = interval.is_empty() || interval == "0s" || is_placeholder(interval);

        if interval_unset {
            if query.interval_ms > 0 {
                return Ok((
                    Duration::from_millis(query.interval_ms as u64),
                    IntervalSource::IntervalMs,
                ));
            }
        } else {
            return Ok((parse_interval(interval)?, IntervalSource::Interval));
        }

        let time_interval = if query.time_interval.trim().is_empty() {
            datasource_interval.trim()
        } else {
            query.time_interval.trim()
        };
        if !time_interval.is_empty() {
            return Ok((parse_interval(time_interval)?, IntervalSource::TimeInterval));
        }

        let fallback = if query.instant {
            self.defaults.instant_default_step
        } else {
            self.defaults.default_scrape_interval
        };
        Ok((fallback, IntervalSource::Default))
    }

    /// Step for evaluation of `query` given its minimum interval
    pub fn step(&self, query: &Query, min_interval: Duration) -> Duration {
        if query.instant {
            if min_interval.is_zero() {
                return self.defaults.instant_default_step;
            }
            return min_interval;
        }

        let resolution = match query.max_data_points {
            points if points > 0 => points as u64,
            _ => self.defaults.default_resolution.max(1),
        };
        let range = query.time_range.duration().as_nanos();
        let calculated = Duration::from_nanos((range / resolution as u128) as u64);

        if calculated < min_interval {
            return round_interval(min_interval);
        }
        round_interval(calculated)
    }
}

fn is_placeholder(interval: &str) -> bool {
    matches!(interval, VAR_INTERVAL | VAR_INTERVAL_MS | VAR_RATE_INTERVAL)
}

/// Rounds `interval` to the nearest "human" duration of the staircase
pub fn round_interval(interval: Duration) -> Duration {
    let ms = interval.as_nanos().div_ceil(1_000_000);
    let ms = u64::try_from(ms).unwrap_or(u64::MAX);

    let rounded = STAIRCASE
        .iter()
        .find(|(bound, _)| ms <= *bound)
        .map(|(_, value)| *value)
        .unwrap_or(if ms < MONTH_BOUND { MONTH } else { YEAR });

    Duration::from_millis(rounded)
}

/// Parses an interval hint.
///
/// Accepts an optional `<`/`>` decoration (`">10s"`), a bare integer meaning
/// seconds, compound durations such as `1h30m`, and single units `d`, `w`,
/// `M` (30 days) and `y` (365 days).
pub fn parse_interval(input: &str) -> Result<Duration, IntervalError> {
    let stripped = input.replacen('<', "", 1).replacen('>', "", 1);
    let value = stripped.trim();

    if value.is_empty() {
        return Err(IntervalError::parse(input, "empty interval"));
    }

    if value.bytes().all(|b| b.is_ascii_digit()) {
        let secs: u64 = value
            .parse()
            .map_err(|e| IntervalError::parse(input, e))?;
        return Ok(Duration::from_secs(secs));
    }

    if let Some(duration) = parse_calendar_unit(value) {
        return duration.ok_or_else(|| IntervalError::parse(input, "interval is too large"));
    }

    humantime::parse_duration(value).map_err(|e| IntervalError::parse(input, e))
}

/// `<digits><unit>` for the units whose length differs from humantime's
fn parse_calendar_unit(value: &str) -> Option<Option<Duration>> {
    let unit = match value.chars().last()? {
        'd' => DAY,
        'w' => WEEK,
        'M' => MONTH,
        'y' => YEAR,
        _ => return None,
    };
    let digits = &value[..value.len() - 1];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(
        digits
            .parse::<u64>()
            .ok()
            .and_then(|count| count.checked_mul(unit))
            .map(Duration::from_millis),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TimeRange;
    use chrono::{TimeZone, Utc};

    fn range_query(seconds: i64) -> Query {
        let from = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let to = Utc.timestamp_opt(1_600_000_000 + seconds, 0).unwrap();
        Query {
            time_range: TimeRange { from, to },
            ..Query::default()
        }
    }

    #[test]
    fn test_parse_interval() {
        let cases = [
            ("10s", Duration::from_secs(10)),
            ("30", Duration::from_secs(30)),
            (">10s", Duration::from_secs(10)),
            ("<1m>", Duration::from_secs(60)),
            ("500ms", Duration::from_millis(500)),
            ("1h30m", Duration::from_secs(90 * 60)),
            ("1d", Duration::from_secs(86_400)),
            ("2w", Duration::from_secs(14 * 86_400)),
            ("1M", Duration::from_secs(30 * 86_400)),
            ("1y", Duration::from_secs(365 * 86_400)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_interval(input).unwrap(), expected, "input {input:?}");
        }
    }

    #[test]
    fn test_parse_interval_errors() {
        for input in ["", "<>", "abc", "10x", "s10"] {
            let err = parse_interval(input).unwrap_err();
            assert!(matches!(err, IntervalError::Parse { .. }), "input {input:?}");
        }
    }

    #[test]
    fn test_interval_string_beats_interval_ms() {
        let resolver = IntervalResolver::default();
        let query = Query {
            interval: "10s".to_string(),
            interval_ms: 5_000_000,
            ..range_query(3600)
        };

        let (min, source) = resolver.min_interval(&query, "").unwrap();
        assert_eq!(min, Duration::from_secs(10));
        assert_eq!(source, IntervalSource::Interval);
    }

    #[test]
    fn test_zero_interval_falls_through() {
        let resolver = IntervalResolver::default();
        let query = Query {
            interval: "0s".to_string(),
            interval_ms: 20_000,
            ..range_query(3600)
        };
        assert_eq!(
            resolver.min_interval(&query, "").unwrap(),
            (Duration::from_secs(20), IntervalSource::IntervalMs)
        );

        let query = Query {
            interval: "0s".to_string(),
            ..range_query(3600)
        };
        assert_eq!(
            resolver.min_interval(&query, "1m").unwrap(),
            (Duration::from_secs(60), IntervalSource::TimeInterval)
        );
        assert_eq!(
            resolver.min_interval(&query, "").unwrap(),
            (Duration::from_secs(15), IntervalSource::Default)
        );
    }

    #[test]
    fn test_placeholder_interval_is_unset() {
        let resolver = IntervalResolver::default();
        for placeholder in [VAR_INTERVAL, VAR_INTERVAL_MS, VAR_RATE_INTERVAL] {
            let query = Query {
                interval: placeholder.to_string(),
                interval_ms: 30_000,
                ..range_query(3600)
            };
            assert_eq!(
                resolver.min_interval(&query, "").unwrap().0,
                Duration::from_secs(30)
            );
        }
    }

    #[test]
    fn test_query_time_interval_beats_datasource() {
        let resolver = IntervalResolver::default();
        let query = Query {
            time_interval: "30s".to_string(),
            ..range_query(3600)
        };
        assert_eq!(
            resolver.min_interval(&query, "1m").unwrap(),
            (Duration::from_secs(30), IntervalSource::TimeInterval)
        );
    }

    #[test]
    fn test_instant_defaults() {
        let resolver = IntervalResolver::default();
        let query = Query {
            instant: true,
            ..range_query(3600)
        };

        let resolution = resolver.resolve(&query, "").unwrap();
        assert_eq!(resolution.min_interval, Duration::from_secs(300));
        assert_eq!(resolution.step, Duration::from_secs(300));
        assert_eq!(resolver.step(&query, Duration::ZERO), Duration::from_secs(300));

        // Instant steps are not rounded
        assert_eq!(
            resolver.step(&query, Duration::from_secs(7)),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn test_malformed_hint() {
        let resolver = IntervalResolver::default();
        let query = Query {
            interval: "fast".to_string(),
            ..range_query(3600)
        };
        assert!(resolver.resolve(&query, "").is_err());

        let query = range_query(3600);
        assert!(resolver.resolve(&query, "often").is_err());
    }

    #[test]
    fn test_range_step() {
        let resolver = IntervalResolver::default();

        // 60s / 1500 points is far below the minimum interval
        let query = Query {
            interval: "5s".to_string(),
            interval_ms: 20_000,
            time_interval: "30s".to_string(),
            ..range_query(60)
        };
        let resolution = resolver.resolve(&query, "").unwrap();
        assert_eq!(resolution.step, Duration::from_secs(5));

        // A day over 1500 points is 57.6s, rounded to a minute
        let query = range_query(86_400);
        assert_eq!(
            resolver.resolve(&query, "").unwrap().step,
            Duration::from_secs(60)
        );

        // maxDataPoints overrides the default resolution
        let query = Query {
            max_data_points: 100,
            ..range_query(3600)
        };
        assert_eq!(
            resolver.resolve(&query, "").unwrap().step,
            Duration::from_secs(30)
        );

        // The resolved minimum is rounded as well
        let query = Query {
            interval: "13s".to_string(),
            ..range_query(60)
        };
        assert_eq!(
            resolver.resolve(&query, "").unwrap().step,
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_custom_defaults() {
        let resolver = IntervalResolver::new(ResolverDefaults {
            default_scrape_interval: Duration::from_secs(60),
            instant_default_step: Duration::from_secs(30),
            default_resolution: 10,
            rate_scrape_fallback: Duration::from_secs(60),
        });

        let query = range_query(3600);
        let resolution = resolver.resolve(&query, "").unwrap();
        assert_eq!(resolution.min_interval, Duration::from_secs(60));
        assert_eq!(resolution.step, Duration::from_secs(300));

        let query = Query {
            instant: true,
            ..range_query(3600)
        };
        assert_eq!(
            resolver.resolve(&query, "").unwrap().step,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_round_interval() {
        let cases = [
            (Duration::ZERO, Duration::from_millis(1)),
            (Duration::from_micros(300), Duration::from_millis(1)),
            (Duration::from_millis(15), Duration::from_millis(10)),
            (Duration::from_millis(30), Duration::from_millis(20)),
            (Duration::from_millis(1500), Duration::from_secs(1)),
            (Duration::from_millis(1501), Duration::from_secs(2)),
            (Duration::from_secs(5), Duration::from_secs(5)),
            (Duration::from_secs(13), Duration::from_secs(15)),
            (Duration::from_secs(40), Duration::from_secs(30)),
            (Duration::from_secs(100), Duration::from_secs(120)),
            (Duration::from_secs(3 * 3600), Duration::from_secs(3 * 3600)),
            (Duration::from_secs(2 * 86_400), Duration::from_secs(86_400)),
            (Duration::from_secs(20 * 86_400), Duration::from_secs(7 * 86_400)),
            (Duration::from_secs(40 * 86_400), Duration::from_secs(30 * 86_400)),
            (Duration::from_secs(42 * 86_400), Duration::from_secs(365 * 86_400)),
        ];
        for (input, expected) in cases {
            assert_eq!(round_interval(input), expected, "input {input:?}");
        }
    }

    #[test]
    fn test_round_interval_is_monotonic_staircase() {
        let mut staircase: Vec<u64> = STAIRCASE.iter().map(|(_, value)| *value).collect();
        staircase.extend([MONTH, YEAR]);

        let mut previous = Duration::ZERO;
        let mut ms = 0u64;
        while ms < 2 * YEAR {
            let rounded = round_interval(Duration::from_millis(ms));
            assert!(rounded >= previous, "not monotonic at {ms}ms");
            assert!(
                staircase.contains(&(rounded.as_millis() as u64)),
                "{rounded:?} is off the staircase"
            );
            previous = rounded;
            ms = ms * 11 / 10 + 1;
        }
    }
}
