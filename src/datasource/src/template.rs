//! Built-in placeholder substitution inside query expressions.

use std::time::Duration;

use crate::error::BuildError;
use crate::interval::{IntervalSource, Resolution, ResolverDefaults};

pub const VAR_INTERVAL: &str = "$__interval";
pub const VAR_INTERVAL_MS: &str = "$__interval_ms";
pub const VAR_RANGE: &str = "$__range";
pub const VAR_RANGE_S: &str = "$__range_s";
pub const VAR_RANGE_MS: &str = "$__range_ms";
pub const VAR_RATE_INTERVAL: &str = "$__rate_interval";

const PLACEHOLDER_PREFIX: &str = "$__";

#[derive(Debug, Clone, Copy)]
enum Placeholder {
    Interval,
    IntervalMs,
    Range,
    RangeS,
    RangeMs,
    RateInterval,
}

/// Longer tokens come before the tokens they start with.
const PLACEHOLDERS: &[(&str, Placeholder)] = &[
    (VAR_INTERVAL_MS, Placeholder::IntervalMs),
    (VAR_INTERVAL, Placeholder::Interval),
    (VAR_RANGE_MS, Placeholder::RangeMs),
    (VAR_RANGE_S, Placeholder::RangeS),
    (VAR_RANGE, Placeholder::Range),
    (VAR_RATE_INTERVAL, Placeholder::RateInterval),
];

const UNITS: &[(u128, &str)] = &[
    (365 * 24 * 3_600_000, "y"),
    (24 * 3_600_000, "d"),
    (3_600_000, "h"),
    (60_000, "m"),
    (1_000, "s"),
];

/// Substitutes placeholders using the values resolved for one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateExpander {
    step: Duration,
    range: Duration,
    rate_interval: Duration,
}

impl TemplateExpander {
    pub fn new(step: Duration, range: Duration, rate_interval: Duration) -> Self {
        Self {
            step,
            range,
            rate_interval,
        }
    }

    /// Expander for a resolved query.
    ///
    /// `interval_hint` is the raw `interval` of the query, which decides how
    /// `$__rate_interval` is derived.
    pub fn for_resolution(
        resolution: &Resolution,
        range: Duration,
        interval_hint: &str,
        defaults: &ResolverDefaults,
    ) -> Self {
        Self::new(
            resolution.step,
            range,
            rate_interval(resolution, interval_hint, defaults),
        )
    }

    /// Replaces every placeholder of `expr` in a single pass.
    ///
    /// Fails when nothing but whitespace is left afterwards.
    pub fn expand(&self, expr: &str) -> Result<String, BuildError> {
        let mut expanded = String::with_capacity(expr.len());
        let mut rest = expr;

        while let Some(pos) = rest.find(PLACEHOLDER_PREFIX) {
            expanded.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            match PLACEHOLDERS.iter().find(|(token, _)| tail.starts_with(token)) {
                Some((token, placeholder)) => {
                    expanded.push_str(&self.substitute(*placeholder));
                    rest = &tail[token.len()..];
                }
                None => {
                    expanded.push_str(PLACEHOLDER_PREFIX);
                    rest = &tail[PLACEHOLDER_PREFIX.len()..];
                }
            }
        }
        expanded.push_str(rest);

        if expanded.trim().is_empty() {
            return Err(BuildError::BlankExpression);
        }
        Ok(expanded)
    }

    fn substitute(&self, placeholder: Placeholder) -> String {
        let range_ms = self.range.as_millis();
        let range_s = (range_ms + 500) / 1000;

        match placeholder {
            Placeholder::Interval => format_duration(self.step),
            Placeholder::IntervalMs => self.step.as_millis().to_string(),
            Placeholder::Range => format!("{range_s}s"),
            Placeholder::RangeS => range_s.to_string(),
            Placeholder::RangeMs => range_ms.to_string(),
            Placeholder::RateInterval => format_duration(self.rate_interval),
        }
    }
}

/// Window for `rate()`-style functions: `max(step + scrape, 4 * scrape)`, saturating.
///
/// The scrape interval is the resolved minimum interval, or the configured
/// fallback when no hint resolved. A query whose `interval` hint is
/// `$__rate_interval` itself gets the step verbatim.
pub fn rate_interval(
    resolution: &Resolution,
    interval_hint: &str,
    defaults: &ResolverDefaults,
) -> Duration {
    if interval_hint.trim() == VAR_RATE_INTERVAL {
        return resolution.step;
    }

    let scrape = match resolution.source {
        IntervalSource::Default => defaults.rate_scrape_fallback,
        _ => resolution.min_interval,
    };
    resolution
        .step
        .saturating_add(scrape)
        .max(scrape.saturating_mul(4))
}

/// Formats `d` with the largest unit dividing it evenly, e.g. `2m`, `90s`, `1500ms`.
///
/// Anything below a millisecond is reported as `1ms`.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        return "1ms".to_string();
    }

    UNITS
        .iter()
        .find(|(unit, _)| ms % unit == 0)
        .map(|(unit, suffix)| format!("{}{suffix}", ms / unit))
        .unwrap_or_else(|| format!("{ms}ms"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::IntervalResolver;
    use crate::query::Query;

    fn expander() -> TemplateExpander {
        TemplateExpander::new(
            Duration::from_secs(30),
            Duration::from_millis(3_600_400),
            Duration::from_secs(120),
        )
    }

    #[test]
    fn test_format_duration() {
        let cases = [
            (Duration::ZERO, "1ms"),
            (Duration::from_micros(500), "1ms"),
            (Duration::from_millis(1), "1ms"),
            (Duration::from_millis(1500), "1500ms"),
            (Duration::from_secs(5), "5s"),
            (Duration::from_secs(90), "90s"),
            (Duration::from_secs(120), "2m"),
            (Duration::from_secs(3600), "1h"),
            (Duration::from_secs(86_400), "1d"),
            (Duration::from_secs(7 * 86_400), "7d"),
            (Duration::from_secs(365 * 86_400), "1y"),
        ];
        for (input, expected) in cases {
            assert_eq!(format_duration(input), expected, "input {input:?}");
        }
    }

    #[test]
    fn test_expand_all_placeholders() {
        let expanded = expander()
            .expand("a[$__interval] b=$__interval_ms c=$__range d=$__range_s e=$__range_ms f[$__rate_interval]")
            .unwrap();
        assert_eq!(
            expanded,
            "a[30s] b=30000 c=3600s d=3600 e=3600400 f[2m]"
        );
    }

    #[test]
    fn test_range_seconds_are_rounded() {
        let expander = TemplateExpander::new(
            Duration::from_secs(1),
            Duration::from_millis(1_500),
            Duration::from_secs(1),
        );
        assert_eq!(expander.expand("$__range_s").unwrap(), "2");
        assert_eq!(expander.expand("$__range").unwrap(), "2s");
    }

    #[test]
    fn test_expand_without_placeholders_is_identity() {
        let expander = expander();
        for expr in ["up", "sum(rate(x[5m])) by (job)", "a$_b", "cost$__unknown"] {
            assert_eq!(expander.expand(expr).unwrap(), expr);
            assert_eq!(
                expander.expand(&expander.expand(expr).unwrap()).unwrap(),
                expr
            );
        }
    }

    #[test]
    fn test_interval_expansion_matches_format_duration() {
        for secs in [1u64, 15, 60, 90, 600, 7200, 86_400] {
            let step = Duration::from_secs(secs);
            let expander = TemplateExpander::new(step, Duration::ZERO, step);
            assert_eq!(expander.expand(VAR_INTERVAL).unwrap(), format_duration(step));
        }
    }

    #[test]
    fn test_blank_expression() {
        let expander = expander();
        assert!(matches!(expander.expand(""), Err(BuildError::BlankExpression)));
        assert!(matches!(expander.expand("  \n"), Err(BuildError::BlankExpression)));
    }

    #[test]
    fn test_rate_interval() {
        let defaults = ResolverDefaults::default();

        let resolution = Resolution {
            min_interval: Duration::from_secs(5),
            source: IntervalSource::Interval,
            step: Duration::from_secs(5),
        };
        assert_eq!(
            rate_interval(&resolution, "5s", &defaults),
            Duration::from_secs(20)
        );

        // Step dominates once it exceeds three scrape intervals
        let resolution = Resolution {
            min_interval: Duration::from_secs(15),
            source: IntervalSource::TimeInterval,
            step: Duration::from_secs(120),
        };
        assert_eq!(
            rate_interval(&resolution, "", &defaults),
            Duration::from_secs(135)
        );

        let resolution = Resolution {
            min_interval: Duration::from_secs(300),
            source: IntervalSource::Default,
            step: Duration::from_secs(300),
        };
        assert_eq!(
            rate_interval(&resolution, "", &defaults),
            Duration::from_secs(315)
        );
        assert_eq!(
            rate_interval(&resolution, VAR_RATE_INTERVAL, &defaults),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_rate_interval_scenario() {
        let defaults = ResolverDefaults::default();
        let resolution = Resolution {
            min_interval: Duration::from_secs(5),
            source: IntervalSource::Interval,
            step: Duration::from_secs(5),
        };
        let expander =
            TemplateExpander::for_resolution(&resolution, Duration::from_secs(60), "5s", &defaults);

        assert_eq!(
            expander.expand("rate(x[$__rate_interval])").unwrap(),
            "rate(x[20s])"
        );
    }

    #[test]
    fn test_oversized_interval_hint() {
        let resolver = IntervalResolver::default();
        let query = Query {
            interval: "5000000000000000000".to_string(),
            expr: "rate(x[$__rate_interval])".to_string(),
            ..Query::default()
        };

        let resolution = resolver.resolve(&query, "").unwrap();
        assert_eq!(resolution.source, IntervalSource::Interval);
        assert_eq!(
            rate_interval(&resolution, &query.interval, resolver.defaults()),
            Duration::MAX
        );

        let expander = TemplateExpander::for_resolution(
            &resolution,
            Duration::from_secs(3600),
            &query.interval,
            resolver.defaults(),
        );
        let expanded = expander.expand(&query.expr).unwrap();
        assert!(expanded.starts_with("rate(x["), "{expanded}");
        assert_eq!(expander.expand("$__interval").unwrap(), "1y");
    }
}
