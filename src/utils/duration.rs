//! Human-friendly timespan parsing
//!
//! Accepts the forms people type on the command line when bounding a
//! capture: unit forms (`372m`, `1h30m`, `2h 5m 10s`, `1.5h`, `90 seconds`),
//! clock forms (`45:00`, `6:12:00`) and bare seconds (`600`).

use std::time::Duration;

/// Default capture bound, long enough for a T-120 tape at EP speed plus margin
pub const DEFAULT_TIMESPAN: &str = "372m";

/// Parse a timespan string into a duration.
///
/// Returns `None` when the string is empty, malformed, zero, or too large
/// to represent.
pub fn parse_timespan(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let seconds = if input.contains(':') {
        parse_clock(input)?
    } else if let Ok(bare) = input.parse::<f64>() {
        bare
    } else {
        parse_units(input)?
    };

    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

fn parse_clock(input: &str) -> Option<f64> {
    let parts: Vec<&str> = input.split(':').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    let mut total = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let last = i == parts.len() - 1;
        let value: f64 = if last {
            part.parse().ok()?
        } else {
            part.parse::<u64>().ok()? as f64
        };
        // Every field but the leading one is bounded by its base
        if i > 0 && value >= 60.0 {
            return None;
        }
        total = total * 60.0 + value;
    }
    Some(total)
}

fn parse_units(input: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut rest = input;
    let mut seen_any = false;

    while !rest.is_empty() {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = rest[number_len..].trim_start();

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let unit = rest[..unit_len].to_ascii_lowercase();
        rest = &rest[unit_len..];

        total += value * unit_scale(&unit)?;
        seen_any = true;
    }

    seen_any.then_some(total)
}

fn unit_scale(unit: &str) -> Option<f64> {
    match unit {
        "w" | "wk" | "wks" | "week" | "weeks" => Some(604_800.0),
        "d" | "dy" | "dys" | "day" | "days" => Some(86_400.0),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(3_600.0),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(60.0),
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timespan() {
        assert_eq!(
            parse_timespan(DEFAULT_TIMESPAN),
            Some(Duration::from_secs(372 * 60))
        );
    }

    #[test]
    fn test_compound_units() {
        assert_eq!(parse_timespan("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_timespan("2h 5m 10s"), Some(Duration::from_secs(7510)));
        assert_eq!(parse_timespan("90 seconds"), Some(Duration::from_secs(90)));
        assert_eq!(parse_timespan("1.5h"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_timespan("3 mins, 2 secs"), Some(Duration::from_secs(182)));
    }

    #[test]
    fn test_clock_forms() {
        assert_eq!(parse_timespan("45:00"), Some(Duration::from_secs(2700)));
        assert_eq!(parse_timespan("6:12:00"), Some(Duration::from_secs(22320)));
        assert_eq!(parse_timespan("1:75"), None);
        assert_eq!(parse_timespan("1::2"), None);
    }

    #[test]
    fn test_bare_seconds() {
        assert_eq!(parse_timespan("600"), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_invalid() {
        assert_eq!(parse_timespan(""), None);
        assert_eq!(parse_timespan("forever"), None);
        assert_eq!(parse_timespan("10 parsecs"), None);
        assert_eq!(parse_timespan("m"), None);
        assert_eq!(parse_timespan("0m"), None);
        assert_eq!(parse_timespan("-5"), None);
        assert_eq!(parse_timespan("1e20"), None);
        assert_eq!(parse_timespan("99999999999999999999w"), None);
    }
}
