//! Time-period expressions such as `"7 days"` or `"1 hour"`.

use chrono::TimeDelta;

use crate::error::ParseError;

/// Supported duration units, keyed by singular name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl Unit {
    fn lookup(name: &str) -> Option<Self> {
        let singular = name.strip_suffix('s').unwrap_or(name);
        match singular.to_ascii_lowercase().as_str() {
            "second" => Some(Self::Second),
            "minute" => Some(Self::Minute),
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            _ => None,
        }
    }

    fn delta(self, n: i64) -> Option<TimeDelta> {
        match self {
            Self::Second => TimeDelta::try_seconds(n),
            Self::Minute => TimeDelta::try_minutes(n),
            Self::Hour => TimeDelta::try_hours(n),
            Self::Day => TimeDelta::try_days(n),
            Self::Week => TimeDelta::try_weeks(n),
        }
    }
}

/// Parse `"<integer> <unit>"` into a duration.
///
/// The unit may be singular or plural. Anything that does not split into
/// exactly two whitespace-separated tokens, or whose number is not a whole
/// number, is malformed.
pub fn parse(text: &str) -> Result<TimeDelta, ParseError> {
    let mut tokens = text.split_whitespace();
    let (Some(number), Some(unit), None) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Err(ParseError::malformed(text));
    };

    let n: i64 = number.parse().map_err(|_| ParseError::malformed(text))?;
    let unit = Unit::lookup(unit).ok_or_else(|| ParseError::unknown_unit(text))?;

    unit.delta(n).ok_or_else(|| ParseError::malformed(text))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::error::ParseErrorReason;

    #[rstest]
    #[case("30 second", TimeDelta::seconds(30))]
    #[case("5 minute", TimeDelta::minutes(5))]
    #[case("1 hour", TimeDelta::hours(1))]
    #[case("7 day", TimeDelta::days(7))]
    #[case("2 week", TimeDelta::weeks(2))]
    fn plural_and_singular_agree(#[case] singular: &str, #[case] expected: TimeDelta) {
        let plural = format!("{singular}s");
        assert_eq!(parse(singular).unwrap(), expected);
        assert_eq!(parse(&plural).unwrap(), expected);
    }

    #[rstest]
    #[case("abc hours")]
    #[case("5")]
    #[case("")]
    #[case("5 days ago")]
    #[case("1.5 hours")]
    fn malformed_inputs(#[case] input: &str) {
        let err = parse(input).unwrap_err();
        assert_eq!(err.reason, ParseErrorReason::Malformed);
    }

    #[rstest]
    #[case("5 fortnights")]
    #[case("3 months")]
    #[case("1 s")]
    fn unknown_units(#[case] input: &str) {
        let err = parse(input).unwrap_err();
        assert_eq!(err.reason, ParseErrorReason::UnknownUnit);
    }

    #[test]
    fn extra_whitespace_is_tolerated() {
        assert_eq!(parse("  7   days ").unwrap(), TimeDelta::days(7));
    }

    #[test]
    fn negative_numbers_are_whole_numbers() {
        assert_eq!(parse("-2 hours").unwrap(), TimeDelta::hours(-2));
    }

    #[test]
    fn overflowing_amount_is_malformed() {
        let err = parse("9223372036854775807 weeks").unwrap_err();
        assert_eq!(err.reason, ParseErrorReason::Malformed);
    }

    #[test]
    fn unit_case_is_ignored() {
        assert_eq!(parse("1 Hour").unwrap(), TimeDelta::hours(1));
    }
}
