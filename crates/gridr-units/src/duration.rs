//! Duration quantities.
//!
//! A [`Duration`] is a nanosecond count plus a display unit. On top of the
//! plain `<amount><unit>` grammar it accepts the composite forms used in
//! batch-system configuration: `"1d 4h 9m 16s"` (any subset, spaces
//! optional), `"HH:MM:SS"`, and `"DD:HH:MM:SS"`. The two-field colon form
//! is rejected: `"01:02"` could be minutes:seconds or hours:minutes, and
//! guessing wrong by a factor of sixty is worse than asking the caller to
//! spell it out.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::parse::{self, Amount, ParseQuantityError};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Units of duration, from nanoseconds to weeks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    /// Nanosecond, the base unit.
    Nanosecond,
    /// Microsecond.
    Microsecond,
    /// Millisecond.
    Millisecond,
    /// Second.
    Second,
    /// Minute.
    Minute,
    /// Hour.
    Hour,
    /// Day.
    Day,
    /// Week.
    Week,
}

impl DurationUnit {
    /// All units, smallest to largest.
    pub const ALL: [DurationUnit; 8] = [
        DurationUnit::Nanosecond,
        DurationUnit::Microsecond,
        DurationUnit::Millisecond,
        DurationUnit::Second,
        DurationUnit::Minute,
        DurationUnit::Hour,
        DurationUnit::Day,
        DurationUnit::Week,
    ];

    /// Length of one unit, in nanoseconds.
    pub const fn nanos(self) -> u64 {
        match self {
            DurationUnit::Nanosecond => 1,
            DurationUnit::Microsecond => 1_000,
            DurationUnit::Millisecond => 1_000_000,
            DurationUnit::Second => NANOS_PER_SEC,
            DurationUnit::Minute => 60 * NANOS_PER_SEC,
            DurationUnit::Hour => 3_600 * NANOS_PER_SEC,
            DurationUnit::Day => 86_400 * NANOS_PER_SEC,
            DurationUnit::Week => 604_800 * NANOS_PER_SEC,
        }
    }

    /// Canonical symbol, as printed by `Display`.
    pub const fn symbol(self) -> &'static str {
        match self {
            DurationUnit::Nanosecond => "ns",
            DurationUnit::Microsecond => "us",
            DurationUnit::Millisecond => "ms",
            DurationUnit::Second => "s",
            DurationUnit::Minute => "m",
            DurationUnit::Hour => "h",
            DurationUnit::Day => "d",
            DurationUnit::Week => "w",
        }
    }

    /// Look a unit up by symbol or spelled-out name, case-insensitively.
    pub fn from_symbol(symbol: &str) -> Option<DurationUnit> {
        let lower = symbol.to_ascii_lowercase();
        let unit = match lower.as_str() {
            "ns" | "nanosec" | "nanosecs" | "nanosecond" | "nanoseconds" => {
                DurationUnit::Nanosecond
            }
            "us" | "microsec" | "microsecs" | "microsecond" | "microseconds" => {
                DurationUnit::Microsecond
            }
            "ms" | "millisec" | "millisecs" | "millisecond" | "milliseconds" => {
                DurationUnit::Millisecond
            }
            "s" | "sec" | "secs" | "second" | "seconds" => DurationUnit::Second,
            "m" | "min" | "mins" | "minute" | "minutes" => DurationUnit::Minute,
            "h" | "hr" | "hrs" | "hour" | "hours" => DurationUnit::Hour,
            "d" | "day" | "days" => DurationUnit::Day,
            "w" | "wk" | "wks" | "week" | "weeks" => DurationUnit::Week,
            _ => return None,
        };
        Some(unit)
    }

    /// Largest unit that fits `nanos` at least once (nanoseconds for zero).
    fn largest_containing(nanos: u64) -> DurationUnit {
        DurationUnit::ALL
            .iter()
            .rev()
            .copied()
            .find(|unit| nanos >= unit.nanos())
            .unwrap_or(DurationUnit::Nanosecond)
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A span of time.
///
/// # Example
///
/// ```ignore
/// use gridr_units::{Duration, DurationUnit};
///
/// let walltime: Duration = "1h30m".parse()?;
/// assert_eq!(walltime.amount(DurationUnit::Minute), 90);
/// assert_eq!("01:02:03".parse::<Duration>()?, Duration::seconds(3723));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Duration {
    nanos: u64,
    unit: DurationUnit,
}

impl Duration {
    /// Zero time.
    pub const ZERO: Duration = Duration {
        nanos: 0,
        unit: DurationUnit::Second,
    };

    /// Build from an amount of `unit`.
    ///
    /// # Panics
    ///
    /// Panics if the nanosecond count overflows `u64`.
    pub fn new(amount: u64, unit: DurationUnit) -> Duration {
        match amount.checked_mul(unit.nanos()) {
            Some(nanos) => Duration { nanos, unit },
            None => panic!("overflow building a duration quantity"),
        }
    }

    /// `n` nanoseconds.
    pub fn nanoseconds(n: u64) -> Duration {
        Duration::new(n, DurationUnit::Nanosecond)
    }

    /// `n` milliseconds.
    pub fn milliseconds(n: u64) -> Duration {
        Duration::new(n, DurationUnit::Millisecond)
    }

    /// `n` seconds.
    pub fn seconds(n: u64) -> Duration {
        Duration::new(n, DurationUnit::Second)
    }

    /// `n` minutes.
    pub fn minutes(n: u64) -> Duration {
        Duration::new(n, DurationUnit::Minute)
    }

    /// `n` hours.
    pub fn hours(n: u64) -> Duration {
        Duration::new(n, DurationUnit::Hour)
    }

    /// `n` days.
    pub fn days(n: u64) -> Duration {
        Duration::new(n, DurationUnit::Day)
    }

    /// Total nanosecond count.
    pub const fn nanos(self) -> u64 {
        self.nanos
    }

    /// The unit this quantity is expressed in.
    pub const fn unit(self) -> DurationUnit {
        self.unit
    }

    /// Amount in `unit`, truncated toward zero.
    pub const fn amount(self, unit: DurationUnit) -> u64 {
        self.nanos / unit.nanos()
    }

    /// Amount in `unit`, fractional.
    pub fn amount_f64(self, unit: DurationUnit) -> f64 {
        self.nanos as f64 / unit.nanos() as f64
    }

    /// The same span, re-expressed in `unit`.
    pub const fn to_unit(self, unit: DurationUnit) -> Duration {
        Duration {
            nanos: self.nanos,
            unit,
        }
    }

    /// Convert to a [`std::time::Duration`].
    pub const fn as_std(self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.nanos)
    }

    /// Checked addition; `None` on overflow. The sum is expressed in the
    /// smaller of the two units.
    pub fn checked_add(self, other: Duration) -> Option<Duration> {
        Some(Duration {
            nanos: self.nanos.checked_add(other.nanos)?,
            unit: smaller_unit(self.unit, other.unit),
        })
    }

    /// Checked subtraction; `None` when `other` is larger.
    pub fn checked_sub(self, other: Duration) -> Option<Duration> {
        Some(Duration {
            nanos: self.nanos.checked_sub(other.nanos)?,
            unit: smaller_unit(self.unit, other.unit),
        })
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, other: Duration) -> Duration {
        Duration {
            nanos: self.nanos.saturating_sub(other.nanos),
            unit: smaller_unit(self.unit, other.unit),
        }
    }

    /// Ratio of two durations.
    pub fn ratio(self, other: Duration) -> f64 {
        self.nanos as f64 / other.nanos as f64
    }
}

fn smaller_unit(a: DurationUnit, b: DurationUnit) -> DurationUnit {
    if a.nanos() <= b.nanos() { a } else { b }
}

impl From<std::time::Duration> for Duration {
    fn from(value: std::time::Duration) -> Duration {
        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        Duration {
            nanos,
            unit: DurationUnit::Second,
        }
    }
}

impl PartialEq for Duration {
    fn eq(&self, other: &Duration) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Duration {}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Duration) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Duration {
    fn cmp(&self, other: &Duration) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Hash for Duration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nanos.hash(state);
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, other: Duration) -> Duration {
        match self.checked_add(other) {
            Some(sum) => sum,
            None => panic!("overflow when adding durations"),
        }
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, other: Duration) -> Duration {
        match self.checked_sub(other) {
            Some(diff) => diff,
            None => panic!("overflow when subtracting durations"),
        }
    }
}

impl Mul<u64> for Duration {
    type Output = Duration;

    fn mul(self, scalar: u64) -> Duration {
        match self.nanos.checked_mul(scalar) {
            Some(nanos) => Duration {
                nanos,
                unit: self.unit,
            },
            None => panic!("overflow when scaling a duration"),
        }
    }
}

impl Mul<Duration> for u64 {
    type Output = Duration;

    fn mul(self, quantity: Duration) -> Duration {
        quantity * self
    }
}

impl Div<u64> for Duration {
    type Output = Duration;

    /// Integer division by a scalar. The result is re-expressed in the
    /// largest unit that keeps the amount at least one.
    fn div(self, scalar: u64) -> Duration {
        let nanos = self.nanos / scalar;
        Duration {
            nanos,
            unit: DurationUnit::largest_containing(nanos),
        }
    }
}

impl Div<Duration> for Duration {
    type Output = f64;

    fn div(self, other: Duration) -> f64 {
        self.ratio(other)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.unit.nanos();
        if self.nanos % size == 0 {
            write!(f, "{}{}", self.nanos / size, self.unit)
        } else {
            write!(f, "{}{}", self.nanos as f64 / size as f64, self.unit)
        }
    }
}

impl FromStr for Duration {
    type Err = ParseQuantityError;

    fn from_str(input: &str) -> Result<Duration, ParseQuantityError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ParseQuantityError::Empty);
        }
        if trimmed.contains(':') {
            return parse_colon_form(trimmed, input);
        }

        let parts = parse::scan_parts(trimmed)?;
        let mut total: u64 = 0;
        let mut unit: Option<DurationUnit> = None;
        for (amount, symbol) in parts {
            let part_unit = DurationUnit::from_symbol(&symbol).ok_or_else(|| {
                ParseQuantityError::UnknownUnit {
                    dimension: "duration",
                    unit: symbol,
                    input: input.to_owned(),
                }
            })?;
            let nanos = amount.to_base(part_unit.nanos(), "duration", input)?;
            total = total
                .checked_add(nanos)
                .ok_or_else(|| ParseQuantityError::Overflow {
                    dimension: "duration",
                    input: input.to_owned(),
                })?;
            // A composite reads in its finest-grained unit.
            unit = Some(match unit {
                Some(seen) => smaller_unit(seen, part_unit),
                None => part_unit,
            });
        }
        match unit {
            Some(unit) => Ok(Duration { nanos: total, unit }),
            None => Err(ParseQuantityError::Empty),
        }
    }
}

/// Parse `"HH:MM:SS"` or `"DD:HH:MM:SS"`; reject the ambiguous two-field
/// form.
fn parse_colon_form(trimmed: &str, input: &str) -> Result<Duration, ParseQuantityError> {
    let malformed = || ParseQuantityError::MalformedAmount {
        input: input.to_owned(),
    };
    let fields = trimmed
        .split(':')
        .map(|field| field.trim().parse::<u64>().map_err(|_| malformed()))
        .collect::<Result<Vec<_>, _>>()?;
    let (days, hours, minutes, seconds) = match fields.as_slice() {
        [hours, minutes, seconds] => (0, *hours, *minutes, *seconds),
        [days, hours, minutes, seconds] => (*days, *hours, *minutes, *seconds),
        [_, _] => {
            return Err(ParseQuantityError::AmbiguousColonForm {
                input: input.to_owned(),
            });
        }
        _ => return Err(malformed()),
    };
    let total_seconds = days
        .checked_mul(86_400)
        .and_then(|t| t.checked_add(hours.checked_mul(3_600)?))
        .and_then(|t| t.checked_add(minutes.checked_mul(60)?))
        .and_then(|t| t.checked_add(seconds))
        .ok_or_else(|| ParseQuantityError::Overflow {
            dimension: "duration",
            input: input.to_owned(),
        })?;
    Amount::Int(total_seconds)
        .to_base(NANOS_PER_SEC, "duration", input)
        .map(|nanos| Duration {
            nanos,
            unit: DurationUnit::Second,
        })
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_every_unit() {
        for unit in DurationUnit::ALL {
            let text = format!("5{}", unit.symbol());
            let parsed: Duration = text.parse().unwrap();
            assert_eq!(parsed.nanos(), 5 * unit.nanos(), "unit {unit}");
            assert_eq!(parsed.unit(), unit);
        }
    }

    #[test]
    fn parse_spelled_out_aliases() {
        assert_eq!("3 seconds".parse::<Duration>().unwrap(), Duration::seconds(3));
        assert_eq!("2 hours".parse::<Duration>().unwrap(), Duration::hours(2));
        assert_eq!("1 day".parse::<Duration>().unwrap(), Duration::days(1));
        assert_eq!("4 mins".parse::<Duration>().unwrap(), Duration::minutes(4));
    }

    #[test]
    fn parse_composite_forms() {
        let d: Duration = "1d 4h 9m 16s".parse().unwrap();
        assert_eq!(d, Duration::seconds(86_400 + 4 * 3_600 + 9 * 60 + 16));
        assert_eq!(d.unit(), DurationUnit::Second);

        let d: Duration = "1h30m".parse().unwrap();
        assert_eq!(d, Duration::minutes(90));
        assert_eq!(d.unit(), DurationUnit::Minute);
    }

    #[test]
    fn parse_three_field_colon_form() {
        assert_eq!("01:02:03".parse::<Duration>().unwrap(), Duration::seconds(3723));
        assert_eq!("01:01:01".parse::<Duration>().unwrap(), Duration::seconds(3661));
    }

    #[test]
    fn parse_four_field_colon_form() {
        // DD:HH:MM:SS
        assert_eq!(
            "01:02:03:04".parse::<Duration>().unwrap(),
            Duration::seconds(93_784)
        );
    }

    #[test]
    fn two_field_colon_form_is_ambiguous() {
        assert!(matches!(
            "01:02".parse::<Duration>(),
            Err(ParseQuantityError::AmbiguousColonForm { .. })
        ));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(
            "5 parsecs".parse::<Duration>(),
            Err(ParseQuantityError::UnknownUnit { .. })
        ));
        assert!(matches!(
            "-7s".parse::<Duration>(),
            Err(ParseQuantityError::NegativeAmount { .. })
        ));
        assert!("1:2:3:4:5".parse::<Duration>().is_err());
        assert!("aa:bb:cc".parse::<Duration>().is_err());
    }

    #[test]
    fn fractional_amounts() {
        assert_eq!("0.5h".parse::<Duration>().unwrap(), Duration::minutes(30));
        assert_eq!("1.5 s".parse::<Duration>().unwrap(), Duration::milliseconds(1500));
    }

    #[test]
    fn sum_takes_smaller_unit() {
        let sum = Duration::hours(1) + Duration::minutes(30);
        assert_eq!(sum.unit(), DurationUnit::Minute);
        assert_eq!(sum.amount(DurationUnit::Minute), 90);
    }

    #[test]
    fn ordering_ignores_unit() {
        assert!(Duration::seconds(61) > Duration::minutes(1));
        assert_eq!(Duration::minutes(60), Duration::hours(1));
    }

    #[test]
    fn scalar_and_ratio_arithmetic() {
        assert_eq!(Duration::minutes(15) * 4, Duration::hours(1));
        assert_eq!(Duration::hours(1) / 2, Duration::minutes(30));
        assert_eq!(Duration::hours(1) / Duration::minutes(30), 2.0);
    }

    #[test]
    fn std_interop() {
        let d = Duration::milliseconds(1500);
        assert_eq!(d.as_std(), std::time::Duration::from_millis(1500));
        let back: Duration = std::time::Duration::from_secs(90).into();
        assert_eq!(back, Duration::seconds(90));
    }

    #[test]
    fn serde_round_trips_as_string() {
        let d = Duration::minutes(90);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"90m\"");
        let back: Duration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    fn arb_unit() -> impl Strategy<Value = DurationUnit> {
        (0..DurationUnit::ALL.len()).prop_map(|i| DurationUnit::ALL[i])
    }

    proptest! {
        #[test]
        fn display_round_trips(amount in 0u64..=4096, unit in arb_unit()) {
            let quantity = Duration::new(amount, unit);
            let back: Duration = quantity.to_string().parse().unwrap();
            prop_assert_eq!(back, quantity);
            prop_assert_eq!(back.unit(), quantity.unit());
        }

        #[test]
        fn add_then_sub_is_identity(
            a in 0u64..=4096,
            ua in arb_unit(),
            b in 0u64..=4096,
            ub in arb_unit(),
        ) {
            let a = Duration::new(a, ua);
            let b = Duration::new(b, ub);
            prop_assert_eq!((a + b) - b, a);
        }
    }
}
