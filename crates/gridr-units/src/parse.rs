//! Lexical machinery shared by the quantity parsers.
//!
//! A quantity string is `<amount>[whitespace]<unit>`; durations may chain
//! several such parts (`"1d 4h 9m 16s"`, `"1h30m"`). The scanner below
//! splits a string into (amount, unit symbol) pairs without knowing the
//! unit tables; the dimension modules resolve symbols and ranges.

use thiserror::Error;

/// Error parsing a quantity string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseQuantityError {
    /// Empty input where a quantity was expected.
    #[error("empty quantity string")]
    Empty,

    /// The numeric part is missing or not a valid decimal number.
    #[error("malformed amount in quantity {input:?}")]
    MalformedAmount {
        /// Offending input.
        input: String,
    },

    /// The amount is negative; quantities are unsigned.
    #[error("negative amount in quantity {input:?}")]
    NegativeAmount {
        /// Offending input.
        input: String,
    },

    /// A unit symbol was expected but none was found.
    #[error("missing unit in quantity {input:?}")]
    MissingUnit {
        /// Offending input.
        input: String,
    },

    /// The unit symbol is not in the dimension's unit table.
    #[error("unknown {dimension} unit {unit:?} in quantity {input:?}")]
    UnknownUnit {
        /// Dimension whose table was consulted ("memory" or "duration").
        dimension: &'static str,
        /// The unrecognized symbol.
        unit: String,
        /// Offending input.
        input: String,
    },

    /// The value does not fit the 64-bit base-unit representation.
    #[error("quantity {input:?} overflows the {dimension} range")]
    Overflow {
        /// Dimension whose range was exceeded.
        dimension: &'static str,
        /// Offending input.
        input: String,
    },

    /// A bare two-field colon form cannot be told apart
    /// (minutes:seconds vs. hours:minutes).
    #[error("ambiguous duration {input:?}: spell it out, e.g. '1m 2s' or '1h 2m'")]
    AmbiguousColonForm {
        /// Offending input.
        input: String,
    },
}

/// A scanned amount, kept integral when the source text was integral so
/// that large values survive conversion to the base unit exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Amount {
    Int(u64),
    Float(f64),
}

impl Amount {
    /// Convert to a count of base units, given the size of the target unit.
    pub(crate) fn to_base(
        self,
        unit_size: u64,
        dimension: &'static str,
        input: &str,
    ) -> Result<u64, ParseQuantityError> {
        let overflow = || ParseQuantityError::Overflow {
            dimension,
            input: input.to_owned(),
        };
        match self {
            Amount::Int(n) => n.checked_mul(unit_size).ok_or_else(overflow),
            Amount::Float(f) => {
                let scaled = (f * unit_size as f64).round();
                if !scaled.is_finite() || scaled < 0.0 || scaled > u64::MAX as f64 {
                    return Err(overflow());
                }
                Ok(scaled as u64)
            }
        }
    }
}

/// Scan all (amount, unit) parts of `input`.
///
/// Fails on leftover text that is neither a number nor a unit symbol.
pub(crate) fn scan_parts(input: &str) -> Result<Vec<(Amount, String)>, ParseQuantityError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseQuantityError::Empty);
    }

    let mut parts = Vec::new();
    let mut rest = trimmed;
    while !rest.is_empty() {
        let (amount, after_amount) = scan_amount(rest, input)?;
        let after_ws = after_amount.trim_start();
        let unit_len = after_ws
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_alphabetic())
            .count();
        if unit_len == 0 {
            return Err(ParseQuantityError::MissingUnit {
                input: input.to_owned(),
            });
        }
        let (unit, tail) = after_ws.split_at(unit_len);
        parts.push((amount, unit.to_owned()));
        rest = tail.trim_start();
    }
    Ok(parts)
}

/// Scan exactly one (amount, unit) part; trailing text is an error.
pub(crate) fn scan_single(input: &str) -> Result<(Amount, String), ParseQuantityError> {
    let mut parts = scan_parts(input)?;
    if parts.len() != 1 {
        return Err(ParseQuantityError::MalformedAmount {
            input: input.to_owned(),
        });
    }
    // Length checked just above.
    Ok(parts.remove(0))
}

/// Scan a decimal number (optional sign, fraction, exponent) off the front
/// of `rest`. Returns the amount and the remaining text.
fn scan_amount<'a>(
    rest: &'a str,
    input: &str,
) -> Result<(Amount, &'a str), ParseQuantityError> {
    let malformed = || ParseQuantityError::MalformedAmount {
        input: input.to_owned(),
    };

    let bytes = rest.as_bytes();
    let mut pos = 0;
    let negative = match bytes.first() {
        Some(b'-') => {
            pos += 1;
            true
        }
        Some(b'+') => {
            pos += 1;
            false
        }
        _ => false,
    };

    let int_start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    let mut fractional = false;
    if pos < bytes.len() && bytes[pos] == b'.' {
        fractional = true;
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    // A lone sign, dot, or empty prefix is not a number.
    if !rest[int_start..pos].chars().any(|c| c.is_ascii_digit()) {
        return Err(malformed());
    }
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let exp_start = pos;
        pos += 1;
        if pos < bytes.len() && (bytes[pos] == b'+' || bytes[pos] == b'-') {
            pos += 1;
        }
        let digits_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == digits_start {
            // No digits follow, so this 'e' starts a unit symbol rather
            // than an exponent.
            pos = exp_start;
        } else {
            fractional = true;
        }
    }

    let text = &rest[..pos];
    if negative {
        return Err(ParseQuantityError::NegativeAmount {
            input: input.to_owned(),
        });
    }
    let amount = if fractional {
        Amount::Float(text.parse::<f64>().map_err(|_| malformed())?)
    } else {
        let digits = text.strip_prefix('+').unwrap_or(text);
        match digits.parse::<u64>() {
            Ok(n) => Amount::Int(n),
            // Wider than u64: keep going in floating point.
            Err(_) => Amount::Float(digits.parse::<f64>().map_err(|_| malformed())?),
        }
    };
    Ok((amount, &rest[pos..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_integer_part() {
        let (amount, unit) = scan_single("1024MiB").unwrap();
        assert_eq!(amount, Amount::Int(1024));
        assert_eq!(unit, "MiB");
    }

    #[test]
    fn whitespace_between_amount_and_unit() {
        let (amount, unit) = scan_single("  2  GB ").unwrap();
        assert_eq!(amount, Amount::Int(2));
        assert_eq!(unit, "GB");
    }

    #[test]
    fn fractional_amount() {
        let (amount, unit) = scan_single("1.5h").unwrap();
        assert_eq!(amount, Amount::Float(1.5));
        assert_eq!(unit, "h");
    }

    #[test]
    fn exponent_amount() {
        let (amount, unit) = scan_single("2E+2 s").unwrap();
        assert_eq!(amount, Amount::Float(200.0));
        assert_eq!(unit, "s");
    }

    #[test]
    fn multiple_parts_with_and_without_spaces() {
        let parts = scan_parts("1d 4h 9m 16s").unwrap();
        assert_eq!(parts.len(), 4);
        let parts = scan_parts("1h30m").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1], (Amount::Int(30), "m".to_owned()));
    }

    #[test]
    fn negative_amount_rejected() {
        assert!(matches!(
            scan_single("-7s"),
            Err(ParseQuantityError::NegativeAmount { .. })
        ));
    }

    #[test]
    fn missing_unit_rejected() {
        assert!(matches!(
            scan_single("42"),
            Err(ParseQuantityError::MissingUnit { .. })
        ));
    }

    #[test]
    fn garbage_rejected() {
        assert!(matches!(
            scan_single("GB"),
            Err(ParseQuantityError::MalformedAmount { .. })
        ));
        assert!(scan_single("1.2.3s").is_err());
    }

    #[test]
    fn empty_rejected() {
        assert_eq!(scan_parts("   "), Err(ParseQuantityError::Empty));
    }

    #[test]
    fn int_to_base_overflow_detected() {
        let err = Amount::Int(u64::MAX)
            .to_base(1024, "memory", "x")
            .unwrap_err();
        assert!(matches!(err, ParseQuantityError::Overflow { .. }));
    }
}
