//! Memory quantities.
//!
//! A [`Memory`] value is a byte count plus the unit it was expressed in.
//! Arithmetic, comparison, and hashing act on the byte count alone; the
//! unit only drives formatting, so `1024KiB == 1MiB` holds.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::parse::{self, ParseQuantityError};

/// Units of memory: decimal multiples of 1000 and binary multiples of 1024.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUnit {
    /// Byte, the base unit.
    B,
    /// Kilobyte, 10^3 bytes.
    KB,
    /// Megabyte, 10^6 bytes.
    MB,
    /// Gigabyte, 10^9 bytes.
    GB,
    /// Terabyte, 10^12 bytes.
    TB,
    /// Petabyte, 10^15 bytes.
    PB,
    /// Kibibyte, 2^10 bytes.
    KiB,
    /// Mebibyte, 2^20 bytes.
    MiB,
    /// Gibibyte, 2^30 bytes.
    GiB,
    /// Tebibyte, 2^40 bytes.
    TiB,
    /// Pebibyte, 2^50 bytes.
    PiB,
}

impl MemoryUnit {
    /// All units, smallest to largest.
    pub const ALL: [MemoryUnit; 11] = [
        MemoryUnit::B,
        MemoryUnit::KB,
        MemoryUnit::KiB,
        MemoryUnit::MB,
        MemoryUnit::MiB,
        MemoryUnit::GB,
        MemoryUnit::GiB,
        MemoryUnit::TB,
        MemoryUnit::TiB,
        MemoryUnit::PB,
        MemoryUnit::PiB,
    ];

    /// Size of one unit, in bytes.
    pub const fn bytes(self) -> u64 {
        match self {
            MemoryUnit::B => 1,
            MemoryUnit::KB => 1_000,
            MemoryUnit::MB => 1_000_000,
            MemoryUnit::GB => 1_000_000_000,
            MemoryUnit::TB => 1_000_000_000_000,
            MemoryUnit::PB => 1_000_000_000_000_000,
            MemoryUnit::KiB => 1 << 10,
            MemoryUnit::MiB => 1 << 20,
            MemoryUnit::GiB => 1 << 30,
            MemoryUnit::TiB => 1 << 40,
            MemoryUnit::PiB => 1 << 50,
        }
    }

    /// Canonical symbol, as printed by `Display`.
    pub const fn symbol(self) -> &'static str {
        match self {
            MemoryUnit::B => "B",
            MemoryUnit::KB => "kB",
            MemoryUnit::MB => "MB",
            MemoryUnit::GB => "GB",
            MemoryUnit::TB => "TB",
            MemoryUnit::PB => "PB",
            MemoryUnit::KiB => "KiB",
            MemoryUnit::MiB => "MiB",
            MemoryUnit::GiB => "GiB",
            MemoryUnit::TiB => "TiB",
            MemoryUnit::PiB => "PiB",
        }
    }

    /// Look a unit up by symbol, case-insensitively.
    pub fn from_symbol(symbol: &str) -> Option<MemoryUnit> {
        let lower = symbol.to_ascii_lowercase();
        let unit = match lower.as_str() {
            "b" => MemoryUnit::B,
            "kb" => MemoryUnit::KB,
            "mb" => MemoryUnit::MB,
            "gb" => MemoryUnit::GB,
            "tb" => MemoryUnit::TB,
            "pb" => MemoryUnit::PB,
            "kib" => MemoryUnit::KiB,
            "mib" => MemoryUnit::MiB,
            "gib" => MemoryUnit::GiB,
            "tib" => MemoryUnit::TiB,
            "pib" => MemoryUnit::PiB,
            _ => return None,
        };
        Some(unit)
    }

    /// Largest unit that fits `bytes` at least once (bytes for zero).
    fn largest_containing(bytes: u64) -> MemoryUnit {
        MemoryUnit::ALL
            .iter()
            .rev()
            .copied()
            .find(|unit| bytes >= unit.bytes())
            .unwrap_or(MemoryUnit::B)
    }
}

impl fmt::Display for MemoryUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// An amount of memory.
///
/// # Example
///
/// ```ignore
/// use gridr_units::{Memory, MemoryUnit};
///
/// let request: Memory = "2GiB".parse()?;
/// assert_eq!(request.amount(MemoryUnit::MiB), 2048);
/// assert_eq!(request.to_string(), "2GiB");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Memory {
    bytes: u64,
    unit: MemoryUnit,
}

impl Memory {
    /// Zero bytes.
    pub const ZERO: Memory = Memory {
        bytes: 0,
        unit: MemoryUnit::B,
    };

    /// Build from an amount of `unit`.
    ///
    /// # Panics
    ///
    /// Panics if the byte count overflows `u64`.
    pub fn new(amount: u64, unit: MemoryUnit) -> Memory {
        match amount.checked_mul(unit.bytes()) {
            Some(bytes) => Memory { bytes, unit },
            None => panic!("overflow building a memory quantity"),
        }
    }

    /// `n` bytes.
    pub fn b(n: u64) -> Memory {
        Memory::new(n, MemoryUnit::B)
    }

    /// `n` kilobytes (decimal).
    pub fn kb(n: u64) -> Memory {
        Memory::new(n, MemoryUnit::KB)
    }

    /// `n` megabytes (decimal).
    pub fn mb(n: u64) -> Memory {
        Memory::new(n, MemoryUnit::MB)
    }

    /// `n` gigabytes (decimal).
    pub fn gb(n: u64) -> Memory {
        Memory::new(n, MemoryUnit::GB)
    }

    /// `n` kibibytes.
    pub fn kib(n: u64) -> Memory {
        Memory::new(n, MemoryUnit::KiB)
    }

    /// `n` mebibytes.
    pub fn mib(n: u64) -> Memory {
        Memory::new(n, MemoryUnit::MiB)
    }

    /// `n` gibibytes.
    pub fn gib(n: u64) -> Memory {
        Memory::new(n, MemoryUnit::GiB)
    }

    /// Total byte count.
    pub const fn bytes(self) -> u64 {
        self.bytes
    }

    /// The unit this quantity is expressed in.
    pub const fn unit(self) -> MemoryUnit {
        self.unit
    }

    /// Amount in `unit`, truncated toward zero.
    pub const fn amount(self, unit: MemoryUnit) -> u64 {
        self.bytes / unit.bytes()
    }

    /// Amount in `unit`, fractional.
    pub fn amount_f64(self, unit: MemoryUnit) -> f64 {
        self.bytes as f64 / unit.bytes() as f64
    }

    /// The same byte count, re-expressed in `unit`.
    pub const fn to_unit(self, unit: MemoryUnit) -> Memory {
        Memory {
            bytes: self.bytes,
            unit,
        }
    }

    /// Checked addition; `None` on overflow. The sum is expressed in the
    /// smaller of the two units.
    pub fn checked_add(self, other: Memory) -> Option<Memory> {
        Some(Memory {
            bytes: self.bytes.checked_add(other.bytes)?,
            unit: smaller_unit(self.unit, other.unit),
        })
    }

    /// Checked subtraction; `None` when `other` is larger.
    pub fn checked_sub(self, other: Memory) -> Option<Memory> {
        Some(Memory {
            bytes: self.bytes.checked_sub(other.bytes)?,
            unit: smaller_unit(self.unit, other.unit),
        })
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, other: Memory) -> Memory {
        Memory {
            bytes: self.bytes.saturating_sub(other.bytes),
            unit: smaller_unit(self.unit, other.unit),
        }
    }

    /// Ratio of two memory quantities.
    pub fn ratio(self, other: Memory) -> f64 {
        self.bytes as f64 / other.bytes as f64
    }
}

/// The unit with the smaller byte size; addition and subtraction express
/// their result in it so no precision is silently dropped.
fn smaller_unit(a: MemoryUnit, b: MemoryUnit) -> MemoryUnit {
    if a.bytes() <= b.bytes() { a } else { b }
}

impl PartialEq for Memory {
    fn eq(&self, other: &Memory) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Memory {}

impl PartialOrd for Memory {
    fn partial_cmp(&self, other: &Memory) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Memory {
    fn cmp(&self, other: &Memory) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl Hash for Memory {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl Add for Memory {
    type Output = Memory;

    fn add(self, other: Memory) -> Memory {
        match self.checked_add(other) {
            Some(sum) => sum,
            None => panic!("overflow when adding memory quantities"),
        }
    }
}

impl Sub for Memory {
    type Output = Memory;

    fn sub(self, other: Memory) -> Memory {
        match self.checked_sub(other) {
            Some(diff) => diff,
            None => panic!("overflow when subtracting memory quantities"),
        }
    }
}

impl Mul<u64> for Memory {
    type Output = Memory;

    fn mul(self, scalar: u64) -> Memory {
        match self.bytes.checked_mul(scalar) {
            Some(bytes) => Memory {
                bytes,
                unit: self.unit,
            },
            None => panic!("overflow when scaling a memory quantity"),
        }
    }
}

impl Mul<Memory> for u64 {
    type Output = Memory;

    fn mul(self, quantity: Memory) -> Memory {
        quantity * self
    }
}

impl Div<u64> for Memory {
    type Output = Memory;

    /// Integer division by a scalar. The result is re-expressed in the
    /// largest unit that keeps the amount at least one.
    fn div(self, scalar: u64) -> Memory {
        let bytes = self.bytes / scalar;
        Memory {
            bytes,
            unit: MemoryUnit::largest_containing(bytes),
        }
    }
}

impl Div<Memory> for Memory {
    type Output = f64;

    fn div(self, other: Memory) -> f64 {
        self.ratio(other)
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.unit.bytes();
        if self.bytes % size == 0 {
            write!(f, "{}{}", self.bytes / size, self.unit)
        } else {
            write!(f, "{}{}", self.bytes as f64 / size as f64, self.unit)
        }
    }
}

impl FromStr for Memory {
    type Err = ParseQuantityError;

    fn from_str(input: &str) -> Result<Memory, ParseQuantityError> {
        let (amount, symbol) = parse::scan_single(input)?;
        let unit = MemoryUnit::from_symbol(&symbol).ok_or_else(|| {
            ParseQuantityError::UnknownUnit {
                dimension: "memory",
                unit: symbol,
                input: input.to_owned(),
            }
        })?;
        let bytes = amount.to_base(unit.bytes(), "memory", input)?;
        Ok(Memory { bytes, unit })
    }
}

impl Serialize for Memory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Memory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Memory, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}
