//! Gridr dimensioned quantities
//!
//! Resource requests and accounted usage flow through the whole engine as
//! typed quantities rather than bare numbers: [`Memory`] (stored as bytes)
//! and [`Duration`] (stored as nanoseconds). Each value remembers the unit
//! it was written in, so `"2GiB"` formats back as `2GiB` even though it
//! compares equal to `2048MiB`.
//!
//! # Overview
//!
//! - Parsing accepts `<amount>[whitespace]<unit>` with a fixed unit table
//!   per dimension; durations also accept `"1h30m"`, `"1d 4h 9m 16s"`,
//!   `"HH:MM:SS"`, and `"DD:HH:MM:SS"`.
//! - Mixing dimensions is a type error, not a runtime error: there is no
//!   way to add a [`Memory`] to a [`Duration`].
//! - Adding or subtracting values in different units yields the smaller
//!   unit, so precision is never silently truncated away.
//! - Values serialize as their display string (`"1536MiB"`), which keeps
//!   configuration files and session records readable.
//!
//! # Example
//!
//! ```ignore
//! use gridr_units::{Duration, DurationUnit, Memory, MemoryUnit};
//!
//! let per_core: Memory = "2000MB".parse()?;
//! let walltime: Duration = "8 hours".parse()?;
//! assert_eq!((per_core * 4).amount(MemoryUnit::GB), 8);
//! assert_eq!(walltime.amount(DurationUnit::Minute), 480);
//! ```

pub mod duration;
pub mod memory;
mod parse;

pub use duration::{Duration, DurationUnit};
pub use memory::{Memory, MemoryUnit};
pub use parse::ParseQuantityError;
