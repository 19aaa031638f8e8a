//! Core domain types shared across datamold crates.
//!
//! This crate defines:
//! - Capacity and unit-density constants for dataset generation
//! - Artifact formats and their file extensions
//! - The object descriptor returned by storage listings
//! - Layered application configuration

pub mod config;
pub mod error;
pub mod format;
pub mod object;

pub use error::{Error, Result};
pub use format::Format;
pub use object::ObjectDescriptor;

/// Generation units produced per capacity unit (GiB).
pub const UNIT_DENSITY: u64 = 10;

/// Default number of concurrent workers for generation and transfer.
pub const DEFAULT_THREADS: usize = 10;

/// One capacity unit: 1 GiB.
pub const CAPACITY_UNIT_BYTES: u64 = 1024 * 1024 * 1024;

/// Default bytes per generation unit (1 GiB spread over `UNIT_DENSITY` units).
pub const DEFAULT_UNIT_SIZE: u64 = CAPACITY_UNIT_BYTES / UNIT_DENSITY;

/// Total generation units for a capacity budget.
///
/// Returns an error for a zero capacity or if the product overflows.
pub fn total_units(capacity: u32) -> Result<u64> {
    if capacity == 0 {
        return Err(Error::InvalidCapacity(capacity));
    }
    u64::from(capacity)
        .checked_mul(UNIT_DENSITY)
        .ok_or(Error::InvalidCapacity(capacity))
}

/// Deterministic destination name for a generation unit.
pub fn artifact_name(index: u64, format: Format) -> String {
    format!("artifact_{}.{}", index, format.extension())
}
