//! Per-invocation emission limits.

use serde::{Deserialize, Serialize};

/// Bounds on what a single invocation may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionLimits {
    /// Sum of encoded output record sizes.
    pub max_bytes: usize,
    /// Number of output records.
    pub max_records: usize,
}

impl EmissionLimits {
    pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;
    pub const DEFAULT_MAX_RECORDS: usize = 1024;

    /// Environment keys the host uses to pass configured limits to the guest.
    pub const MAX_BYTES_ENV: &'static str = "RECAST_MAX_OUTPUT_BYTES";
    pub const MAX_RECORDS_ENV: &'static str = "RECAST_MAX_OUTPUT_RECORDS";

    /// Build limits from environment lookups, keeping the default for any key
    /// that is missing or not a number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str, default: usize| {
            lookup(key)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(default)
        };
        Self {
            max_bytes: read(Self::MAX_BYTES_ENV, Self::DEFAULT_MAX_BYTES),
            max_records: read(Self::MAX_RECORDS_ENV, Self::DEFAULT_MAX_RECORDS),
        }
    }
}

impl Default for EmissionLimits {
    fn default() -> Self {
        Self {
            max_bytes: Self::DEFAULT_MAX_BYTES,
            max_records: Self::DEFAULT_MAX_RECORDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_overrides_and_falls_back() {
        let limits = EmissionLimits::from_lookup(|key| match key {
            EmissionLimits::MAX_BYTES_ENV => Some("2048".into()),
            EmissionLimits::MAX_RECORDS_ENV => Some("lots".into()),
            _ => None,
        });
        assert_eq!(limits.max_bytes, 2048);
        assert_eq!(limits.max_records, EmissionLimits::DEFAULT_MAX_RECORDS);
    }
}
