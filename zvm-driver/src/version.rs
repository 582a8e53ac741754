//! Hypervisor version parsing.
//!
//! `Query_API_Functional_Level` prints a single line such as
//! `The API functional level is z/VM V6.3`. Anything that does not start
//! with the exact prefix is treated as format drift.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DriverError, Result};

/// Literal prefix of the functional-level output.
pub const API_LEVEL_PREFIX: &str = "The API functional level is z/VM V";

/// Cached value meaning "not probed yet".
pub const VERSION_UNPROBED: u64 = 0;

/// A z/VM release as `major.minor.micro`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HypervisorVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl HypervisorVersion {
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self { major, minor, micro }
    }

    /// Numeric form: `major * 1_000_000 + minor * 1_000 + micro`.
    pub fn encode(&self) -> u64 {
        self.major as u64 * 1_000_000 + self.minor as u64 * 1_000 + self.micro as u64
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(value: u64) -> Self {
        Self {
            major: (value / 1_000_000) as u32,
            minor: ((value / 1_000) % 1_000) as u32,
            micro: (value % 1_000) as u32,
        }
    }
}

impl fmt::Display for HypervisorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// Parse `Query_API_Functional_Level` output.
pub fn parse_api_level(output: &str) -> Result<HypervisorVersion> {
    let rest = output
        .trim_start()
        .strip_prefix(API_LEVEL_PREFIX)
        .ok_or_else(|| {
            let first = output.lines().next().unwrap_or("").trim();
            DriverError::UnexpectedOutputFormat(format!(
                "expected '{}...', got '{}'",
                API_LEVEL_PREFIX, first
            ))
        })?;

    let token = rest.split_whitespace().next().unwrap_or("");
    parse_dotted(token)
}

/// Parse `major[.minor[.micro]]`.
fn parse_dotted(token: &str) -> Result<HypervisorVersion> {
    let fail = || DriverError::VersionParseFailed(token.to_string());

    if token.is_empty() {
        return Err(fail());
    }

    let mut parts = [0u32; 3];
    let mut count = 0;
    for piece in token.split('.') {
        if count == parts.len() || piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fail());
        }
        // Components above 999 would bleed into the next field when encoded.
        let value: u32 = piece.parse().map_err(|_| fail())?;
        if count > 0 && value > 999 {
            return Err(fail());
        }
        parts[count] = value;
        count += 1;
    }

    // 0.0.0 encodes to the unprobed sentinel.
    if parts == [0, 0, 0] {
        return Err(fail());
    }

    Ok(HypervisorVersion::new(parts[0], parts[1], parts[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_functional_level() {
        let v = parse_api_level("The API functional level is z/VM V6.3\n").unwrap();
        assert_eq!(v, HypervisorVersion::new(6, 3, 0));
        assert_eq!(v.encode(), 6_003_000);
        assert_eq!(HypervisorVersion::decode(6_003_000), v);

        let v = parse_api_level("The API functional level is z/VM V7.2.1").unwrap();
        assert_eq!(v.encode(), 7_002_001);
        assert_eq!(v.to_string(), "7.2.1");

        assert_eq!(parse_api_level("The API functional level is z/VM V7").unwrap().encode(), 7_000_000);
    }

    #[test]
    fn test_missing_prefix() {
        assert!(matches!(
            parse_api_level("API level: 6.3"),
            Err(DriverError::UnexpectedOutputFormat(_))
        ));
        assert!(matches!(parse_api_level(""), Err(DriverError::UnexpectedOutputFormat(_))));
        // The prefix is case sensitive.
        assert!(matches!(
            parse_api_level("the API functional level is z/VM V6.3"),
            Err(DriverError::UnexpectedOutputFormat(_))
        ));
    }

    #[test]
    fn test_bad_version_token() {
        for bad in ["The API functional level is z/VM V", "The API functional level is z/VM Vsix",
                    "The API functional level is z/VM V6..3", "The API functional level is z/VM V6.3.1.4",
                    "The API functional level is z/VM V6.1000", "The API functional level is z/VM V0",
                    "The API functional level is z/VM V0.0"] {
            assert!(
                matches!(parse_api_level(bad), Err(DriverError::VersionParseFailed(_))),
                "accepted {bad}"
            );
        }
    }
}
