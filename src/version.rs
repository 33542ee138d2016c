//! Version algebra: `<semver>[@<int>]` parsing and comparison (spec §4.1).
//!
//! Parsing is tolerant: missing components default to `0` filling the
//! least-significant slots first (`"1"` -> `0.0.1`), and leading zeros are
//! stripped before the semver is built.

use std::cmp::Ordering;
use std::fmt;

use smol_str::SmolStr;

use crate::error::{ErrorKind, GooError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<SmolStr>,
    pub build: Option<SmolStr>,
    pub build_revision: i64,
    raw: SmolStr,
}

impl Version {
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn strip_leading_zeros(component: &str) -> Result<u64, GooError> {
    let trimmed = component.trim_start_matches('0');
    let normalized = if trimmed.is_empty() { "0" } else { trimmed };
    normalized
        .parse::<u64>()
        .map_err(|e| GooError::wrap(ErrorKind::Invariant, "malformed semver component", e.into()))
}

/// Splits `"1.2.3-rc.1+build.7"` into `(["1","2","3"], Some("rc.1"), Some("build.7"))`.
fn split_semver(core: &str) -> (Vec<&str>, Option<&str>, Option<&str>) {
    let (numeric_and_pre, build) = match core.split_once('+') {
        Some((a, b)) => (a, Some(b)),
        None => (core, None),
    };
    let (numeric, pre) = match numeric_and_pre.split_once('-') {
        Some((a, b)) => (a, Some(b)),
        None => (numeric_and_pre, None),
    };
    (numeric.split('.').collect(), pre, build)
}

/// Parses a `<semver>[@<int>]` string, tolerant of missing or zero-padded
/// numeric components.
pub fn parse(ver: &str) -> Result<Version, GooError> {
    let (core, suffix) = match ver.split_once('@') {
        Some((core, suffix)) => (core, Some(suffix)),
        None => (ver, None),
    };

    let build_revision = match suffix {
        Some(s) => s
            .parse::<i64>()
            .map_err(|e| GooError::wrap(ErrorKind::Invariant, "malformed build revision", e.into()))?,
        None => 0,
    };

    let (components, pre, build) = split_semver(core);
    if components.is_empty() || components.len() > 3 || components.iter().any(|c| c.is_empty()) {
        return Err(GooError::new(
            ErrorKind::Invariant,
            format!("malformed semver '{core}'"),
        ));
    }

    // Right-align into three slots, least-significant first: "1" -> [0,0,1].
    let mut slots = [0u64; 3];
    let pad = 3 - components.len();
    for (i, component) in components.iter().enumerate() {
        slots[pad + i] = strip_leading_zeros(component)?;
    }

    Ok(Version {
        major: slots[0],
        minor: slots[1],
        patch: slots[2],
        pre: pre.map(SmolStr::from),
        build: build.map(SmolStr::from),
        build_revision,
        raw: SmolStr::from(ver),
    })
}

/// Lexicographic comparison on `(semver, build_revision)`. Prerelease
/// versions sort before the release they precede; build metadata is
/// informational and never affects ordering (semver rules).
pub fn compare(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| match (&a.pre, &b.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => compare_pre(a, b),
        })
        .then_with(|| a.build_revision.cmp(&b.build_revision))
}

fn compare_pre(a: &str, b: &str) -> Ordering {
    let a_parts = a.split('.');
    let b_parts = b.split('.');
    a_parts
        .zip(b_parts)
        .map(|(x, y)| match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or_else(|| a.split('.').count().cmp(&b.split('.').count()))
}

/// `compare_priority_version((p1, v1), (p2, v2))`: lexicographic compare on
/// `(priority, version)`, higher priority wins, ties broken by version.
pub fn compare_priority_version(
    a: (i64, &Version),
    b: (i64, &Version),
) -> Ordering {
    a.0.cmp(&b.0).then_with(|| compare(a.1, b.1))
}

pub mod priority {
    pub const DEFAULT: i64 = 500;
    pub const CANARY: i64 = 1300;
    pub const PIN: i64 = 1400;
    pub const ROLLBACK: i64 = 1500;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerant_normalization() {
        assert_eq!(parse("1").unwrap(), parse("0.0.1").unwrap());
        assert_eq!(parse("1.2").unwrap(), parse("0.1.2").unwrap());
        assert_eq!(parse("01.2.3").unwrap(), parse("1.2.3").unwrap());
    }

    #[test]
    fn build_revision_breaks_ties() {
        let a = parse("1.2.3@1").unwrap();
        let b = parse("1.2.3@2").unwrap();
        assert_eq!(compare(&a, &b), Ordering::Less);

        let c = parse("1.2.4@1").unwrap();
        assert_eq!(compare(&c, &b), Ordering::Greater);
    }

    #[test]
    fn equal_versions_compare_equal() {
        let a = parse("1.2.3").unwrap();
        let b = parse("1.2.3").unwrap();
        assert_eq!(compare(&a, &b), Ordering::Equal);
    }

    #[test]
    fn round_trips_through_self_compare() {
        for s in ["1.2.3", "1", "1.2", "0.0.0@5", "2.3.4-rc.1+build.9"] {
            let v = parse(s).unwrap();
            assert_eq!(compare(&v, &v), Ordering::Equal);
        }
    }

    #[test]
    fn malformed_integer_suffix_errors() {
        assert!(parse("1.2.3@notanumber").is_err());
    }

    #[test]
    fn priority_breaks_version_ties() {
        let low = (priority::DEFAULT, &parse("2.0.0").unwrap());
        let high = (priority::ROLLBACK, &parse("1.0.0").unwrap());
        assert_eq!(compare_priority_version(high, low), Ordering::Greater);
    }
}
