// src/version/mod.rs

//! Version comparison for dependency satisfaction
//!
//! All formats compare versions with RPM's segment algorithm: the string is
//! split into alternating numeric and alphabetic runs, numeric runs compare
//! as integers, alphabetic runs compare lexically, and separators only
//! delimit. `~` sorts before everything (pre-releases) and `^` sorts after
//! the base version but before any further segment.

pub mod dependency;

pub use dependency::{Dependency, Operator};

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// Compare two version strings with rpmvercmp semantics
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    while !one.is_empty() || !two.is_empty() {
        one = skip_separators(one);
        two = skip_separators(two);

        // Tilde sorts before anything, including the end of the string
        if one.first() == Some(&b'~') || two.first() == Some(&b'~') {
            if one.first() != Some(&b'~') {
                return Ordering::Greater;
            }
            if two.first() != Some(&b'~') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        // Caret sorts after the end of the string but before a new segment
        if one.first() == Some(&b'^') || two.first() == Some(&b'^') {
            if one.is_empty() {
                return Ordering::Less;
            }
            if two.is_empty() {
                return Ordering::Greater;
            }
            if one.first() != Some(&b'^') {
                return Ordering::Greater;
            }
            if two.first() != Some(&b'^') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let (seg1, rest1) = take_segment(one, numeric);
        let (seg2, rest2) = take_segment(two, numeric);
        one = rest1;
        two = rest2;

        // Segments of different types: numeric is newer
        if seg2.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if numeric {
            let s1 = strip_leading_zeros(seg1);
            let s2 = strip_leading_zeros(seg2);
            s1.len().cmp(&s2.len()).then_with(|| s1.cmp(s2))
        } else {
            seg1.cmp(seg2)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (false, _) => Ordering::Greater,
        (true, false) => Ordering::Less,
    }
}

fn skip_separators(s: &[u8]) -> &[u8] {
    let n = s
        .iter()
        .take_while(|c| !c.is_ascii_alphanumeric() && **c != b'~' && **c != b'^')
        .count();
    &s[n..]
}

fn take_segment(s: &[u8], numeric: bool) -> (&[u8], &[u8]) {
    let n = s
        .iter()
        .take_while(|c| {
            if numeric {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphabetic()
            }
        })
        .count();
    s.split_at(n)
}

fn strip_leading_zeros(s: &[u8]) -> &[u8] {
    let n = s.iter().take_while(|c| **c == b'0').count();
    &s[n..]
}

/// A parsed `[epoch:]version[-release]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpmVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl RpmVersion {
    /// Parse a version string
    ///
    /// Examples:
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3" → epoch=2, version="1.2.3", release=None
    /// - "1:2.3.4-5.el8" → epoch=1, version="2.3.4", release=Some("5.el8")
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch_str, rest) = match s.split_once(':') {
            Some((e, r)) => (e, r),
            None => ("0", s),
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str.parse::<u64>().map_err(|e| {
                Error::ParseError(format!("invalid epoch in version '{}': {}", s, e))
            })?
        };

        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) => (v.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::ParseError(format!(
                "empty version component in '{}'",
                s
            )));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Compare epoch, then version, then release
    ///
    /// A missing release on either side matches any release.
    pub fn compare(&self, other: &RpmVersion) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| match (&self.release, &other.release) {
                (Some(a), Some(b)) => rpmvercmp(a, b),
                _ => Ordering::Equal,
            })
    }
}

impl fmt::Display for RpmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl PartialOrd for RpmVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpmvercmp_numeric_segments() {
        assert_eq!(rpmvercmp("1.0", "1.0"), Ordering::Equal);
        assert_eq!(rpmvercmp("1.0", "2.0"), Ordering::Less);
        assert_eq!(rpmvercmp("2.0.1", "2.0"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.10", "1.9"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.010", "1.10"), Ordering::Equal);
    }

    #[test]
    fn test_rpmvercmp_alpha_segments() {
        assert_eq!(rpmvercmp("1.0a", "1.0b"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0a", "1.0"), Ordering::Greater);
        // Numeric segments beat alphabetic ones
        assert_eq!(rpmvercmp("1.1", "1.a"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.a", "1.1"), Ordering::Less);
    }

    #[test]
    fn test_rpmvercmp_separators_ignored() {
        assert_eq!(rpmvercmp("1.0", "1_0"), Ordering::Equal);
        assert_eq!(rpmvercmp("1+2", "1.2"), Ordering::Equal);
    }

    #[test]
    fn test_rpmvercmp_tilde_and_caret() {
        assert_eq!(rpmvercmp("1.0~rc1", "1.0"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0~rc1", "1.0~rc2"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0^git1", "1.0"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.0^git1", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn test_rpm_version_parse_full() {
        let v = RpmVersion::parse("1:2.3.4-5.el8").unwrap();
        assert_eq!(v.epoch, 1);
        assert_eq!(v.version, "2.3.4");
        assert_eq!(v.release, Some("5.el8".to_string()));
        assert_eq!(v.to_string(), "1:2.3.4-5.el8");
    }

    #[test]
    fn test_rpm_version_parse_empty_epoch() {
        let v = RpmVersion::parse(":1.02.208-2.fc43").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.version, "1.02.208");
    }

    #[test]
    fn test_rpm_version_parse_rejects_bad_epoch() {
        assert!(RpmVersion::parse("x:1.0").is_err());
        assert!(RpmVersion::parse("1:").is_err());
    }

    #[test]
    fn test_rpm_version_compare_epochs() {
        let v1 = RpmVersion::parse("1:1.0.0").unwrap();
        let v2 = RpmVersion::parse("0:2.0.0").unwrap();
        assert!(v1 > v2);
    }

    #[test]
    fn test_rpm_version_missing_release_matches() {
        let v1 = RpmVersion::parse("1.2.3").unwrap();
        let v2 = RpmVersion::parse("1.2.3-7").unwrap();
        assert_eq!(v1.compare(&v2), Ordering::Equal);
        let v3 = RpmVersion::parse("1.2.3-8").unwrap();
        assert!(v2 < v3);
    }
}
