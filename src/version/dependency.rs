// src/version/dependency.rs

//! Dependency expressions: `name [op version]`
//!
//! One parsed form, two emission dialects: the one package managers accept
//! on their command line and the one each package format embeds in its
//! metadata.

use super::RpmVersion;
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// Version comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl Operator {
    /// Longest-first so `>=` is never read as `>`
    const ALL: [(&'static str, Operator); 5] = [
        (">=", Operator::GreaterOrEqual),
        ("<=", Operator::LessOrEqual),
        ("=", Operator::Equal),
        (">", Operator::Greater),
        ("<", Operator::Less),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
        }
    }

    fn matches(&self, ord: Ordering) -> bool {
        match self {
            Operator::Equal => ord == Ordering::Equal,
            Operator::Greater => ord == Ordering::Greater,
            Operator::GreaterOrEqual => ord != Ordering::Less,
            Operator::Less => ord == Ordering::Less,
            Operator::LessOrEqual => ord != Ordering::Greater,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependency on a package, optionally version-constrained
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub name: String,
    pub constraint: Option<(Operator, String)>,
}

impl Dependency {
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
        }
    }

    pub fn new(name: impl Into<String>, op: Operator, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: Some((op, version.into())),
        }
    }

    /// Parse `name`, `name op version`, `nameopversion` or `name (op version)`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some(pos) = s.find(['<', '>', '=']) else {
            if s.is_empty() || s.contains(char::is_whitespace) {
                return Err(Error::ParseError(format!("invalid dependency '{}'", s)));
            }
            return Ok(Self::any(s));
        };

        let name = s[..pos].trim().trim_end_matches('(').trim_end();
        let rest = &s[pos..];
        let (op_str, op) = Operator::ALL
            .iter()
            .find(|(token, _)| rest.starts_with(token))
            .copied()
            .ok_or_else(|| Error::ParseError(format!("invalid operator in '{}'", s)))?;
        let version = rest[op_str.len()..].trim().trim_end_matches(')').trim();

        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::ParseError(format!(
                "missing package name in dependency '{}'",
                s
            )));
        }
        if version.is_empty() {
            return Err(Error::ParseError(format!(
                "missing version in dependency '{}'",
                s
            )));
        }

        Ok(Self::new(name, op, version))
    }

    /// Whether an installed `version` satisfies this dependency
    pub fn satisfied_by(&self, version: &str) -> bool {
        let Some((op, required)) = &self.constraint else {
            return true;
        };
        match (RpmVersion::parse(version), RpmVersion::parse(required)) {
            (Ok(have), Ok(want)) => op.matches(have.compare(&want)),
            _ => op.matches(super::rpmvercmp(version, required)),
        }
    }

    /// Form embedded in package metadata for `format`
    pub fn for_nfpm(&self, format: &str) -> String {
        let Some((op, version)) = &self.constraint else {
            return self.name.clone();
        };
        match format {
            "deb" => format!("{} ({} {})", self.name, op, version),
            "apk" | "archlinux" => format!("{}{}{}", self.name, op, version),
            _ => format!("{} {} {}", self.name, op, version),
        }
    }

    /// Form passed on the command line of `manager`
    pub fn for_manager(&self, manager: &str) -> String {
        let Some((op, version)) = &self.constraint else {
            return self.name.clone();
        };
        match manager {
            "apt" => self.name.clone(),
            "pacman" | "apk" => format!("{}{}{}", self.name, op, version),
            _ => format!("{} {} {}", self.name, op, version),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some((op, version)) => write!(f, "{} {} {}", self.name, op, version),
            None => f.write_str(&self.name),
        }
    }
}

impl std::str::FromStr for Dependency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Bare package names of a list of dependency strings
///
/// Unparseable entries are passed through unchanged.
pub fn names(deps: &[String]) -> Vec<String> {
    deps.iter()
        .map(|d| Dependency::parse(d).map(|d| d.name).unwrap_or_else(|_| d.clone()))
        .collect()
}
