// src/finder.rs

//! Recipe lookup by package name
//!
//! Repository discovery lives outside the build engine. The orchestrator
//! only needs to ask which names resolve to recipes; everything else is
//! left to the system package manager.

use crate::cancel::CancelToken;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A recipe-backed package offered by a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package name as the recipe declares it
    pub name: String,
    /// Recipe directory name
    pub base: String,
    /// Repository holding the recipe
    pub repository: String,
    pub version: String,
    /// Path of the recipe's `alr.sh`
    pub recipe_path: PathBuf,
}

/// Outcome of a lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindResult {
    /// Query to candidates, in repository priority order
    pub found: BTreeMap<String, Vec<Package>>,
    /// Queries no repository knows
    pub not_found: Vec<String>,
}

impl FindResult {
    /// Candidates for `query`; empty when it was not found
    pub fn candidates(&self, query: &str) -> &[Package] {
        self.found.get(query).map(Vec::as_slice).unwrap_or_default()
    }
}

pub trait PackageFinder: Send + Sync {
    fn find_pkgs(&self, cancel: &CancelToken, names: &[String]) -> Result<FindResult>;
}

/// Finder for hosts without recipe repositories
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFinder;

impl PackageFinder for NullFinder {
    fn find_pkgs(&self, cancel: &CancelToken, names: &[String]) -> Result<FindResult> {
        cancel.check()?;
        Ok(FindResult {
            found: BTreeMap::new(),
            not_found: names.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_finder_reports_everything_missing() {
        let names = vec!["gcc".to_string(), "make".to_string()];
        let result = NullFinder.find_pkgs(&CancelToken::new(), &names).unwrap();
        assert!(result.found.is_empty());
        assert_eq!(result.not_found, names);
        assert!(result.candidates("gcc").is_empty());
    }

    #[test]
    fn test_null_finder_honors_cancel() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(NullFinder.find_pkgs(&cancel, &["x".to_string()]).is_err());
    }
}
