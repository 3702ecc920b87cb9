// src/build/deps.rs

//! Dependency bookkeeping for the orchestrator

use crate::error::{Error, Result};
use crate::finder::Package;
use crate::version::Dependency;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Interactive decisions taken during a build
pub trait Prompter: Send + Sync {
    /// Index into `candidates` of the recipe to build for `query`
    fn choose_candidate(&self, query: &str, candidates: &[Package]) -> Result<usize>;

    /// Subset of `optional` to install alongside the package
    fn choose_opt_deps(&self, optional: &[String]) -> Result<Vec<String>>;

    /// Whether to uninstall the build dependencies installed for this build
    fn confirm_remove_build_deps(&self, pkgs: &[String]) -> Result<bool>;
}

/// Answers every question without asking
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive {
    pub remove_build_deps: bool,
}

impl Prompter for NonInteractive {
    fn choose_candidate(&self, _query: &str, _candidates: &[Package]) -> Result<usize> {
        Ok(0)
    }

    fn choose_opt_deps(&self, _optional: &[String]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn confirm_remove_build_deps(&self, _pkgs: &[String]) -> Result<bool> {
        Ok(self.remove_build_deps)
    }
}

/// Collapse duplicates, keeping the first occurrence
pub fn remove_duplicates<T: Eq + Hash + Clone>(items: &[T]) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert((*item).clone()))
        .cloned()
        .collect()
}

/// Collapse dependency strings naming the same package, keeping the first
pub fn merge_depends(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|dep| {
            let name = Dependency::parse(dep)
                .map(|d| d.name)
                .unwrap_or_else(|_| (*dep).clone());
            seen.insert(name)
        })
        .cloned()
        .collect()
}

/// Base packages currently being built, outermost first
#[derive(Debug, Clone, Default)]
pub struct BuildStack {
    inner: Arc<Mutex<Vec<String>>>,
}

impl BuildStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `base`, failing if it is already being built
    pub fn enter(&self, base: &str) -> Result<StackGuard> {
        let mut stack = self
            .inner
            .lock()
            .map_err(|_| Error::IoError("build stack lock poisoned".to_string()))?;
        if stack.iter().any(|b| b == base) {
            let mut path = stack.clone();
            path.push(base.to_string());
            return Err(Error::DependencyCycle(path));
        }
        stack.push(base.to_string());
        debug!("Build stack: {}", stack.join(" -> "));
        Ok(StackGuard {
            inner: Arc::clone(&self.inner),
            base: base.to_string(),
        })
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Pops its base package off the stack when dropped
#[derive(Debug)]
pub struct StackGuard {
    inner: Arc<Mutex<Vec<String>>>,
    base: String,
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        if let Ok(mut stack) = self.inner.lock() {
            if let Some(pos) = stack.iter().rposition(|b| *b == self.base) {
                stack.remove(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_duplicates() {
        assert_eq!(remove_duplicates(&["a", "b", "a", "c"]), vec!["a", "b", "c"]);
        assert!(remove_duplicates::<String>(&[]).is_empty());
    }

    #[test]
    fn test_merge_depends_by_name() {
        let deps: Vec<String> = ["libfoo>=1.0", "bar", "libfoo", "baz"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(merge_depends(&deps), vec!["libfoo>=1.0", "bar", "baz"]);
    }

    #[test]
    fn test_stack_detects_cycle() {
        let stack = BuildStack::new();
        let _a = stack.enter("a").unwrap();
        let _b = stack.enter("b").unwrap();
        match stack.enter("a") {
            Err(Error::DependencyCycle(path)) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_guard_pops_on_drop() {
        let stack = BuildStack::new();
        {
            let _a = stack.enter("a").unwrap();
            assert_eq!(stack.depth(), 1);
        }
        assert_eq!(stack.depth(), 0);
        assert!(stack.enter("a").is_ok());
    }

    #[test]
    fn test_non_interactive_defaults() {
        let prompter = NonInteractive::default();
        assert_eq!(prompter.choose_candidate("x", &[]).unwrap(), 0);
        assert!(prompter.choose_opt_deps(&["a".into()]).unwrap().is_empty());
        assert!(!prompter.confirm_remove_build_deps(&["gcc".into()]).unwrap());
    }
}
