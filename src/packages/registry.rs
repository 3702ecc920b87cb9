// src/packages/registry.rs

//! Package format registry
//!
//! Maps format names to backends. The builder receives a registry instead
//! of looking formats up in process-wide state.

use super::{apk, arch, deb, rpm, Packager};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct PackageFormatRegistry {
    packagers: BTreeMap<String, Arc<dyn Packager>>,
}

impl std::fmt::Debug for PackageFormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageFormatRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

impl PackageFormatRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            packagers: BTreeMap::new(),
        }
    }

    /// Registry with the four built-in backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(apk::ApkPackager));
        registry.register(Arc::new(deb::DebPackager));
        registry.register(Arc::new(rpm::RpmPackager));
        registry.register(Arc::new(arch::ArchPackager));
        registry
    }

    pub fn register(&mut self, packager: Arc<dyn Packager>) {
        self.packagers.insert(packager.format().to_string(), packager);
    }

    /// Look up a backend by format name
    ///
    /// `arch` and `pacman` are accepted as aliases of `archlinux`.
    pub fn get(&self, format: &str) -> Result<Arc<dyn Packager>> {
        let key = match format {
            "arch" | "pacman" => "archlinux",
            other => other,
        };
        self.packagers.get(key).cloned().ok_or_else(|| {
            Error::PackagerError(format!(
                "unknown package format '{}' (known: {})",
                format,
                self.formats().join(", ")
            ))
        })
    }

    pub fn formats(&self) -> Vec<&str> {
        self.packagers.keys().map(String::as_str).collect()
    }
}

impl Default for PackageFormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let registry = PackageFormatRegistry::with_defaults();
        assert_eq!(registry.formats(), vec!["apk", "archlinux", "deb", "rpm"]);
        assert_eq!(registry.get("deb").unwrap().extension(), "deb");
        assert_eq!(registry.get("pacman").unwrap().format(), "archlinux");
    }

    #[test]
    fn test_unknown_format() {
        let result = PackageFormatRegistry::new().get("msi");
        assert!(matches!(result, Err(Error::PackagerError(_))));
    }
}
