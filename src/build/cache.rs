// src/build/cache.rs

//! Built-artifact cache
//!
//! A previous build is reused when `BaseDir/<conventional-filename>` exists.
//! Contents are not verified; the atomic `.part` rename guarantees a file
//! under the final name was written completely.

use crate::packages::{PackageInfo, Packager};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path of a previously built package, if one exists
pub fn check_for_built_package(
    packager: &dyn Packager,
    info: &PackageInfo,
    base_dir: &Path,
) -> Option<PathBuf> {
    let path = base_dir.join(packager.conventional_file_name(info));
    if path.is_file() {
        debug!("Cache hit: {}", path.display());
        Some(path)
    } else {
        debug!("Cache miss: {}", path.display());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::deb::DebPackager;

    fn info() -> PackageInfo {
        PackageInfo {
            name: "hello+alr-local".into(),
            arch: "amd64".into(),
            version: "1.0".into(),
            release: "1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_hit_and_miss() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(check_for_built_package(&DebPackager, &info(), tmp.path()).is_none());

        let file = tmp.path().join("hello+alr-local-1.0-1.amd64.deb");
        std::fs::write(&file, b"!<arch>\n").unwrap();
        assert_eq!(check_for_built_package(&DebPackager, &info(), tmp.path()), Some(file));
    }

    #[test]
    fn test_partial_write_is_not_a_hit() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hello+alr-local-1.0-1.amd64.deb.part"), b"").unwrap();
        assert!(check_for_built_package(&DebPackager, &info(), tmp.path()).is_none());
    }
}
