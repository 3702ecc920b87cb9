// src/build/dirs.rs

//! Staging directories of one build

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `BaseDir`, `SrcDir`, `PkgDir` and `ScriptDir`
///
/// Everything below `base_dir` belongs to the build. `script_dir` is the
/// recipe directory and is never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directories {
    pub base_dir: PathBuf,
    pub src_dir: PathBuf,
    pub pkg_dir: PathBuf,
    pub script_dir: PathBuf,
}

impl Directories {
    pub fn new(pkgs_dir: &Path, base: &str, script_dir: &Path) -> Self {
        let base_dir = pkgs_dir.join(base);
        Self {
            src_dir: base_dir.join("src"),
            pkg_dir: base_dir.join("pkg"),
            base_dir,
            script_dir: script_dir.to_path_buf(),
        }
    }

    /// Wipe `base_dir` and recreate `src` and `pkg` with mode 0755
    pub fn prepare(&self) -> Result<()> {
        match fs::remove_dir_all(&self.base_dir) {
            Ok(()) => debug!("Removed {}", self.base_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::IoError(format!(
                    "removing {}: {}",
                    self.base_dir.display(),
                    e
                )))
            }
        }
        for dir in [&self.src_dir, &self.pkg_dir] {
            fs::create_dir_all(dir)
                .map_err(|e| Error::IoError(format!("creating {}: {}", dir.display(), e)))?;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }
}
