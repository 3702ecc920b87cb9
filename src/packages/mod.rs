// src/packages/mod.rs

//! Package format backends
//!
//! Each backend turns a [`PackageInfo`] into one native archive:
//! - `apk`: Alpine, concatenated gzip control and data segments
//! - `deb`: Debian, an `ar` archive of control and data tarballs
//! - `rpm`: Red Hat, written with the `rpm` crate
//! - `archlinux`: pacman, a zstd-compressed tarball

pub mod apk;
pub mod arch;
pub mod deb;
pub mod info;
pub mod registry;
pub mod rpm;
mod tarball;

pub use info::{
    read_script, ContentEntry, ContentType, PackageInfo, PackageScripts, TransactionScripts,
    UpgradeScripts,
};
pub use registry::PackageFormatRegistry;

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A package format backend
pub trait Packager: Send + Sync {
    /// Format name used for selection (`deb`, `rpm`, ...)
    fn format(&self) -> &'static str;

    /// File extension without the leading dot
    fn extension(&self) -> &'static str;

    /// Translate a recipe architecture into this format's naming
    fn translate_arch(&self, arch: &str) -> String;

    /// Canonical artifact file name
    ///
    /// `<name>-<version>-<release>.<arch>.<ext>`; the epoch never appears.
    fn conventional_file_name(&self, info: &PackageInfo) -> String {
        format!(
            "{}-{}-{}.{}.{}",
            info.name,
            info.version,
            info.release,
            self.translate_arch(&info.arch),
            self.extension()
        )
    }

    /// Serialize the package to `out`
    fn write(&self, info: &PackageInfo, out: &mut dyn Write) -> Result<()>;
}

/// Write the package into `dir` under its conventional name
///
/// Data goes to `<file>.part` first and is renamed into place only after
/// the backend succeeds, so a failed write never leaves a cache hit behind.
pub fn write_package(packager: &dyn Packager, info: &PackageInfo, dir: &Path) -> Result<PathBuf> {
    let file_name = packager.conventional_file_name(info);
    let final_path = dir.join(&file_name);
    let part_path = dir.join(format!("{}.part", file_name));

    let result = (|| -> Result<()> {
        let file = File::create(&part_path).map_err(|e| {
            Error::PackagerError(format!("creating {}: {}", part_path.display(), e))
        })?;
        let mut out = BufWriter::new(file);
        packager.write(info, &mut out)?;
        out.flush()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&part_path);
        return Err(e);
    }

    std::fs::rename(&part_path, &final_path)?;
    debug!("Wrote {} package {}", packager.format(), final_path.display());
    Ok(final_path)
}
