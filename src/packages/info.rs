// src/packages/info.rs

//! Format-neutral package metadata handed to a [`Packager`](super::Packager)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a content entry is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "dir")]
    Dir,
    #[serde(rename = "symlink")]
    Symlink,
    /// A configuration file the package manager must not overwrite
    #[serde(rename = "config|noreplace")]
    ConfigNoReplace,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::File => "file",
            ContentType::Dir => "dir",
            ContentType::Symlink => "symlink",
            ContentType::ConfigNoReplace => "config|noreplace",
        }
    }

    /// Entries whose bytes come from a regular file
    pub fn is_regular(&self) -> bool {
        matches!(self, ContentType::File | ContentType::ConfigNoReplace)
    }
}

/// One row of the package file manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    /// Staged file on disk; for symlinks, the link target
    pub source: String,
    /// Absolute install path
    pub destination: String,
    #[serde(rename = "type")]
    pub kind: ContentType,
    /// Permission bits (no file type bits)
    pub mode: u32,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
    pub size: u64,
}

impl ContentEntry {
    /// Destination without the leading slash, as stored in archives
    pub fn relative_path(&self) -> &str {
        self.destination.trim_start_matches('/')
    }
}

/// Lifecycle scripts every format supports; values are file paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageScripts {
    pub pre_install: String,
    pub post_install: String,
    pub pre_remove: String,
    pub post_remove: String,
}

/// Upgrade scripts, used by the Arch and APK backends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeScripts {
    pub pre_upgrade: String,
    pub post_upgrade: String,
}

/// Transaction scripts, used only by the RPM backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionScripts {
    pub pre_trans: String,
    pub post_trans: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    /// Recipe architecture name (`amd64`, `arm64`, `all`, ...)
    pub arch: String,
    pub version: String,
    /// Platform-transformed release
    pub release: String,
    /// Empty when the epoch is zero
    pub epoch: String,
    pub description: String,
    pub platform: String,
    pub homepage: String,
    /// Comma-joined license list
    pub license: String,
    pub maintainer: String,
    pub group: String,
    pub conflicts: Vec<String>,
    pub replaces: Vec<String>,
    pub provides: Vec<String>,
    pub depends: Vec<String>,
    pub contents: Vec<ContentEntry>,
    pub scripts: PackageScripts,
    pub arch_scripts: UpgradeScripts,
    pub apk_scripts: UpgradeScripts,
    pub rpm_scripts: TransactionScripts,
}

impl PackageInfo {
    /// `[epoch:]version-release`
    pub fn full_version(&self) -> String {
        if self.epoch.is_empty() {
            format!("{}-{}", self.version, self.release)
        } else {
            format!("{}:{}-{}", self.epoch, self.version, self.release)
        }
    }

    /// Sum of regular file sizes
    pub fn installed_size(&self) -> u64 {
        self.contents
            .iter()
            .filter(|c| c.kind.is_regular())
            .map(|c| c.size)
            .sum()
    }

    /// First line of the description
    pub fn summary(&self) -> &str {
        self.description.lines().next().unwrap_or_default()
    }
}

/// Read a script file; an empty path means no script
pub fn read_script(path: &str) -> Result<Option<String>> {
    if path.is_empty() {
        return Ok(None);
    }
    std::fs::read_to_string(Path::new(path))
        .map(Some)
        .map_err(|e| Error::PackagerError(format!("reading script {}: {}", path, e)))
}
