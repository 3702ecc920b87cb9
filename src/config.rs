// src/config.rs
//! Build engine configuration
//!
//! Loaded from a TOML file (default `/etc/alr/alr.toml`) with per-field
//! defaults, then overlaid with environment overrides:
//! - `ALR_PKG_FORMAT` forces the output package format
//! - `ALR_LOG_LEVEL` sets the tracing filter

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default system configuration path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/alr/alr.toml";

/// Environment variable overriding the output format
pub const ENV_PKG_FORMAT: &str = "ALR_PKG_FORMAT";

/// Environment variable controlling log verbosity
pub const ENV_LOG_LEVEL: &str = "ALR_LOG_LEVEL";

/// Configuration capability object passed to the builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Privilege escalation prefix for `as_root` manager calls
    #[serde(default = "default_root_cmd")]
    pub root_cmd: String,

    /// Run manager commands through `root_cmd`
    #[serde(default = "default_true")]
    pub use_root_cmd: bool,

    /// Packages root; each base package gets `<pkgs_dir>/<base>`
    #[serde(default = "default_pkgs_dir")]
    pub pkgs_dir: PathBuf,

    /// Recipe repository checkouts
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,

    /// Forced output format (apk, deb, rpm, archlinux)
    #[serde(default)]
    pub pkg_format: Option<String>,

    /// Forced package manager name instead of autodetection
    #[serde(default)]
    pub package_manager: Option<String>,

    /// Maximum concurrent source downloads
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,

    /// Seconds between SIGTERM and SIGKILL for runaway hook processes
    #[serde(default = "default_grace_period")]
    pub hook_grace_period_secs: u64,

    /// Wrap pass-two hooks in fakeroot when available
    #[serde(default = "default_true")]
    pub use_fakeroot: bool,

    /// Run installer and script executor as out-of-process workers
    #[serde(default)]
    pub isolate_workers: bool,

    /// Remove build dependencies without asking
    #[serde(default)]
    pub auto_remove_build_deps: bool,

    #[serde(default = "default_find_provides")]
    pub find_provides: PathBuf,

    #[serde(default = "default_find_requires")]
    pub find_requires: PathBuf,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_cmd: default_root_cmd(),
            use_root_cmd: true,
            pkgs_dir: default_pkgs_dir(),
            repo_dir: default_repo_dir(),
            pkg_format: None,
            package_manager: None,
            download_concurrency: default_download_concurrency(),
            hook_grace_period_secs: default_grace_period(),
            use_fakeroot: true,
            isolate_workers: false,
            auto_remove_build_deps: false,
            find_provides: default_find_provides(),
            find_requires: default_find_requires(),
            log_level: None,
        }
    }
}

fn default_root_cmd() -> String {
    "sudo".to_string()
}

fn default_true() -> bool {
    true
}

fn cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/var/cache"))
        .join("alr")
}

fn default_pkgs_dir() -> PathBuf {
    cache_root().join("pkgs")
}

fn default_repo_dir() -> PathBuf {
    cache_root().join("repo")
}

fn default_download_concurrency() -> usize {
    4
}

fn default_grace_period() -> u64 {
    5
}

fn default_find_provides() -> PathBuf {
    PathBuf::from("/usr/lib/rpm/find-provides")
}

fn default_find_requires() -> PathBuf {
    PathBuf::from("/usr/lib/rpm/find-requires")
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)
                .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::ConfigError(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Load from the default path and apply process environment overrides
    pub fn load_default() -> Result<Self> {
        let mut config = Self::load(Path::new(DEFAULT_CONFIG_PATH))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay environment overrides using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(format) = lookup(ENV_PKG_FORMAT).filter(|v| !v.is_empty()) {
            self.pkg_format = Some(format);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.log_level = Some(level);
        }
    }

    pub fn with_pkgs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pkgs_dir = dir.into();
        self
    }

    pub fn with_pkg_format(mut self, format: impl Into<String>) -> Self {
        self.pkg_format = Some(format.into());
        self
    }

    pub fn hook_grace_period(&self) -> Duration {
        Duration::from_secs(self.hook_grace_period_secs)
    }

    /// Base directory for a base package
    pub fn base_dir(&self, base: &str) -> PathBuf {
        self.pkgs_dir.join(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.root_cmd, "sudo");
        assert_eq!(config.download_concurrency, 4);
        assert_eq!(config.hook_grace_period(), Duration::from_secs(5));
        assert!(config.use_fakeroot);
        assert!(config.pkg_format.is_none());
    }

    #[test]
    fn test_parse_fields() {
        let config = Config::from_toml(
            r#"
root_cmd = "doas"
pkgs_dir = "/srv/alr/pkgs"
pkg_format = "rpm"
download_concurrency = 2
"#,
        )
        .unwrap();
        assert_eq!(config.root_cmd, "doas");
        assert_eq!(config.pkgs_dir, PathBuf::from("/srv/alr/pkgs"));
        assert_eq!(config.pkg_format.as_deref(), Some("rpm"));
        assert_eq!(config.download_concurrency, 2);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml("root_cmd = ["),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::from_toml("pkg_format = \"rpm\"").unwrap();
        let env: HashMap<&str, &str> = [(ENV_PKG_FORMAT, "deb"), (ENV_LOG_LEVEL, "debug")].into();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.pkg_format.as_deref(), Some("deb"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.root_cmd, "sudo");
    }
}
