// src/distro.rs

//! Host platform identity
//!
//! Parses `/etc/os-release`, maps the Rust target architecture onto the
//! architecture names recipes use, and derives the override selectors and
//! release transform that depend on both.

use crate::error::{Error, Result};
use std::path::Path;

const OS_RELEASE_PATHS: &[&str] = &["/etc/os-release", "/usr/lib/os-release"];

/// Parsed os-release identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub name: String,
    pub pretty_name: String,
    pub version_id: String,
    pub like: Vec<String>,
    /// `PLATFORM_ID`, used by the Fedora family release transform
    pub platform_id: Option<String>,
}

impl OsRelease {
    /// Read the host os-release file
    pub fn detect() -> Result<Self> {
        for path in OS_RELEASE_PATHS {
            let path = Path::new(path);
            if path.exists() {
                return Self::from_file(path);
            }
        }
        Err(Error::NotFound("os-release file".to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("failed to read {}: {}", path.display(), e)))?;
        Ok(parse_os_release(&content))
    }

    /// The ID followed by every ID_LIKE entry
    pub fn family(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str())
            .chain(self.like.iter().map(String::as_str))
            .filter(|s| !s.is_empty())
    }

    pub fn is_like(&self, id: &str) -> bool {
        self.family().any(|d| d == id)
    }
}

/// Parse os-release `KEY=value` content
///
/// Values may be double- or single-quoted; backslash escapes inside double
/// quotes are honored. Unknown keys are ignored.
pub fn parse_os_release(content: &str) -> OsRelease {
    let mut info = OsRelease::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(raw.trim());
        match key.trim() {
            "ID" => info.id = value,
            "NAME" => info.name = value,
            "PRETTY_NAME" => info.pretty_name = value,
            "VERSION_ID" => info.version_id = value,
            "ID_LIKE" => {
                info.like = value.split_whitespace().map(str::to_string).collect();
            }
            "PLATFORM_ID" => info.platform_id = Some(value),
            _ => {}
        }
    }

    info
}

fn unquote(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].to_string();
    }
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        return out;
    }
    raw.to_string()
}

/// Map a Rust target architecture to the recipe architecture name
pub fn normalize_arch(rust_arch: &str) -> String {
    match rust_arch {
        "x86_64" => "amd64",
        "x86" | "i386" | "i586" | "i686" => "386",
        "aarch64" => "arm64",
        "arm" => "arm7",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        "mips64" if cfg!(target_endian = "little") => "mips64le",
        other => other,
    }
    .to_string()
}

/// Architecture name of the running host
pub fn host_arch() -> String {
    normalize_arch(std::env::consts::ARCH)
}

/// Architectures whose binaries run on `arch`, most specific first
pub fn compatible_arches(arch: &str) -> Vec<String> {
    let list: &[&str] = match arch {
        "arm7" => &["arm7", "arm6", "arm5"],
        "arm6" => &["arm6", "arm5"],
        "amd64" => &["amd64"],
        "386" => &["386"],
        _ => return vec![arch.to_string()],
    };
    list.iter().map(|s| s.to_string()).collect()
}

/// Everything the build needs to know about the host
#[derive(Debug, Clone)]
pub struct Platform {
    pub os: OsRelease,
    pub arch: String,
    pub ncpu: usize,
}

impl Platform {
    pub fn new(os: OsRelease, arch: impl Into<String>) -> Self {
        Self {
            os,
            arch: arch.into(),
            ncpu: default_ncpu(),
        }
    }

    pub fn detect() -> Result<Self> {
        Ok(Self::new(OsRelease::detect()?, host_arch()))
    }

    pub fn compatible_arches(&self) -> Vec<String> {
        compatible_arches(&self.arch)
    }

    /// Whether a recipe `architectures` list permits this host
    ///
    /// An empty list or one containing `all` accepts every host.
    pub fn supports(&self, architectures: &[String]) -> bool {
        if architectures.is_empty() || architectures.iter().any(|a| a == "all") {
            return true;
        }
        let compatible = self.compatible_arches();
        architectures.iter().any(|a| compatible.contains(a))
    }

    /// Override selectors, most specific first, ending with the default `""`
    ///
    /// A field `f` under selector `s` lives in the shell variable `f_s`.
    pub fn selectors(&self) -> Vec<String> {
        let arches = self.compatible_arches();
        let mut out: Vec<String> = Vec::new();

        if !self.os.id.is_empty() && !self.os.version_id.is_empty() {
            for arch in &arches {
                out.push(format!("{}_{}_{}", arch, self.os.id, self.os.version_id));
            }
            out.push(format!("{}_{}", self.os.id, self.os.version_id));
        }

        for distro in self.os.family() {
            for arch in &arches {
                out.push(format!("{}_{}", arch, distro));
            }
            out.push(distro.to_string());
        }

        out.extend(arches.iter().cloned());
        out.push(String::new());

        let mut seen = std::collections::HashSet::new();
        out.into_iter()
            .map(|s| sanitize_selector(&s))
            .filter(|s| seen.insert(s.clone()))
            .collect()
    }

    /// Platform-specific release string
    pub fn release_string(&self, release: i64) -> String {
        if self.os.id == "altlinux" {
            return format!("alt{}", release);
        }
        if self.os.is_like("fedora") {
            if let Some(suffix) = self
                .os
                .platform_id
                .as_deref()
                .and_then(|p| p.strip_prefix("platform:"))
            {
                return format!("{}.{}", release, suffix);
            }
        }
        release.to_string()
    }

    /// Environment exported to recipes in both passes
    pub fn recipe_env(&self) -> Vec<(String, String)> {
        vec![
            ("DISTRO_NAME".into(), self.os.name.clone()),
            ("DISTRO_PRETTY_NAME".into(), self.os.pretty_name.clone()),
            ("DISTRO_ID".into(), self.os.id.clone()),
            ("DISTRO_VERSION_ID".into(), self.os.version_id.clone()),
            ("DISTRO_ID_LIKE".into(), self.os.like.join(" ")),
            ("ARCH".into(), self.arch.clone()),
            ("NCPU".into(), self.ncpu.to_string()),
        ]
    }
}

fn default_ncpu() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn sanitize_selector(s: &str) -> String {
    s.replace(['.', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEDORA: &str = r#"NAME="Fedora Linux"
VERSION="40 (Workstation Edition)"
ID=fedora
VERSION_ID=40
PLATFORM_ID="platform:f40"
PRETTY_NAME="Fedora Linux 40 (Workstation Edition)"
"#;

    fn platform(content: &str, arch: &str) -> Platform {
        Platform::new(parse_os_release(content), arch)
    }

    #[test]
    fn test_parse_os_release() {
        let info = parse_os_release(
            "ID=ubuntu\nID_LIKE=\"debian\"\nNAME='Ubuntu'\n# comment\nVERSION_ID=\"24.04\"\n",
        );
        assert_eq!(info.id, "ubuntu");
        assert_eq!(info.like, vec!["debian"]);
        assert_eq!(info.name, "Ubuntu");
        assert_eq!(info.version_id, "24.04");
        assert!(info.platform_id.is_none());
    }

    #[test]
    fn test_parse_escaped_value() {
        let info = parse_os_release("PRETTY_NAME=\"Say \\\"hi\\\"\"\n");
        assert_eq!(info.pretty_name, "Say \"hi\"");
    }

    #[test]
    fn test_normalize_arch() {
        assert_eq!(normalize_arch("x86_64"), "amd64");
        assert_eq!(normalize_arch("aarch64"), "arm64");
        assert_eq!(normalize_arch("riscv64"), "riscv64");
    }

    #[test]
    fn test_selectors_order() {
        let p = platform("ID=ubuntu\nID_LIKE=debian\nVERSION_ID=24.04\n", "amd64");
        assert_eq!(
            p.selectors(),
            vec![
                "amd64_ubuntu_24_04",
                "ubuntu_24_04",
                "amd64_ubuntu",
                "ubuntu",
                "amd64_debian",
                "debian",
                "amd64",
                "",
            ]
        );
    }

    #[test]
    fn test_selectors_compatible_arm() {
        let p = platform("ID=debian\n", "arm7");
        let selectors = p.selectors();
        assert_eq!(&selectors[..4], &["arm7_debian", "arm6_debian", "arm5_debian", "debian"]);
        assert_eq!(selectors.last().map(String::as_str), Some(""));
    }

    #[test]
    fn test_release_transform() {
        assert_eq!(platform(FEDORA, "amd64").release_string(1), "1.f40");
        assert_eq!(platform("ID=altlinux\n", "amd64").release_string(3), "alt3");
        assert_eq!(platform("ID=arch\n", "amd64").release_string(2), "2");
        // Fedora-like without PLATFORM_ID keeps the raw integer
        assert_eq!(
            platform("ID=nobara\nID_LIKE=fedora\n", "amd64").release_string(1),
            "1"
        );
    }

    #[test]
    fn test_supports_arch() {
        let p = platform("ID=arch\n", "amd64");
        assert!(p.supports(&[]));
        assert!(p.supports(&["all".to_string()]));
        assert!(p.supports(&["arm64".to_string(), "amd64".to_string()]));
        assert!(!p.supports(&["arm64".to_string()]));
    }

    #[test]
    fn test_recipe_env() {
        let p = platform(FEDORA, "amd64");
        let env = p.recipe_env();
        assert!(env.contains(&("DISTRO_ID".to_string(), "fedora".to_string())));
        assert!(env.contains(&("ARCH".to_string(), "amd64".to_string())));
    }
}
