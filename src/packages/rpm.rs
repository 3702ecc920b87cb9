// src/packages/rpm.rs

//! RPM package writer
//!
//! Uses the `rpm` crate's PackageBuilder. All eight lifecycle scripts map
//! onto RPM scriptlets; upgrades reuse the install and remove scriptlets,
//! so the upgrade slots are unused here.

use super::info::{read_script, ContentType, PackageInfo};
use super::Packager;
use crate::error::{Error, Result};
use crate::version::{Dependency, Operator};
use std::io::Write;
use tracing::debug;

pub struct RpmPackager;

impl Packager for RpmPackager {
    fn format(&self) -> &'static str {
        "rpm"
    }

    fn extension(&self) -> &'static str {
        "rpm"
    }

    fn translate_arch(&self, arch: &str) -> String {
        match arch {
            "all" => "noarch",
            "amd64" => "x86_64",
            "386" => "i386",
            "arm64" => "aarch64",
            "arm7" => "armv7hl",
            "arm6" => "armv6hl",
            "arm5" => "armv5tel",
            other => other,
        }
        .to_string()
    }

    fn write(&self, info: &PackageInfo, out: &mut dyn Write) -> Result<()> {
        let arch = self.translate_arch(&info.arch);
        let license = if info.license.is_empty() {
            "Unspecified"
        } else {
            info.license.as_str()
        };

        let mut builder =
            rpm::PackageBuilder::new(&info.name, &info.version, license, &arch, info.summary())
                .release(info.release.as_str())
                .compression(rpm::CompressionType::Gzip);

        if !info.epoch.is_empty() {
            let epoch: u32 = info.epoch.parse().map_err(|_| {
                Error::PackagerError(format!("invalid epoch '{}'", info.epoch))
            })?;
            builder = builder.epoch(epoch);
        }
        if !info.homepage.is_empty() {
            builder = builder.url(&info.homepage);
        }
        if !info.group.is_empty() {
            builder = builder.group(&info.group);
        }
        if !info.maintainer.is_empty() {
            builder = builder.packager(&info.maintainer);
        }

        for dep in &info.depends {
            builder = builder.requires(rpm_dependency(dep));
        }
        for dep in &info.provides {
            builder = builder.provides(rpm_dependency(dep));
        }
        for dep in &info.conflicts {
            builder = builder.conflicts(rpm_dependency(dep));
        }
        for dep in &info.replaces {
            builder = builder.obsoletes(rpm_dependency(dep));
        }

        // Symlinks are recreated in a scratch directory and read through;
        // a target that does not resolve on the build host is refused
        let scratch = tempfile::tempdir()?;
        for (i, entry) in info.contents.iter().enumerate() {
            match entry.kind {
                ContentType::File | ContentType::ConfigNoReplace => {
                    let options = rpm::FileOptions::new(&entry.destination)
                        .mode(rpm::FileMode::from((0o100000 | entry.mode) as i32));
                    let options = if entry.kind == ContentType::ConfigNoReplace {
                        options.is_config_noreplace()
                    } else {
                        options
                    };
                    builder = builder.with_file(&entry.source, options).map_err(|e| {
                        Error::PackagerError(format!("adding {}: {}", entry.destination, e))
                    })?;
                }
                ContentType::Symlink => {
                    let link = scratch.path().join(format!("link{}", i));
                    std::os::unix::fs::symlink(&entry.source, &link)?;
                    builder = builder
                        .with_file(&link, rpm::FileOptions::new(&entry.destination))
                        .map_err(|e| {
                            Error::PackagerError(format!("adding {}: {}", entry.destination, e))
                        })?;
                }
                ContentType::Dir => {
                    debug!("rpm: directory {} is implied by its contents", entry.destination);
                }
            }
        }

        if let Some(script) = read_script(&info.scripts.pre_install)? {
            builder = builder.pre_install_script(script);
        }
        if let Some(script) = read_script(&info.scripts.post_install)? {
            builder = builder.post_install_script(script);
        }
        if let Some(script) = read_script(&info.scripts.pre_remove)? {
            builder = builder.pre_uninstall_script(script);
        }
        if let Some(script) = read_script(&info.scripts.post_remove)? {
            builder = builder.post_uninstall_script(script);
        }
        if let Some(script) = read_script(&info.rpm_scripts.pre_trans)? {
            builder = builder.pre_trans_script(script);
        }
        if let Some(script) = read_script(&info.rpm_scripts.post_trans)? {
            builder = builder.post_trans_script(script);
        }

        let package = builder
            .build()
            .map_err(|e| Error::PackagerError(format!("building rpm: {}", e)))?;
        let mut out = out;
        package
            .write(&mut out)
            .map_err(|e| Error::PackagerError(format!("writing rpm: {}", e)))
    }
}

/// Convert a metadata dependency (`name op version`) to an RPM dependency
fn rpm_dependency(spec: &str) -> rpm::Dependency {
    let Ok(dep) = Dependency::parse(spec) else {
        return rpm::Dependency::any(spec);
    };
    match dep.constraint {
        None => rpm::Dependency::any(dep.name),
        Some((op, version)) => match op {
            Operator::Equal => rpm::Dependency::eq(dep.name, version),
            Operator::Greater => rpm::Dependency::greater(dep.name, version),
            Operator::GreaterOrEqual => rpm::Dependency::greater_eq(dep.name, version),
            Operator::Less => rpm::Dependency::less(dep.name, version),
            Operator::LessOrEqual => rpm::Dependency::less_eq(dep.name, version),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::ContentEntry;

    #[test]
    fn test_rpm_generation() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("hello");
        std::fs::write(&bin, "#!/bin/sh\necho hello\n").unwrap();

        let info = PackageInfo {
            name: "hello+alr-local".into(),
            arch: "amd64".into(),
            version: "1.0".into(),
            release: "1.f40".into(),
            description: "Greeter".into(),
            license: "MIT".into(),
            depends: vec!["bash >= 5.0".into()],
            contents: vec![
                ContentEntry {
                    source: bin.display().to_string(),
                    destination: "/usr/bin/hello".into(),
                    kind: ContentType::File,
                    mode: 0o755,
                    mtime: 0,
                    size: 22,
                },
                ContentEntry {
                    source: String::new(),
                    destination: "/usr/share/hello".into(),
                    kind: ContentType::Dir,
                    mode: 0o755,
                    mtime: 0,
                    size: 0,
                },
            ],
            ..Default::default()
        };

        assert_eq!(
            RpmPackager.conventional_file_name(&info),
            "hello+alr-local-1.0-1.f40.x86_64.rpm"
        );

        let mut out = Vec::new();
        RpmPackager.write(&info, &mut out).unwrap();
        // RPM lead magic
        assert_eq!(&out[..4], &[0xED, 0xAB, 0xEE, 0xDB]);
    }

    #[test]
    fn test_arch_names() {
        assert_eq!(RpmPackager.translate_arch("all"), "noarch");
        assert_eq!(RpmPackager.translate_arch("arm64"), "aarch64");
    }
}
