// src/packages/arch.rs

//! Arch Linux package writer
//!
//! Arch packages are zstd-compressed tarballs containing:
//! - .PKGINFO: package metadata
//! - .INSTALL: optional install/upgrade/remove functions
//! - .MTREE: gzip-compressed mtree listing with digests
//! - the files at their install paths

use super::info::{read_script, ContentType, PackageInfo};
use super::tarball::{
    append_bytes, append_content, append_dir, build_date, gzip, implicit_dirs, new_tar,
};
use super::Packager;
use crate::error::{Error, Result};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};

pub struct ArchPackager;

impl Packager for ArchPackager {
    fn format(&self) -> &'static str {
        "archlinux"
    }

    fn extension(&self) -> &'static str {
        "pkg.tar.zst"
    }

    fn translate_arch(&self, arch: &str) -> String {
        match arch {
            "all" => "any",
            "amd64" => "x86_64",
            "386" => "i686",
            "arm64" => "aarch64",
            "arm7" => "armv7h",
            "arm6" => "armv6h",
            "arm5" => "arm",
            other => other,
        }
        .to_string()
    }

    fn write(&self, info: &PackageInfo, out: &mut dyn Write) -> Result<()> {
        let mtime = build_date();
        let pkginfo = pkginfo(self, info, mtime);
        let install = install_script(info)?;

        let mut tar = new_tar();
        append_bytes(&mut tar, ".PKGINFO", pkginfo.as_bytes(), 0o644, mtime)?;
        if let Some(install) = &install {
            append_bytes(&mut tar, ".INSTALL", install.as_bytes(), 0o644, mtime)?;
        }
        let mtree = gzip(mtree(info, &pkginfo, install.as_deref(), mtime)?.as_bytes())?;
        append_bytes(&mut tar, ".MTREE", &mtree, 0o644, mtime)?;

        for dir in implicit_dirs(&info.contents) {
            append_dir(&mut tar, &dir, 0o755, mtime)?;
        }
        let mut entries: Vec<_> = info.contents.iter().collect();
        entries.sort_by(|a, b| a.destination.cmp(&b.destination));
        for entry in entries {
            append_content(&mut tar, entry, entry.relative_path())?;
        }

        let tar_data = tar.into_inner()?;
        let compressed = zstd::encode_all(&tar_data[..], 19)?;
        out.write_all(&compressed)?;
        Ok(())
    }
}

/// `.PKGINFO` contents
pub fn pkginfo(packager: &ArchPackager, info: &PackageInfo, build_date: i64) -> String {
    let mut out = String::new();
    out.push_str(&format!("pkgname = {}\n", info.name));
    out.push_str(&format!("pkgver = {}\n", info.full_version()));
    out.push_str(&format!("pkgdesc = {}\n", info.summary()));
    if !info.homepage.is_empty() {
        out.push_str(&format!("url = {}\n", info.homepage));
    }
    out.push_str(&format!("builddate = {}\n", build_date));
    let packager_name = if info.maintainer.is_empty() {
        "Unknown Packager"
    } else {
        info.maintainer.as_str()
    };
    out.push_str(&format!("packager = {}\n", packager_name));
    out.push_str(&format!("size = {}\n", info.installed_size()));
    out.push_str(&format!("arch = {}\n", packager.translate_arch(&info.arch)));

    for license in info.license.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        out.push_str(&format!("license = {}\n", license));
    }
    if !info.group.is_empty() {
        out.push_str(&format!("group = {}\n", info.group));
    }

    let lists = [
        ("replaces", &info.replaces),
        ("conflict", &info.conflicts),
        ("provides", &info.provides),
        ("depend", &info.depends),
    ];
    for (key, values) in lists {
        for value in values {
            out.push_str(&format!("{} = {}\n", key, value));
        }
    }

    for entry in &info.contents {
        if entry.kind == ContentType::ConfigNoReplace {
            out.push_str(&format!("backup = {}\n", entry.relative_path()));
        }
    }
    out
}

/// Generate `.INSTALL` from the script files, one function per hook
fn install_script(info: &PackageInfo) -> Result<Option<String>> {
    let hooks = [
        ("pre_install", &info.scripts.pre_install),
        ("post_install", &info.scripts.post_install),
        ("pre_upgrade", &info.arch_scripts.pre_upgrade),
        ("post_upgrade", &info.arch_scripts.post_upgrade),
        ("pre_remove", &info.scripts.pre_remove),
        ("post_remove", &info.scripts.post_remove),
    ];

    let mut script = String::new();
    for (function, path) in hooks {
        let Some(body) = read_script(path)? else {
            continue;
        };
        script.push_str(&format!("{}() {{\n", function));
        for line in body.lines() {
            script.push_str(&format!("    {}\n", line));
        }
        script.push_str("}\n\n");
    }

    Ok(if script.is_empty() { None } else { Some(script) })
}

fn digests(mut reader: impl Read) -> Result<(String, String)> {
    let mut md5 = Md5::new();
    let mut sha = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        md5.update(&buf[..n]);
        sha.update(&buf[..n]);
    }
    Ok((hex::encode(md5.finalize()), hex::encode(sha.finalize())))
}

fn mtree_file(path: &str, mode: u32, mtime: i64, size: u64, reader: impl Read) -> Result<String> {
    let (md5, sha256) = digests(reader)?;
    Ok(format!(
        "./{} time={}.0 mode={:o} size={} md5digest={} sha256digest={}\n",
        path, mtime, mode, size, md5, sha256
    ))
}

/// mtree(5) listing of everything in the archive except `.MTREE` itself
fn mtree(info: &PackageInfo, pkginfo: &str, install: Option<&str>, mtime: i64) -> Result<String> {
    let mut out = String::from("#mtree\n/set type=file uid=0 gid=0 mode=644\n");
    out.push_str(&mtree_file(".PKGINFO", 0o644, mtime, pkginfo.len() as u64, pkginfo.as_bytes())?);
    if let Some(install) = install {
        out.push_str(&mtree_file(".INSTALL", 0o644, mtime, install.len() as u64, install.as_bytes())?);
    }

    for dir in implicit_dirs(&info.contents) {
        out.push_str(&format!("./{} time={}.0 mode=755 type=dir\n", dir, mtime));
    }

    let mut entries: Vec<_> = info.contents.iter().collect();
    entries.sort_by(|a, b| a.destination.cmp(&b.destination));
    for entry in entries {
        let path = entry.relative_path();
        match entry.kind {
            ContentType::Dir => out.push_str(&format!(
                "./{} time={}.0 mode={:o} type=dir\n",
                path, entry.mtime, entry.mode
            )),
            ContentType::Symlink => out.push_str(&format!(
                "./{} time={}.0 mode=777 type=link link={}\n",
                path, entry.mtime, entry.source
            )),
            ContentType::File | ContentType::ConfigNoReplace => {
                let file = File::open(&entry.source).map_err(|e| {
                    Error::PackagerError(format!("opening {}: {}", entry.source, e))
                })?;
                out.push_str(&mtree_file(path, entry.mode, entry.mtime, entry.size, file)?);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::{ContentEntry, PackageScripts, UpgradeScripts};

    fn sample(dir: &std::path::Path) -> PackageInfo {
        let bin = dir.join("hello");
        std::fs::write(&bin, "hello\n").unwrap();
        let post = dir.join("post.sh");
        std::fs::write(&post, "echo installed\necho again\n").unwrap();
        let upgrade = dir.join("upgrade.sh");
        std::fs::write(&upgrade, "echo upgraded\n").unwrap();

        PackageInfo {
            name: "hello+alr-local".into(),
            arch: "amd64".into(),
            version: "1.0".into(),
            release: "1".into(),
            description: "Greeter".into(),
            license: "MIT, Apache-2.0".into(),
            depends: vec!["glibc>=2.0".into()],
            contents: vec![
                ContentEntry {
                    source: bin.display().to_string(),
                    destination: "/usr/bin/hello".into(),
                    kind: ContentType::File,
                    mode: 0o755,
                    mtime: 0,
                    size: 6,
                },
                ContentEntry {
                    source: bin.display().to_string(),
                    destination: "/etc/hello.conf".into(),
                    kind: ContentType::ConfigNoReplace,
                    mode: 0o644,
                    mtime: 0,
                    size: 6,
                },
            ],
            scripts: PackageScripts {
                post_install: post.display().to_string(),
                ..Default::default()
            },
            arch_scripts: UpgradeScripts {
                post_upgrade: upgrade.display().to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_pkginfo() {
        let tmp = tempfile::tempdir().unwrap();
        let info = sample(tmp.path());
        let text = pkginfo(&ArchPackager, &info, 42);
        assert!(text.starts_with("pkgname = hello+alr-local\npkgver = 1.0-1\n"));
        assert!(text.contains("arch = x86_64\n"));
        assert!(text.contains("license = MIT\nlicense = Apache-2.0\n"));
        assert!(text.contains("depend = glibc>=2.0\n"));
        assert!(text.contains("backup = etc/hello.conf\n"));
        assert!(text.contains("size = 12\n"));
    }

    #[test]
    fn test_install_script() {
        let tmp = tempfile::tempdir().unwrap();
        let info = sample(tmp.path());
        let script = install_script(&info).unwrap().unwrap();
        assert_eq!(
            script,
            "post_install() {\n    echo installed\n    echo again\n}\n\npost_upgrade() {\n    echo upgraded\n}\n\n"
        );
        assert!(install_script(&PackageInfo::default()).unwrap().is_none());
    }

    #[test]
    fn test_archive_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let info = sample(tmp.path());
        assert_eq!(
            ArchPackager.conventional_file_name(&info),
            "hello+alr-local-1.0-1.x86_64.pkg.tar.zst"
        );

        let mut out = Vec::new();
        ArchPackager.write(&info, &mut out).unwrap();
        let tar_data = zstd::decode_all(&out[..]).unwrap();
        let mut archive = tar::Archive::new(&tar_data[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                e.path().unwrap().display().to_string().trim_end_matches('/').to_string()
            })
            .collect();
        assert_eq!(
            names,
            vec![".PKGINFO", ".INSTALL", ".MTREE", "etc", "usr", "usr/bin", "etc/hello.conf", "usr/bin/hello"]
        );
    }
}
