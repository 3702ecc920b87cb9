// src/packages/apk.rs

//! Alpine APK package writer
//!
//! An APK v2 package is two gzip streams concatenated:
//! - control: a tar of `.PKGINFO` and the hook scripts, with the tar
//!   end-of-archive blocks removed so the streams join into one archive
//! - data: a tar of the installed files
//!
//! `.PKGINFO` carries `datahash`, the SHA-256 of the compressed data
//! stream. Packages are written unsigned.

use super::info::{read_script, PackageInfo};
use super::tarball::{append_bytes, build_date, data_tar, gzip, new_tar};
use super::Packager;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Write;

/// Size of the two zero blocks that close a tar archive
const TAR_TRAILER: usize = 1024;

pub struct ApkPackager;

impl Packager for ApkPackager {
    fn format(&self) -> &'static str {
        "apk"
    }

    fn extension(&self) -> &'static str {
        "apk"
    }

    fn translate_arch(&self, arch: &str) -> String {
        match arch {
            "all" => "noarch",
            "amd64" => "x86_64",
            "386" => "x86",
            "arm64" => "aarch64",
            "arm7" => "armv7",
            "arm6" | "arm5" => "armhf",
            other => other,
        }
        .to_string()
    }

    fn write(&self, info: &PackageInfo, out: &mut dyn Write) -> Result<()> {
        let mtime = build_date();
        let data = gzip(&data_tar(info, mtime)?)?;
        let datahash = hex::encode(Sha256::digest(&data));

        let mut control = new_tar();
        let pkginfo = pkginfo(self, info, mtime, &datahash);
        append_bytes(&mut control, ".PKGINFO", pkginfo.as_bytes(), 0o644, mtime)?;

        let scripts = [
            (".pre-install", &info.scripts.pre_install),
            (".post-install", &info.scripts.post_install),
            (".pre-deinstall", &info.scripts.pre_remove),
            (".post-deinstall", &info.scripts.post_remove),
            (".pre-upgrade", &info.apk_scripts.pre_upgrade),
            (".post-upgrade", &info.apk_scripts.post_upgrade),
        ];
        for (name, path) in scripts {
            if let Some(body) = read_script(path)? {
                append_bytes(&mut control, name, body.as_bytes(), 0o755, mtime)?;
            }
        }

        let mut control = control.into_inner()?;
        control.truncate(control.len().saturating_sub(TAR_TRAILER));

        out.write_all(&gzip(&control)?)?;
        out.write_all(&data)?;
        Ok(())
    }
}

/// `pkgver` in Alpine form: `<version>-r<release>`
pub fn apk_version(info: &PackageInfo) -> String {
    let base = format!("{}-r{}", info.version, info.release);
    if info.epoch.is_empty() {
        base
    } else {
        format!("{}:{}", info.epoch, base)
    }
}

/// `.PKGINFO` contents
pub fn pkginfo(packager: &ApkPackager, info: &PackageInfo, build_date: i64, datahash: &str) -> String {
    let mut out = String::from("# Generated by alr\n");
    out.push_str(&format!("pkgname = {}\n", info.name));
    out.push_str(&format!("pkgver = {}\n", apk_version(info)));
    out.push_str(&format!("pkgdesc = {}\n", info.summary()));
    if !info.homepage.is_empty() {
        out.push_str(&format!("url = {}\n", info.homepage));
    }
    out.push_str(&format!("builddate = {}\n", build_date));
    if !info.maintainer.is_empty() {
        out.push_str(&format!("packager = {}\n", info.maintainer));
        out.push_str(&format!("maintainer = {}\n", info.maintainer));
    }
    out.push_str(&format!("size = {}\n", info.installed_size()));
    out.push_str(&format!("arch = {}\n", packager.translate_arch(&info.arch)));
    out.push_str(&format!("origin = {}\n", info.name));
    if !info.license.is_empty() {
        out.push_str(&format!("license = {}\n", info.license));
    }
    for value in &info.replaces {
        out.push_str(&format!("replaces = {}\n", value));
    }
    for value in &info.provides {
        out.push_str(&format!("provides = {}\n", value));
    }
    for value in &info.depends {
        out.push_str(&format!("depend = {}\n", value));
    }
    // APK expresses conflicts as negated dependencies
    for value in &info.conflicts {
        out.push_str(&format!("depend = !{}\n", value));
    }
    out.push_str(&format!("datahash = {}\n", datahash));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::{ContentEntry, ContentType};
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    #[test]
    fn test_pkginfo() {
        let info = PackageInfo {
            name: "hello+alr-local".into(),
            arch: "arm64".into(),
            version: "1.0".into(),
            release: "3".into(),
            description: "Greeter".into(),
            provides: vec!["hello-bin".into()],
            conflicts: vec!["goodbye".into()],
            ..Default::default()
        };
        let text = pkginfo(&ApkPackager, &info, 7, "abc");
        assert!(text.contains("pkgver = 1.0-r3\n"));
        assert!(text.contains("arch = aarch64\n"));
        assert!(text.contains("provides = hello-bin\n"));
        assert!(text.contains("depend = !goodbye\n"));
        assert!(text.ends_with("datahash = abc\n"));
    }

    #[test]
    fn test_streams_join_into_one_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("hello");
        std::fs::write(&bin, "hello\n").unwrap();
        let pre = tmp.path().join("pre.sh");
        std::fs::write(&pre, "echo pre\n").unwrap();

        let info = PackageInfo {
            name: "hello".into(),
            arch: "amd64".into(),
            version: "1.0".into(),
            release: "1".into(),
            contents: vec![ContentEntry {
                source: bin.display().to_string(),
                destination: "/usr/bin/hello".into(),
                kind: ContentType::File,
                mode: 0o755,
                mtime: 0,
                size: 6,
            }],
            scripts: crate::packages::PackageScripts {
                pre_install: pre.display().to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let mut out = Vec::new();
        ApkPackager.write(&info, &mut out).unwrap();

        let mut joined = Vec::new();
        MultiGzDecoder::new(&out[..]).read_to_end(&mut joined).unwrap();
        let mut archive = tar::Archive::new(&joined[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                e.path().unwrap().display().to_string().trim_end_matches('/').to_string()
            })
            .collect();
        assert_eq!(names, vec![".PKGINFO", ".pre-install", "usr", "usr/bin", "usr/bin/hello"]);
    }
}
