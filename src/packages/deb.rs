// src/packages/deb.rs

//! DEB package writer
//!
//! A .deb is an ar archive containing, in order:
//! - debian-binary: version string "2.0\n"
//! - control.tar.gz: control file, md5sums, conffiles and maintainer scripts
//! - data.tar.gz: the installed files

use super::info::{read_script, ContentType, PackageInfo};
use super::tarball::{append_bytes, build_date, data_tar, gzip, new_tar};
use super::Packager;
use crate::error::{Error, Result};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Write};

pub struct DebPackager;

impl Packager for DebPackager {
    fn format(&self) -> &'static str {
        "deb"
    }

    fn extension(&self) -> &'static str {
        "deb"
    }

    fn translate_arch(&self, arch: &str) -> String {
        match arch {
            "386" => "i386",
            "arm7" => "armhf",
            "arm6" | "arm5" => "armel",
            "ppc64le" => "ppc64el",
            "mips64le" => "mips64el",
            other => other,
        }
        .to_string()
    }

    fn write(&self, info: &PackageInfo, out: &mut dyn Write) -> Result<()> {
        let mtime = build_date();
        let control = gzip(&control_tar(self, info, mtime)?)?;
        let data = gzip(&data_tar(info, mtime)?)?;

        let mut archive = ar::Builder::new(out);
        append_member(&mut archive, "debian-binary", b"2.0\n", mtime)?;
        append_member(&mut archive, "control.tar.gz", &control, mtime)?;
        append_member(&mut archive, "data.tar.gz", &data, mtime)?;
        Ok(())
    }
}

fn append_member<W: Write>(
    archive: &mut ar::Builder<W>,
    name: &str,
    data: &[u8],
    mtime: i64,
) -> Result<()> {
    let mut header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
    header.set_mode(0o100644);
    header.set_mtime(mtime.max(0) as u64);
    archive
        .append(&header, data)
        .map_err(|e| Error::PackagerError(format!("adding {}: {}", name, e)))
}

fn control_tar(packager: &DebPackager, info: &PackageInfo, mtime: i64) -> Result<Vec<u8>> {
    let mut tar = new_tar();
    append_bytes(&mut tar, "control", control_file(packager, info).as_bytes(), 0o644, mtime)?;

    let md5sums = md5sums(info)?;
    if !md5sums.is_empty() {
        append_bytes(&mut tar, "md5sums", md5sums.as_bytes(), 0o644, mtime)?;
    }

    let conffiles: Vec<&str> = info
        .contents
        .iter()
        .filter(|c| c.kind == ContentType::ConfigNoReplace)
        .map(|c| c.destination.as_str())
        .collect();
    if !conffiles.is_empty() {
        let body = conffiles.join("\n") + "\n";
        append_bytes(&mut tar, "conffiles", body.as_bytes(), 0o644, mtime)?;
    }

    let scripts = [
        ("preinst", &info.scripts.pre_install),
        ("postinst", &info.scripts.post_install),
        ("prerm", &info.scripts.pre_remove),
        ("postrm", &info.scripts.post_remove),
    ];
    for (name, path) in scripts {
        if let Some(body) = read_script(path)? {
            append_bytes(&mut tar, name, body.as_bytes(), 0o755, mtime)?;
        }
    }

    Ok(tar.into_inner()?)
}

/// The `control` file
pub fn control_file(packager: &DebPackager, info: &PackageInfo) -> String {
    let mut control = String::new();
    control.push_str(&format!("Package: {}\n", info.name));
    control.push_str(&format!("Version: {}\n", info.full_version()));
    if !info.group.is_empty() {
        control.push_str(&format!("Section: {}\n", info.group));
    }
    control.push_str("Priority: optional\n");
    control.push_str(&format!(
        "Architecture: {}\n",
        packager.translate_arch(&info.arch)
    ));
    if !info.maintainer.is_empty() {
        control.push_str(&format!("Maintainer: {}\n", info.maintainer));
    }
    control.push_str(&format!(
        "Installed-Size: {}\n",
        info.installed_size().div_ceil(1024)
    ));

    let lists = [
        ("Depends", &info.depends),
        ("Provides", &info.provides),
        ("Conflicts", &info.conflicts),
        ("Replaces", &info.replaces),
    ];
    for (field, values) in lists {
        if !values.is_empty() {
            control.push_str(&format!("{}: {}\n", field, values.join(", ")));
        }
    }

    if !info.homepage.is_empty() {
        control.push_str(&format!("Homepage: {}\n", info.homepage));
    }
    control.push_str(&format!("Description: {}\n", description_field(info)));
    control
}

/// Summary line plus the extended description, one space indented, with
/// blank lines written as ` .`
fn description_field(info: &PackageInfo) -> String {
    let mut lines = info.description.lines();
    let summary = lines.next().unwrap_or(&info.name);
    let mut out = summary.to_string();
    for line in lines {
        out.push_str("\n ");
        out.push_str(if line.trim().is_empty() { "." } else { line });
    }
    out
}

fn md5sums(info: &PackageInfo) -> Result<String> {
    let mut out = String::new();
    for entry in info.contents.iter().filter(|c| c.kind.is_regular()) {
        let mut file = File::open(&entry.source)?;
        let mut hasher = Md5::new();
        io::copy(&mut file, &mut hasher)?;
        out.push_str(&format!(
            "{}  {}\n",
            hex::encode(hasher.finalize()),
            entry.relative_path()
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::ContentEntry;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn sample(dir: &std::path::Path) -> PackageInfo {
        let bin = dir.join("hello");
        std::fs::write(&bin, "hello\n").unwrap();
        let conf = dir.join("hello.conf");
        std::fs::write(&conf, "x=1\n").unwrap();
        let post = dir.join("post.sh");
        std::fs::write(&post, "echo installed\n").unwrap();

        PackageInfo {
            name: "hello+alr-local".into(),
            arch: "amd64".into(),
            version: "1.0".into(),
            release: "1".into(),
            epoch: "2".into(),
            description: "Greeter\nPrints a greeting.\n\nThat is all.".into(),
            maintainer: "Jane <jane@example.com>".into(),
            depends: vec!["libc6 (>= 2.0)".into(), "bash".into()],
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
                    source: conf.display().to_string(),
                    destination: "/etc/hello.conf".into(),
                    kind: ContentType::ConfigNoReplace,
                    mode: 0o644,
                    mtime: 0,
                    size: 4,
                },
            ],
            scripts: crate::packages::PackageScripts {
                post_install: post.display().to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_control_file() {
        let tmp = tempfile::tempdir().unwrap();
        let info = sample(tmp.path());
        let control = control_file(&DebPackager, &info);
        assert!(control.contains("Package: hello+alr-local\n"));
        assert!(control.contains("Version: 2:1.0-1\n"));
        assert!(control.contains("Architecture: amd64\n"));
        assert!(control.contains("Depends: libc6 (>= 2.0), bash\n"));
        assert!(control.contains("Installed-Size: 1\n"));
        assert!(control.ends_with("Description: Greeter\n Prints a greeting.\n .\n That is all.\n"));
    }

    #[test]
    fn test_deb_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let info = sample(tmp.path());
        let mut out = Vec::new();
        DebPackager.write(&info, &mut out).unwrap();
        assert!(out.starts_with(b"!<arch>\n"));

        let mut archive = ar::Archive::new(&out[..]);
        let mut members = Vec::new();
        let mut control_names = Vec::new();
        while let Some(entry) = archive.next_entry() {
            let mut entry = entry.unwrap();
            let name = String::from_utf8_lossy(entry.header().identifier()).to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            if name == "debian-binary" {
                assert_eq!(data, b"2.0\n");
            }
            if name == "control.tar.gz" {
                let mut tar = tar::Archive::new(GzDecoder::new(&data[..]));
                for e in tar.entries().unwrap() {
                    let mut e = e.unwrap();
                    let path = e.path().unwrap().display().to_string();
                    if path == "md5sums" {
                        let mut body = String::new();
                        e.read_to_string(&mut body).unwrap();
                        assert!(body.contains("  usr/bin/hello\n"));
                    }
                    if path == "conffiles" {
                        let mut body = String::new();
                        e.read_to_string(&mut body).unwrap();
                        assert_eq!(body, "/etc/hello.conf\n");
                    }
                    control_names.push(path);
                }
            }
            members.push(name);
        }
        assert_eq!(members, vec!["debian-binary", "control.tar.gz", "data.tar.gz"]);
        assert_eq!(control_names, vec!["control", "md5sums", "conffiles", "postinst"]);
    }

    #[test]
    fn test_arch_names() {
        assert_eq!(DebPackager.translate_arch("386"), "i386");
        assert_eq!(DebPackager.translate_arch("arm7"), "armhf");
        assert_eq!(DebPackager.translate_arch("all"), "all");
    }
}
