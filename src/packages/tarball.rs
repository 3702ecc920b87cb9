// src/packages/tarball.rs

//! Tar helpers shared by the DEB, Arch and APK backends
//!
//! Archives are built in memory. Every entry is owned by root; directories
//! that only exist as parents of listed entries are emitted first with mode
//! 0755 so extractors never have to invent them.

use super::info::{ContentEntry, ContentType, PackageInfo};
use crate::error::{Error, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use tar::{Builder as TarBuilder, EntryType, Header};

pub(crate) type MemTar = TarBuilder<Vec<u8>>;

pub(crate) fn new_tar() -> MemTar {
    let mut builder = TarBuilder::new(Vec::new());
    builder.mode(tar::HeaderMode::Deterministic);
    builder
}

fn header(kind: EntryType, mode: u32, mtime: i64, size: u64) -> Result<Header> {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_mtime(mtime.max(0) as u64);
    header.set_size(size);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    Ok(header)
}

/// Append an in-memory file
pub(crate) fn append_bytes(
    tar: &mut MemTar,
    path: &str,
    data: &[u8],
    mode: u32,
    mtime: i64,
) -> Result<()> {
    let mut h = header(EntryType::Regular, mode, mtime, data.len() as u64)?;
    tar.append_data(&mut h, path, data)?;
    Ok(())
}

pub(crate) fn append_dir(tar: &mut MemTar, path: &str, mode: u32, mtime: i64) -> Result<()> {
    let mut h = header(EntryType::Directory, mode, mtime, 0)?;
    tar.append_data(&mut h, format!("{}/", path.trim_end_matches('/')), std::io::empty())?;
    Ok(())
}

/// Append one content entry under `path`
pub(crate) fn append_content(tar: &mut MemTar, entry: &ContentEntry, path: &str) -> Result<()> {
    match entry.kind {
        ContentType::Dir => append_dir(tar, path, entry.mode, entry.mtime),
        ContentType::Symlink => {
            let mut h = header(EntryType::Symlink, 0o777, entry.mtime, 0)?;
            tar.append_link(&mut h, path, &entry.source)?;
            Ok(())
        }
        ContentType::File | ContentType::ConfigNoReplace => {
            let file = File::open(&entry.source).map_err(|e| {
                Error::PackagerError(format!("opening {}: {}", entry.source, e))
            })?;
            let size = file.metadata()?.len();
            let mut h = header(EntryType::Regular, entry.mode, entry.mtime, size)?;
            tar.append_data(&mut h, path, file)?;
            Ok(())
        }
    }
}

/// Parent directories of every entry that are not entries themselves
pub(crate) fn implicit_dirs(contents: &[ContentEntry]) -> Vec<String> {
    let explicit: BTreeSet<&str> = contents
        .iter()
        .filter(|c| c.kind == ContentType::Dir)
        .map(|c| c.relative_path().trim_end_matches('/'))
        .collect();

    let mut dirs = BTreeSet::new();
    for entry in contents {
        let mut path = entry.relative_path();
        while let Some((parent, _)) = path.rsplit_once('/') {
            if !parent.is_empty() && !explicit.contains(parent) {
                dirs.insert(parent.to_string());
            }
            path = parent;
        }
    }
    dirs.into_iter().collect()
}

/// Data archive of a package's contents
pub(crate) fn data_tar(info: &PackageInfo, mtime: i64) -> Result<Vec<u8>> {
    let mut tar = new_tar();
    for dir in implicit_dirs(&info.contents) {
        append_dir(&mut tar, &dir, 0o755, mtime)?;
    }

    let mut entries: Vec<&ContentEntry> = info.contents.iter().collect();
    entries.sort_by(|a, b| a.destination.cmp(&b.destination));
    for entry in entries {
        append_content(&mut tar, entry, entry.relative_path())?;
    }
    Ok(tar.into_inner()?)
}

pub(crate) fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Build date for package metadata
pub(crate) fn build_date() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entry(dest: &str, kind: ContentType) -> ContentEntry {
        ContentEntry {
            source: String::new(),
            destination: dest.to_string(),
            kind,
            mode: 0o755,
            mtime: 0,
            size: 0,
        }
    }

    #[test]
    fn test_implicit_dirs() {
        let contents = vec![
            entry("/usr/bin/hello", ContentType::File),
            entry("/usr/share/doc/hello", ContentType::Dir),
            entry("/etc/hello.conf", ContentType::ConfigNoReplace),
        ];
        assert_eq!(
            implicit_dirs(&contents),
            vec!["etc", "usr", "usr/bin", "usr/share", "usr/share/doc"]
        );
    }

    #[test]
    fn test_data_tar_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("hello");
        std::fs::write(&src, "#!/bin/sh\n").unwrap();

        let mut file = entry("/usr/bin/hello", ContentType::File);
        file.source = src.display().to_string();
        let mut link = entry("/usr/bin/hi", ContentType::Symlink);
        link.source = "hello".to_string();
        let info = PackageInfo {
            contents: vec![file, link],
            ..Default::default()
        };

        let data = data_tar(&info, 0).unwrap();
        let mut archive = tar::Archive::new(&data[..]);
        let mut names = Vec::new();
        for e in archive.entries().unwrap() {
            let mut e = e.unwrap();
            let name = e.path().unwrap().display().to_string();
            let name = name.trim_end_matches('/').to_string();
            if name == "usr/bin/hello" {
                let mut body = String::new();
                e.read_to_string(&mut body).unwrap();
                assert_eq!(body, "#!/bin/sh\n");
                assert_eq!(e.header().mode().unwrap(), 0o755);
            }
            if name == "usr/bin/hi" {
                assert_eq!(e.link_name().unwrap().unwrap().display().to_string(), "hello");
            }
            names.push(name);
        }
        assert_eq!(names, vec!["usr", "usr/bin", "usr/bin/hello", "usr/bin/hi"]);
    }
}
