// src/build/contents.rs

//! Package content manifest from PkgDir

use crate::error::{Error, Result};
use crate::packages::{ContentEntry, ContentType};
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use walkdir::WalkDir;

/// Build the content list of a staged package
///
/// Without `preferred`, all of PkgDir is walked and only empty directories
/// get their own entry. With `preferred` (the output of `files()`), each
/// listed path and everything below it is included and directories are
/// always listed. Destinations named in `backup` become config files.
pub fn build_contents(
    pkg_dir: &Path,
    backup: &[String],
    preferred: Option<&[String]>,
) -> Result<Vec<ContentEntry>> {
    let backup: HashSet<&str> = backup.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut contents = Vec::new();

    match preferred {
        None => walk(pkg_dir, pkg_dir, false, &backup, &mut seen, &mut contents)?,
        Some(paths) => {
            for path in paths {
                let root = pkg_dir.join(path.trim_start_matches('/'));
                if !root.starts_with(pkg_dir) || path.split('/').any(|c| c == "..") {
                    return Err(Error::PackagerError(format!(
                        "files() listed a path outside the package: {}",
                        path
                    )));
                }
                if fs::symlink_metadata(&root).is_err() {
                    return Err(Error::PackagerError(format!(
                        "files() listed a missing path: {}",
                        path
                    )));
                }
                walk(pkg_dir, &root, true, &backup, &mut seen, &mut contents)?;
            }
        }
    }
    Ok(contents)
}

fn walk(
    pkg_dir: &Path,
    root: &Path,
    keep_dirs: bool,
    backup: &HashSet<&str>,
    seen: &mut HashSet<String>,
    contents: &mut Vec<ContentEntry>,
) -> Result<()> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(if root == pkg_dir { 1 } else { 0 });
    for entry in walker {
        let entry = entry?;
        let path = entry.path();
        let rel = path.strip_prefix(pkg_dir).map_err(|_| {
            Error::PackagerError(format!("{} is outside {}", path.display(), pkg_dir.display()))
        })?;
        let destination = format!("/{}", rel.display());
        if !seen.insert(destination.clone()) {
            continue;
        }

        let meta = fs::symlink_metadata(path)?;
        let file_type = meta.file_type();
        let (kind, source) = if file_type.is_symlink() {
            let target = fs::read_link(path)?;
            let target = match target.strip_prefix(pkg_dir) {
                Ok(inside) => format!("/{}", inside.display()),
                Err(_) => target.display().to_string(),
            };
            (ContentType::Symlink, target)
        } else if file_type.is_dir() {
            let empty = fs::read_dir(path)?.next().is_none();
            if !keep_dirs && !empty {
                continue;
            }
            (ContentType::Dir, path.display().to_string())
        } else if backup.contains(destination.as_str()) {
            (ContentType::ConfigNoReplace, path.display().to_string())
        } else {
            (ContentType::File, path.display().to_string())
        };

        contents.push(ContentEntry {
            source,
            destination,
            kind,
            mode: meta.permissions().mode() & 0o7777,
            mtime: meta.mtime(),
            size: if file_type.is_file() { meta.len() } else { 0 },
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn stage() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let pkg = tmp.path();
        fs::create_dir_all(pkg.join("usr/bin")).unwrap();
        fs::create_dir_all(pkg.join("etc")).unwrap();
        fs::create_dir_all(pkg.join("var/lib/hello")).unwrap();
        fs::write(pkg.join("usr/bin/hello"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(pkg.join("usr/bin/hello"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(pkg.join("etc/hello.conf"), b"x=1\n").unwrap();
        symlink(pkg.join("usr/bin/hello"), pkg.join("usr/bin/hi")).unwrap();
        tmp
    }

    fn destinations(contents: &[ContentEntry]) -> Vec<&str> {
        contents.iter().map(|c| c.destination.as_str()).collect()
    }

    #[test]
    fn test_default_walk() {
        let tmp = stage();
        let contents = build_contents(tmp.path(), &["/etc/hello.conf".to_string()], None).unwrap();
        assert_eq!(
            destinations(&contents),
            vec!["/etc/hello.conf", "/usr/bin/hello", "/usr/bin/hi", "/var/lib/hello"]
        );

        let conf = &contents[0];
        assert_eq!(conf.kind, ContentType::ConfigNoReplace);
        assert_eq!(conf.size, 4);

        let bin = &contents[1];
        assert_eq!(bin.kind, ContentType::File);
        assert_eq!(bin.mode, 0o755);

        let link = &contents[2];
        assert_eq!(link.kind, ContentType::Symlink);
        assert_eq!(link.source, "/usr/bin/hello");

        assert_eq!(contents[3].kind, ContentType::Dir);
    }

    #[test]
    fn test_preferred_paths_list_directories() {
        let tmp = stage();
        let preferred = vec!["usr/bin".to_string(), "/etc/hello.conf".to_string()];
        let contents = build_contents(tmp.path(), &[], Some(&preferred)).unwrap();
        assert_eq!(
            destinations(&contents),
            vec!["/usr/bin", "/usr/bin/hello", "/usr/bin/hi", "/etc/hello.conf"]
        );
        assert_eq!(contents[0].kind, ContentType::Dir);
    }

    #[test]
    fn test_preferred_path_must_exist() {
        let tmp = stage();
        let err = build_contents(tmp.path(), &[], Some(&["usr/lib/nothing".to_string()])).unwrap_err();
        assert!(matches!(err, Error::PackagerError(_)));
        let err = build_contents(tmp.path(), &[], Some(&["../escape".to_string()])).unwrap_err();
        assert!(matches!(err, Error::PackagerError(_)));
    }
}
