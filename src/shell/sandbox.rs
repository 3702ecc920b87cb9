// src/shell/sandbox.rs

//! Filesystem confinement for the restricted pass
//!
//! Every read, stat and directory listing made by the interpreter goes
//! through [`Sandbox`], which only resolves paths inside the recipe
//! directory. Paths escaping it lexically (`..`, absolute paths) or through
//! symlinks fail with `PermissionDenied`.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

fn denied(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("{}: access outside the recipe directory", path.display()),
    )
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl Sandbox {
    pub fn new(root: &Path) -> io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Lexically normalized absolute form of `path`, checked against the root
    fn lexical(&self, cwd: &Path, path: &str) -> io::Result<PathBuf> {
        let joined = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            cwd.join(path)
        };
        let normalized = normalize(&joined);
        if !self.contains(&normalized) {
            return Err(denied(&normalized));
        }
        Ok(normalized)
    }

    /// Resolve `path` to a real path inside the root, following symlinks
    pub fn resolve(&self, cwd: &Path, path: &str) -> io::Result<PathBuf> {
        let normalized = self.lexical(cwd, path)?;
        let real = match normalized.canonicalize() {
            Ok(real) => real,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // The leaf may not exist; its parent must still be inside
                if let Some(parent) = normalized.parent() {
                    if let Ok(real_parent) = parent.canonicalize() {
                        if !self.contains(&real_parent) {
                            return Err(denied(&normalized));
                        }
                    }
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        if !self.contains(&real) {
            return Err(denied(&normalized));
        }
        Ok(real)
    }

    pub fn read(&self, cwd: &Path, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(cwd, path)?)
    }

    pub fn metadata(&self, cwd: &Path, path: &str) -> io::Result<fs::Metadata> {
        fs::metadata(self.resolve(cwd, path)?)
    }

    /// Stat without following a final symlink
    pub fn symlink_metadata(&self, cwd: &Path, path: &str) -> io::Result<fs::Metadata> {
        let normalized = self.lexical(cwd, path)?;
        if let Some(parent) = normalized.parent() {
            let real_parent = parent.canonicalize()?;
            if !self.contains(&real_parent) {
                return Err(denied(&normalized));
            }
        }
        fs::symlink_metadata(normalized)
    }

    /// Sorted entry names of a directory
    pub fn read_dir(&self, cwd: &Path, path: &str) -> io::Result<Vec<String>> {
        let dir = self.resolve(cwd, path)?;
        let mut names: Vec<String> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Expand a pathname pattern against the confined tree
    ///
    /// `pattern` uses glob syntax with quoted characters already escaped.
    /// Results keep the pattern's relative or absolute form.
    pub fn glob(&self, cwd: &Path, pattern: &str) -> Vec<String> {
        let absolute = pattern.starts_with('/');
        let mut candidates: Vec<String> = vec![if absolute { "/".into() } else { String::new() }];

        let components: Vec<&str> = pattern.split('/').filter(|c| !c.is_empty()).collect();
        for (i, component) in components.iter().enumerate() {
            let last = i + 1 == components.len();
            let mut next = Vec::new();
            let is_pattern = component.contains(['*', '?', '[']);

            for prefix in &candidates {
                if !is_pattern {
                    let path = format!("{}{}", prefix, component);
                    if last || self.metadata(cwd, &path).is_ok_and(|m| m.is_dir()) {
                        next.push(if last { path } else { format!("{}/", path) });
                    }
                    continue;
                }

                let dir = if prefix.is_empty() { "." } else { prefix.as_str() };
                let Ok(names) = self.read_dir(cwd, dir) else {
                    continue;
                };
                let Some(matcher) = super::pattern::compile(component) else {
                    continue;
                };
                for name in names {
                    if name.starts_with('.') && !component.starts_with('.') {
                        continue;
                    }
                    if !matcher.matches_with(&name, super::pattern::MATCH_OPTIONS) {
                        continue;
                    }
                    let path = format!("{}{}", prefix, name);
                    if last {
                        next.push(path);
                    } else if self.metadata(cwd, &path).is_ok_and(|m| m.is_dir()) {
                        next.push(format!("{}/", path));
                    }
                }
            }
            candidates = next;
        }

        // Literal final components must exist to count as a match
        let mut out: Vec<String> = candidates
            .into_iter()
            .filter(|p| self.symlink_metadata(cwd, p).is_ok())
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Sandbox) {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.patch"), "a").unwrap();
        fs::write(tmp.path().join("b.patch"), "b").unwrap();
        fs::write(tmp.path().join(".hidden.patch"), "h").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/c.txt"), "c").unwrap();
        let sandbox = Sandbox::new(tmp.path()).unwrap();
        (tmp, sandbox)
    }

    #[test]
    fn test_read_inside_root() {
        let (_tmp, sb) = setup();
        let root = sb.root().to_path_buf();
        assert_eq!(sb.read(&root, "sub/c.txt").unwrap(), b"c");
        assert_eq!(sb.read(&root, "sub/../a.patch").unwrap(), b"a");
    }

    #[test]
    fn test_escape_denied() {
        let (_tmp, sb) = setup();
        let root = sb.root().to_path_buf();
        let err = sb.read(&root, "../outside").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        let err = sb.metadata(&root, "/etc/passwd").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_denied() {
        let (tmp, sb) = setup();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), tmp.path().join("link")).unwrap();
        let root = sb.root().to_path_buf();
        let err = sb.read(&root, "link").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_glob() {
        let (_tmp, sb) = setup();
        let root = sb.root().to_path_buf();
        assert_eq!(sb.glob(&root, "*.patch"), vec!["a.patch", "b.patch"]);
        assert_eq!(sb.glob(&root, "sub/*.txt"), vec!["sub/c.txt"]);
        assert!(sb.glob(&root, "*.none").is_empty());
        assert!(sb.glob(&root, "/etc/*").is_empty());
    }
}
