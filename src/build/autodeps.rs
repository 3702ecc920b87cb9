// src/build/autodeps.rs

//! Automatic provides and requires via the distro's RPM scanners
//!
//! `find-provides` and `find-requires` read newline-separated absolute file
//! paths on stdin and print one capability per line.

use crate::error::{Error, Result};
use crate::packages::ContentEntry;
use crate::recipe::{is_truthy, BuildVars};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Capabilities found by the scanners
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoDeps {
    pub provides: Vec<String>,
    pub requires: Vec<String>,
}

/// Scanner locations
#[derive(Debug, Clone)]
pub struct Scanners {
    pub find_provides: PathBuf,
    pub find_requires: PathBuf,
}

impl Scanners {
    /// Scan the staged files when the recipe asks for it
    ///
    /// Only RPM has scanners; other formats log and return nothing.
    pub fn scan(
        &self,
        format: &str,
        vars: &BuildVars,
        pkg_dir: &Path,
        contents: &[ContentEntry],
    ) -> Result<AutoDeps> {
        let want_prov = is_truthy(&vars.auto_prov.resolved());
        let want_req = is_truthy(&vars.auto_req.resolved());
        if !want_prov && !want_req {
            return Ok(AutoDeps::default());
        }
        if format != "rpm" {
            info!("Automatic dependency detection for {} is not implemented, skipped", format);
            return Ok(AutoDeps::default());
        }

        let input = scanner_input(pkg_dir, contents);
        let mut deps = AutoDeps::default();
        if want_prov {
            deps.provides = run_scanner(
                &self.find_provides,
                pkg_dir,
                &input,
                ("RPM_FINDPROV_SKIPLIST", &vars.auto_prov_skiplist.resolved()),
            )?;
            debug!("Auto provides: {}", deps.provides.join(", "));
        }
        if want_req {
            deps.requires = run_scanner(
                &self.find_requires,
                pkg_dir,
                &input,
                ("RPM_FINDREQ_SKIPLIST", &vars.auto_req_skiplist.resolved()),
            )?;
            debug!("Auto requires: {}", deps.requires.join(", "));
        }
        Ok(deps)
    }
}

/// Absolute staged paths of every non-directory entry, one per line
fn scanner_input(pkg_dir: &Path, contents: &[ContentEntry]) -> String {
    contents
        .iter()
        .filter(|c| c.kind != crate::packages::ContentType::Dir)
        .map(|c| format!("{}\n", pkg_dir.join(c.relative_path()).display()))
        .collect()
}

fn run_scanner(
    scanner: &Path,
    pkg_dir: &Path,
    input: &str,
    skiplist: (&str, &[String]),
) -> Result<Vec<String>> {
    let mut child = Command::new(scanner)
        .env("RPM_BUILD_ROOT", pkg_dir)
        .env(skiplist.0, skiplist.1.join(" "))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::ExecFailed(format!("failed to run {}: {}", scanner.display(), e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(Error::ExecFailed(format!(
            "{} failed with {}: {}",
            scanner.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::ContentType;
    use crate::recipe::OverridableField;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn entry(dest: &str, kind: ContentType) -> ContentEntry {
        ContentEntry {
            source: String::new(),
            destination: dest.into(),
            kind,
            mode: 0o644,
            mtime: 0,
            size: 0,
        }
    }

    fn fake_scanner(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_rpm_scanners_receive_files() {
        let tmp = tempfile::tempdir().unwrap();
        let scanners = Scanners {
            find_provides: fake_scanner(
                tmp.path(),
                "prov",
                "#!/bin/sh\nwhile read f; do echo \"prov($(basename \"$f\"))\"; done\necho \"skip=$RPM_FINDPROV_SKIPLIST\"\n",
            ),
            find_requires: fake_scanner(tmp.path(), "req", "#!/bin/sh\ncat >/dev/null\necho 'libc.so.6()(64bit)'\n"),
        };
        let mut vars = BuildVars::default();
        vars.auto_prov = OverridableField::new(vec!["yes".to_string()]);
        vars.auto_req = OverridableField::new(vec!["1".to_string()]);
        vars.auto_prov_skiplist = OverridableField::new(vec!["/usr/lib/debug/*".to_string()]);
        let pre = &mut vars.pre;
        for field in [&mut pre.auto_prov, &mut pre.auto_req, &mut pre.auto_prov_skiplist] {
            field.resolve(&[String::new()]);
        }

        let contents = vec![
            entry("/usr/bin/hello", ContentType::File),
            entry("/usr/share/empty", ContentType::Dir),
        ];
        let deps = scanners.scan("rpm", &vars, tmp.path(), &contents).unwrap();
        assert_eq!(deps.provides, vec!["prov(hello)", "skip=/usr/lib/debug/*"]);
        assert_eq!(deps.requires, vec!["libc.so.6()(64bit)"]);
    }

    #[test]
    fn test_other_formats_skip() {
        let scanners = Scanners {
            find_provides: PathBuf::from("/nonexistent"),
            find_requires: PathBuf::from("/nonexistent"),
        };
        let mut vars = BuildVars::default();
        vars.auto_req = OverridableField::new(vec!["true".to_string()]);
        vars.auto_req.resolve(&[String::new()]);
        let deps = scanners.scan("deb", &vars, Path::new("/"), &[]).unwrap();
        assert_eq!(deps, AutoDeps::default());
    }
}
