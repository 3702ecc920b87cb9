// src/installer.rs

//! Installing packages on behalf of a build
//!
//! The orchestrator never calls a [`PackageManager`] directly for mutations;
//! it goes through an [`Installer`] so the work can be moved into an
//! isolated worker process.

use crate::error::Result;
use crate::manager::{Opts, PackageManager};
use std::sync::Arc;
use tracing::{debug, info};

pub trait Installer: Send + Sync {
    /// Install packages from the system repositories
    fn install(&self, pkgs: &[String], opts: &Opts) -> Result<()>;

    /// Install built package files
    fn install_local(&self, paths: &[String], opts: &Opts) -> Result<()>;

    fn remove(&self, pkgs: &[String], opts: &Opts) -> Result<()>;

    /// Drop the entries of `pkgs` that are already installed
    fn remove_already_installed(&self, pkgs: &[String]) -> Result<Vec<String>>;
}

/// Installer backed by the host package manager in this process
#[derive(Clone)]
pub struct LocalInstaller {
    manager: Arc<dyn PackageManager>,
}

impl LocalInstaller {
    pub fn new(manager: Arc<dyn PackageManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<dyn PackageManager> {
        &self.manager
    }
}

impl std::fmt::Debug for LocalInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalInstaller")
            .field("manager", &self.manager.name())
            .finish()
    }
}

impl Installer for LocalInstaller {
    fn install(&self, pkgs: &[String], opts: &Opts) -> Result<()> {
        if pkgs.is_empty() {
            return Ok(());
        }
        info!("Installing {} with {}", pkgs.join(", "), self.manager.name());
        self.manager.install(opts, pkgs)
    }

    fn install_local(&self, paths: &[String], opts: &Opts) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        info!("Installing local packages {}", paths.join(", "));
        self.manager.install_local(opts, paths)
    }

    fn remove(&self, pkgs: &[String], opts: &Opts) -> Result<()> {
        if pkgs.is_empty() {
            return Ok(());
        }
        info!("Removing {}", pkgs.join(", "));
        self.manager.remove(opts, pkgs)
    }

    fn remove_already_installed(&self, pkgs: &[String]) -> Result<Vec<String>> {
        let mut missing = Vec::with_capacity(pkgs.len());
        for pkg in pkgs {
            if self.manager.is_installed(pkg)? {
                debug!("{} is already installed", pkg);
            } else {
                missing.push(pkg.clone());
            }
        }
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        installed: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl PackageManager for Recording {
        fn exists(&self) -> bool {
            true
        }
        fn name(&self) -> &'static str {
            "recording"
        }
        fn format(&self) -> &'static str {
            "deb"
        }
        fn set_root_cmd(&mut self, _cmd: &str) {}
        fn sync(&self, _opts: &Opts) -> Result<()> {
            Ok(())
        }
        fn install(&self, _opts: &Opts, pkgs: &[String]) -> Result<()> {
            self.calls.lock().unwrap().push(format!("install {}", pkgs.join(" ")));
            Ok(())
        }
        fn install_local(&self, _opts: &Opts, paths: &[String]) -> Result<()> {
            self.calls.lock().unwrap().push(format!("local {}", paths.join(" ")));
            Ok(())
        }
        fn remove(&self, _opts: &Opts, pkgs: &[String]) -> Result<()> {
            self.calls.lock().unwrap().push(format!("remove {}", pkgs.join(" ")));
            Ok(())
        }
        fn upgrade(&self, _opts: &Opts, _pkgs: &[String]) -> Result<()> {
            Ok(())
        }
        fn upgrade_all(&self, _opts: &Opts) -> Result<()> {
            Ok(())
        }
        fn list_installed(&self, _opts: &Opts) -> Result<BTreeMap<String, String>> {
            Ok(BTreeMap::new())
        }
        fn is_installed(&self, pkg: &str) -> Result<bool> {
            Ok(self.installed.contains(&pkg))
        }
    }

    #[test]
    fn test_remove_already_installed_keeps_order() {
        let manager = Arc::new(Recording {
            installed: vec!["make"],
            ..Default::default()
        });
        let installer = LocalInstaller::new(manager);
        let pkgs = vec!["gcc".to_string(), "make".to_string(), "cmake".to_string()];
        assert_eq!(
            installer.remove_already_installed(&pkgs).unwrap(),
            vec!["gcc".to_string(), "cmake".to_string()]
        );
    }

    #[test]
    fn test_empty_lists_skip_manager() {
        let manager = Arc::new(Recording::default());
        let installer = LocalInstaller::new(manager.clone());
        installer.install(&[], &Opts::root()).unwrap();
        installer.remove(&[], &Opts::root()).unwrap();
        installer
            .install_local(&["/tmp/a.deb".to_string()], &Opts::root())
            .unwrap();
        assert_eq!(*manager.calls.lock().unwrap(), vec!["local /tmp/a.deb".to_string()]);
    }
}
