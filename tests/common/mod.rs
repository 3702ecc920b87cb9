// tests/common/mod.rs

//! Shared test doubles and recipe fixtures for integration tests.

#![allow(dead_code)]

use alr::build::{
    LocalExecutor, Prompter, ScriptExecutor, SecondPassRequest, SecondPassResult,
};
use alr::distro::parse_os_release;
use alr::finder::{FindResult, Package, PackageFinder};
use alr::installer::Installer;
use alr::manager::{Opts, PackageManager};
use alr::recipe::RecipeInfo;
use alr::{Builder, CancelToken, Config, PackageFormatRegistry, Platform, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Package manager that does nothing; installs go through [`MockInstaller`]
pub struct NoopManager;

impl PackageManager for NoopManager {
    fn exists(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "noop"
    }

    fn format(&self) -> &'static str {
        "deb"
    }

    fn set_root_cmd(&mut self, _cmd: &str) {}

    fn sync(&self, _opts: &Opts) -> Result<()> {
        Ok(())
    }

    fn install(&self, _opts: &Opts, _pkgs: &[String]) -> Result<()> {
        Ok(())
    }

    fn install_local(&self, _opts: &Opts, _paths: &[String]) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _opts: &Opts, _pkgs: &[String]) -> Result<()> {
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

    fn is_installed(&self, _pkg: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Installer that tracks an installed set and logs every call
#[derive(Default)]
pub struct MockInstaller {
    pub installed: Mutex<BTreeSet<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockInstaller {
    pub fn with_installed(pkgs: &[&str]) -> Self {
        let installer = Self::default();
        installer
            .installed
            .lock()
            .unwrap()
            .extend(pkgs.iter().map(|p| p.to_string()));
        installer
    }

    pub fn is_installed(&self, pkg: &str) -> bool {
        self.installed.lock().unwrap().contains(pkg)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Installer for MockInstaller {
    fn install(&self, pkgs: &[String], _opts: &Opts) -> Result<()> {
        if pkgs.is_empty() {
            return Ok(());
        }
        self.record(format!("install {}", pkgs.join(" ")));
        self.installed.lock().unwrap().extend(pkgs.iter().cloned());
        Ok(())
    }

    fn install_local(&self, paths: &[String], _opts: &Opts) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = paths
            .iter()
            .map(|p| {
                Path::new(p)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect();
        self.record(format!("install_local {}", names.join(" ")));
        Ok(())
    }

    fn remove(&self, pkgs: &[String], _opts: &Opts) -> Result<()> {
        self.record(format!("remove {}", pkgs.join(" ")));
        let mut installed = self.installed.lock().unwrap();
        for pkg in pkgs {
            installed.remove(pkg);
        }
        Ok(())
    }

    fn remove_already_installed(&self, pkgs: &[String]) -> Result<Vec<String>> {
        let installed = self.installed.lock().unwrap();
        Ok(pkgs
            .iter()
            .filter(|p| !installed.contains(*p))
            .cloned()
            .collect())
    }
}

/// Finder backed by a fixed name-to-recipe map
#[derive(Default)]
pub struct MapFinder {
    pub packages: HashMap<String, Vec<Package>>,
}

impl MapFinder {
    pub fn with(mut self, query: &str, pkg: Package) -> Self {
        self.packages.entry(query.to_string()).or_default().push(pkg);
        self
    }
}

impl PackageFinder for MapFinder {
    fn find_pkgs(&self, cancel: &CancelToken, names: &[String]) -> Result<FindResult> {
        cancel.check()?;
        let mut result = FindResult::default();
        for name in names {
            match self.packages.get(name) {
                Some(pkgs) => {
                    result.found.insert(name.clone(), pkgs.clone());
                }
                None => result.not_found.push(name.clone()),
            }
        }
        Ok(result)
    }
}

/// Prompter with fixed answers
pub struct FixedPrompter {
    pub remove_build_deps: bool,
    pub opt_deps: Vec<String>,
}

impl Prompter for FixedPrompter {
    fn choose_candidate(&self, _query: &str, _candidates: &[Package]) -> Result<usize> {
        Ok(0)
    }

    fn choose_opt_deps(&self, options: &[String]) -> Result<Vec<String>> {
        Ok(options
            .iter()
            .filter(|o| self.opt_deps.contains(*o))
            .cloned()
            .collect())
    }

    fn confirm_remove_build_deps(&self, _pkgs: &[String]) -> Result<bool> {
        Ok(self.remove_build_deps)
    }
}

/// Executor that delegates to [`LocalExecutor`] and keeps every second-pass result
pub struct RecordingExecutor {
    inner: LocalExecutor,
    pub results: Mutex<Vec<SecondPassResult>>,
}

impl RecordingExecutor {
    pub fn new(inner: LocalExecutor) -> Self {
        Self {
            inner,
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn results(&self) -> Vec<SecondPassResult> {
        self.results.lock().unwrap().clone()
    }
}

impl ScriptExecutor for RecordingExecutor {
    fn read_script(&self, script: &Path) -> Result<RecipeInfo> {
        self.inner.read_script(script)
    }

    fn execute_second_pass(&self, req: &SecondPassRequest) -> Result<SecondPassResult> {
        let result = self.inner.execute_second_pass(req)?;
        self.results.lock().unwrap().push(result.clone());
        Ok(result)
    }
}

/// Scratch layout: recipes under `repo/`, artifacts under `pkgs/`
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn pkgs_dir(&self) -> PathBuf {
        self.dir.path().join("pkgs")
    }

    /// Write `repo/<base>/alr.sh` plus extra files next to it
    pub fn recipe(&self, base: &str, body: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.dir.path().join("repo").join(base);
        fs::create_dir_all(&dir).unwrap();
        for (name, content) in files {
            fs::write(dir.join(name), content).unwrap();
        }
        let script = dir.join("alr.sh");
        fs::write(&script, body).unwrap();
        script
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default()
            .with_pkgs_dir(self.pkgs_dir())
            .with_pkg_format("deb");
        config.use_fakeroot = false;
        config.hook_grace_period_secs = 1;
        config
    }

    pub fn platform(&self) -> Platform {
        Platform::new(parse_os_release("ID=debian\nVERSION_ID=\"12\"\n"), "amd64")
    }

    /// A builder wired to the given doubles
    pub fn builder(
        &self,
        installer: Arc<MockInstaller>,
        finder: MapFinder,
        prompter: FixedPrompter,
    ) -> (Builder, Arc<RecordingExecutor>) {
        let cancel = CancelToken::new();
        let registry = Arc::new(PackageFormatRegistry::with_defaults());
        let config = self.config();
        let executor = Arc::new(RecordingExecutor::new(LocalExecutor::new(
            &config,
            self.platform(),
            Arc::clone(&registry),
            cancel.clone(),
        )));
        let builder = Builder::new(
            config,
            self.platform(),
            registry,
            Arc::new(NoopManager),
            cancel,
        )
        .with_installer(installer)
        .with_finder(Arc::new(finder))
        .with_prompter(Arc::new(prompter))
        .with_executor(Arc::clone(&executor) as Arc<dyn ScriptExecutor>);
        (builder, executor)
    }
}

/// Lowercase hex sha256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}

/// Artifacts with extension `ext` directly inside `dir`
pub fn artifacts(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    found.sort();
    found
}
