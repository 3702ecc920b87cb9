// src/build/executor.rs

//! Running a recipe's two passes
//!
//! [`ScriptExecutor`] is the seam between the orchestrator and the code
//! that touches the recipe: either [`LocalExecutor`] in this process or a
//! worker process speaking the same interface.

use super::autodeps::Scanners;
use super::contents::build_contents;
use super::dirs::Directories;
use super::hooks::HookRunner;
use super::metadata::{assemble, Extra};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::distro::Platform;
use crate::error::Result;
use crate::packages::{write_package, PackageFormatRegistry, PackageInfo};
use crate::recipe::{HookSet, Recipe, RecipeInfo};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything pass two needs, resolved by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondPassRequest {
    pub script: PathBuf,
    pub info: RecipeInfo,
    pub dirs: Directories,
    pub repository: String,
    /// Output format name
    pub format: String,
    /// Runtime dependencies to embed
    pub depends: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondPassResult {
    /// Written artifact
    pub path: PathBuf,
    pub package: PackageInfo,
}

pub trait ScriptExecutor: Send + Sync {
    /// Restricted pass: decode the recipe's variables
    fn read_script(&self, script: &Path) -> Result<RecipeInfo>;

    /// Unrestricted pass: run hooks, collect contents and write the package
    fn execute_second_pass(&self, req: &SecondPassRequest) -> Result<SecondPassResult>;
}

/// Runs both passes in this process
pub struct LocalExecutor {
    platform: Platform,
    registry: Arc<PackageFormatRegistry>,
    cancel: CancelToken,
    use_fakeroot: bool,
    grace: Duration,
    scanners: Scanners,
}

impl LocalExecutor {
    pub fn new(
        config: &Config,
        platform: Platform,
        registry: Arc<PackageFormatRegistry>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            platform,
            registry,
            cancel,
            use_fakeroot: config.use_fakeroot,
            grace: config.hook_grace_period(),
            scanners: Scanners {
                find_provides: config.find_provides.clone(),
                find_requires: config.find_requires.clone(),
            },
        }
    }
}

impl ScriptExecutor for LocalExecutor {
    fn read_script(&self, script: &Path) -> Result<RecipeInfo> {
        Recipe::load(script)?.evaluate(&self.platform, &self.cancel)
    }

    fn execute_second_pass(&self, req: &SecondPassRequest) -> Result<SecondPassResult> {
        let packager = self.registry.get(&req.format)?;
        let hooks: HookSet = req.info.hooks;
        let outcome = HookRunner::new(self.platform.clone(), self.cancel.clone())
            .with_fakeroot(self.use_fakeroot)
            .with_grace_period(self.grace)
            .run_all(&req.script, &req.dirs, hooks)?;

        let mut vars = req.info.vars.clone();
        if let Some(version) = outcome.version {
            vars.version = version;
        }

        self.cancel.check()?;
        let contents = build_contents(
            &req.dirs.pkg_dir,
            &vars.backup.resolved(),
            outcome.files.as_deref(),
        )?;
        let auto = self
            .scanners
            .scan(packager.format(), &vars, &req.dirs.pkg_dir, &contents)?;

        let package = assemble(
            &vars,
            &self.platform,
            &req.repository,
            packager.format(),
            &req.dirs.script_dir,
            contents,
            &Extra {
                depends: Some(req.depends.clone()),
                auto_provides: auto.provides,
                auto_requires: auto.requires,
            },
        );

        self.cancel.check()?;
        info!(
            "Packaging {} {} as {}",
            package.name,
            package.full_version(),
            packager.format()
        );
        let path = write_package(packager.as_ref(), &package, &req.dirs.base_dir)?;
        Ok(SecondPassResult { path, package })
    }
}
