// src/build/mod.rs

//! Recipe-to-package build pipeline
//!
//! One build runs these steps strictly in order:
//! 1. Restricted pass over the recipe (through the [`ScriptExecutor`])
//! 2. Architecture and checksum-count checks
//! 3. Cache probe for an already built artifact
//! 4. Dependency installation, recursing into recipe-backed dependencies
//! 5. Fresh staging directories and source downloads
//! 6. Unrestricted pass: hooks, contents, auto-deps, metadata, packaging
//! 7. Optional removal of the build dependencies installed in step 4

pub mod autodeps;
pub mod cache;
pub mod contents;
pub mod deps;
pub mod dirs;
pub mod executor;
pub mod hooks;
pub mod metadata;
pub mod sources;

pub use deps::{remove_duplicates, BuildStack, NonInteractive, Prompter};
pub use dirs::Directories;
pub use executor::{LocalExecutor, ScriptExecutor, SecondPassRequest, SecondPassResult};
pub use sources::{remove_duplicate_sources, ProgressSink};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::distro::Platform;
use crate::error::{Error, Result};
use crate::finder::{NullFinder, Package, PackageFinder};
use crate::installer::{Installer, LocalInstaller};
use crate::manager::{Opts, PackageManager};
use crate::packages::PackageFormatRegistry;
use crate::recipe::BuildVars;
use crate::version::dependency;
use deps::merge_depends;
use sources::Downloader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-invocation build options
///
/// Recursive dependency builds reuse these with their own script and
/// repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Path of the recipe's `alr.sh`
    pub script: PathBuf,
    /// Repository the recipe comes from; part of the package name
    pub repository: String,
    /// Ignore a previously built artifact
    pub clean: bool,
    /// Let package managers prompt
    pub interactive: bool,
}

impl BuildOptions {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            repository: "local".to_string(),
            clean: false,
            interactive: false,
        }
    }

    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = repository.into();
        self
    }

    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    fn for_dependency(&self, pkg: &Package) -> Self {
        Self {
            script: pkg.recipe_path.clone(),
            repository: pkg.repository.clone(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    /// Artifact path
    pub path: PathBuf,
    /// Installed package name (`<name>+alr-<repo>`)
    pub name: String,
    /// Served from the cache without running hooks
    pub cached: bool,
    /// Artifacts of recipe dependencies built along the way
    pub built_deps: Vec<PathBuf>,
}

/// Outcome of dependency orchestration
#[derive(Debug, Default)]
struct DepPlan {
    /// Runtime dependencies to embed
    depends: Vec<String>,
    /// Build dependencies installed for this build, by installed name
    installed_build_deps: Vec<String>,
    built: Vec<PathBuf>,
}

pub struct Builder {
    config: Config,
    platform: Platform,
    registry: Arc<PackageFormatRegistry>,
    manager: Arc<dyn PackageManager>,
    installer: Arc<dyn Installer>,
    finder: Arc<dyn PackageFinder>,
    prompter: Arc<dyn Prompter>,
    executor: Arc<dyn ScriptExecutor>,
    cancel: CancelToken,
    progress: Option<ProgressSink>,
    stack: BuildStack,
}

impl Builder {
    /// A builder that installs through `manager` and runs recipes in-process
    pub fn new(
        config: Config,
        platform: Platform,
        registry: Arc<PackageFormatRegistry>,
        manager: Arc<dyn PackageManager>,
        cancel: CancelToken,
    ) -> Self {
        let executor = LocalExecutor::new(
            &config,
            platform.clone(),
            Arc::clone(&registry),
            cancel.clone(),
        );
        let prompter = NonInteractive {
            remove_build_deps: config.auto_remove_build_deps,
        };
        Self {
            installer: Arc::new(LocalInstaller::new(Arc::clone(&manager))),
            finder: Arc::new(NullFinder),
            prompter: Arc::new(prompter),
            executor: Arc::new(executor),
            config,
            platform,
            registry,
            manager,
            cancel,
            progress: None,
            stack: BuildStack::new(),
        }
    }

    pub fn with_installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = installer;
        self
    }

    pub fn with_finder(mut self, finder: Arc<dyn PackageFinder>) -> Self {
        self.finder = finder;
        self
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn ScriptExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Output format: the configured one, else the package manager's
    pub fn format(&self) -> String {
        self.config
            .pkg_format
            .clone()
            .unwrap_or_else(|| self.manager.format().to_string())
    }

    /// Build the package described by `opts.script`
    pub fn build(&self, opts: &BuildOptions) -> Result<BuildResult> {
        self.cancel.check()?;
        let script = std::fs::canonicalize(&opts.script).map_err(|e| {
            Error::IoError(format!("recipe {}: {}", opts.script.display(), e))
        })?;
        let script_dir = script.parent().unwrap_or(Path::new("/")).to_path_buf();

        let recipe = self.executor.read_script(&script)?;
        let vars = &recipe.vars;
        let _guard = self.stack.enter(&vars.base)?;
        info!(
            "Building {} {}-{} from {}",
            vars.name,
            vars.version,
            vars.release,
            opts.repository
        );

        if !self.platform.supports(&vars.architectures) {
            return Err(Error::UnsupportedArchitecture {
                host: self.platform.arch.clone(),
                supported: vars.architectures.clone(),
            });
        }
        let source_list = vars.sources.resolved();
        let checksum_list = vars.checksums.resolved();
        sources::check_lengths(&source_list, &checksum_list)?;

        let format = self.format();
        let packager = self.registry.get(&format)?;
        let dirs = Directories::new(&self.config.pkgs_dir, &vars.base, &script_dir);

        if opts.clean {
            debug!("Clean build requested, skipping cache");
        } else if recipe.hooks.version {
            debug!("{} computes its version at build time, skipping cache", vars.name);
        } else {
            let identity = metadata::base_info(vars, &self.platform, &opts.repository);
            if let Some(path) =
                cache::check_for_built_package(packager.as_ref(), &identity, &dirs.base_dir)
            {
                info!("Using previously built {}", path.display());
                return Ok(BuildResult {
                    path,
                    name: identity.name,
                    cached: true,
                    built_deps: Vec::new(),
                });
            }
        }

        let plan = self.install_deps(vars, opts)?;

        self.cancel.check()?;
        dirs.prepare()?;
        let mut downloader =
            Downloader::new(self.config.download_concurrency, self.cancel.clone())?;
        if let Some(sink) = &self.progress {
            downloader = downloader.with_progress(Arc::clone(sink));
        }
        downloader.download(&dirs, &source_list, &checksum_list)?;

        let result = self.executor.execute_second_pass(&SecondPassRequest {
            script,
            info: recipe.clone(),
            dirs,
            repository: opts.repository.clone(),
            format,
            depends: plan.depends,
        })?;
        info!("Built {}", result.path.display());

        self.offer_build_dep_removal(&plan.installed_build_deps, opts)?;
        Ok(BuildResult {
            path: result.path,
            name: result.package.name,
            cached: false,
            built_deps: plan.built,
        })
    }

    fn manager_opts(&self, opts: &BuildOptions) -> Opts {
        Opts::root().no_confirm(!opts.interactive)
    }

    fn install_deps(&self, vars: &BuildVars, opts: &BuildOptions) -> Result<DepPlan> {
        let mgr_opts = self.manager_opts(opts);
        let mut plan = DepPlan::default();

        let build_deps = self
            .installer
            .remove_already_installed(&merge_depends(&vars.build_depends.resolved()))?;
        if !build_deps.is_empty() {
            info!("Installing build dependencies: {}", build_deps.join(", "));
            let (recipes, system) = self.resolve(&build_deps, opts)?;
            self.installer.install(&system, &mgr_opts)?;
            self.install_built(&recipes, &mgr_opts)?;
            plan.installed_build_deps = dependency::names(&system);
            plan.installed_build_deps
                .extend(recipes.iter().map(|(_, r)| r.name.clone()));
            plan.built.extend(recipes.iter().map(|(_, r)| r.path.clone()));
        }

        let optional = self
            .installer
            .remove_already_installed(&vars.opt_depends.resolved())?;
        let selected = if optional.is_empty() {
            Vec::new()
        } else {
            self.prompter.choose_opt_deps(&optional)?
        };

        let mut depends = vars.depends.resolved();
        depends.extend(selected);
        let depends = merge_depends(&depends);
        let missing = self.installer.remove_already_installed(&depends)?;
        let mut embedded = depends;
        if !missing.is_empty() {
            let (recipes, system) = self.resolve(&missing, opts)?;
            for dep in &system {
                info!("{} has no recipe, leaving it to the system package manager", dep);
            }
            self.install_built(&recipes, &mgr_opts)?;
            embedded.extend(recipes.iter().map(|(pkg, _)| pkg.name.clone()));
            plan.built.extend(recipes.iter().map(|(_, r)| r.path.clone()));
        }
        plan.depends = merge_depends(&embedded);
        plan.built = remove_duplicates(&plan.built);
        Ok(plan)
    }

    /// Split `deps` into recipe builds and names left to the system
    ///
    /// Recipe-backed entries are built right away, depth first.
    fn resolve(
        &self,
        deps: &[String],
        opts: &BuildOptions,
    ) -> Result<(Vec<(Package, BuildResult)>, Vec<String>)> {
        let queries = dependency::names(deps);
        let found = self.finder.find_pkgs(&self.cancel, &queries)?;
        let mut recipes = Vec::new();
        let mut system = Vec::new();

        for (dep, query) in deps.iter().zip(&queries) {
            let candidates = found.candidates(query);
            if candidates.is_empty() {
                system.push(dep.clone());
                continue;
            }
            let index = if candidates.len() == 1 {
                0
            } else {
                self.prompter.choose_candidate(query, candidates)?
            };
            let pkg = candidates.get(index).cloned().ok_or_else(|| {
                Error::NotFound(format!("candidate {} for {}", index, query))
            })?;
            info!("Building dependency {} from repository {}", pkg.name, pkg.repository);
            let result = self.build(&opts.for_dependency(&pkg))?;
            recipes.push((pkg, result));
        }
        Ok((recipes, system))
    }

    fn install_built(&self, recipes: &[(Package, BuildResult)], mgr_opts: &Opts) -> Result<()> {
        let paths: Vec<String> = remove_duplicates(
            &recipes
                .iter()
                .map(|(_, r)| r.path.display().to_string())
                .collect::<Vec<_>>(),
        );
        self.installer.install_local(&paths, mgr_opts)
    }

    fn offer_build_dep_removal(&self, pkgs: &[String], opts: &BuildOptions) -> Result<()> {
        if pkgs.is_empty() {
            return Ok(());
        }
        if self.prompter.confirm_remove_build_deps(pkgs)? {
            info!("Removing build dependencies: {}", pkgs.join(", "));
            self.installer.remove(pkgs, &self.manager_opts(opts))?;
        } else {
            debug!("Keeping build dependencies {}", pkgs.join(", "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_options_keep_flags() {
        let opts = BuildOptions::new("/r/app/alr.sh").clean(true).interactive(true);
        let pkg = Package {
            name: "libfoo".into(),
            base: "libfoo".into(),
            repository: "extra".into(),
            version: "1.0".into(),
            recipe_path: PathBuf::from("/repo/extra/libfoo/alr.sh"),
        };
        let dep = opts.for_dependency(&pkg);
        assert_eq!(dep.script, pkg.recipe_path);
        assert_eq!(dep.repository, "extra");
        assert!(dep.clean && dep.interactive);
        assert_eq!(BuildOptions::new("x").repository, "local");
    }
}
