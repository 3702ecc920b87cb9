// src/recipe/mod.rs

//! Shell recipes and the restricted first pass
//!
//! A recipe is a bash script (`alr.sh`) that declares build variables and
//! up to five hook functions:
//!
//! ```bash
//! name=hello
//! version=1.0
//! release=1
//! sources=("https://example.com/hello-${version}.tar.gz")
//! checksums=("sha256:...")
//!
//! build() {
//!     make
//! }
//!
//! package() {
//!     make DESTDIR="$pkgdir" install
//! }
//! ```
//!
//! The script is parsed once. [`Recipe::evaluate`] runs it in the
//! in-process sandboxed interpreter to learn what it declares; the hooks
//! themselves run later under a real shell.

pub mod decoder;
pub mod overridable;
pub mod vars;

pub use decoder::Decoder;
pub use overridable::OverridableField;
pub use vars::{is_truthy, BuildVars, BuildVarsPre, Scripts};

use crate::cancel::CancelToken;
use crate::distro::Platform;
use crate::error::{Error, Result};
use crate::shell::{self, ast::List, Sandbox, Shell};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// File name of a recipe inside its directory
pub const RECIPE_FILE: &str = "alr.sh";

/// Hook functions in execution order
pub const HOOKS: [&str; 5] = ["version", "prepare", "build", "package", "files"];

/// Which hooks a recipe defines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSet {
    pub version: bool,
    pub prepare: bool,
    pub build: bool,
    pub package: bool,
    pub files: bool,
}

impl HookSet {
    pub fn has(&self, hook: &str) -> bool {
        match hook {
            "version" => self.version,
            "prepare" => self.prepare,
            "build" => self.build,
            "package" => self.package,
            "files" => self.files,
            _ => false,
        }
    }

    /// Defined hooks, in execution order
    pub fn present(&self) -> Vec<&'static str> {
        HOOKS.into_iter().filter(|h| self.has(h)).collect()
    }
}

/// Result of the restricted pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeInfo {
    pub vars: BuildVars,
    pub hooks: HookSet,
}

/// A parsed recipe
#[derive(Debug, Clone)]
pub struct Recipe {
    path: PathBuf,
    script_dir: PathBuf,
    ast: Arc<List>,
}

impl Recipe {
    /// Read and parse a recipe file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("reading recipe {}: {}", path.display(), e)))?;
        Self::parse(path, &source)
    }

    pub fn parse(path: impl AsRef<Path>, source: &str) -> Result<Self> {
        let path = path.as_ref();
        let ast = shell::parse(source, &path.display().to_string())?;
        let script_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        debug!("Parsed recipe {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            script_dir,
            ast: Arc::new(ast),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the recipe; the only tree pass one may read
    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    pub fn ast(&self) -> &List {
        &self.ast
    }

    /// Base package name: the recipe directory's name
    pub fn base(&self) -> String {
        self.script_dir
            .canonicalize()
            .unwrap_or_else(|_| self.script_dir.clone())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Run the restricted pass and decode the declared variables
    pub fn evaluate(&self, platform: &Platform, cancel: &CancelToken) -> Result<RecipeInfo> {
        let sandbox = Sandbox::new(&self.script_dir).map_err(|e| {
            Error::IoError(format!("recipe directory {}: {}", self.script_dir.display(), e))
        })?;
        let mut shell = Shell::new(sandbox)
            .with_cancel(cancel.clone())
            .with_script_name(self.path.display().to_string());
        for (key, value) in platform.recipe_env() {
            shell.set_env(&key, value);
        }
        shell.set_env("scriptdir", self.script_dir.display().to_string());

        let status = shell.run(&self.ast)?;
        if status != 0 {
            return Err(Error::ExecFailed(format!(
                "recipe {} exited with status {} during evaluation",
                self.path.display(),
                status
            )));
        }

        let vars = Decoder::new(&shell, platform).decode(&self.base())?;
        let hooks = HookSet {
            version: shell.has_function("version"),
            prepare: shell.has_function("prepare"),
            build: shell.has_function("build"),
            package: shell.has_function("package"),
            files: shell.has_function("files"),
        };
        info!(
            "Evaluated recipe {} {}-{} (hooks: {})",
            vars.name,
            vars.version,
            vars.release,
            hooks.present().join(", ")
        );
        Ok(RecipeInfo { vars, hooks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distro::parse_os_release;
    use std::fs;

    fn platform() -> Platform {
        Platform::new(parse_os_release("ID=arch\n"), "amd64")
    }

    fn write_recipe(dir: &Path, body: &str) -> PathBuf {
        let recipe_dir = dir.join("hello");
        fs::create_dir_all(&recipe_dir).unwrap();
        let path = recipe_dir.join(RECIPE_FILE);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_evaluate_recipe() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_recipe(
            tmp.path(),
            "name=hello\nversion=1.0\nrelease=1\ndesc=\"on $DISTRO_ID/$ARCH\"\nbuild() { make; }\npackage() { install -Dm755 hello \"$pkgdir/usr/bin/hello\"; }\n",
        );
        let recipe = Recipe::load(&path).unwrap();
        assert_eq!(recipe.base(), "hello");

        let info = recipe.evaluate(&platform(), &CancelToken::new()).unwrap();
        assert_eq!(info.vars.name, "hello");
        assert_eq!(info.vars.description.resolved(), "on arch/amd64");
        assert_eq!(info.hooks.present(), vec!["build", "package"]);
    }

    #[test]
    fn test_pass_one_has_no_side_effects() {
        let tmp = tempfile::tempdir().unwrap();
        let victim = tmp.path().join("victim");
        fs::write(&victim, "keep").unwrap();
        let marker = tmp.path().join("created");
        let body = format!(
            "name=x\nversion=1\nrelease=1\ntouch {m}\nrm -f {v}\necho gone > {v}\ncurl -o {m} https://example.com\nsh -c 'rm {v}'\n",
            m = marker.display(),
            v = victim.display()
        );
        let path = write_recipe(tmp.path(), &body);
        Recipe::load(&path)
            .unwrap()
            .evaluate(&platform(), &CancelToken::new())
            .unwrap();
        assert!(!marker.exists());
        assert_eq!(fs::read_to_string(&victim).unwrap(), "keep");
    }

    #[test]
    fn test_syntax_error_has_location() {
        let err = Recipe::parse("/r/alr.sh", "name=x\nif true; then\n").unwrap_err();
        assert!(matches!(err, Error::RecipeSyntax { line: 3, .. } | Error::RecipeSyntax { line: 2, .. }));
    }

    #[test]
    fn test_reading_outside_recipe_dir_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_recipe(tmp.path(), "name=x\nversion=1\nrelease=1\nsource ../../etc/os-release\n");
        let err = Recipe::load(&path)
            .unwrap()
            .evaluate(&platform(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::RestrictedViolation(_)));
    }
}
