// src/lib.rs

//! ALR build engine
//!
//! Turns a shell recipe (`alr.sh`) into a native APK, DEB, RPM or Arch
//! package for the host distribution.
//!
//! # Architecture
//!
//! - Two passes over each recipe: a sandboxed in-process interpreter decodes
//!   the build variables, then `bash` runs the hooks with full privileges
//! - Recipe-backed dependencies are built recursively before their dependents
//! - Package managers, installers, finders and script executors sit behind
//!   traits so they can run in isolated worker processes or be mocked
//! - Artifacts are written as `<file>.part` and renamed into place

pub mod build;
pub mod cancel;
pub mod config;
pub mod distro;
mod error;
pub mod finder;
pub mod installer;
pub mod manager;
pub mod packages;
pub mod recipe;
pub mod shell;
pub mod version;
pub mod worker;

pub use build::{BuildOptions, BuildResult, Builder};
pub use cancel::CancelToken;
pub use config::Config;
pub use distro::Platform;
pub use error::{Error, ErrorKind, Result};
pub use packages::{PackageFormatRegistry, PackageInfo, Packager};
pub use recipe::{Recipe, RecipeInfo};
