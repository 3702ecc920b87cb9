// src/manager/apk.rs

//! Alpine's apk-tools
//!
//! apk never prompts unless asked to; interactive calls add `-i`.

use super::{has_program, native_names, CommandBase, Opts, PackageManager};
use crate::error::Result;
use crate::version::Dependency;
use std::collections::BTreeMap;
use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct Apk {
    base: CommandBase,
}

impl Apk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: CommandBase) -> Self {
        Self { base }
    }

    fn apk(&self, opts: &Opts, op: &[&str], items: Vec<String>) -> Command {
        let mut args: Vec<String> = op.iter().map(|s| s.to_string()).collect();
        if !opts.no_confirm {
            args.push("-i".to_string());
        }
        args.extend(items);
        self.base.command(opts, "apk", args)
    }
}

/// Split `name-version-rN` as printed by `apk info -v`
pub fn split_versioned(entry: &str) -> Option<(String, String)> {
    let mut parts = entry.rsplitn(3, '-');
    let release = parts.next()?;
    let version = parts.next()?;
    let name = parts.next()?;
    if !release.starts_with('r') || name.is_empty() {
        return None;
    }
    Some((name.to_string(), format!("{}-{}", version, release)))
}

impl PackageManager for Apk {
    fn exists(&self) -> bool {
        has_program("apk")
    }

    fn name(&self) -> &'static str {
        "apk"
    }

    fn format(&self) -> &'static str {
        "apk"
    }

    fn set_root_cmd(&mut self, cmd: &str) {
        self.base.set_root_cmd(cmd);
    }

    fn sync(&self, opts: &Opts) -> Result<()> {
        self.base
            .run(self.base.command(opts, "apk", ["update"]))
    }

    fn install(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.apk(opts, &["add"], native_names(self.name(), pkgs)))
    }

    fn install_local(&self, opts: &Opts, paths: &[String]) -> Result<()> {
        self.base
            .run(self.apk(opts, &["add", "--allow-untrusted"], paths.to_vec()))
    }

    fn remove(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.apk(opts, &["del"], native_names(self.name(), pkgs)))
    }

    fn upgrade(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.apk(opts, &["add", "-u"], native_names(self.name(), pkgs)))
    }

    fn upgrade_all(&self, opts: &Opts) -> Result<()> {
        self.base.run(self.apk(opts, &["upgrade"], Vec::new()))
    }

    fn list_installed(&self, _opts: &Opts) -> Result<BTreeMap<String, String>> {
        let output = self
            .base
            .output(self.base.command(&Opts::default(), "apk", ["info", "-v"]))?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|l| split_versioned(l.trim()))
            .collect())
    }

    fn is_installed(&self, pkg: &str) -> Result<bool> {
        let name = Dependency::parse(pkg).map(|d| d.name).unwrap_or_else(|_| pkg.to_string());
        self.base
            .probe(self.base.command(&Opts::default(), "apk", ["info", "-e", name.as_str()]))
    }
}
