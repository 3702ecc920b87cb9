// src/manager/zypper.rs

//! Zypper on openSUSE and SLES

use super::{
    has_program, native_names, rpm_is_installed, rpm_list_installed, CommandBase, Opts,
    PackageManager,
};
use crate::error::Result;
use std::collections::BTreeMap;
use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct Zypper {
    base: CommandBase,
}

impl Zypper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: CommandBase) -> Self {
        Self { base }
    }

    fn zypper(&self, opts: &Opts, op: &[&str], items: Vec<String>) -> Command {
        let mut args: Vec<String> = op.iter().map(|s| s.to_string()).collect();
        if opts.no_confirm {
            args.push("-y".to_string());
        }
        args.extend(items);
        self.base.command(opts, "zypper", args)
    }
}

impl PackageManager for Zypper {
    fn exists(&self) -> bool {
        has_program("zypper")
    }

    fn name(&self) -> &'static str {
        "zypper"
    }

    fn format(&self) -> &'static str {
        "rpm"
    }

    fn set_root_cmd(&mut self, cmd: &str) {
        self.base.set_root_cmd(cmd);
    }

    fn sync(&self, opts: &Opts) -> Result<()> {
        self.base.run(self.base.command(opts, "zypper", ["refresh"]))
    }

    fn install(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.zypper(opts, &["install"], native_names(self.name(), pkgs)))
    }

    fn install_local(&self, opts: &Opts, paths: &[String]) -> Result<()> {
        self.base.run(self.zypper(
            opts,
            &["install", "--allow-unsigned-rpm"],
            paths.to_vec(),
        ))
    }

    fn remove(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.zypper(opts, &["remove"], native_names(self.name(), pkgs)))
    }

    fn upgrade(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.zypper(opts, &["update"], native_names(self.name(), pkgs)))
    }

    fn upgrade_all(&self, opts: &Opts) -> Result<()> {
        self.base.run(self.zypper(opts, &["update"], Vec::new()))
    }

    fn list_installed(&self, _opts: &Opts) -> Result<BTreeMap<String, String>> {
        rpm_list_installed(&self.base)
    }

    fn is_installed(&self, pkg: &str) -> Result<bool> {
        rpm_is_installed(&self.base, pkg)
    }
}
