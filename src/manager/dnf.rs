// src/manager/dnf.rs

//! DNF and its predecessor YUM
//!
//! Both take the same subcommands and flags; only the program differs.

use super::{
    has_program, native_names, rpm_is_installed, rpm_list_installed, CommandBase, Opts,
    PackageManager,
};
use crate::error::Result;
use std::collections::BTreeMap;
use std::process::Command;

#[derive(Debug, Clone)]
pub struct Dnf {
    program: &'static str,
    base: CommandBase,
}

impl Dnf {
    pub fn dnf() -> Self {
        Self {
            program: "dnf",
            base: CommandBase::new(),
        }
    }

    pub fn yum() -> Self {
        Self {
            program: "yum",
            base: CommandBase::new(),
        }
    }

    pub fn with_base(mut self, base: CommandBase) -> Self {
        self.base = base;
        self
    }

    fn dnf_cmd(&self, opts: &Opts, sub: &str, items: Vec<String>) -> Command {
        let mut args = vec![sub.to_string()];
        if opts.no_confirm {
            args.push("-y".to_string());
        }
        args.extend(items);
        self.base.command(opts, self.program, args)
    }
}

impl PackageManager for Dnf {
    fn exists(&self) -> bool {
        has_program(self.program)
    }

    fn name(&self) -> &'static str {
        self.program
    }

    fn format(&self) -> &'static str {
        "rpm"
    }

    fn set_root_cmd(&mut self, cmd: &str) {
        self.base.set_root_cmd(cmd);
    }

    fn sync(&self, opts: &Opts) -> Result<()> {
        self.base.run(self.dnf_cmd(opts, "makecache", Vec::new()))
    }

    fn install(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.dnf_cmd(opts, "install", native_names(self.name(), pkgs)))
    }

    fn install_local(&self, opts: &Opts, paths: &[String]) -> Result<()> {
        self.base.run(self.dnf_cmd(opts, "install", paths.to_vec()))
    }

    fn remove(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.dnf_cmd(opts, "remove", native_names(self.name(), pkgs)))
    }

    fn upgrade(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.dnf_cmd(opts, "upgrade", native_names(self.name(), pkgs)))
    }

    fn upgrade_all(&self, opts: &Opts) -> Result<()> {
        self.base.run(self.dnf_cmd(opts, "upgrade", Vec::new()))
    }

    fn list_installed(&self, _opts: &Opts) -> Result<BTreeMap<String, String>> {
        rpm_list_installed(&self.base)
    }

    fn is_installed(&self, pkg: &str) -> Result<bool> {
        rpm_is_installed(&self.base, pkg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::args_of;

    #[test]
    fn test_yum_shares_flags() {
        let yum = Dnf::yum().with_base(CommandBase::with_root_state("sudo", false));
        let cmd = yum.dnf_cmd(&Opts::root().no_confirm(true), "remove", vec!["gcc".to_string()]);
        assert_eq!(args_of(&cmd), vec!["sudo", "yum", "remove", "-y", "gcc"]);
        assert_eq!(yum.name(), "yum");
        assert_eq!(yum.format(), "rpm");
    }
}
