// src/manager/apt_rpm.rs

//! APT-RPM, the apt-get front end over rpm used by ALT Linux

use super::{
    has_program, native_names, rpm_is_installed, rpm_list_installed, CommandBase, Opts,
    PackageManager,
};
use crate::error::Result;
use std::collections::BTreeMap;
use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct AptRpm {
    base: CommandBase,
}

impl AptRpm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: CommandBase) -> Self {
        Self { base }
    }

    fn apt_get(&self, opts: &Opts, sub: &str, items: Vec<String>) -> Command {
        let mut args = vec![sub.to_string()];
        if opts.no_confirm {
            args.push("-y".to_string());
        }
        args.extend(items);
        self.base.command(opts, "apt-get", args)
    }
}

impl PackageManager for AptRpm {
    fn exists(&self) -> bool {
        has_program("apt-get") && has_program("rpm")
    }

    fn name(&self) -> &'static str {
        "apt-rpm"
    }

    fn format(&self) -> &'static str {
        "rpm"
    }

    fn set_root_cmd(&mut self, cmd: &str) {
        self.base.set_root_cmd(cmd);
    }

    fn sync(&self, opts: &Opts) -> Result<()> {
        self.base.run(self.apt_get(opts, "update", Vec::new()))
    }

    fn install(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.apt_get(opts, "install", native_names(self.name(), pkgs)))
    }

    fn install_local(&self, opts: &Opts, paths: &[String]) -> Result<()> {
        self.base.run(self.apt_get(opts, "install", paths.to_vec()))
    }

    fn remove(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.apt_get(opts, "remove", native_names(self.name(), pkgs)))
    }

    fn upgrade(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.install(opts, pkgs)
    }

    fn upgrade_all(&self, opts: &Opts) -> Result<()> {
        self.base.run(self.apt_get(opts, "dist-upgrade", Vec::new()))
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
    fn test_install_keeps_spaced_constraint() {
        let m = AptRpm::with_base(CommandBase::with_root_state("sudo", false));
        let cmd = m.apt_get(
            &Opts::root().no_confirm(true),
            "install",
            native_names(m.name(), &["gcc>=5.0".to_string()]),
        );
        assert_eq!(args_of(&cmd), vec!["sudo", "apt-get", "install", "-y", "gcc >= 5.0"]);
    }
}
