// src/manager/apt.rs

//! APT on dpkg-based distributions

use super::{has_program, native_names, parse_tab_list, CommandBase, Opts, PackageManager};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct Apt {
    base: CommandBase,
}

impl Apt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: CommandBase) -> Self {
        Self { base }
    }

    fn apt(&self, opts: &Opts, sub: &str, extra: &[&str], items: &[String]) -> Command {
        let mut args: Vec<String> = vec![sub.to_string()];
        if opts.no_confirm {
            args.push("-y".to_string());
        }
        args.extend(extra.iter().map(|s| s.to_string()));
        args.extend(items.iter().cloned());
        self.base.command(opts, "apt-get", args)
    }

    pub(crate) fn install_command(&self, opts: &Opts, pkgs: &[String]) -> Command {
        self.apt(opts, "install", &[], &native_names(self.name(), pkgs))
    }
}

impl PackageManager for Apt {
    fn exists(&self) -> bool {
        has_program("apt-get") && has_program("dpkg")
    }

    fn name(&self) -> &'static str {
        "apt"
    }

    fn format(&self) -> &'static str {
        "deb"
    }

    fn set_root_cmd(&mut self, cmd: &str) {
        self.base.set_root_cmd(cmd);
    }

    fn sync(&self, opts: &Opts) -> Result<()> {
        self.base.run(self.apt(opts, "update", &[], &[]))
    }

    fn install(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base.run(self.install_command(opts, pkgs))
    }

    fn install_local(&self, opts: &Opts, paths: &[String]) -> Result<()> {
        self.base.run(self.apt(opts, "install", &[], paths))
    }

    fn remove(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base.run(self.apt(opts, "remove", &[], &native_names(self.name(), pkgs)))
    }

    fn upgrade(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base.run(self.apt(
            opts,
            "install",
            &["--only-upgrade"],
            &native_names(self.name(), pkgs),
        ))
    }

    fn upgrade_all(&self, opts: &Opts) -> Result<()> {
        self.base.run(self.apt(opts, "upgrade", &[], &[]))
    }

    fn list_installed(&self, _opts: &Opts) -> Result<BTreeMap<String, String>> {
        let cmd = self.base.command(
            &Opts::default(),
            "dpkg-query",
            ["-W", "-f", "${Package}\t${Version}\n"],
        );
        let output = self.base.output(cmd)?;
        Ok(parse_tab_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn is_installed(&self, pkg: &str) -> Result<bool> {
        let name = native_names(self.name(), &[pkg.to_string()]).remove(0);
        let cmd = self.base.command(
            &Opts::default(),
            "dpkg-query",
            ["-W", "-f", "${db:Status-Status}", name.as_str()],
        );
        let output = self.base.capture(cmd)?;
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).trim() == "installed"),
            Some(1) => Ok(false),
            _ => Err(Error::ExecFailed(format!(
                "dpkg-query failed for {}: {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::args_of;

    fn apt() -> Apt {
        Apt::with_base(CommandBase::with_root_state("sudo", false))
    }

    #[test]
    fn test_install_strips_versions() {
        let cmd = apt().install_command(&Opts::root().no_confirm(true), &["gcc >= 5.0".to_string()]);
        assert_eq!(args_of(&cmd), vec!["sudo", "apt-get", "install", "-y", "gcc"]);
    }

    #[test]
    fn test_interactive_install() {
        let cmd = apt().install_command(&Opts::root(), &["make".to_string()]);
        assert_eq!(args_of(&cmd), vec!["sudo", "apt-get", "install", "make"]);
    }

    #[test]
    fn test_upgrade_command() {
        let cmd = apt().apt(&Opts::default(), "install", &["--only-upgrade"], &["bash".to_string()]);
        assert_eq!(args_of(&cmd), vec!["apt-get", "install", "--only-upgrade", "bash"]);
    }
}
