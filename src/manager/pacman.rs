// src/manager/pacman.rs

//! Pacman on Arch Linux and derivatives

use super::{has_program, native_names, CommandBase, Opts, PackageManager};
use crate::error::Result;
use crate::version::Dependency;
use std::collections::BTreeMap;
use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct Pacman {
    base: CommandBase,
}

impl Pacman {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: CommandBase) -> Self {
        Self { base }
    }

    fn pacman(&self, opts: &Opts, op: &[&str], items: Vec<String>) -> Command {
        let mut args: Vec<String> = op.iter().map(|s| s.to_string()).collect();
        if opts.no_confirm {
            args.push("--noconfirm".to_string());
        }
        args.extend(items);
        self.base.command(opts, "pacman", args)
    }
}

/// Parse `pacman -Q` output: `name version` per line
pub fn parse_query(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once(' '))
        .map(|(name, version)| (name.to_string(), version.trim().to_string()))
        .collect()
}

impl PackageManager for Pacman {
    fn exists(&self) -> bool {
        has_program("pacman")
    }

    fn name(&self) -> &'static str {
        "pacman"
    }

    fn format(&self) -> &'static str {
        "archlinux"
    }

    fn set_root_cmd(&mut self, cmd: &str) {
        self.base.set_root_cmd(cmd);
    }

    fn sync(&self, opts: &Opts) -> Result<()> {
        self.base.run(self.pacman(opts, &["-Sy"], Vec::new()))
    }

    fn install(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base.run(self.pacman(
            opts,
            &["-S", "--needed"],
            native_names(self.name(), pkgs),
        ))
    }

    fn install_local(&self, opts: &Opts, paths: &[String]) -> Result<()> {
        self.base
            .run(self.pacman(opts, &["-U", "--needed"], paths.to_vec()))
    }

    fn remove(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.pacman(opts, &["-R"], native_names(self.name(), pkgs)))
    }

    fn upgrade(&self, opts: &Opts, pkgs: &[String]) -> Result<()> {
        self.base
            .run(self.pacman(opts, &["-S"], native_names(self.name(), pkgs)))
    }

    fn upgrade_all(&self, opts: &Opts) -> Result<()> {
        self.base.run(self.pacman(opts, &["-Syu"], Vec::new()))
    }

    fn list_installed(&self, _opts: &Opts) -> Result<BTreeMap<String, String>> {
        let output = self
            .base
            .output(self.base.command(&Opts::default(), "pacman", ["-Q"]))?;
        Ok(parse_query(&String::from_utf8_lossy(&output.stdout)))
    }

    fn is_installed(&self, pkg: &str) -> Result<bool> {
        let name = Dependency::parse(pkg).map(|d| d.name).unwrap_or_else(|_| pkg.to_string());
        self.base
            .probe(self.base.command(&Opts::default(), "pacman", ["-Q", name.as_str()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::args_of;

    #[test]
    fn test_noconfirm_flag() {
        let m = Pacman::with_base(CommandBase::with_root_state("sudo", false));
        let cmd = m.pacman(
            &Opts::root().no_confirm(true),
            &["-S", "--needed"],
            native_names(m.name(), &["gcc >= 5.0".to_string()]),
        );
        assert_eq!(
            args_of(&cmd),
            vec!["sudo", "pacman", "-S", "--needed", "--noconfirm", "gcc>=5.0"]
        );
    }

    #[test]
    fn test_parse_query() {
        let list = parse_query("bash 5.2.026-2\nglibc 2.39+r52-1\n");
        assert_eq!(list.get("bash").map(String::as_str), Some("5.2.026-2"));
        assert_eq!(list.len(), 2);
    }
}
