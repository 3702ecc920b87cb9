// src/manager/mod.rs

//! System package manager adapters
//!
//! One uniform interface over APK, APT, APT-RPM, DNF, YUM, Pacman and
//! Zypper. Every command runs with a sanitized environment and, for
//! `as_root` calls by an unprivileged user, behind the configured root
//! command (`sudo` by default).

pub mod apk;
pub mod apt;
pub mod apt_rpm;
pub mod dnf;
pub mod pacman;
pub mod zypper;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::version::Dependency;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::{debug, info};

/// Options shared by mutating manager calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opts {
    /// Run through the root command when not already root
    pub as_root: bool,
    /// Answer yes to every prompt
    pub no_confirm: bool,
    /// Extra arguments appended after the manager's own flags
    pub args: Vec<String>,
}

impl Opts {
    pub fn root() -> Self {
        Self {
            as_root: true,
            ..Default::default()
        }
    }

    pub fn no_confirm(mut self, no_confirm: bool) -> Self {
        self.no_confirm = no_confirm;
        self
    }
}

/// A system package manager
pub trait PackageManager: Send + Sync {
    /// Whether this manager is available on the host
    fn exists(&self) -> bool;

    fn name(&self) -> &'static str;

    /// Package format this manager installs
    fn format(&self) -> &'static str;

    fn set_root_cmd(&mut self, cmd: &str);

    /// Refresh repository metadata
    fn sync(&self, opts: &Opts) -> Result<()>;

    /// Install packages from the system repositories
    fn install(&self, opts: &Opts, pkgs: &[String]) -> Result<()>;

    /// Install package files from disk
    fn install_local(&self, opts: &Opts, paths: &[String]) -> Result<()>;

    fn remove(&self, opts: &Opts, pkgs: &[String]) -> Result<()>;

    fn upgrade(&self, opts: &Opts, pkgs: &[String]) -> Result<()>;

    fn upgrade_all(&self, opts: &Opts) -> Result<()>;

    /// Installed packages, name to version
    fn list_installed(&self, opts: &Opts) -> Result<BTreeMap<String, String>>;

    /// Whether a package (or something providing it) is installed
    ///
    /// "Not found" is `Ok(false)`; failures to query are errors.
    fn is_installed(&self, pkg: &str) -> Result<bool>;
}

/// Whether an environment variable survives sanitization
///
/// `PATH` is kept so the manager and root command can be located.
pub fn is_kept_env(key: &str) -> bool {
    matches!(key, "LANG" | "LANGUAGE" | "ALR_LOG_LEVEL" | "PATH") || key.starts_with("LC_")
}

/// The current environment filtered by [`is_kept_env`]
pub fn sanitized_env() -> Vec<(String, String)> {
    std::env::vars().filter(|(k, _)| is_kept_env(k)).collect()
}

/// Command construction shared by every adapter
#[derive(Debug, Clone)]
pub struct CommandBase {
    root_cmd: String,
    is_root: bool,
}

impl Default for CommandBase {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBase {
    pub fn new() -> Self {
        Self {
            root_cmd: "sudo".to_string(),
            is_root: nix::unistd::geteuid().is_root(),
        }
    }

    /// Construct with an explicit privilege state
    pub fn with_root_state(root_cmd: &str, is_root: bool) -> Self {
        Self {
            root_cmd: root_cmd.to_string(),
            is_root,
        }
    }

    pub fn set_root_cmd(&mut self, cmd: &str) {
        self.root_cmd = cmd.to_string();
    }

    /// Build `program args... opts.args...`, prefixed by the root command
    /// when needed
    pub fn command<I, S>(&self, opts: &Opts, program: &str, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let use_root = opts.as_root && !self.is_root && !self.root_cmd.is_empty();
        let mut cmd = if use_root {
            let mut cmd = Command::new(&self.root_cmd);
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        };
        for arg in args {
            cmd.arg(arg.as_ref());
        }
        cmd.args(&opts.args);
        cmd.env_clear().envs(sanitized_env());
        cmd
    }

    /// Run with inherited stdio; a non-zero exit is `ExecFailed`
    pub fn run(&self, mut cmd: Command) -> Result<()> {
        info!("Running {}", describe(&cmd));
        let status = cmd
            .stdin(Stdio::inherit())
            .status()
            .map_err(|e| Error::ExecFailed(format!("failed to run {}: {}", describe(&cmd), e)))?;
        if !status.success() {
            return Err(Error::ExecFailed(format!(
                "{} exited with {}",
                describe(&cmd),
                status
            )));
        }
        Ok(())
    }

    /// Run and capture output without judging the exit status
    pub fn capture(&self, mut cmd: Command) -> Result<Output> {
        debug!("Querying {}", describe(&cmd));
        cmd.stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ExecFailed(format!("failed to run {}: {}", describe(&cmd), e)))
    }

    /// Run and capture output; a non-zero exit is `ExecFailed`
    pub fn output(&self, cmd: Command) -> Result<Output> {
        let what = describe(&cmd);
        let output = self.capture(cmd)?;
        if !output.status.success() {
            return Err(Error::ExecFailed(format!(
                "{} failed: {}",
                what,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }

    /// Run a presence query: exit 0 is found, exit 1 is not found
    pub fn probe(&self, cmd: Command) -> Result<bool> {
        let what = describe(&cmd);
        let output = self.capture(cmd)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Error::ExecFailed(format!(
                "{} failed with {}: {}",
                what,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// `program arg arg ...` for logs and errors
pub fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rewrite dependency strings into the manager's command-line dialect
pub fn native_names(manager: &str, pkgs: &[String]) -> Vec<String> {
    pkgs.iter()
        .map(|p| match Dependency::parse(p) {
            Ok(dep) => dep.for_manager(manager),
            Err(_) => p.clone(),
        })
        .collect()
}

pub(crate) fn has_program(name: &str) -> bool {
    which::which(name).is_ok()
}

/// `rpm -qa` listing shared by the RPM-based managers
pub(crate) fn rpm_list_installed(base: &CommandBase) -> Result<BTreeMap<String, String>> {
    let cmd = base.command(
        &Opts::default(),
        "rpm",
        ["-qa", "--queryformat", "%{NAME}\t%|EPOCH?{%{EPOCH}:}:{}|%{VERSION}-%{RELEASE}\n"],
    );
    let output = base.output(cmd)?;
    Ok(parse_tab_list(&String::from_utf8_lossy(&output.stdout)))
}

/// `rpm -q --whatprovides`, shared by the RPM-based managers
pub(crate) fn rpm_is_installed(base: &CommandBase, pkg: &str) -> Result<bool> {
    let name = Dependency::parse(pkg).map(|d| d.name).unwrap_or_else(|_| pkg.to_string());
    base.probe(base.command(&Opts::default(), "rpm", ["-q", "--whatprovides", name.as_str()]))
}

/// Parse `name<TAB>version` lines
pub(crate) fn parse_tab_list(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(name, version)| (name.trim().to_string(), version.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

/// Every adapter, in detection order
pub fn all() -> Vec<Box<dyn PackageManager>> {
    vec![
        Box::new(apt::Apt::new()),
        Box::new(apt_rpm::AptRpm::new()),
        Box::new(pacman::Pacman::new()),
        Box::new(dnf::Dnf::dnf()),
        Box::new(dnf::Dnf::yum()),
        Box::new(apk::Apk::new()),
        Box::new(zypper::Zypper::new()),
    ]
}

/// Adapter by name
pub fn get(name: &str) -> Option<Box<dyn PackageManager>> {
    all().into_iter().find(|m| m.name() == name)
}

/// Pick the host package manager
///
/// A configured `package_manager` wins; otherwise the first adapter that
/// exists. The root command is taken from the configuration.
pub fn detect(config: &Config) -> Result<Box<dyn PackageManager>> {
    let mut manager = match &config.package_manager {
        Some(name) => get(name)
            .ok_or_else(|| Error::ConfigError(format!("unknown package manager '{}'", name)))?,
        None => all()
            .into_iter()
            .find(|m| m.exists())
            .ok_or_else(|| Error::NotFound("supported package manager".to_string()))?,
    };
    let root_cmd = if config.use_root_cmd {
        config.root_cmd.as_str()
    } else {
        ""
    };
    manager.set_root_cmd(root_cmd);
    debug!("Using package manager {}", manager.name());
    Ok(manager)
}

/// Local package files as strings for command lines
pub fn path_args(paths: &[impl AsRef<Path>]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.as_ref().display().to_string())
        .collect()
}

#[cfg(test)]
pub(crate) fn args_of(cmd: &Command) -> Vec<String> {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_string_lossy().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kept_env() {
        assert!(is_kept_env("LANG"));
        assert!(is_kept_env("LC_ALL"));
        assert!(is_kept_env("ALR_LOG_LEVEL"));
        assert!(!is_kept_env("HOME"));
        assert!(!is_kept_env("LD_PRELOAD"));
    }

    #[test]
    fn test_root_prefix() {
        let base = CommandBase::with_root_state("doas", false);
        let cmd = base.command(&Opts::root(), "apk", ["add", "gcc"]);
        assert_eq!(args_of(&cmd), vec!["doas", "apk", "add", "gcc"]);

        let cmd = base.command(&Opts::default(), "apk", ["info"]);
        assert_eq!(args_of(&cmd), vec!["apk", "info"]);

        let root = CommandBase::with_root_state("doas", true);
        let cmd = root.command(&Opts::root(), "apk", ["add"]);
        assert_eq!(args_of(&cmd), vec!["apk", "add"]);
    }

    #[test]
    fn test_extra_args_and_env() {
        let base = CommandBase::with_root_state("", false);
        let opts = Opts {
            as_root: true,
            args: vec!["--verbose".to_string()],
            ..Default::default()
        };
        let cmd = base.command(&opts, "pacman", ["-S"]);
        assert_eq!(args_of(&cmd), vec!["pacman", "-S", "--verbose"]);
        assert!(cmd
            .get_envs()
            .all(|(k, _)| is_kept_env(&k.to_string_lossy())));
    }

    #[test]
    fn test_native_names() {
        let pkgs = vec!["gcc >= 5.0".to_string(), "make".to_string()];
        assert_eq!(native_names("apt", &pkgs), vec!["gcc", "make"]);
        assert_eq!(native_names("pacman", &pkgs), vec!["gcc>=5.0", "make"]);
        assert_eq!(native_names("dnf", &pkgs), vec!["gcc >= 5.0", "make"]);
    }

    #[test]
    fn test_parse_tab_list() {
        let list = parse_tab_list("bash\t5.2-1\nglibc\t1:2.39-3\n\n");
        assert_eq!(list.get("glibc").map(String::as_str), Some("1:2.39-3"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_probe_exit_codes() {
        let base = CommandBase::with_root_state("", false);
        assert!(base.probe(Command::new("true")).unwrap());
        assert!(!base.probe(Command::new("false")).unwrap());
        let mut three = Command::new("sh");
        three.args(["-c", "exit 3"]);
        assert!(base.probe(three).is_err());
    }

    #[test]
    fn test_detection_order() {
        let names: Vec<_> = all().iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["apt", "apt-rpm", "pacman", "dnf", "yum", "apk", "zypper"]);
    }

    #[test]
    fn test_configured_manager() {
        let config = Config {
            package_manager: Some("zypper".to_string()),
            ..Default::default()
        };
        assert_eq!(detect(&config).unwrap().name(), "zypper");

        let config = Config {
            package_manager: Some("emerge".to_string()),
            ..Default::default()
        };
        assert!(matches!(detect(&config), Err(Error::ConfigError(_))));
    }
}
