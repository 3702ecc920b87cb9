// src/build/hooks.rs

//! Unrestricted second pass: recipe hooks under bash
//!
//! One `bash` sources the recipe from its own directory and then calls
//! every defined hook in order, so globals set by one hook are visible to
//! the next. `version()` and `files()` write their stdout into a private
//! directory that is read back once the shell exits. The shell runs in
//! its own process group; whatever it leaves running is sent SIGTERM and
//! then SIGKILL after the grace period.

use super::dirs::Directories;
use crate::cancel::CancelToken;
use crate::distro::Platform;
use crate::error::{Error, Result};
use crate::recipe::HookSet;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exit status of the driver when `version()` printed nothing
const EMPTY_VERSION_STATUS: i32 = 97;

/// Sources the recipe once, then runs the hooks named in `$2..` in order.
/// `version()` output overrides `$version` for the hooks after it.
/// The name of the running hook is kept in `$ALR_HOOK_DIR/current`.
const DRIVER: &str = r#"cd -- "$scriptdir" || exit 1
source "$1" || exit 1
shift
for __alr_hook in "$@"; do
    printf '%s' "$__alr_hook" > "$ALR_HOOK_DIR/current"
    case $__alr_hook in
        version)
            cd -- "$srcdir" || exit 1
            version > "$ALR_HOOK_DIR/version" || exit
            read -r -d '' version < "$ALR_HOOK_DIR/version" || true
            [ -n "$version" ] || exit 97
            ;;
        files)
            cd -- "$pkgdir" || exit 1
            shopt -s globstar
            files > "$ALR_HOOK_DIR/files" || exit
            ;;
        *)
            cd -- "$srcdir" || exit 1
            "$__alr_hook" || exit
            ;;
    esac
done
"#;

/// What the hooks reported back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookOutcome {
    /// Trimmed stdout of `version()`
    pub version: Option<String>,
    /// Paths printed by `files()`, relative to PkgDir
    pub files: Option<Vec<String>>,
}

pub struct HookRunner {
    platform: Platform,
    cancel: CancelToken,
    use_fakeroot: bool,
    grace: Duration,
}

impl HookRunner {
    pub fn new(platform: Platform, cancel: CancelToken) -> Self {
        Self {
            platform,
            cancel,
            use_fakeroot: false,
            grace: Duration::from_secs(5),
        }
    }

    /// Wrap hooks in `fakeroot` when it is installed and we are not root
    pub fn with_fakeroot(mut self, enabled: bool) -> Self {
        self.use_fakeroot = enabled;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run the defined hooks in order in a single shell
    pub fn run_all(&self, script: &Path, dirs: &Directories, hooks: HookSet) -> Result<HookOutcome> {
        let order = hooks.present();
        if order.is_empty() {
            debug!("Recipe defines no hooks");
            return Ok(HookOutcome::default());
        }
        self.cancel.check()?;

        let hook_dir = tempfile::Builder::new()
            .prefix("alr-hooks-")
            .tempdir_in(&dirs.base_dir)?;
        info!("Running {}", order.iter().map(|h| format!("{}()", h)).collect::<Vec<_>>().join(", "));
        let mut child = self
            .command(script, dirs, &order, hook_dir.path())
            .spawn()
            .map_err(|e| Error::ExecFailed(format!("failed to start bash: {}", e)))?;
        let pgid = Pid::from_raw(child.id() as i32);
        let stdout = forward(child.stdout.take(), false);
        let stderr = forward(child.stderr.take(), true);

        let status = loop {
            if self.cancel.is_cancelled() {
                warn!("Cancelling {}()", current_hook(hook_dir.path()));
                self.reap(pgid);
                let _ = child.kill();
                let _ = child.wait();
                let _ = stdout.join();
                let _ = stderr.join();
                return Err(Error::Cancelled);
            }
            if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
                break status;
            }
        };
        self.reap(pgid);
        let _ = stdout.join();
        let _ = stderr.join();

        let current = current_hook(hook_dir.path());
        if status.code() == Some(EMPTY_VERSION_STATUS) && current == "version" {
            return Err(Error::InvalidVar {
                name: "version".to_string(),
                reason: "version() printed nothing".to_string(),
            });
        }
        if !status.success() {
            return Err(Error::ExecFailed(format!("{}() failed with {}", current, status)));
        }

        let mut outcome = HookOutcome::default();
        if hooks.version {
            let version = fs::read_to_string(hook_dir.path().join("version"))?.trim().to_string();
            info!("version() reported {}", version);
            outcome.version = Some(version);
        }
        if hooks.files {
            let listed = fs::read_to_string(hook_dir.path().join("files"))?;
            outcome.files = Some(listed.split_whitespace().map(str::to_string).collect());
        }
        debug!("Hooks finished");
        Ok(outcome)
    }

    fn command(&self, script: &Path, dirs: &Directories, hooks: &[&str], hook_dir: &Path) -> Command {
        let fakeroot = self.use_fakeroot
            && !nix::unistd::geteuid().is_root()
            && which::which("fakeroot").is_ok();
        let mut cmd = if fakeroot {
            let mut cmd = Command::new("fakeroot");
            cmd.args(["--", "bash"]);
            cmd
        } else {
            Command::new("bash")
        };
        cmd.arg("-c").arg(DRIVER).arg("alr").arg(script).args(hooks);
        cmd.envs(self.platform.recipe_env())
            .env("scriptdir", &dirs.script_dir)
            .env("srcdir", &dirs.src_dir)
            .env("pkgdir", &dirs.pkg_dir)
            .env("ALR_HOOK_DIR", hook_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        cmd
    }

/// SIGTERM the hook's process group, then SIGKILL after the grace period
    fn reap(&self, pgid: Pid) {
        match killpg(pgid, Signal::SIGTERM) {
            Err(Errno::ESRCH) => return,
            Err(e) => {
                warn!("Failed to signal process group {}: {}", pgid, e);
                return;
            }
            Ok(()) => debug!("Sent SIGTERM to leftover processes of group {}", pgid),
        }
        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            if killpg(pgid, None::<Signal>) == Err(Errno::ESRCH) {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
        warn!("Process group {} outlived the grace period, killing", pgid);
        let _ = killpg(pgid, Signal::SIGKILL);
    }
}

/// Drain a child pipe on its own thread, one log line per output line
fn forward<R: Read + Send + 'static>(pipe: Option<R>, is_stderr: bool) -> JoinHandle<()> {
    thread::spawn(move || {
        let Some(pipe) = pipe else {
            return;
        };
        for line in BufReader::new(pipe).lines() {
            let Ok(line) = line else { break };
            if is_stderr {
                warn!("[bash] {}", line);
            } else {
                info!("[bash] {}", line);
            }
        }
    })
}

/// Name of the hook the driver was last running
fn current_hook(hook_dir: &Path) -> String {
    fs::read_to_string(hook_dir.join("current")).unwrap_or_else(|_| "recipe".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distro::parse_os_release;
    use std::fs;

    fn setup(body: &str) -> (tempfile::TempDir, Directories, std::path::PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let script_dir = tmp.path().join("hello");
        fs::create_dir_all(&script_dir).unwrap();
        let script = script_dir.join("alr.sh");
        fs::write(&script, body).unwrap();
        let dirs = Directories::new(&tmp.path().join("pkgs"), "hello", &script_dir);
        dirs.prepare().unwrap();
        (tmp, dirs, script)
    }

    fn runner() -> HookRunner {
        HookRunner::new(
            Platform::new(parse_os_release("ID=debian\n"), "amd64"),
            CancelToken::new(),
        )
        .with_grace_period(Duration::from_secs(1))
    }

    #[test]
    fn test_hooks_run_in_order_with_version_override() {
        let body = r#"name=hello
version=0.0
release=1
version() { echo " 2.3.4 "; }
prepare() { echo "prepare $version" > "$srcdir/log"; }
build() { pwd >> "$srcdir/log"; }
package() {
    mkdir -p "$pkgdir/usr/bin" "$pkgdir/usr/share/doc/hello"
    echo "$DISTRO_ID" > "$pkgdir/usr/bin/hello"
    touch "$pkgdir/usr/share/doc/hello/README"
}
files() { printf '%s\n' usr/bin/hello usr/share/**/README; }
"#;
        let (_tmp, dirs, script) = setup(body);
        let hooks = HookSet {
            version: true,
            prepare: true,
            build: true,
            package: true,
            files: true,
        };
        let outcome = runner().run_all(&script, &dirs, hooks).unwrap();

        assert_eq!(outcome.version.as_deref(), Some("2.3.4"));
        assert_eq!(
            outcome.files,
            Some(vec![
                "usr/bin/hello".to_string(),
                "usr/share/doc/hello/README".to_string()
            ])
        );
        let log = fs::read_to_string(dirs.src_dir.join("log")).unwrap();
        let mut lines = log.lines();
        assert_eq!(lines.next(), Some("prepare 2.3.4"));
        assert_eq!(
            fs::canonicalize(lines.next().unwrap()).unwrap(),
            fs::canonicalize(&dirs.src_dir).unwrap()
        );
        assert_eq!(
            fs::read_to_string(dirs.pkg_dir.join("usr/bin/hello")).unwrap(),
            "debian\n"
        );
    }

    #[test]
    fn test_hooks_share_one_shell() {
        let body = r#"name=hello
version=1
release=1
echo sourced >> "$scriptdir/counter"
prepare() { _builddir="$srcdir/hello-build"; }
build() { echo "builddir=[$_builddir]" > "$srcdir/seen"; }
package() { :; }
"#;
        let (_tmp, dirs, script) = setup(body);
        let hooks = HookSet {
            prepare: true,
            build: true,
            package: true,
            ..Default::default()
        };
        runner().run_all(&script, &dirs, hooks).unwrap();

        let seen = fs::read_to_string(dirs.src_dir.join("seen")).unwrap();
        assert_eq!(
            seen.trim(),
            format!("builddir=[{}]", dirs.src_dir.join("hello-build").display())
        );
        let counter = fs::read_to_string(dirs.script_dir.join("counter")).unwrap();
        assert_eq!(counter.lines().count(), 1);
    }

    #[test]
    fn test_empty_version_is_invalid() {
        let (_tmp, dirs, script) = setup(
            "name=x\nversion=1\nrelease=1\nversion() { :; }\nbuild() { touch \"$srcdir/built\"; }\n",
        );
        let hooks = HookSet {
            version: true,
            build: true,
            ..Default::default()
        };
        let err = runner().run_all(&script, &dirs, hooks).unwrap_err();
        assert!(matches!(err, Error::InvalidVar { ref name, .. } if name == "version"));
        assert!(!dirs.src_dir.join("built").exists());
    }

    #[test]
    fn test_failing_hook_is_exec_failed() {
        let (_tmp, dirs, script) = setup("name=x\nversion=1\nrelease=1\nbuild() { false; }\n");
        let hooks = HookSet {
            build: true,
            ..Default::default()
        };
        let err = runner().run_all(&script, &dirs, hooks).unwrap_err();
        assert!(matches!(err, Error::ExecFailed(ref msg) if msg.starts_with("build()")));
    }

    #[test]
    fn test_leftover_children_are_reaped() {
        let (_tmp, dirs, script) = setup(
            "name=x\nversion=1\nrelease=1\npackage() { sleep 60 & echo started; }\n",
        );
        let hooks = HookSet {
            package: true,
            ..Default::default()
        };
        let start = Instant::now();
        runner().run_all(&script, &dirs, hooks).unwrap();
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_cancelled_before_start() {
        let (_tmp, dirs, script) = setup("name=x\nversion=1\nrelease=1\nbuild() { :; }\n");
        let cancel = CancelToken::new();
        cancel.cancel();
        let runner = HookRunner::new(Platform::new(parse_os_release("ID=debian\n"), "amd64"), cancel);
        let hooks = HookSet {
            build: true,
            ..Default::default()
        };
        assert!(matches!(
            runner.run_all(&script, &dirs, hooks),
            Err(Error::Cancelled)
        ));
    }
}
