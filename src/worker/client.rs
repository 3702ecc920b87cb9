// src/worker/client.rs

//! Orchestrator side of the socket

use super::protocol::{read_frame, write_frame, Request, Response};
use super::WorkerKind;
use crate::build::{ScriptExecutor, SecondPassRequest, SecondPassResult};
use crate::error::{Error, Result};
use crate::installer::Installer;
use crate::manager::{sanitized_env, Opts};
use crate::recipe::RecipeInfo;
use std::io::ErrorKind as IoErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info};

/// Group allowed to talk to worker sockets
pub const SOCKET_GROUP: &str = "alr";

const SOCKET_NAME: &str = "worker.sock";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Connection to one worker process
pub struct WorkerClient {
    stream: Mutex<UnixStream>,
    child: Mutex<Option<Child>>,
    // Keeps the socket directory alive for the worker's lifetime
    _socket_dir: Option<TempDir>,
}

impl WorkerClient {
    /// Start a worker from the current executable and wait for it to connect
    pub fn spawn(kind: WorkerKind) -> Result<Self> {
        let socket_dir = tempfile::Builder::new().prefix("alr-worker-").tempdir()?;
        let socket = socket_dir.path().join(SOCKET_NAME);
        let listener = UnixListener::bind(&socket).map_err(|e| {
            Error::WorkerError(format!("failed to bind {}: {}", socket.display(), e))
        })?;
        std::fs::set_permissions(&socket, std::fs::Permissions::from_mode(0o660))?;
        set_socket_group(&socket);

        let exe = std::env::current_exe()?;
        let mut child = Command::new(&exe)
            .arg(kind.subcommand())
            .arg("--socket")
            .arg(&socket)
            .env_clear()
            .envs(sanitized_env())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::WorkerError(format!("failed to start {}: {}", kind.subcommand(), e))
            })?;
        debug!("Started {} worker (pid {})", kind.subcommand(), child.id());

        match accept(&listener, &mut child) {
            Ok(stream) => Ok(Self {
                stream: Mutex::new(stream),
                child: Mutex::new(Some(child)),
                _socket_dir: Some(socket_dir),
            }),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    /// Wrap an already connected stream with no child process attached
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream: Mutex::new(stream),
            child: Mutex::new(None),
            _socket_dir: None,
        }
    }

    /// Send one request and wait for its response
    ///
    /// Error responses are rebuilt into local errors of the same kind.
    pub fn call(&self, request: &Request) -> Result<Response> {
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| Error::WorkerError("worker connection poisoned".into()))?;
        write_frame(&mut *stream, request)?;
        match read_frame(&mut *stream)? {
            Some(Response::Error { kind, message }) => Err(Error::from_remote(kind, message)),
            Some(response) => Ok(response),
            None => Err(Error::WorkerError("worker closed the connection".into())),
        }
    }

    /// Stop the worker; calling this again is a no-op
    pub fn kill(&self) {
        let Ok(mut child) = self.child.lock() else {
            return;
        };
        if let Some(mut child) = child.take() {
            if let Ok(mut stream) = self.stream.lock() {
                let _ = write_frame(&mut *stream, &Request::Shutdown);
            }
            let _ = child.kill();
            let _ = child.wait();
            debug!("Worker {} stopped", child.id());
        }
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.kill();
    }
}

fn accept(listener: &UnixListener, child: &mut Child) -> Result<UnixStream> {
    listener.set_nonblocking(true)?;
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                return Ok(stream);
            }
            Err(e) if e.kind() == IoErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(status) = child.try_wait()? {
            return Err(Error::WorkerError(format!(
                "worker exited before connecting: {}",
                status
            )));
        }
        if Instant::now() >= deadline {
            return Err(Error::WorkerError("timed out waiting for worker".into()));
        }
        std::thread::sleep(ACCEPT_POLL);
    }
}

/// Hand the socket to the `alr` group when it exists
fn set_socket_group(path: &Path) {
    use nix::unistd::{chown, Group};

    match Group::from_name(SOCKET_GROUP) {
        Ok(Some(group)) => {
            if let Err(e) = chown(path, None, Some(group.gid)) {
                debug!("Could not set socket group {}: {}", SOCKET_GROUP, e);
            }
        }
        Ok(None) => debug!("Group {} not found, socket keeps the default group", SOCKET_GROUP),
        Err(e) => debug!("Group lookup for {} failed: {}", SOCKET_GROUP, e),
    }
}

fn unexpected(response: Response) -> Error {
    Error::WorkerError(format!("unexpected worker response: {:?}", response))
}

/// [`Installer`] served by a worker process
pub struct RemoteInstaller {
    client: WorkerClient,
}

impl RemoteInstaller {
    pub fn spawn() -> Result<Self> {
        info!("Starting isolated installer");
        Ok(Self::new(WorkerClient::spawn(WorkerKind::Installer)?))
    }

    pub fn new(client: WorkerClient) -> Self {
        Self { client }
    }

    fn expect_ok(&self, request: &Request) -> Result<()> {
        match self.client.call(request)? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

impl Installer for RemoteInstaller {
    fn install(&self, pkgs: &[String], opts: &Opts) -> Result<()> {
        self.expect_ok(&Request::Install {
            pkgs: pkgs.to_vec(),
            opts: opts.clone(),
        })
    }

    fn install_local(&self, paths: &[String], opts: &Opts) -> Result<()> {
        self.expect_ok(&Request::InstallLocal {
            paths: paths.to_vec(),
            opts: opts.clone(),
        })
    }

    fn remove(&self, pkgs: &[String], opts: &Opts) -> Result<()> {
        self.expect_ok(&Request::Remove {
            pkgs: pkgs.to_vec(),
            opts: opts.clone(),
        })
    }

    fn remove_already_installed(&self, pkgs: &[String]) -> Result<Vec<String>> {
        match self.client.call(&Request::RemoveAlreadyInstalled {
            pkgs: pkgs.to_vec(),
        })? {
            Response::Packages(pkgs) => Ok(pkgs),
            other => Err(unexpected(other)),
        }
    }
}

/// [`ScriptExecutor`] served by a worker process
pub struct RemoteExecutor {
    client: WorkerClient,
}

impl RemoteExecutor {
    pub fn spawn() -> Result<Self> {
        info!("Starting isolated script executor");
        Ok(Self::new(WorkerClient::spawn(WorkerKind::ScriptExecutor)?))
    }

    pub fn new(client: WorkerClient) -> Self {
        Self { client }
    }
}

impl ScriptExecutor for RemoteExecutor {
    fn read_script(&self, script: &Path) -> Result<RecipeInfo> {
        match self.client.call(&Request::ReadScript {
            script: script.to_path_buf(),
        })? {
            Response::Recipe(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    fn execute_second_pass(&self, req: &SecondPassRequest) -> Result<SecondPassResult> {
        match self.client.call(&Request::ExecuteSecondPass(req.clone()))? {
            Response::Built(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }
}
