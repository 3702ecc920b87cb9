// src/worker/server.rs

//! Worker side of the socket
//!
//! The child connects back to the parent's socket and answers requests
//! until the parent sends `Shutdown` or closes the connection.

use super::protocol::{read_frame, write_frame, Request, Response};
use crate::build::ScriptExecutor;
use crate::error::{Error, Result};
use crate::installer::Installer;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use tracing::{debug, warn};

/// Connect to the orchestrator's socket
pub fn connect(socket: &Path) -> Result<UnixStream> {
    UnixStream::connect(socket).map_err(|e| {
        Error::WorkerError(format!("failed to connect to {}: {}", socket.display(), e))
    })
}

pub fn serve_installer<S: Read + Write>(stream: S, installer: &dyn Installer) -> Result<()> {
    serve_stream(stream, |request| match request {
        Request::Install { pkgs, opts } => installer.install(&pkgs, &opts).map(|_| Response::Ok),
        Request::InstallLocal { paths, opts } => {
            installer.install_local(&paths, &opts).map(|_| Response::Ok)
        }
        Request::Remove { pkgs, opts } => installer.remove(&pkgs, &opts).map(|_| Response::Ok),
        Request::RemoveAlreadyInstalled { pkgs } => installer
            .remove_already_installed(&pkgs)
            .map(Response::Packages),
        other => Err(unsupported("installer", &other)),
    })
}

pub fn serve_executor<S: Read + Write>(stream: S, executor: &dyn ScriptExecutor) -> Result<()> {
    serve_stream(stream, |request| match request {
        Request::ReadScript { script } => executor.read_script(&script).map(Response::Recipe),
        Request::ExecuteSecondPass(req) => {
            executor.execute_second_pass(&req).map(Response::Built)
        }
        other => Err(unsupported("script executor", &other)),
    })
}

fn unsupported(service: &str, request: &Request) -> Error {
    Error::WorkerError(format!("{} worker cannot handle {:?}", service, request))
}

/// Request loop shared by both services
///
/// Handler errors are sent back as error responses; only transport errors
/// end the loop early.
fn serve_stream<S, F>(mut stream: S, mut handler: F) -> Result<()>
where
    S: Read + Write,
    F: FnMut(Request) -> Result<Response>,
{
    loop {
        let request: Request = match read_frame(&mut stream)? {
            Some(request) => request,
            None => {
                debug!("Worker connection closed");
                return Ok(());
            }
        };
        if request == Request::Shutdown {
            write_frame(&mut stream, &Response::Ok)?;
            return Ok(());
        }

        let response = match handler(request) {
            Ok(response) => response,
            Err(e) => {
                warn!("Worker request failed: {}", e);
                Response::from_error(&e)
            }
        };
        write_frame(&mut stream, &response)?;
    }
}
