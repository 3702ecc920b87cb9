// src/worker/protocol.rs

//! Wire format between the orchestrator and its workers
//!
//! Each frame is a 4-byte big-endian body length followed by a JSON body.
//! One request gets exactly one response.

use crate::build::{SecondPassRequest, SecondPassResult};
use crate::error::{Error, ErrorKind, Result};
use crate::manager::Opts;
use crate::recipe::RecipeInfo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::path::PathBuf;

/// Upper bound on a single frame body
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    Install { pkgs: Vec<String>, opts: Opts },
    InstallLocal { paths: Vec<String>, opts: Opts },
    Remove { pkgs: Vec<String>, opts: Opts },
    RemoveAlreadyInstalled { pkgs: Vec<String> },
    ReadScript { script: PathBuf },
    ExecuteSecondPass(SecondPassRequest),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Packages(Vec<String>),
    Recipe(RecipeInfo),
    Built(SecondPassResult),
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn from_error(err: &Error) -> Self {
        Response::Error {
            kind: err.kind(),
            message: err.remote_message(),
        }
    }
}

/// Write one frame
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let body = serde_json::to_vec(value)
        .map_err(|e| Error::WorkerError(format!("failed to encode frame: {}", e)))?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| Error::WorkerError(format!("frame too large: {} bytes", body.len())))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame, or `None` when the peer closed the connection between frames
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(Error::WorkerError(format!("frame too large: {} bytes", len)));
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .map_err(|e| Error::WorkerError(format!("truncated frame: {}", e)))?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| Error::WorkerError(format!("failed to decode frame: {}", e)))
}
