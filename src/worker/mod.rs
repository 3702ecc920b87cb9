// src/worker/mod.rs

//! Out-of-process installer and script executor
//!
//! With `isolate_workers` set, the orchestrator re-executes its own binary
//! with a hidden subcommand and talks to the child over a Unix socket. The
//! child serves exactly one of the [`Installer`](crate::installer::Installer)
//! or [`ScriptExecutor`](crate::build::ScriptExecutor) interfaces.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{RemoteExecutor, RemoteInstaller, WorkerClient};
pub use protocol::{read_frame, write_frame, Request, Response};
pub use server::{serve_executor, serve_installer};

/// Which service a worker process provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Installer,
    ScriptExecutor,
}

impl WorkerKind {
    /// Hidden CLI subcommand that starts this worker
    pub fn subcommand(&self) -> &'static str {
        match self {
            WorkerKind::Installer => "_internal-installer",
            WorkerKind::ScriptExecutor => "_internal-script-executor",
        }
    }
}
