// src/main.rs

use alr::build::{LocalExecutor, ScriptExecutor};
use alr::cancel::cancel_on_interrupt;
use alr::config::ENV_LOG_LEVEL;
use alr::installer::{Installer, LocalInstaller};
use alr::manager::{self, PackageManager};
use alr::worker::{self, RemoteExecutor, RemoteInstaller};
use alr::{BuildOptions, Builder, CancelToken, Config, PackageFormatRegistry, Platform};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "alr")]
#[command(author, version, about = "Build native packages from ALR recipes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a package from a recipe
    Build {
        /// Path to the recipe
        #[arg(short, long, default_value = "alr.sh")]
        script: PathBuf,

        /// Repository name embedded in the package name
        #[arg(short, long, default_value = "local")]
        repository: String,

        /// Rebuild even if the package is already built
        #[arg(short, long)]
        clean: bool,

        /// Let package managers and dependency choices prompt
        #[arg(short, long)]
        interactive: bool,
    },

    /// Installer worker (spawned by the build command)
    #[command(name = "_internal-installer", hide = true)]
    InternalInstaller {
        #[arg(long)]
        socket: PathBuf,
    },

    /// Script executor worker (spawned by the build command)
    #[command(name = "_internal-script-executor", hide = true)]
    InternalScriptExecutor {
        #[arg(long)]
        socket: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env(ENV_LOG_LEVEL)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_default()?;
    let cancel = CancelToken::new();
    cancel_on_interrupt(&cancel)?;

    match cli.command {
        Commands::Build {
            script,
            repository,
            clean,
            interactive,
        } => {
            let opts = BuildOptions::new(script)
                .repository(repository)
                .clean(clean)
                .interactive(interactive);
            let path = cmd_build(config, cancel, &opts)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::InternalInstaller { socket } => {
            let manager: Arc<dyn PackageManager> = Arc::from(manager::detect(&config)?);
            let installer = LocalInstaller::new(manager);
            debug!("Installer worker serving {}", socket.display());
            worker::serve_installer(worker::server::connect(&socket)?, &installer)?;
            Ok(())
        }
        Commands::InternalScriptExecutor { socket } => {
            let platform = Platform::detect()?;
            let registry = Arc::new(PackageFormatRegistry::with_defaults());
            let executor = LocalExecutor::new(&config, platform, registry, cancel);
            debug!("Script executor worker serving {}", socket.display());
            worker::serve_executor(worker::server::connect(&socket)?, &executor)?;
            Ok(())
        }
    }
}

fn cmd_build(config: Config, cancel: CancelToken, opts: &BuildOptions) -> Result<PathBuf> {
    let platform = Platform::detect().context("failed to detect the host distribution")?;
    let manager: Arc<dyn PackageManager> = Arc::from(manager::detect(&config)?);
    let registry = Arc::new(PackageFormatRegistry::with_defaults());
    let isolate = config.isolate_workers;

    let mut builder = Builder::new(config, platform, registry, manager, cancel)
        .with_progress(Arc::new(Mutex::new(std::io::stderr())));
    if isolate {
        let installer: Arc<dyn Installer> = Arc::new(RemoteInstaller::spawn()?);
        let executor: Arc<dyn ScriptExecutor> = Arc::new(RemoteExecutor::spawn()?);
        builder = builder.with_installer(installer).with_executor(executor);
    }

    info!("Building {} with {} packages", opts.script.display(), builder.format());
    let result = builder
        .build(opts)
        .with_context(|| format!("failed to build {}", opts.script.display()))?;
    if result.cached {
        info!("Using cached package {}", result.path.display());
    }
    Ok(result.path)
}
