//! `cascade dmat`: find a Dismod-AT binary and run it with the given arguments.
//!
//! Resolution order:
//! 1. a virtualization image (`DISMOD_AT_IMAGE`) when the file exists and the
//!    runtime (`DISMOD_AT_SINGULARITY`, default `singularity`) is on `PATH`
//! 2. a locally installed binary (`DISMOD_AT_BINARY`, default `dismod_at`)
//! 3. a container image (`DISMOD_AT_DOCKER_IMAGE`, default `dismod_at.image`)
//!    run by `DISMOD_AT_DOCKER` (default `docker`), with the working directory
//!    mounted at `/home/work`
//!
//! Arguments are passed through untouched and the child's exit code is returned.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Name of the engine executable inside images and containers.
const ENGINE_PROGRAM: &str = "dismod_at";
const CONTAINER_WORKDIR: &str = "/home/work";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(
        "No Dismod-AT found: set DISMOD_AT_IMAGE, put '{binary}' on PATH, or install '{container_runtime}'."
    )]
    Unresolved {
        binary: String,
        container_runtime: String,
    },
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{0}' was terminated by a signal.")]
    Signaled(String),
    #[error("Cannot determine the working directory: {0}")]
    WorkingDirectory(#[source] std::io::Error),
}

impl LaunchError {
    /// Shell-style exit codes: 127 not found, 126 found but not runnable.
    pub fn exit_code(&self) -> u8 {
        match self {
            LaunchError::Unresolved { .. } => 127,
            LaunchError::Spawn { .. } => 126,
            LaunchError::Signaled(_) => 1,
            LaunchError::WorkingDirectory(_) => 2,
        }
    }
}

/// Where to look for the engine. Read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    pub image: Option<PathBuf>,
    pub image_runtime: String,
    pub binary: String,
    pub container_image: String,
    pub container_runtime: String,
    pub workdir: PathBuf,
}

impl LauncherConfig {
    pub fn from_env() -> Result<Self, LaunchError> {
        dotenvy::dotenv().ok();
        let var = |name: &str, default: &str| env::var(name).unwrap_or_else(|_| default.to_string());
        Ok(Self {
            image: env::var_os("DISMOD_AT_IMAGE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            image_runtime: var("DISMOD_AT_SINGULARITY", "singularity"),
            binary: var("DISMOD_AT_BINARY", ENGINE_PROGRAM),
            container_image: var("DISMOD_AT_DOCKER_IMAGE", "dismod_at.image"),
            container_runtime: var("DISMOD_AT_DOCKER", "docker"),
            workdir: env::current_dir().map_err(LaunchError::WorkingDirectory)?,
        })
    }
}

/// The tier that will run the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Image { runtime: PathBuf, image: PathBuf },
    Local { binary: PathBuf },
    Container {
        runtime: PathBuf,
        image: String,
        workdir: PathBuf,
    },
}

/// Pick the first tier that is available.
///
/// `which` looks a program up on `PATH`; `exists` checks a file. Both are
/// parameters so resolution can be tested without touching the system.
pub fn resolve(
    config: &LauncherConfig,
    which: impl Fn(&str) -> Option<PathBuf>,
    exists: impl Fn(&Path) -> bool,
) -> Option<Resolved> {
    if let Some(image) = config.image.as_ref().filter(|p| exists(p.as_path())) {
        if let Some(runtime) = which(&config.image_runtime) {
            return Some(Resolved::Image {
                runtime,
                image: image.clone(),
            });
        }
        log::debug!("image {} found but '{}' is not on PATH", image.display(), config.image_runtime);
    }
    if let Some(binary) = which(&config.binary) {
        return Some(Resolved::Local { binary });
    }
    which(&config.container_runtime).map(|runtime| Resolved::Container {
        runtime,
        image: config.container_image.clone(),
        workdir: config.workdir.clone(),
    })
}

/// Program and argument list for a resolved tier.
pub fn command_for(resolved: &Resolved, args: &[String]) -> (PathBuf, Vec<String>) {
    match resolved {
        Resolved::Image { runtime, image } => {
            let mut argv = vec![
                "exec".to_string(),
                image.display().to_string(),
                ENGINE_PROGRAM.to_string(),
            ];
            argv.extend_from_slice(args);
            (runtime.clone(), argv)
        }
        Resolved::Local { binary } => (binary.clone(), args.to_vec()),
        Resolved::Container {
            runtime,
            image,
            workdir,
        } => {
            let mut argv = vec![
                "run".to_string(),
                "--rm".to_string(),
                "-v".to_string(),
                format!("{}:{CONTAINER_WORKDIR}", workdir.display()),
                "-w".to_string(),
                CONTAINER_WORKDIR.to_string(),
                image.clone(),
                ENGINE_PROGRAM.to_string(),
            ];
            argv.extend_from_slice(args);
            (runtime.clone(), argv)
        }
    }
}

/// Look a program up on `PATH`. Names containing a path separator are taken
/// as paths.
pub fn which(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}

/// Resolve the engine and run it with `args`, returning its exit code.
pub fn run(args: &[String]) -> Result<u8, LaunchError> {
    let config = LauncherConfig::from_env()?;
    let resolved = resolve(&config, which, Path::exists).ok_or_else(|| LaunchError::Unresolved {
        binary: config.binary.clone(),
        container_runtime: config.container_runtime.clone(),
    })?;
    let (program, argv) = command_for(&resolved, args);
    log::info!("running {} {}", program.display(), argv.join(" "));

    let status = Command::new(&program)
        .args(&argv)
        .status()
        .map_err(|source| LaunchError::Spawn {
            program: program.display().to_string(),
            source,
        })?;
    match status.code() {
        Some(code) => Ok(code.clamp(0, 255) as u8),
        None => Err(LaunchError::Signaled(program.display().to_string())),
    }
}
