//! Launching the external build process with a bounded environment.

pub mod error;
pub mod process;

use std::path::PathBuf;

pub use error::SandboxError;
pub use process::{ProcessSandbox, RunningProcess};

/// Environment variable rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvRule {
    /// Copy the variable from the worker's environment, if set there.
    Inherit(String),
    Set(String, String),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory the process starts in.
    pub work_dir: PathBuf,
    /// File receiving stdout; created or truncated.
    pub stdout: PathBuf,
    /// File receiving stderr; created or truncated.
    pub stderr: PathBuf,
}
