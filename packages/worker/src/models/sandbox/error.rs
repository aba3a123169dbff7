use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    /// Settings or policy file missing, relative or unreadable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
