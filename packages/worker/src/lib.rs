pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod pipeline;

pub use config::WorkerAppConfig;
pub use error::PipelineError;
pub use pipeline::{Pipeline, Upload};
