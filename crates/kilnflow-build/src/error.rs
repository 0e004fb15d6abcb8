use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Push failed: {message}")]
    PushFailed { message: String },

    #[error("Could not download code from {url}: {message}")]
    FetchFailed { url: String, message: String },

    #[error("Could not check out revision {revision}: {message}")]
    CheckoutFailed { revision: String, message: String },

    #[error("Dockerfile template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error(transparent)]
    Core(#[from] kilnflow_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BuildError>;
