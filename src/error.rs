/// Error Module
///
/// One error type for the whole loader. The variants follow how a failure is handled by the run:
/// configuration problems stop before any I/O, transport/extract/load failures abort the run
/// and leave every cursor untouched.
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Failed to extract {}: {message}", archive.display())]
    Extract { archive: PathBuf, message: String },

    #[error("Failed to load {}: {message}", file.display())]
    Load { file: PathBuf, message: String },

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Run cancelled before all work was started")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport { url: url.into(), message: message.to_string() }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io { path: path.as_ref().to_path_buf(), source }
    }

    pub fn load(file: impl AsRef<Path>, message: impl ToString) -> Self {
        Self::Load { file: file.as_ref().to_path_buf(), message: message.to_string() }
    }

    pub fn extract(archive: impl AsRef<Path>, message: impl ToString) -> Self {
        Self::Extract { archive: archive.as_ref().to_path_buf(), message: message.to_string() }
    }
}
