//! Error types shared by the compute core and the plugin host.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported pixel depth {depth} bpp (only 8, 24 and 32 bpp images are supported)")]
    UnsupportedFormat { depth: u32 },

    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    PluginLoad(#[from] PluginLoadError),

    #[error("transform '{transform}' failed at ({x}, {y}): {message}")]
    TransformCompute {
        transform: String,
        x: usize,
        y: usize,
        message: String,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to build compute thread pool: {0}")]
    ThreadPool(String),
}

/// A library or transform type that could not be loaded or instantiated.
///
/// These are collected during a registry refresh instead of aborting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginLoadError {
    pub path: PathBuf,
    pub type_name: Option<String>,
    pub message: String,
}

impl PluginLoadError {
    pub fn library(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            type_name: None,
            message: message.into(),
        }
    }

    pub fn transform(
        path: impl Into<PathBuf>,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            type_name: Some(type_name.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for PluginLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(type_name) => write!(
                f,
                "error loading plugin {type_name} from {}: {}",
                self.path.display(),
                self.message
            ),
            None => write!(
                f,
                "error loading plugin library {}: {}",
                self.path.display(),
                self.message
            ),
        }
    }
}

impl std::error::Error for PluginLoadError {}

/// Failure raised by a transform while computing a single pixel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransformError {
    pub message: String,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
