use std::path::PathBuf;

use thiserror::Error;

/**
    Errors from parsing a dependency manifest.
*/
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("line {line}: invalid requirement '{text}'")]
    InvalidRequirement { line: usize, text: String },

    #[error("invalid cargo manifest: {0}")]
    InvalidCargo(String),

    #[error("dependency manifest lists no files")]
    Empty,
}

/**
    Errors that abort an image build. No image is produced when one of these
    is returned.
*/
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid base runtime '{0}'")]
    BaseRuntime(String),

    #[error("dependency manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    #[error("stage {index} ({stage}) failed: {message}")]
    Stage {
        index: usize,
        stage: String,
        message: String,
    },

    #[error("layer cache: {0}")]
    Cache(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
