use std::path::PathBuf;

use thiserror::Error;

/// Errors from obtaining a Google OAuth access token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials file {0} not found; create an OAuth client in Google Cloud Console and download it")]
    MissingCredentials(PathBuf),

    #[error("no token at {0}; run `converter authorize` first")]
    NotAuthorized(PathBuf),

    #[error("stored token could not be refreshed ({0}); run `converter authorize` again")]
    Reauthorize(String),

    #[error("invalid {path}: {message}")]
    InvalidFile { path: PathBuf, message: String },

    #[error("token endpoint rejected the request: {0}")]
    TokenEndpoint(String),

    #[error("authorization failed: {0}")]
    Flow(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from Drive API calls.
#[derive(Debug, Error)]
pub enum DriveError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("drive api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("file {0} has no name")]
    MissingName(String),

    #[error("upload session response had no Location header")]
    MissingUploadSession,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DriveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
