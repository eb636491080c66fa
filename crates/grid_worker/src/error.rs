use grid_actor::ActorError;
use gridcore::GridError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error! Status: {status} ({url})")]
    Status { url: String, status: u16 },

    #[error("malformed multi-grid buffer: {0}")]
    Decode(#[from] io::Error),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("no cells recorded for feature '{0}'")]
    UnknownFeature(String),
}

impl From<BackendError> for ActorError {
    fn from(e: BackendError) -> Self {
        ActorError::Handler(e.to_string())
    }
}
