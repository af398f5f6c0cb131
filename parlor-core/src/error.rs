use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("media stack error: {0}")]
    Media(#[from] webrtc::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
