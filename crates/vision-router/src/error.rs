//! Router error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    /// A client or listener connection failed
    #[error("connection failure: {0}")]
    Transport(#[from] vision_transport::TransportError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("router error: {0}")]
    Other(String),
}

impl From<vision_core::Error> for RouterError {
    fn from(e: vision_core::Error) -> Self {
        match e {
            vision_core::Error::EncodeError(msg) => RouterError::Encode(msg),
            other => RouterError::Decode(other.to_string()),
        }
    }
}
