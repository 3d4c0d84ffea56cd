//! Error types for the relay core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Payload could not be decoded as a JSON object
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Envelope could not be serialized
    #[error("encode error: {0}")]
    EncodeError(String),

    /// Payload bytes are not usable at all (e.g. not UTF-8)
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
