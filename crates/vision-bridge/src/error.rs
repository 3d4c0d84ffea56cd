//! Bridge error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("bridge error: {0}")]
    Other(String),
}
