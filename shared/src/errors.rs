//! Shared error types for the supervision system

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Serialization failed: {message}")]
    SerializationError { message: String },

    #[error("Deserialization failed: {message}")]
    DeserializationError { message: String },

    #[error("Frame I/O failed: {message}")]
    FrameIo { message: String },

    #[error("Frame too large: {size} bytes exceeds {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Message protocol error: {message}")]
    ProtocolError { message: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
