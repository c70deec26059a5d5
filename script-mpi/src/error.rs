use thiserror::Error as ThisError;

use crate::transport::Rank;

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum Error {
    /// The generic serializer could not encode a value
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// A payload could not be decoded back into a value
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// The header names a message kind this build cannot decode
    #[error("unsupported message encoding {0}")]
    UnsupportedEncoding(i32),

    /// The underlying transport reported a failure
    #[error("transport error: {0}")]
    Transport(String),

    #[error("no request objects specified")]
    EmptyRequestSet,

    /// A request was queried in a way its kind or state does not allow
    #[error("invalid request state: {0}")]
    InvalidRequestState(&'static str),

    #[error("invalid root {root} for communicator of size {size}")]
    InvalidRoot { root: Rank, size: usize },

    /// A reduction operator failed when applied to two values
    #[error("invalid reduction operator: {0}")]
    InvalidOperator(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn operator(msg: impl Into<String>) -> Self {
        Self::InvalidOperator(msg.into())
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::EmptyRequestSet.to_string(),
            "no request objects specified"
        );
        assert_eq!(
            Error::transport("connection reset").to_string(),
            "transport error: connection reset"
        );
        assert_eq!(
            Error::InvalidRoot { root: 5, size: 4 }.to_string(),
            "invalid root 5 for communicator of size 4"
        );
        assert_eq!(
            Error::UnsupportedEncoding(9).to_string(),
            "unsupported message encoding 9"
        );
    }
}
