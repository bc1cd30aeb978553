//! Error types for the edut runtime

use crate::hash::Hash;
use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The requested hash is not held locally. Callers may treat this as
    /// "retry later" (receive handlers park the message) or as "not yours".
    #[error("hash not found")]
    HashNotFound,

    /// The record was superseded; `follow` is the replacing hash.
    #[error("hash modified")]
    HashModified { follow: Hash },

    /// The record was deleted.
    #[error("hash deleted")]
    HashDeleted,

    /// The record was rejected by validation.
    #[error("hash rejected")]
    HashRejected,

    /// App- or sys-level validation rejected the item.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Surfaced by the initiating side when local validation flags the
    /// entry content itself.
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Committed type does not match the replaced header's type.
    #[error("entry type mismatch")]
    EntryTypeMismatch,

    /// Entry type is not declared by any zome of the DNA.
    #[error("unknown entry type: {0}")]
    UnknownEntryType(String),

    #[error("wrong number of arguments")]
    WrongNumberOfArgs,

    /// An argument value did not match its declared type.
    #[error("argument {index} ({name}) should be {expected}")]
    Argument {
        index: usize,
        name: String,
        expected: &'static str,
    },

    /// The action has no DHT receive side.
    #[error("not a DHT action")]
    NonDhtAction,

    /// The action is only meaningful as a reply and cannot be initiated.
    #[error("not a callable action")]
    NonCallableAction,

    /// Wire message kind is not part of the action protocol.
    #[error("message type {0} not in action protocol")]
    NotInActionProtocol(String),

    /// A peer replied with a body of an unexpected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Chain integrity violation (out-of-order append, hash mismatch,
    /// duplicate header).
    #[error("chain error: {0}")]
    Chain(String),

    /// Malformed DNA (duplicate entry type across zomes, unknown zome).
    #[error("DNA error: {0}")]
    Dna(String),

    /// A required validation-package section is missing.
    #[error("package error: {0}")]
    Package(String),

    /// Application (ribosome) failure outside of validation.
    #[error("ribosome error: {0}")]
    Ribosome(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Non-fatal; the node continues with the peers it already has.
    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown hash algorithm: {0}")]
    UnknownHashAlgorithm(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_entry_surface() {
        let err = Error::InvalidEntry("badger".to_string());
        assert_eq!(err.to_string(), "Invalid entry: badger");
    }

    #[test]
    fn test_argument_error_names_index() {
        let err = Error::Argument {
            index: 1,
            name: "entry".to_string(),
            expected: "string",
        };
        assert_eq!(err.to_string(), "argument 1 (entry) should be string");
    }
}
