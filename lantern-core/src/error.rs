//! Error types for Lantern core.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from core types and verification arithmetic.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid hash format or value.
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    /// Invalid cryptographic key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Signature verification failed.
    #[error("signature verification failed")]
    InvalidSignature,

    /// Header field validation failed.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Commit is structurally invalid for the given header or set.
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// Commit height does not match the expected height.
    #[error("invalid commit height: got {got}, expected {expected}")]
    InvalidCommitHeight {
        /// Height carried by the commit.
        got: u64,
        /// Height it was checked against.
        expected: u64,
    },

    /// A commit signature failed verification.
    #[error("invalid commit signature from validator {address} at index {index}")]
    InvalidCommitSignature {
        /// Address of the offending validator.
        address: String,
        /// Index of the signature in the commit.
        index: usize,
    },

    /// A non-absent signature names a validator missing from the set.
    #[error("validator {address} not in set at index {index}")]
    ValidatorNotInSet {
        /// Claimed validator address.
        address: String,
        /// Claimed index.
        index: usize,
    },

    /// Voting-power arithmetic overflowed.
    #[error("total voting power overflow")]
    PowerOverflow,

    /// Signatures tallied below the required voting-power threshold.
    #[error("insufficient voting power: tallied {tallied}, needed more than {needed}")]
    InsufficientVotingPower {
        /// Voting power contributed by valid for-block signatures.
        tallied: u64,
        /// Threshold that had to be strictly exceeded.
        needed: u64,
    },

    /// A validator-set hash does not match the set it claims to commit.
    #[error("validator set hash mismatch: header has {header_hash}, set hashes to {set_hash}")]
    SetHashMismatch {
        /// Hash carried by the header.
        header_hash: String,
        /// Hash of the supplied set.
        set_hash: String,
    },

    /// Merkle proof verification failed.
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create an InvalidHash error.
    pub fn invalid_hash(message: impl Into<String>) -> Self {
        Error::InvalidHash(message.into())
    }

    /// Create an InvalidKey error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Error::InvalidKey(message.into())
    }

    /// Create an InvalidSignature error.
    pub fn invalid_signature() -> Self {
        Error::InvalidSignature
    }

    /// Create an InvalidHeader error.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Error::InvalidHeader(message.into())
    }

    /// Create an InvalidCommit error.
    pub fn invalid_commit(message: impl Into<String>) -> Self {
        Error::InvalidCommit(message.into())
    }

    /// Create an InvalidProof error.
    pub fn invalid_proof(message: impl Into<String>) -> Self {
        Error::InvalidProof(message.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::InvalidHash(e.to_string())
    }
}
