//! Error types for the verifying RPC facade.

use thiserror::Error;

use lantern_light::LightClientError;

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors surfaced by the verifying facade.
#[derive(Debug, Error)]
pub enum RpcError {
    /// ABCI query path is not of the form `/store/<name>/key`.
    #[error("invalid query path: {0}")]
    InvalidQueryPath(String),

    /// A Merkle proof did not verify against the trusted commitment.
    #[error("merkle proof failed: {0}")]
    MerkleProofFailed(String),

    /// A response hash does not match the trusted header's commitment.
    #[error("hash mismatch at height {height}: {reason}")]
    HashMismatch {
        /// Height the response was checked against.
        height: u64,
        /// Which commitment disagreed.
        reason: String,
    },

    /// Response failed shape validation before any verification.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Response carries a non-positive height.
    #[error("negative or zero height")]
    NegOrZeroHeight,

    /// The light client could not advance to the needed height.
    #[error(transparent)]
    LightClient(#[from] LightClientError),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors from the untrusted RPC transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Timed out or unreachable.
    #[error("no response from rpc server")]
    NoResponse,

    /// The server answered with an RPC-level error.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// Server-side error code.
        code: i64,
        /// Server-side error message.
        message: String,
    },

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}
