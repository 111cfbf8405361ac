//! Error types for the light client.

use thiserror::Error;

use crate::provider::ProviderError;

/// Result type for light client operations.
pub type Result<T> = std::result::Result<T, LightClientError>;

/// Errors that can occur during light verification.
#[derive(Debug, Error)]
pub enum LightClientError {
    /// Header failed structural or field-level checks.
    #[error("invalid header at height {height}: {reason}")]
    InvalidHeader {
        /// Height of the offending header.
        height: u64,
        /// Reason for invalidity.
        reason: String,
    },

    /// Commit failed signature, power, or set-hash checks.
    #[error("invalid commit at height {height}: {source}")]
    InvalidCommit {
        /// Height of the offending commit.
        height: u64,
        /// Underlying verification failure.
        #[source]
        source: lantern_core::Error,
    },

    /// A header's validator hash disagrees with the fetched set.
    #[error("validator set hash mismatch at height {height}: {reason}")]
    ValidatorSetMismatch {
        /// Height of the mismatch.
        height: u64,
        /// Which hash disagreed.
        reason: String,
    },

    /// The trusted anchor header has outlived the trust period.
    #[error("trusted header at height {height} expired at {expired_at}")]
    OldHeaderExpired {
        /// Height of the expired anchor.
        height: u64,
        /// When it expired.
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    /// Skipping verification found less than the required trusted overlap.
    ///
    /// Recovered internally by bisection; never surfaced to callers.
    #[error("insufficient trusted overlap for height {height}")]
    InsufficientTrustedOverlap {
        /// Target height of the failed skip.
        height: u64,
    },

    /// Primary and a witness produced different verifiable headers.
    #[error("conflicting headers at height {height} (witness {witness})")]
    ConflictingHeaders {
        /// Height of the divergence.
        height: u64,
        /// Index of the disagreeing witness.
        witness: usize,
    },

    /// No witnesses remain to corroborate headers.
    #[error("no witnesses left")]
    NoWitnesses,

    /// Provider retry budget exhausted.
    #[error("no response from provider after {attempts} attempts at height {height}")]
    NoResponse {
        /// Height of the failed fetch.
        height: u64,
        /// How many attempts were made.
        attempts: u32,
    },

    /// A height below the trust root was requested in sequential mode.
    #[error("target height {height} below trust root {root}")]
    TargetHeightBelowTrustRoot {
        /// Requested height.
        height: u64,
        /// Lowest trusted height.
        root: u64,
    },

    /// The engine has been stopped.
    #[error("light client is stopped")]
    Stopped,

    /// Provider misbehaved in a non-retryable way.
    #[error("provider error at height {height}: {source}")]
    Provider {
        /// Height of the failed operation.
        height: u64,
        /// The provider failure.
        #[source]
        source: ProviderError,
    },

    /// Store read or write failed.
    #[error("store error: {0}")]
    Store(String),
}

impl LightClientError {
    /// Create an InvalidHeader error.
    pub fn invalid_header(height: u64, reason: impl Into<String>) -> Self {
        LightClientError::InvalidHeader {
            height,
            reason: reason.into(),
        }
    }

    /// Create a Store error.
    pub fn store(reason: impl Into<String>) -> Self {
        LightClientError::Store(reason.into())
    }
}
