//! Providers: untrusted sources of signed headers and validator sets.
//!
//! The engine fetches from one *primary* provider and corroborates against
//! *witness* providers. Every concrete kind implements [`Provider`]:
//! [`http::HttpProvider`] for real nodes, [`mock::MockProvider`] for
//! deterministic test chains, [`dead::DeadProvider`] for a peer that never
//! answers.

use async_trait::async_trait;
use thiserror::Error;

use lantern_core::{Evidence, SignedHeader, ValidatorSet};

pub mod dead;
pub mod http;
pub mod mock;

/// Height argument meaning "the provider's latest".
pub const LATEST_HEIGHT: u64 = 0;

/// Failure modes of a provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider does not have the requested data.
    #[error("not found at height {height}")]
    NotFound {
        /// Requested height.
        height: u64,
    },

    /// The provider timed out or is unreachable. Retryable.
    #[error("no response from provider")]
    NoResponse,

    /// The provider answered with something malformed.
    #[error("unreliable provider: {0}")]
    Unreliable(String),
}

impl ProviderError {
    /// Whether the engine should retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::NoResponse)
    }
}

/// An untrusted source of chain data.
///
/// Providers are stateless from the engine's perspective; any caching or
/// connection pooling is the provider's own concern.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The chain this provider serves.
    fn chain_id(&self) -> &str;

    /// Short description used in logs and the confirmation hook.
    fn describe(&self) -> String;

    /// Fetch the signed header at `height` ([`LATEST_HEIGHT`] for latest).
    async fn signed_header(&self, height: u64) -> Result<SignedHeader, ProviderError>;

    /// Fetch the validator set at `height` ([`LATEST_HEIGHT`] for latest).
    async fn validator_set(&self, height: u64) -> Result<ValidatorSet, ProviderError>;

    /// Report misbehaviour to the provider's node.
    async fn report_evidence(&self, evidence: Evidence) -> Result<(), ProviderError>;
}
