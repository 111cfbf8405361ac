//! A provider that never responds. Used to exercise retry and witness
//! removal paths.

use async_trait::async_trait;

use lantern_core::{Evidence, SignedHeader, ValidatorSet};

use super::{Provider, ProviderError};

/// A provider whose every operation fails with [`ProviderError::NoResponse`].
#[derive(Debug, Clone)]
pub struct DeadProvider {
    chain_id: String,
}

impl DeadProvider {
    /// Create a dead provider for the given chain.
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
        }
    }
}

#[async_trait]
impl Provider for DeadProvider {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    fn describe(&self) -> String {
        "dead".to_string()
    }

    async fn signed_header(&self, _height: u64) -> Result<SignedHeader, ProviderError> {
        Err(ProviderError::NoResponse)
    }

    async fn validator_set(&self, _height: u64) -> Result<ValidatorSet, ProviderError> {
        Err(ProviderError::NoResponse)
    }

    async fn report_evidence(&self, _evidence: Evidence) -> Result<(), ProviderError> {
        Err(ProviderError::NoResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_operation_fails() {
        let p = DeadProvider::new("test-chain");
        assert_eq!(p.chain_id(), "test-chain");
        assert!(matches!(
            p.signed_header(1).await,
            Err(ProviderError::NoResponse)
        ));
        assert!(matches!(
            p.validator_set(1).await,
            Err(ProviderError::NoResponse)
        ));
    }
}
