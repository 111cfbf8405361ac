//! The trust store: verified signed headers and validator sets by height.
//!
//! A trusted state is the pair of a signed header at height `h` and the
//! validator set for height `h + 1` (the set the header's
//! `next_validators_hash` commits to). Saving a pair therefore writes the
//! header at `h` and the set at `h + 1`.
//!
//! The store is monotone: once a height is written its bytes never change.
//! Stores are single-writer, multi-reader and safe to share.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use lantern_core::{SignedHeader, ValidatorSet};

use crate::errors::{LightClientError, Result};

/// Persistent index of trusted state by height.
pub trait TrustStore: Send + Sync {
    /// Save a signed header (at its height) and the validator set for the
    /// following height.
    ///
    /// Writing a height that already exists with different bytes is an
    /// error; rewriting identical bytes is a no-op.
    fn save_signed_header_and_validator_set(
        &self,
        signed_header: &SignedHeader,
        next_validator_set: &ValidatorSet,
    ) -> Result<()>;

    /// Signed header at `height`, if stored.
    fn signed_header(&self, height: u64) -> Result<Option<SignedHeader>>;

    /// Validator set at `height`, if stored.
    fn validator_set(&self, height: u64) -> Result<Option<ValidatorSet>>;

    /// Lowest stored signed-header height.
    fn first_signed_header_height(&self) -> Result<Option<u64>>;

    /// Highest stored signed-header height.
    fn last_signed_header_height(&self) -> Result<Option<u64>>;

    /// Greatest stored signed header with height strictly below `height`.
    fn signed_header_before(&self, height: u64) -> Result<Option<SignedHeader>>;

    /// Retain only the newest `size` signed headers (and their sets),
    /// deleting the oldest. Idempotent.
    fn prune(&self, size: usize) -> Result<()>;
}

/// In-memory trust store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    headers: BTreeMap<u64, SignedHeader>,
    valsets: BTreeMap<u64, ValidatorSet>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored signed headers.
    pub fn len(&self) -> usize {
        self.inner.read().headers.len()
    }

    /// Whether the store holds no headers.
    pub fn is_empty(&self) -> bool {
        self.inner.read().headers.is_empty()
    }
}

impl TrustStore for MemoryStore {
    fn save_signed_header_and_validator_set(
        &self,
        signed_header: &SignedHeader,
        next_validator_set: &ValidatorSet,
    ) -> Result<()> {
        let height = signed_header.height();
        let mut inner = self.inner.write();

        if let Some(existing) = inner.headers.get(&height) {
            if existing != signed_header {
                return Err(LightClientError::store(format!(
                    "refusing to overwrite trusted header at height {}",
                    height
                )));
            }
        }
        if let Some(existing) = inner.valsets.get(&(height + 1)) {
            if existing != next_validator_set {
                return Err(LightClientError::store(format!(
                    "refusing to overwrite trusted validator set at height {}",
                    height + 1
                )));
            }
        }

        inner.headers.insert(height, signed_header.clone());
        inner
            .valsets
            .insert(height + 1, next_validator_set.clone());
        Ok(())
    }

    fn signed_header(&self, height: u64) -> Result<Option<SignedHeader>> {
        Ok(self.inner.read().headers.get(&height).cloned())
    }

    fn validator_set(&self, height: u64) -> Result<Option<ValidatorSet>> {
        Ok(self.inner.read().valsets.get(&height).cloned())
    }

    fn first_signed_header_height(&self) -> Result<Option<u64>> {
        Ok(self.inner.read().headers.keys().next().copied())
    }

    fn last_signed_header_height(&self) -> Result<Option<u64>> {
        Ok(self.inner.read().headers.keys().next_back().copied())
    }

    fn signed_header_before(&self, height: u64) -> Result<Option<SignedHeader>> {
        Ok(self
            .inner
            .read()
            .headers
            .range(..height)
            .next_back()
            .map(|(_, sh)| sh.clone()))
    }

    fn prune(&self, size: usize) -> Result<()> {
        let mut inner = self.inner.write();
        while inner.headers.len() > size {
            let Some(height) = inner.headers.keys().next().copied() else {
                break;
            };
            inner.headers.remove(&height);
            inner.valsets.remove(&(height + 1));
        }
        Ok(())
    }
}
