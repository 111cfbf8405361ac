//! RocksDB trust store implementation.
//!
//! Key layout, namespaced by chain id and big-endian height so range
//! scans walk heights in order:
//!
//! - `SH/<chainID>/<h>`: serialised signed header
//! - `VS/<chainID>/<h>`: serialised validator set
//! - `SIZE/<chainID>`: number of stored signed headers

use std::path::Path;
use std::sync::Arc;

use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use lantern_core::{SignedHeader, ValidatorSet};
use lantern_light::errors::{LightClientError, Result};
use lantern_light::TrustStore;

/// Key prefixes.
mod prefix {
    pub const SIGNED_HEADER: &str = "SH";
    pub const VALIDATOR_SET: &str = "VS";
    pub const SIZE: &str = "SIZE";
}

/// RocksDB-backed trust store.
pub struct RocksStore {
    db: Arc<DB>,
    chain_id: String,
}

impl RocksStore {
    /// Open or create a store at the given path for one chain.
    pub fn open(path: impl AsRef<Path>, chain_id: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let chain_id = chain_id.into();
        info!(?path, %chain_id, "opening trust store");

        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path).map_err(|e| LightClientError::Store(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            chain_id,
        })
    }

    /// Open a store in a temporary directory (for testing).
    pub fn open_temp(chain_id: impl Into<String>) -> Result<Self> {
        let dir = tempfile::tempdir().map_err(|e| LightClientError::Store(e.to_string()))?;
        let path = dir.path().to_path_buf();
        // Keep the temp dir alive for the life of the process.
        std::mem::forget(dir);
        Self::open(path, chain_id)
    }

    fn header_key(&self, height: u64) -> Vec<u8> {
        Self::keyed(prefix::SIGNED_HEADER, &self.chain_id, height)
    }

    fn valset_key(&self, height: u64) -> Vec<u8> {
        Self::keyed(prefix::VALIDATOR_SET, &self.chain_id, height)
    }

    fn size_key(&self) -> Vec<u8> {
        format!("{}/{}", prefix::SIZE, self.chain_id).into_bytes()
    }

    fn keyed(kind: &str, chain_id: &str, height: u64) -> Vec<u8> {
        let mut key = format!("{}/{}/", kind, chain_id).into_bytes();
        key.extend_from_slice(&height.to_be_bytes());
        key
    }

    fn header_prefix(&self) -> Vec<u8> {
        format!("{}/{}/", prefix::SIGNED_HEADER, self.chain_id).into_bytes()
    }

    fn height_from_key(prefix_len: usize, key: &[u8]) -> Option<u64> {
        let tail = key.get(prefix_len..)?;
        let arr: [u8; 8] = tail.try_into().ok()?;
        Some(u64::from_be_bytes(arr))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| LightClientError::Store(e.to_string()))
    }

    fn size(&self) -> Result<u64> {
        match self.get(&self.size_key())? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| LightClientError::store("invalid size encoding"))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// Stored header heights in ascending order.
    fn header_heights(&self) -> Result<Vec<u64>> {
        let prefix = self.header_prefix();
        let mut heights = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(&prefix, rocksdb::Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(|e| LightClientError::Store(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(height) = Self::height_from_key(prefix.len(), &key) {
                heights.push(height);
            }
        }
        Ok(heights)
    }
}

impl Clone for RocksStore {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            chain_id: self.chain_id.clone(),
        }
    }
}

impl TrustStore for RocksStore {
    fn save_signed_header_and_validator_set(
        &self,
        signed_header: &SignedHeader,
        next_validator_set: &ValidatorSet,
    ) -> Result<()> {
        let height = signed_header.height();
        let header_key = self.header_key(height);
        let valset_key = self.valset_key(height + 1);

        let header_bytes = bincode::serialize(signed_header)
            .map_err(|e| LightClientError::Store(e.to_string()))?;
        let valset_bytes = bincode::serialize(next_validator_set)
            .map_err(|e| LightClientError::Store(e.to_string()))?;

        let mut is_new = true;
        if let Some(existing) = self.get(&header_key)? {
            if existing != header_bytes {
                return Err(LightClientError::store(format!(
                    "refusing to overwrite trusted header at height {}",
                    height
                )));
            }
            is_new = false;
        }
        if let Some(existing) = self.get(&valset_key)? {
            if existing != valset_bytes {
                return Err(LightClientError::store(format!(
                    "refusing to overwrite trusted validator set at height {}",
                    height + 1
                )));
            }
        }

        let mut batch = WriteBatch::default();
        batch.put(&header_key, &header_bytes);
        batch.put(&valset_key, &valset_bytes);
        if is_new {
            batch.put(self.size_key(), (self.size()? + 1).to_be_bytes());
        }
        self.db
            .write(batch)
            .map_err(|e| LightClientError::Store(e.to_string()))?;
        debug!(height, "persisted trusted state");
        Ok(())
    }

    fn signed_header(&self, height: u64) -> Result<Option<SignedHeader>> {
        match self.get(&self.header_key(height))? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| LightClientError::Store(e.to_string())),
            None => Ok(None),
        }
    }

    fn validator_set(&self, height: u64) -> Result<Option<ValidatorSet>> {
        match self.get(&self.valset_key(height))? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| LightClientError::Store(e.to_string())),
            None => Ok(None),
        }
    }

    fn first_signed_header_height(&self) -> Result<Option<u64>> {
        Ok(self.header_heights()?.first().copied())
    }

    fn last_signed_header_height(&self) -> Result<Option<u64>> {
        Ok(self.header_heights()?.last().copied())
    }

    fn signed_header_before(&self, height: u64) -> Result<Option<SignedHeader>> {
        let below = self
            .header_heights()?
            .into_iter()
            .take_while(|h| *h < height)
            .last();
        match below {
            Some(h) => self.signed_header(h),
            None => Ok(None),
        }
    }

    fn prune(&self, size: usize) -> Result<()> {
        let heights = self.header_heights()?;
        if heights.len() <= size {
            return Ok(());
        }
        let excess = heights.len() - size;

        let mut batch = WriteBatch::default();
        for height in heights.iter().take(excess) {
            batch.delete(self.header_key(*height));
            batch.delete(self.valset_key(*height + 1));
        }
        batch.put(self.size_key(), (size as u64).to_be_bytes());
        self.db
            .write(batch)
            .map_err(|e| LightClientError::Store(e.to_string()))?;
        debug!(removed = excess, retained = size, "pruned trust store");
        Ok(())
    }
}
