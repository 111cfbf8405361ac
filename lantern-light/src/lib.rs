//! Light Client Protocol for Lantern.
//!
//! Answers one question: given a previously trusted block header, can we
//! safely trust another header at a different height without replaying the
//! full chain?
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        LIGHT CLIENT ENGINE                           │
//! │                                                                      │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │ TRUST STORE                                                    │  │
//! │  │  - Signed header + next validator set per trusted height       │  │
//! │  │  - Monotone: a written height never changes                    │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! │                                                                      │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │ VERIFIER                                                       │  │
//! │  │  - Adjacent: next-validators continuity + 2/3 commit           │  │
//! │  │  - Skipping: 1/3 trusted overlap + 2/3 commit, bisected        │  │
//! │  │  - Backwards: parent-hash linkage from a trusted descendant    │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! │                                                                      │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │ PROVIDERS                                                      │  │
//! │  │  - One primary, N witnesses, rotated on failure                │  │
//! │  │  - Divergence -> conflicting-headers evidence to everyone      │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use lantern_light::{LightClientBuilder, MemoryStore, TrustOptions};
//!
//! let client = LightClientBuilder::new()
//!     .build(
//!         TrustOptions::new(period, trusted_height, trusted_hash)?,
//!         primary,
//!         witnesses,
//!         Arc::new(MemoryStore::new()),
//!     )
//!     .await?;
//!
//! let header = client.verify_header_at_height(1000, Utc::now()).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod errors;
pub mod provider;
pub mod store;
pub mod verifier;

pub use client::{ConfirmationFn, LightClient, LightClientBuilder, VerificationMode};
pub use errors::{LightClientError, Result};
pub use provider::{Provider, ProviderError, LATEST_HEIGHT};
pub use store::{MemoryStore, TrustStore};
pub use verifier::{
    default_max_clock_drift, is_within_trust_period, verify, verify_adjacent, verify_skipping,
    TrustOptions,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::client::{LightClient, LightClientBuilder};
    pub use crate::errors::{LightClientError, Result};
    pub use crate::provider::{Provider, ProviderError};
    pub use crate::store::{MemoryStore, TrustStore};
    pub use crate::verifier::TrustOptions;
}
