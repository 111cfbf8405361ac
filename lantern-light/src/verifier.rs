//! Verification primitives: adjacent, skipping, and the trust-period check.

use chrono::{DateTime, Duration, Utc};

use lantern_core::{Error as CoreError, Hash, SignedHeader, TrustThreshold, ValidatorSet};

use crate::errors::{LightClientError, Result};

/// Default tolerated clock drift between this node and block proposers.
pub fn default_max_clock_drift() -> Duration {
    Duration::seconds(10)
}

/// Bootstrap anchor: a header the operator trusts out of band.
#[derive(Debug, Clone)]
pub struct TrustOptions {
    /// Maximum age a trusted header may reach before it expires.
    pub period: Duration,
    /// Height of the trusted header.
    pub height: u64,
    /// Hash of the trusted header.
    pub hash: Hash,
}

impl TrustOptions {
    /// Create trust options, validating the fields.
    pub fn new(period: Duration, height: u64, hash: Hash) -> Result<Self> {
        if period <= Duration::zero() {
            return Err(LightClientError::invalid_header(
                height,
                "trust period must be positive",
            ));
        }
        if height == 0 {
            return Err(LightClientError::invalid_header(
                height,
                "trusted height must be at least 1",
            ));
        }
        if hash.is_zero() {
            return Err(LightClientError::invalid_header(
                height,
                "trusted hash must not be zero",
            ));
        }
        Ok(Self {
            period,
            height,
            hash,
        })
    }
}

/// Whether a header signed at `header_time` can still anchor verification
/// at `now`.
pub fn is_within_trust_period(
    header_time: DateTime<Utc>,
    period: Duration,
    now: DateTime<Utc>,
) -> bool {
    now - header_time < period
}

/// Check the trust period, failing with [`LightClientError::OldHeaderExpired`].
pub fn ensure_within_trust_period(
    trusted: &SignedHeader,
    period: Duration,
    now: DateTime<Utc>,
) -> Result<()> {
    if is_within_trust_period(trusted.time(), period, now) {
        Ok(())
    } else {
        Err(LightClientError::OldHeaderExpired {
            height: trusted.height(),
            expired_at: trusted.time() + period,
        })
    }
}

/// Verify `untrusted` against trusted state, dispatching on the height gap.
///
/// `trusted_next_vals` is the validator set the trusted header committed
/// for its next height (the set stored alongside it).
#[allow(clippy::too_many_arguments)]
pub fn verify(
    chain_id: &str,
    trusted: &SignedHeader,
    trusted_next_vals: &ValidatorSet,
    untrusted: &SignedHeader,
    untrusted_vals: &ValidatorSet,
    trusting_period: Duration,
    now: DateTime<Utc>,
    max_clock_drift: Duration,
    trust_level: TrustThreshold,
) -> Result<()> {
    if untrusted.height() == trusted.height() + 1 {
        verify_adjacent(
            chain_id,
            trusted,
            untrusted,
            untrusted_vals,
            trusting_period,
            now,
            max_clock_drift,
        )
    } else {
        verify_skipping(
            chain_id,
            trusted,
            trusted_next_vals,
            untrusted,
            untrusted_vals,
            trusting_period,
            now,
            max_clock_drift,
            trust_level,
        )
    }
}

/// Verify a header exactly one height above the trusted one.
pub fn verify_adjacent(
    chain_id: &str,
    trusted: &SignedHeader,
    untrusted: &SignedHeader,
    untrusted_vals: &ValidatorSet,
    trusting_period: Duration,
    now: DateTime<Utc>,
    max_clock_drift: Duration,
) -> Result<()> {
    let height = untrusted.height();
    if height != trusted.height() + 1 {
        return Err(LightClientError::invalid_header(
            height,
            format!("not adjacent to trusted height {}", trusted.height()),
        ));
    }

    // The trusted header pre-committed the signer set for this height.
    if untrusted.header.validators_hash != trusted.header.next_validators_hash {
        return Err(LightClientError::ValidatorSetMismatch {
            height,
            reason: format!(
                "validators hash {} does not match trusted next validators hash {}",
                untrusted.header.validators_hash, trusted.header.next_validators_hash
            ),
        });
    }

    check_common(
        chain_id,
        trusted,
        untrusted,
        untrusted_vals,
        trusting_period,
        now,
        max_clock_drift,
    )?;

    untrusted_vals
        .verify_commit_light(
            chain_id,
            &untrusted.commit.block_id,
            height,
            &untrusted.commit,
        )
        .map_err(|source| LightClientError::InvalidCommit { height, source })
}

/// Verify a header across a height gap using the trusted-overlap rule.
///
/// Fails with [`LightClientError::InsufficientTrustedOverlap`] when the
/// validators carried over from the trusted set contribute too little
/// power; the engine recovers from that by bisecting.
#[allow(clippy::too_many_arguments)]
pub fn verify_skipping(
    chain_id: &str,
    trusted: &SignedHeader,
    trusted_next_vals: &ValidatorSet,
    untrusted: &SignedHeader,
    untrusted_vals: &ValidatorSet,
    trusting_period: Duration,
    now: DateTime<Utc>,
    max_clock_drift: Duration,
    trust_level: TrustThreshold,
) -> Result<()> {
    let height = untrusted.height();
    if height <= trusted.height() {
        return Err(LightClientError::invalid_header(
            height,
            format!("not above trusted height {}", trusted.height()),
        ));
    }

    check_common(
        chain_id,
        trusted,
        untrusted,
        untrusted_vals,
        trusting_period,
        now,
        max_clock_drift,
    )?;

    // Enough of the previously trusted validators must have re-signed.
    match trusted_next_vals.verify_commit_trusting(chain_id, &untrusted.commit, trust_level) {
        Ok(()) => {}
        Err(CoreError::InsufficientVotingPower { .. }) => {
            return Err(LightClientError::InsufficientTrustedOverlap { height });
        }
        Err(source) => return Err(LightClientError::InvalidCommit { height, source }),
    }

    // And the new set must independently commit the block.
    untrusted_vals
        .verify_commit_light(
            chain_id,
            &untrusted.commit.block_id,
            height,
            &untrusted.commit,
        )
        .map_err(|source| LightClientError::InvalidCommit { height, source })
}

/// Checks shared by the adjacent and skipping paths.
fn check_common(
    chain_id: &str,
    trusted: &SignedHeader,
    untrusted: &SignedHeader,
    untrusted_vals: &ValidatorSet,
    trusting_period: Duration,
    now: DateTime<Utc>,
    max_clock_drift: Duration,
) -> Result<()> {
    let height = untrusted.height();

    ensure_within_trust_period(trusted, trusting_period, now)?;

    untrusted
        .validate_basic(chain_id)
        .map_err(|e| LightClientError::invalid_header(height, e.to_string()))?;

    if untrusted.time() <= trusted.time() {
        return Err(LightClientError::invalid_header(
            height,
            format!(
                "time {} not after trusted time {}",
                untrusted.time(),
                trusted.time()
            ),
        ));
    }

    if untrusted.time() >= now + max_clock_drift {
        return Err(LightClientError::invalid_header(
            height,
            format!("time {} is from the future (now: {})", untrusted.time(), now),
        ));
    }

    let set_hash = untrusted_vals.hash();
    if untrusted.header.validators_hash != set_hash {
        return Err(LightClientError::ValidatorSetMismatch {
            height,
            reason: format!(
                "validators hash {} does not match fetched set hash {}",
                untrusted.header.validators_hash, set_hash
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{MockChain, MockChainBuilder, TestValidator};

    fn chain_with_rotation(rotate_at: Option<u64>) -> MockChain {
        let vals: Vec<TestValidator> = (0..4).map(|_| TestValidator::new(10)).collect();
        let mut builder = MockChainBuilder::new("verify-chain")
            .validators(vals)
            .height(100);
        if let Some(h) = rotate_at {
            builder = builder.rotate_at(h, (0..4).map(|_| TestValidator::new(10)).collect());
        }
        builder.build()
    }

    fn now_for(chain: &MockChain, height: u64) -> DateTime<Utc> {
        chain.signed_header(height).unwrap().time() + Duration::minutes(1)
    }

    #[test]
    fn test_trust_period() {
        let t0 = Utc::now();
        assert!(is_within_trust_period(t0, Duration::hours(1), t0 + Duration::minutes(59)));
        assert!(!is_within_trust_period(t0, Duration::hours(1), t0 + Duration::hours(1)));
        assert!(!is_within_trust_period(t0, Duration::hours(1), t0 + Duration::hours(2)));
    }

    #[test]
    fn test_trust_options_validation() {
        let h = lantern_core::hash(b"root");
        assert!(TrustOptions::new(Duration::hours(1), 1, h).is_ok());
        assert!(TrustOptions::new(Duration::zero(), 1, h).is_err());
        assert!(TrustOptions::new(Duration::hours(1), 0, h).is_err());
        assert!(TrustOptions::new(Duration::hours(1), 1, Hash::ZERO).is_err());
    }

    #[test]
    fn test_verify_adjacent_ok() {
        let chain = chain_with_rotation(None);
        let trusted = chain.signed_header(1).unwrap();
        let untrusted = chain.signed_header(2).unwrap();
        let vals = chain.validator_set(2).unwrap();

        verify_adjacent(
            "verify-chain",
            trusted,
            untrusted,
            vals,
            Duration::hours(10),
            now_for(&chain, 2),
            default_max_clock_drift(),
        )
        .unwrap();
    }

    #[test]
    fn test_verify_adjacent_rejects_gap() {
        let chain = chain_with_rotation(None);
        let err = verify_adjacent(
            "verify-chain",
            chain.signed_header(1).unwrap(),
            chain.signed_header(3).unwrap(),
            chain.validator_set(3).unwrap(),
            Duration::hours(10),
            now_for(&chain, 3),
            default_max_clock_drift(),
        )
        .unwrap_err();
        assert!(matches!(err, LightClientError::InvalidHeader { .. }));
    }

    #[test]
    fn test_verify_skipping_with_overlap() {
        let chain = chain_with_rotation(None);
        verify_skipping(
            "verify-chain",
            chain.signed_header(1).unwrap(),
            chain.validator_set(2).unwrap(),
            chain.signed_header(90).unwrap(),
            chain.validator_set(90).unwrap(),
            Duration::hours(10),
            now_for(&chain, 90),
            default_max_clock_drift(),
            TrustThreshold::ONE_THIRD,
        )
        .unwrap();
    }

    #[test]
    fn test_verify_skipping_insufficient_overlap() {
        // Full rotation at height 50: no trusted validator re-signs height 90.
        let chain = chain_with_rotation(Some(50));
        let err = verify_skipping(
            "verify-chain",
            chain.signed_header(1).unwrap(),
            chain.validator_set(2).unwrap(),
            chain.signed_header(90).unwrap(),
            chain.validator_set(90).unwrap(),
            Duration::hours(10),
            now_for(&chain, 90),
            default_max_clock_drift(),
            TrustThreshold::ONE_THIRD,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LightClientError::InsufficientTrustedOverlap { height: 90 }
        ));
    }

    #[test]
    fn test_verify_rejects_expired_anchor() {
        let chain = chain_with_rotation(None);
        let trusted = chain.signed_header(1).unwrap();
        let err = verify_adjacent(
            "verify-chain",
            trusted,
            chain.signed_header(2).unwrap(),
            chain.validator_set(2).unwrap(),
            Duration::minutes(5),
            trusted.time() + Duration::hours(2),
            default_max_clock_drift(),
        )
        .unwrap_err();
        assert!(matches!(err, LightClientError::OldHeaderExpired { .. }));
    }

    #[test]
    fn test_verify_rejects_future_header() {
        let chain = chain_with_rotation(None);
        let untrusted = chain.signed_header(2).unwrap();
        // "now" well before the header's own timestamp
        let err = verify_adjacent(
            "verify-chain",
            chain.signed_header(1).unwrap(),
            untrusted,
            chain.validator_set(2).unwrap(),
            Duration::hours(10),
            untrusted.time() - Duration::minutes(5),
            default_max_clock_drift(),
        )
        .unwrap_err();
        assert!(matches!(err, LightClientError::InvalidHeader { .. }));
    }

    #[test]
    fn test_verify_rejects_wrong_validator_set() {
        let chain = chain_with_rotation(None);
        let other = lantern_core::ValidatorSet::new(vec![lantern_core::Validator::new(
            lantern_core::SecretKey::generate().public_key(),
            10,
        )]);
        let err = verify_adjacent(
            "verify-chain",
            chain.signed_header(1).unwrap(),
            chain.signed_header(2).unwrap(),
            &other,
            Duration::hours(10),
            now_for(&chain, 2),
            default_max_clock_drift(),
        )
        .unwrap_err();
        assert!(matches!(err, LightClientError::ValidatorSetMismatch { .. }));
    }

    #[test]
    fn test_verify_dispatch() {
        let chain = chain_with_rotation(None);
        // Adjacent gap goes through the adjacent path (next-vals check).
        verify(
            "verify-chain",
            chain.signed_header(1).unwrap(),
            chain.validator_set(2).unwrap(),
            chain.signed_header(2).unwrap(),
            chain.validator_set(2).unwrap(),
            Duration::hours(10),
            now_for(&chain, 2),
            default_max_clock_drift(),
            TrustThreshold::ONE_THIRD,
        )
        .unwrap();

        // Larger gap goes through skipping.
        verify(
            "verify-chain",
            chain.signed_header(1).unwrap(),
            chain.validator_set(2).unwrap(),
            chain.signed_header(42).unwrap(),
            chain.validator_set(42).unwrap(),
            Duration::hours(10),
            now_for(&chain, 42),
            default_max_clock_drift(),
            TrustThreshold::ONE_THIRD,
        )
        .unwrap();
    }
}
