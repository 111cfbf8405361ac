//! The light client engine.
//!
//! Advances trust from a bootstrap anchor to arbitrary heights:
//! sequentially, by skipping with bisection, or backwards by hash linkage.
//! Every newly verified header is corroborated against witness providers
//! before it is persisted; divergence produces conflicting-headers
//! evidence reported to every provider.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lantern_core::{Evidence, SignedHeader, TrustThreshold, ValidatorSet};

use crate::errors::{LightClientError, Result};
use crate::provider::{Provider, ProviderError, LATEST_HEIGHT};
use crate::store::TrustStore;
use crate::verifier::{self, TrustOptions};

/// Base delay between provider retries.
const RETRY_BASE_DELAY_MS: u64 = 500;
/// Cap on the exponential retry delay.
const RETRY_MAX_DELAY_MS: u64 = 8_000;

/// Hook consulted before a witness is promoted to primary. Receives the
/// candidate's description; returning `false` vetoes the promotion.
pub type ConfirmationFn = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// How the engine advances trust to higher heights.
#[derive(Debug, Clone, Copy)]
pub enum VerificationMode {
    /// Fetch and verify every intervening height.
    Sequential,
    /// Skip across gaps using the trusted-overlap rule, bisecting on
    /// insufficient overlap.
    Skipping(TrustThreshold),
}

/// Builder for [`LightClient`] options.
pub struct LightClientBuilder {
    mode: VerificationMode,
    max_clock_drift: Duration,
    max_retry_attempts: u32,
    pruning_size: usize,
    confirmation: Option<ConfirmationFn>,
}

impl Default for LightClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LightClientBuilder {
    /// Start with the defaults: skipping verification at 1/3 trust,
    /// 10 s clock drift, 10 retry attempts, pruning size 1000.
    pub fn new() -> Self {
        Self {
            mode: VerificationMode::Skipping(TrustThreshold::ONE_THIRD),
            max_clock_drift: verifier::default_max_clock_drift(),
            max_retry_attempts: 10,
            pruning_size: 1000,
            confirmation: None,
        }
    }

    /// Verify every intervening header instead of skipping.
    pub fn sequential_verification(mut self) -> Self {
        self.mode = VerificationMode::Sequential;
        self
    }

    /// Use skipping verification with an explicit trust level.
    pub fn skipping_verification(mut self, trust_level: TrustThreshold) -> Self {
        self.mode = VerificationMode::Skipping(trust_level);
        self
    }

    /// Tolerated clock drift between this node and proposers.
    pub fn max_clock_drift(mut self, drift: Duration) -> Self {
        self.max_clock_drift = drift;
        self
    }

    /// Retry budget for provider operations.
    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts.max(1);
        self
    }

    /// Number of trusted states retained by pruning.
    pub fn pruning_size(mut self, size: usize) -> Self {
        self.pruning_size = size;
        self
    }

    /// Hook consulted before a witness is promoted to primary.
    pub fn confirmation_function(mut self, f: ConfirmationFn) -> Self {
        self.confirmation = Some(f);
        self
    }

    /// Bootstrap the trusted root and build the engine.
    ///
    /// Fetches the signed header at the trust-options height from the
    /// primary, checks it against the trusted hash, fetches the validator
    /// sets at that height and the next, verifies the commit, and persists
    /// the pair as the trust root.
    pub async fn build(
        self,
        trust_options: TrustOptions,
        primary: Arc<dyn Provider>,
        witnesses: Vec<Arc<dyn Provider>>,
        store: Arc<dyn TrustStore>,
    ) -> Result<LightClient> {
        let chain_id = primary.chain_id().to_string();
        let witnesses_opted_out = witnesses.is_empty();

        let client = LightClient {
            chain_id,
            trusting_period: trust_options.period,
            mode: self.mode,
            max_clock_drift: self.max_clock_drift,
            max_retry_attempts: self.max_retry_attempts,
            pruning_size: self.pruning_size,
            witnesses_opted_out,
            stopped: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                primary,
                witnesses,
                store,
                confirmation: self.confirmation,
            }),
        };

        client.bootstrap(&trust_options).await?;
        Ok(client)
    }
}

struct Inner {
    primary: Arc<dyn Provider>,
    witnesses: Vec<Arc<dyn Provider>>,
    store: Arc<dyn TrustStore>,
    confirmation: Option<ConfirmationFn>,
}

/// A fetched (signed header, validator set, next validator set) triple with
/// both set hashes already checked against the header.
type HeaderTriple = (SignedHeader, ValidatorSet, ValidatorSet);

/// The light client engine.
///
/// All public methods serialise on an internal mutex; the underlying
/// verification state is not safe for interleaving.
pub struct LightClient {
    chain_id: String,
    trusting_period: Duration,
    mode: VerificationMode,
    max_clock_drift: Duration,
    max_retry_attempts: u32,
    pruning_size: usize,
    witnesses_opted_out: bool,
    stopped: AtomicBool,
    inner: Mutex<Inner>,
}

impl LightClient {
    /// The chain this client verifies.
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Whether the engine accepts new work.
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the engine. In-flight verifications fail with
    /// [`LightClientError::Stopped`] at their next suspension point.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// The current primary provider.
    pub async fn primary(&self) -> Arc<dyn Provider> {
        self.inner.lock().await.primary.clone()
    }

    /// The current witness providers.
    pub async fn witnesses(&self) -> Vec<Arc<dyn Provider>> {
        self.inner.lock().await.witnesses.clone()
    }

    /// Trusted signed header at `height`, if stored.
    pub async fn trusted_header(&self, height: u64) -> Result<Option<SignedHeader>> {
        self.inner.lock().await.store.signed_header(height)
    }

    /// Trusted validator set at `height`, if stored.
    pub async fn trusted_validator_set(&self, height: u64) -> Result<Option<ValidatorSet>> {
        self.inner.lock().await.store.validator_set(height)
    }

    /// Drop all trusted state. Used when the trust root is replaced.
    pub async fn cleanup(&self) -> Result<()> {
        info!("dropping all trusted state");
        self.inner.lock().await.store.prune(0)
    }

    /// Return the trusted header at `height`, verifying and storing as
    /// needed.
    ///
    /// If the store already holds the height and the anchor is within the
    /// trust period, no provider is contacted.
    pub async fn verify_header_at_height(
        &self,
        height: u64,
        now: DateTime<Utc>,
    ) -> Result<SignedHeader> {
        self.ensure_running()?;
        if height == 0 {
            return Err(LightClientError::invalid_header(
                height,
                "height must be at least 1",
            ));
        }

        let mut inner = self.inner.lock().await;

        if let Some(stored) = inner.store.signed_header(height)? {
            return Ok(stored);
        }

        match inner.store.signed_header_before(height)? {
            Some(_) => self.verify_forward(&mut inner, height, now).await,
            None => self.verify_backwards(&mut inner, height, now).await,
        }
    }

    /// Verify a header the caller already fetched, together with its
    /// validator set, and store it on success.
    pub async fn verify_header(
        &self,
        signed_header: &SignedHeader,
        validator_set: &ValidatorSet,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_running()?;
        let height = signed_header.height();
        let mut inner = self.inner.lock().await;

        if let Some(stored) = inner.store.signed_header(height)? {
            if stored.hash() == signed_header.hash() {
                return Ok(());
            }
            return Err(LightClientError::invalid_header(
                height,
                "conflicts with already-trusted header at this height",
            ));
        }

        let set_hash = validator_set.hash();
        if signed_header.header.validators_hash != set_hash {
            return Err(LightClientError::ValidatorSetMismatch {
                height,
                reason: format!(
                    "validators hash {} does not match supplied set hash {}",
                    signed_header.header.validators_hash, set_hash
                ),
            });
        }

        if inner.store.signed_header_before(height)?.is_none() {
            let root = inner.store.first_signed_header_height()?.unwrap_or(0);
            return Err(LightClientError::TargetHeightBelowTrustRoot {
                height,
                root,
            });
        }

        // The caller supplies the target pair; the set for the following
        // height still has to come from the primary.
        let primary = inner.primary.clone();
        let next_vals = self
            .fetch_checked_validator_set(&primary, signed_header, height + 1)
            .await?;
        let seed = (
            signed_header.clone(),
            validator_set.clone(),
            next_vals,
        );

        self.advance_to(&mut inner, height, Some(seed), now).await?;
        Ok(())
    }

    // === bootstrap ===

    async fn bootstrap(&self, options: &TrustOptions) -> Result<()> {
        let inner = self.inner.lock().await;
        let primary = inner.primary.clone();
        info!(
            height = options.height,
            primary = %primary.describe(),
            "bootstrapping trust root"
        );

        let sh = self.fetch_signed_header(&primary, options.height).await?;
        if sh.hash() != options.hash {
            return Err(LightClientError::invalid_header(
                options.height,
                format!(
                    "header hash {} does not match trusted hash {}",
                    sh.hash(),
                    options.hash
                ),
            ));
        }
        sh.validate_basic(&self.chain_id)
            .map_err(|e| LightClientError::invalid_header(options.height, e.to_string()))?;

        let vals = self
            .fetch_validator_set_raw(&primary, options.height)
            .await?;
        if vals.hash() != sh.header.validators_hash {
            return Err(LightClientError::ValidatorSetMismatch {
                height: options.height,
                reason: "validator set does not hash to header's validators hash".to_string(),
            });
        }
        let next_vals = self
            .fetch_checked_validator_set(&primary, &sh, options.height + 1)
            .await?;

        vals.verify_commit_light(&self.chain_id, &sh.commit.block_id, sh.height(), &sh.commit)
            .map_err(|source| LightClientError::InvalidCommit {
                height: options.height,
                source,
            })?;

        inner.store.save_signed_header_and_validator_set(&sh, &next_vals)
    }

    // === forward verification ===

    async fn verify_forward(
        &self,
        inner: &mut Inner,
        target: u64,
        now: DateTime<Utc>,
    ) -> Result<SignedHeader> {
        self.advance_to(inner, target, None, now).await?;
        inner
            .store
            .signed_header(target)?
            .ok_or_else(|| LightClientError::store("verified header missing"))
    }

    /// Advance trust to `target`, rotating the primary on provider
    /// failure. The target triple may be supplied by the caller.
    async fn advance_to(
        &self,
        inner: &mut Inner,
        target: u64,
        seed: Option<HeaderTriple>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        loop {
            self.ensure_running()?;

            let anchor = self.anchor_below(inner, target)?;
            verifier::ensure_within_trust_period(&anchor.0, self.trusting_period, now)?;

            let primary = inner.primary.clone();
            let result = match self.mode {
                VerificationMode::Sequential => {
                    self.sequential_chain(&primary, &anchor, target, seed.clone(), now)
                        .await
                }
                VerificationMode::Skipping(level) => {
                    self.skipping_chain(&primary, &anchor, target, seed.clone(), now, level)
                        .await
                }
            };

            match result {
                Ok(pairs) => return self.commit_verified(inner, pairs, now).await,
                Err(e) if Self::is_primary_failure(&e) => {
                    warn!(error = %e, "primary failed, rotating");
                    self.replace_primary(inner).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Corroborate each newly verified pair with the witnesses, then
    /// persist it and prune.
    async fn commit_verified(
        &self,
        inner: &mut Inner,
        pairs: Vec<(SignedHeader, ValidatorSet)>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for (sh, next_vals) in pairs {
            self.compare_with_witnesses(inner, &sh, now).await?;
            inner
                .store
                .save_signed_header_and_validator_set(&sh, &next_vals)?;
            debug!(height = sh.height(), hash = %sh.hash(), "trusted new header");
        }
        inner.store.prune(self.pruning_size)?;
        Ok(())
    }

    /// Highest trusted state strictly below `target`.
    fn anchor_below(&self, inner: &Inner, target: u64) -> Result<(SignedHeader, ValidatorSet)> {
        let sh = inner
            .store
            .signed_header_before(target)?
            .ok_or_else(|| LightClientError::store("no trusted state below target"))?;
        let next_vals = inner
            .store
            .validator_set(sh.height() + 1)?
            .ok_or_else(|| {
                LightClientError::store(format!(
                    "missing validator set for trusted height {}",
                    sh.height() + 1
                ))
            })?;
        Ok((sh, next_vals))
    }

    /// Verify every height from the anchor up to `target` adjacently.
    ///
    /// Returns the newly verified pairs in ascending height order; nothing
    /// is persisted here.
    async fn sequential_chain(
        &self,
        provider: &Arc<dyn Provider>,
        anchor: &(SignedHeader, ValidatorSet),
        target: u64,
        seed: Option<HeaderTriple>,
        now: DateTime<Utc>,
    ) -> Result<Vec<(SignedHeader, ValidatorSet)>> {
        let mut trusted = anchor.clone();
        let mut vals = anchor.1.clone();
        let mut verified = Vec::new();

        for height in anchor.0.height() + 1..=target {
            self.ensure_running()?;

            let (sh, next_vals) = match &seed {
                Some((seed_sh, _, seed_next)) if height == target => {
                    (seed_sh.clone(), seed_next.clone())
                }
                _ => {
                    let sh = self.fetch_signed_header(provider, height).await?;
                    let next_vals = self
                        .fetch_checked_validator_set(provider, &sh, height + 1)
                        .await?;
                    (sh, next_vals)
                }
            };

            verifier::verify_adjacent(
                &self.chain_id,
                &trusted.0,
                &sh,
                &vals,
                self.trusting_period,
                now,
                self.max_clock_drift,
            )?;

            verified.push((sh.clone(), next_vals.clone()));
            trusted = (sh, next_vals.clone());
            vals = next_vals;
        }

        Ok(verified)
    }

    /// Verify `target` against the anchor by skipping, bisecting on
    /// insufficient trusted overlap.
    ///
    /// Returns the newly verified pairs in the order they became trusted;
    /// nothing is persisted here.
    async fn skipping_chain(
        &self,
        provider: &Arc<dyn Provider>,
        anchor: &(SignedHeader, ValidatorSet),
        target: u64,
        seed: Option<HeaderTriple>,
        now: DateTime<Utc>,
        trust_level: TrustThreshold,
    ) -> Result<Vec<(SignedHeader, ValidatorSet)>> {
        let mut trusted = anchor.clone();
        let mut verified = Vec::new();
        let mut cache: BTreeMap<u64, HeaderTriple> = BTreeMap::new();
        if let Some(triple) = seed {
            cache.insert(triple.0.height(), triple);
        }
        let mut stack = vec![target];

        while let Some(&height) = stack.last() {
            self.ensure_running()?;

            let triple = match cache.get(&height) {
                Some(t) => t.clone(),
                None => {
                    let t = self.fetch_triple(provider, height).await?;
                    cache.insert(height, t.clone());
                    t
                }
            };

            match verifier::verify(
                &self.chain_id,
                &trusted.0,
                &trusted.1,
                &triple.0,
                &triple.1,
                self.trusting_period,
                now,
                self.max_clock_drift,
                trust_level,
            ) {
                Ok(()) => {
                    debug!(height, "skipping verification succeeded");
                    verified.push((triple.0.clone(), triple.2.clone()));
                    trusted = (triple.0, triple.2);
                    stack.pop();
                }
                Err(LightClientError::InsufficientTrustedOverlap { .. }) => {
                    let pivot = (trusted.0.height() + height) / 2;
                    debug!(
                        height,
                        pivot,
                        trusted = trusted.0.height(),
                        "insufficient overlap, bisecting"
                    );
                    if pivot <= trusted.0.height() || pivot >= height {
                        // Adjacent heights cannot be bisected further.
                        return Err(LightClientError::InsufficientTrustedOverlap { height });
                    }
                    stack.push(pivot);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(verified)
    }

    // === backwards verification ===

    /// Verify a height below the lowest trusted header by walking the
    /// parent-hash chain down from it.
    ///
    /// No signatures are checked on this path: each fetched header must
    /// hash to its already-trusted child's `last_block_id`, which links it
    /// to a trusted descendant.
    async fn verify_backwards(
        &self,
        inner: &mut Inner,
        target: u64,
        now: DateTime<Utc>,
    ) -> Result<SignedHeader> {
        let first = inner
            .store
            .first_signed_header_height()?
            .ok_or_else(|| LightClientError::store("store is empty"))?;

        if matches!(self.mode, VerificationMode::Sequential) {
            return Err(LightClientError::TargetHeightBelowTrustRoot {
                height: target,
                root: first,
            });
        }

        loop {
            self.ensure_running()?;

            let child = inner
                .store
                .signed_header(first)?
                .ok_or_else(|| LightClientError::store("missing first trusted header"))?;
            verifier::ensure_within_trust_period(&child, self.trusting_period, now)?;

            let primary = inner.primary.clone();
            match self.backwards_chain(&primary, child, target).await {
                Ok(pairs) => {
                    for (sh, next_vals) in pairs {
                        inner
                            .store
                            .save_signed_header_and_validator_set(&sh, &next_vals)?;
                        debug!(height = sh.height(), "trusted header by hash linkage");
                    }
                    return inner
                        .store
                        .signed_header(target)?
                        .ok_or_else(|| LightClientError::store("verified header missing"));
                }
                Err(e) if Self::is_primary_failure(&e) => {
                    warn!(error = %e, "primary failed, rotating");
                    self.replace_primary(inner).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn backwards_chain(
        &self,
        provider: &Arc<dyn Provider>,
        mut child: SignedHeader,
        target: u64,
    ) -> Result<Vec<(SignedHeader, ValidatorSet)>> {
        let mut verified = Vec::new();

        for height in (target..child.height()).rev() {
            self.ensure_running()?;

            let sh = self.fetch_signed_header(provider, height).await?;
            sh.validate_basic(&self.chain_id)
                .map_err(|e| LightClientError::invalid_header(height, e.to_string()))?;

            if child.header.last_block_id.hash != sh.hash() {
                return Err(LightClientError::invalid_header(
                    height,
                    format!(
                        "header hash {} does not match child's last block id {}",
                        sh.hash(),
                        child.header.last_block_id.hash
                    ),
                ));
            }
            if child.time() <= sh.time() {
                return Err(LightClientError::invalid_header(
                    height,
                    "time not before child's time",
                ));
            }

            // The parent is now linked to trusted state, so its
            // next-validators commitment can vouch for the fetched set.
            let next_vals = self
                .fetch_checked_validator_set(provider, &sh, height + 1)
                .await?;

            verified.push((sh.clone(), next_vals));
            child = sh;
        }

        Ok(verified)
    }

    // === witness reconciliation ===

    /// Ask every witness for its header at the same height, in parallel,
    /// and compare hashes.
    ///
    /// Witnesses are polled in list order; the first matching hash closes
    /// the comparison. A conflicting hash triggers full verification of
    /// the witness's chain and, if that chain also verifies, evidence
    /// submission to every provider. Witnesses that exhaust their retry
    /// budget are removed.
    async fn compare_with_witnesses(
        &self,
        inner: &mut Inner,
        sh: &SignedHeader,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if inner.witnesses.is_empty() {
            // An engine built without witnesses has explicitly opted out.
            if self.witnesses_opted_out {
                return Ok(());
            }
            return Err(LightClientError::NoWitnesses);
        }

        let height = sh.height();
        let fetches = inner.witnesses.iter().map(|w| {
            let w = w.clone();
            async move { self.with_retries(height, || w.signed_header(height)).await }
        });
        let results = join_all(fetches).await;

        let mut matched = false;
        let mut conflicts: Vec<usize> = Vec::new();
        let mut failed: Vec<usize> = Vec::new();

        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(witness_header) if witness_header.hash() == sh.hash() => {
                    if !matched {
                        debug!(height, witness = i, "witness corroborated header");
                    }
                    matched = true;
                }
                Ok(witness_header) => {
                    warn!(
                        height,
                        witness = i,
                        ours = %sh.hash(),
                        theirs = %witness_header.hash(),
                        "witness reported a different header"
                    );
                    conflicts.push(i);
                }
                Err(e) => {
                    warn!(height, witness = i, error = %e, "removing unresponsive witness");
                    failed.push(i);
                }
            }
        }

        for idx in conflicts {
            let witness = inner.witnesses[idx].clone();
            match self.verify_witness_chain(inner, &witness, height, now).await {
                Ok(alternative) if alternative.hash() != sh.hash() => {
                    let evidence = Evidence::conflicting_headers(sh.clone(), alternative);
                    self.report_evidence_to_all(inner, evidence).await;
                    return Err(LightClientError::ConflictingHeaders {
                        height,
                        witness: idx,
                    });
                }
                Ok(_) => {
                    // The witness's own chain resolves to our header; its
                    // earlier answer was garbage. Drop it.
                    failed.push(idx);
                }
                Err(e) => {
                    warn!(height, witness = idx, error = %e,
                        "witness chain did not verify, removing witness");
                    failed.push(idx);
                }
            }
        }

        failed.sort_unstable();
        failed.dedup();
        for i in failed.into_iter().rev() {
            inner.witnesses.remove(i);
        }

        if matched {
            Ok(())
        } else {
            Err(LightClientError::NoWitnesses)
        }
    }

    /// Run the full verification procedure for `height` against a single
    /// witness, from the last common trusted state, into a scratch store.
    async fn verify_witness_chain(
        &self,
        inner: &Inner,
        witness: &Arc<dyn Provider>,
        height: u64,
        now: DateTime<Utc>,
    ) -> Result<SignedHeader> {
        let anchor = self.anchor_below(inner, height)?;

        let trust_level = match self.mode {
            VerificationMode::Skipping(level) => level,
            VerificationMode::Sequential => TrustThreshold::ONE_THIRD,
        };
        // The witness's chain stays out of the trust store; only the
        // resulting header is needed for the evidence message.
        let pairs = self
            .skipping_chain(witness, &anchor, height, None, now, trust_level)
            .await?;

        pairs
            .into_iter()
            .map(|(sh, _)| sh)
            .last()
            .ok_or_else(|| LightClientError::store("witness chain produced no headers"))
    }

    async fn report_evidence_to_all(&self, inner: &Inner, evidence: Evidence) {
        info!(height = evidence.height(), "reporting conflicting-headers evidence");
        let providers: Vec<Arc<dyn Provider>> = std::iter::once(inner.primary.clone())
            .chain(inner.witnesses.iter().cloned())
            .collect();
        let reports = providers.iter().map(|p| {
            let p = p.clone();
            let ev = evidence.clone();
            async move {
                if let Err(e) = p.report_evidence(ev).await {
                    warn!(provider = %p.describe(), error = %e, "evidence report failed");
                }
            }
        });
        join_all(reports).await;
    }

    // === primary rotation ===

    /// Replace the primary with the first healthy witness.
    async fn replace_primary(&self, inner: &mut Inner) -> Result<()> {
        while !inner.witnesses.is_empty() {
            let candidate = inner.witnesses.remove(0);

            if let Some(confirm) = &inner.confirmation {
                if !confirm(&candidate.describe()) {
                    info!(candidate = %candidate.describe(), "primary replacement vetoed");
                    inner.witnesses.insert(0, candidate);
                    return Err(LightClientError::NoWitnesses);
                }
            }

            match candidate.signed_header(LATEST_HEIGHT).await {
                Ok(_) => {
                    info!(new_primary = %candidate.describe(), "promoted witness to primary");
                    inner.primary = candidate;
                    return Ok(());
                }
                Err(e) => {
                    warn!(candidate = %candidate.describe(), error = %e,
                        "witness unhealthy, not promoting");
                }
            }
        }
        Err(LightClientError::NoWitnesses)
    }

    fn is_primary_failure(error: &LightClientError) -> bool {
        matches!(
            error,
            LightClientError::NoResponse { .. } | LightClientError::Provider { .. }
        )
    }

    // === fetching ===

    async fn fetch_triple(
        &self,
        provider: &Arc<dyn Provider>,
        height: u64,
    ) -> Result<HeaderTriple> {
        let sh = self.fetch_signed_header(provider, height).await?;
        let vals = self.fetch_validator_set_raw(provider, height).await?;
        if vals.hash() != sh.header.validators_hash {
            return Err(LightClientError::ValidatorSetMismatch {
                height,
                reason: "validator set does not hash to header's validators hash".to_string(),
            });
        }
        let next_vals = self
            .fetch_checked_validator_set(provider, &sh, height + 1)
            .await?;
        Ok((sh, vals, next_vals))
    }

    async fn fetch_signed_header(
        &self,
        provider: &Arc<dyn Provider>,
        height: u64,
    ) -> Result<SignedHeader> {
        let sh = self
            .with_retries(height, || provider.signed_header(height))
            .await
            .map_err(|e| self.map_provider_error(height, e))?;
        if sh.header.chain_id != self.chain_id {
            return Err(LightClientError::Provider {
                height,
                source: ProviderError::Unreliable(format!(
                    "provider served chain {}, expected {}",
                    sh.header.chain_id, self.chain_id
                )),
            });
        }
        if height != LATEST_HEIGHT && sh.height() != height {
            return Err(LightClientError::Provider {
                height,
                source: ProviderError::Unreliable(format!(
                    "asked for height {}, got {}",
                    height,
                    sh.height()
                )),
            });
        }
        Ok(sh)
    }

    async fn fetch_validator_set_raw(
        &self,
        provider: &Arc<dyn Provider>,
        height: u64,
    ) -> Result<ValidatorSet> {
        self.with_retries(height, || provider.validator_set(height))
            .await
            .map_err(|e| self.map_provider_error(height, e))
    }

    /// Fetch the validator set at `height` and require it to hash to the
    /// header's `next_validators_hash` (the header is at `height - 1`).
    async fn fetch_checked_validator_set(
        &self,
        provider: &Arc<dyn Provider>,
        header: &SignedHeader,
        height: u64,
    ) -> Result<ValidatorSet> {
        let vals = self.fetch_validator_set_raw(provider, height).await?;
        if vals.hash() != header.header.next_validators_hash {
            return Err(LightClientError::ValidatorSetMismatch {
                height,
                reason: "validator set does not hash to header's next validators hash"
                    .to_string(),
            });
        }
        Ok(vals)
    }

    /// Run a provider operation under the retry budget with exponential
    /// backoff (base 500 ms, factor 2, cap 8 s).
    async fn with_retries<T, F, Fut>(
        &self,
        height: u64,
        mut op: F,
    ) -> std::result::Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut delay_ms = RETRY_BASE_DELAY_MS;
        let attempts = self.max_retry_attempts;
        for attempt in 1..=attempts {
            if !self.is_running() {
                return Err(ProviderError::NoResponse);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(ProviderError::NotFound { .. }) if height == LATEST_HEIGHT => {
                    return Err(ProviderError::NoResponse)
                }
                Err(e @ ProviderError::NotFound { .. }) => return Err(e),
                Err(e) => {
                    if attempt == attempts {
                        return Err(e);
                    }
                    debug!(height, attempt, error = %e, "provider fetch failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(RETRY_MAX_DELAY_MS);
                }
            }
        }
        Err(ProviderError::NoResponse)
    }

    fn map_provider_error(&self, height: u64, error: ProviderError) -> LightClientError {
        match error {
            ProviderError::NoResponse => LightClientError::NoResponse {
                height,
                attempts: self.max_retry_attempts,
            },
            other => LightClientError::Provider {
                height,
                source: other,
            },
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(LightClientError::Stopped)
        }
    }
}
