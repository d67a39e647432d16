//! Live submission of batches.
//!
//! Batches are layered by `Dag` and each layer is submitted concurrently;
//! layers run in order. Every batch gets a fresh blockhash right before it is
//! signed, is sent exactly once, then polled until it reaches the configured
//! commitment or the confirmation timeout expires. Failures are recorded per
//! batch; batches depending on a failed one are skipped, the rest continue.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use estimator::SizeBudget;
use futures::future::join_all;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::TransactionError,
};

use crate::chunking::Batch;
use crate::dag::{Dag, NodeId};
use crate::fetch::{with_retries, FetchConfig, FetchError, OracleRpc};
use crate::keys::{KeyStore, KeyStoreError};
use crate::serializer::{build_transaction, SerializeError};
use crate::sync::SignerRef;

#[derive(Debug, Clone)]
pub struct SubmitConfig {
    pub commitment: CommitmentConfig,
    pub confirm_timeout: Duration,
    /// First confirmation poll delay; doubles up to `poll_max`.
    pub poll_initial: Duration,
    pub poll_max: Duration,
    pub budget: SizeBudget,
    /// Retry policy for blockhash reads.
    pub fetch: FetchConfig,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            commitment: CommitmentConfig::finalized(),
            confirm_timeout: Duration::from_secs(90),
            poll_initial: Duration::from_millis(160),
            poll_max: Duration::from_secs(1),
            budget: SizeBudget::default(),
            fetch: FetchConfig::default(),
        }
    }
}

/// Shared stop flag. Once set, no new batch is sent; in-flight
/// confirmations finish or time out on their own.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Keypairs available for signing, addressed by public key.
#[derive(Default)]
pub struct SignerPool {
    keypairs: HashMap<Pubkey, Keypair>,
    order: Vec<Pubkey>,
}

impl SignerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kp: Keypair) {
        let key = kp.pubkey();
        if self.keypairs.insert(key, kp).is_none() {
            self.order.push(key);
        }
    }

    /// Loads every signer a plan names from the key store.
    pub fn load(store: &dyn KeyStore, signers: &[SignerRef]) -> Result<Self, KeyStoreError> {
        let mut pool = Self::new();
        for s in signers {
            pool.insert(store.load_keypair(&s.label)?);
        }
        Ok(pool)
    }

    /// Public keys in insertion order.
    pub fn keys(&self) -> &[Pubkey] {
        &self.order
    }

    pub fn get(&self, key: &Pubkey) -> Option<&Keypair> {
        self.keypairs.get(key)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("blockhash: {0}")]
    Blockhash(FetchError),
    #[error("no keypair for signer {0}")]
    MissingSigner(Pubkey),
    #[error(transparent)]
    Build(#[from] SerializeError),
    #[error("send: {0}")]
    Send(FetchError),
    #[error("transaction {signature} failed: {error}")]
    Transaction { signature: Signature, error: TransactionError },
    #[error("transaction {signature} not confirmed after {waited:?}")]
    ConfirmationTimeout { signature: Signature, waited: Duration },
}

#[derive(Debug)]
pub enum BatchOutcome {
    Confirmed { signature: Signature },
    Failed(SubmitError),
    Skipped { reason: String },
}

impl BatchOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, BatchOutcome::Confirmed { .. })
    }
}

#[derive(Debug)]
pub struct BatchReport {
    pub index: usize,
    pub labels: Vec<String>,
    pub outcome: BatchOutcome,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps = self.labels.join(", ");
        match &self.outcome {
            BatchOutcome::Confirmed { signature } => write!(f, "batch {} [{steps}]: confirmed {signature}", self.index),
            BatchOutcome::Failed(e) => write!(f, "batch {} [{steps}]: failed: {e}", self.index),
            BatchOutcome::Skipped { reason } => write!(f, "batch {} [{steps}]: skipped: {reason}", self.index),
        }
    }
}

#[derive(Debug, Default)]
pub struct SubmitReport {
    /// One entry per batch, in batch order.
    pub batches: Vec<BatchReport>,
}

impl SubmitReport {
    pub fn confirmed(&self) -> usize {
        self.batches.iter().filter(|b| b.outcome.is_confirmed()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchReport> {
        self.batches.iter().filter(|b| !b.outcome.is_confirmed())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

pub struct Submitter<'a, R: ?Sized> {
    rpc: &'a R,
    signers: &'a SignerPool,
    cfg: SubmitConfig,
    cancel: CancelFlag,
}

impl<'a, R: OracleRpc + ?Sized> Submitter<'a, R> {
    pub fn new(rpc: &'a R, signers: &'a SignerPool, cfg: SubmitConfig, cancel: CancelFlag) -> Self {
        Self { rpc, signers, cfg, cancel }
    }

    pub async fn submit(&self, batches: &[Batch], payer: &Pubkey) -> SubmitReport {
        let dag = Dag::build(batches, payer);
        let layers = dag.layers().unwrap_or_else(|e| {
            tracing::warn!(target: "sender", error = %e, "falling back to sequential submission");
            (0..batches.len() as NodeId).map(|i| vec![i]).collect()
        });

        let mut outcomes: Vec<Option<BatchOutcome>> = (0..batches.len()).map(|_| None).collect();
        for (depth, layer) in layers.iter().enumerate() {
            let mut ready = Vec::with_capacity(layer.len());
            for &node in layer {
                let i = node as usize;
                if self.cancel.is_cancelled() {
                    outcomes[i] = Some(BatchOutcome::Skipped { reason: "cancelled".to_string() });
                    continue;
                }
                let failed_dep = dag
                    .predecessors(node)
                    .unwrap_or_default()
                    .iter()
                    .find(|&&p| !outcomes[p as usize].as_ref().is_some_and(BatchOutcome::is_confirmed));
                match failed_dep {
                    Some(p) => {
                        outcomes[i] = Some(BatchOutcome::Skipped { reason: format!("depends on failed batch {p}") });
                    }
                    None => ready.push(i),
                }
            }

            tracing::info!(target: "sender", layer = depth, batches = ready.len(), "submitting layer");
            let results = join_all(ready.iter().map(|&i| self.submit_one(i, &batches[i], payer))).await;
            for (i, outcome) in ready.into_iter().zip(results) {
                outcomes[i] = Some(outcome);
            }
        }

        let batches = batches
            .iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (batch, outcome))| BatchReport {
                index,
                labels: batch.labels.clone(),
                outcome: outcome.unwrap_or(BatchOutcome::Skipped { reason: "not scheduled".to_string() }),
            })
            .collect();
        let report = SubmitReport { batches };
        for b in report.failures() {
            tracing::warn!(target: "sender", "{b}");
        }
        tracing::info!(
            target: "sender",
            confirmed = report.confirmed(),
            total = report.batches.len(),
            "submission finished"
        );
        report
    }

    async fn submit_one(&self, index: usize, batch: &Batch, payer: &Pubkey) -> BatchOutcome {
        match self.send_and_confirm(index, batch, payer).await {
            Ok(signature) => BatchOutcome::Confirmed { signature },
            Err(e) => BatchOutcome::Failed(e),
        }
    }

    async fn send_and_confirm(&self, index: usize, batch: &Batch, payer: &Pubkey) -> Result<Signature, SubmitError> {
        let mut signers: Vec<&dyn Signer> = Vec::with_capacity(batch.signers.len());
        for key in &batch.signers {
            let kp = self.signers.get(key).ok_or(SubmitError::MissingSigner(*key))?;
            signers.push(kp);
        }

        let commitment = self.cfg.commitment;
        let blockhash =
            with_retries(&self.cfg.fetch, "get_latest_blockhash", || self.rpc.get_latest_blockhash(commitment))
                .await
                .map_err(SubmitError::Blockhash)?;
        let tx = build_transaction(payer, &batch.instructions, &signers, blockhash, &self.cfg.budget)?;

        let signature = self.rpc.send_transaction(&tx).await.map_err(SubmitError::Send)?;
        tracing::info!(target: "sender", batch = index, %signature, steps = batch.labels.len(), "sent");
        self.confirm(index, signature).await
    }

    async fn confirm(&self, index: usize, signature: Signature) -> Result<Signature, SubmitError> {
        let start = tokio::time::Instant::now();
        let deadline = start + self.cfg.confirm_timeout;
        let mut delay = self.cfg.poll_initial;
        loop {
            match self.rpc.get_signature_status(&signature, self.cfg.commitment).await {
                Ok(Some(Ok(()))) => {
                    let elapsed = start.elapsed();
                    tracing::info!(target: "sender", batch = index, %signature, ?elapsed, "confirmed");
                    return Ok(signature);
                }
                Ok(Some(Err(error))) => return Err(SubmitError::Transaction { signature, error }),
                Ok(None) => {}
                Err(e) => tracing::debug!(target: "sender", batch = index, error = %e, "status poll failed"),
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(SubmitError::ConfirmationTimeout { signature, waited: now - start });
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(self.cfg.poll_max);
        }
    }
}
