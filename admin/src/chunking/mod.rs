//! Size-bounded packing of planned steps into legacy transactions.
//!
//! - Steps are atomic: a step's instructions always share one transaction.
//! - Plan order is preserved; no re-sorting, every instruction appears once.
//! - Sizes are exact (`estimator::LegacyFootprint`), not heuristics, so a
//!   batch that fits here serializes within the packet limit.

use estimator::{LegacyFootprint, SizeBudget};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};

use crate::sync::PlannedStep;

/// One transaction's worth of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Indices into the step list that was batched.
    pub steps: Vec<usize>,
    pub labels: Vec<String>,
    pub instructions: Vec<Instruction>,
    /// Pool members that sign at least one instruction, in pool order.
    pub signers: Vec<Pubkey>,
    /// Serialized size of the signed transaction.
    pub wire_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("step {index} ({label}) needs {bytes} bytes alone, over the {limit} byte limit")]
    StepTooLarge { index: usize, label: String, bytes: usize, limit: usize },
}

/// Greedy first-fit: keep adding steps while the transaction stays within
/// `budget`, otherwise seal the batch and open a new one.
pub fn batch_steps(
    steps: &[PlannedStep],
    payer: &Pubkey,
    signer_pool: &[Pubkey],
    budget: &SizeBudget,
) -> Result<Vec<Batch>, ChunkError> {
    let limit = budget.limit();
    let mut batches = Vec::new();
    let mut cur = BatchAccumulator::new(payer);

    for (index, step) in steps.iter().enumerate() {
        if step.instructions.is_empty() {
            continue;
        }
        if !cur.can_add(step, limit) {
            if !cur.is_empty() {
                batches.push(cur.seal(signer_pool));
                cur = BatchAccumulator::new(payer);
            }
            if !cur.can_add(step, limit) {
                return Err(ChunkError::StepTooLarge {
                    index,
                    label: step.label.clone(),
                    bytes: cur.probe(step).wire_bytes(),
                    limit,
                });
            }
        }
        cur.add(index, step);
    }

    if !cur.is_empty() {
        batches.push(cur.seal(signer_pool));
    }
    tracing::debug!(target: "sender", steps = steps.len(), batches = batches.len(), "batched");
    Ok(batches)
}

/// Members of `pool` that appear as a signer in any of `ixs`, in pool order.
pub fn actual_signers(pool: &[Pubkey], ixs: &[Instruction]) -> Vec<Pubkey> {
    pool.iter()
        .filter(|k| ixs.iter().flat_map(|ix| ix.accounts.iter()).any(|m| m.is_signer && m.pubkey == **k))
        .copied()
        .collect()
}

struct BatchAccumulator {
    footprint: LegacyFootprint,
    steps: Vec<usize>,
    labels: Vec<String>,
    instructions: Vec<Instruction>,
}

impl BatchAccumulator {
    fn new(payer: &Pubkey) -> Self {
        Self {
            footprint: LegacyFootprint::with_payer(payer),
            steps: Vec::new(),
            labels: Vec::new(),
            instructions: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn probe(&self, step: &PlannedStep) -> LegacyFootprint {
        let mut fp = self.footprint.clone();
        for ix in &step.instructions {
            fp.add(ix);
        }
        fp
    }

    fn can_add(&self, step: &PlannedStep, limit: usize) -> bool {
        self.probe(step).wire_bytes() <= limit
    }

    fn add(&mut self, index: usize, step: &PlannedStep) {
        for ix in &step.instructions {
            self.footprint.add(ix);
        }
        self.steps.push(index);
        self.labels.push(step.label.clone());
        self.instructions.extend(step.instructions.iter().cloned());
    }

    fn seal(self, pool: &[Pubkey]) -> Batch {
        let signers = actual_signers(pool, &self.instructions);
        Batch {
            steps: self.steps,
            labels: self.labels,
            signers,
            wire_bytes: self.footprint.wire_bytes(),
            instructions: self.instructions,
        }
    }
}
