use std::collections::BTreeSet;

use solana_program::{instruction::Instruction, pubkey::Pubkey};

/// Signature bytes per required signer.
pub const SIGNATURE_BYTES: usize = 64;
/// header(3)
const MESSAGE_HEADER_BYTES: usize = 3;
const BLOCKHASH_BYTES: usize = 32;

#[inline]
pub fn shortvec_len(n: usize) -> usize {
    if n < 128 { 1 } else if n < 16384 { 2 } else { 3 }
}

/// Compiled instruction size: 1 (program idx) + sv(accs) + accs + sv(data) + data_len
#[inline]
pub fn compiled_ix_bytes(ix: &Instruction) -> usize {
    let accs = ix.accounts.len();
    let data_len = ix.data.len();
    1 + shortvec_len(accs) + accs + shortvec_len(data_len) + data_len
}

/// Running account of what a legacy transaction would serialize to.
///
/// Mirrors how a legacy message is compiled: one key table entry per distinct
/// address (payer, metas, program ids), one signature slot per distinct signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyFootprint {
    keys: BTreeSet<Pubkey>,
    signers: BTreeSet<Pubkey>,
    instr_count: usize,
    instr_bytes: usize,
}

impl LegacyFootprint {
    pub fn with_payer(payer: &Pubkey) -> Self {
        Self {
            keys: BTreeSet::from([*payer]),
            signers: BTreeSet::from([*payer]),
            instr_count: 0,
            instr_bytes: 0,
        }
    }

    pub fn add(&mut self, ix: &Instruction) {
        self.keys.insert(ix.program_id);
        for m in &ix.accounts {
            self.keys.insert(m.pubkey);
            if m.is_signer {
                self.signers.insert(m.pubkey);
            }
        }
        self.instr_count += 1;
        self.instr_bytes += compiled_ix_bytes(ix);
    }

    pub fn num_signers(&self) -> usize {
        self.signers.len()
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn instr_count(&self) -> usize {
        self.instr_count
    }

    /// Message bytes: header + sv(keys) + 32*keys + blockhash + sv(ixs) + compiled ixs.
    pub fn message_bytes(&self) -> usize {
        MESSAGE_HEADER_BYTES
            + shortvec_len(self.keys.len())
            + self.keys.len() * 32
            + BLOCKHASH_BYTES
            + shortvec_len(self.instr_count)
            + self.instr_bytes
    }

    /// Full wire size: sv(sigs) + 64*sigs + message.
    pub fn wire_bytes(&self) -> usize {
        shortvec_len(self.signers.len()) + SIGNATURE_BYTES * self.signers.len() + self.message_bytes()
    }
}

/// Serialized size of a legacy transaction paying from `payer` and carrying `ixs`.
pub fn legacy_transaction_size(payer: &Pubkey, ixs: &[Instruction]) -> usize {
    let mut fp = LegacyFootprint::with_payer(payer);
    for ix in ixs {
        fp.add(ix);
    }
    fp.wire_bytes()
}
