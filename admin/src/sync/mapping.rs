use oracle_types::{MAPPING_ACCOUNT_SIZE, MAPPING_PRODUCT_LIMIT};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};

use super::{IssueKind, MappingSlot, Planner, SyncError};
use crate::instructions;
use crate::keys::mapping_label;
use crate::linked_list::order_mapping_keys;

impl Planner<'_> {
    /// Records the room left in every mapping of the list, in list order.
    pub(super) fn load_mappings(&mut self) -> Result<(), SyncError> {
        let chain = order_mapping_keys(self.graph.mappings.values())?;
        let graph = self.graph;
        self.slots = chain
            .iter()
            .filter_map(|k| graph.mappings.get(k))
            .filter(|m| m.free_slots() > 0)
            .map(|m| MappingSlot { key: m.key, free: m.free_slots(), can_sign: None })
            .collect();
        self.mapping_tail = chain.last().copied();
        self.mapping_count = chain.len();
        let free: usize = self.slots.iter().map(|s| s.free).sum();
        tracing::debug!(target: "sync", mappings = chain.len(), free, "mapping capacity");
        Ok(())
    }

    /// Mapping account that takes the next new product.
    ///
    /// Existing mappings fill up in list order; a mapping is only required to
    /// sign once a product lands in it. When every mapping is full a new one is
    /// appended. `add_mapping` only accepts a full tail, so that step always
    /// follows the products that filled it.
    pub(super) fn take_slot(&mut self, jump: &str) -> Option<Pubkey> {
        loop {
            let Some(i) = self.slots.iter().position(|s| s.free > 0 && s.can_sign != Some(false)) else {
                self.append_mapping()?;
                continue;
            };
            let key = self.slots[i].key;
            if self.slots[i].can_sign.is_none() {
                let ok = self.require_signer(key, Some(jump), "mapping account");
                self.slots[i].can_sign = Some(ok);
                if !ok {
                    continue;
                }
            }
            self.slots[i].free -= 1;
            return Some(key);
        }
    }

    fn append_mapping(&mut self) -> Option<Pubkey> {
        if self.mappings_exhausted {
            return None;
        }
        let appended = self.try_append_mapping();
        self.mappings_exhausted = appended.is_none();
        appended
    }

    fn try_append_mapping(&mut self) -> Option<Pubkey> {
        if let Some(tail) = self.mapping_tail {
            if self.slots.iter().any(|s| s.key == tail && s.free > 0) {
                self.issue(
                    IssueKind::Capacity,
                    None,
                    Some(tail),
                    "mapping tail has room but cannot sign, so no mapping can follow it".to_string(),
                );
                return None;
            }
            if !self.require_signer(tail, None, "mapping tail") {
                return None;
            }
        }

        let label = mapping_label(self.mapping_count);
        let Some(key) = self.resolve_key(&label, None, self.opts.generate_keys) else {
            self.issue(IssueKind::Capacity, None, None, "every mapping account is full".to_string());
            return None;
        };
        if self.graph.mappings.contains_key(&key) {
            self.issue(
                IssueKind::KeyMismatch,
                None,
                Some(key),
                format!("`{label}` points at a mapping already in the list"),
            );
            return None;
        }

        let opts = self.opts;
        let mut ixs = Vec::with_capacity(2);
        if !self.graph.is_uninitialized(&key) {
            ixs.push(self.create_ix(&key, opts.rent.mapping, MAPPING_ACCOUNT_SIZE));
        }
        ixs.push(match self.mapping_tail {
            Some(prev) => instructions::add_mapping(&opts.program_key, &opts.funding_key, &prev, &key),
            None => instructions::init_mapping(&opts.program_key, &opts.funding_key, &key),
        });
        self.push_step(format!("add {label}"), None, ixs);
        self.slots.push(MappingSlot { key, free: MAPPING_PRODUCT_LIMIT, can_sign: Some(true) });
        self.mapping_tail = Some(key);
        self.mapping_count += 1;
        Some(key)
    }

    pub(super) fn create_ix(&self, key: &Pubkey, lamports: u64, space: usize) -> Instruction {
        instructions::create_account(&self.opts.program_key, &self.opts.funding_key, key, lamports, space)
    }
}
