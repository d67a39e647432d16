use std::collections::BTreeMap;

use oracle_types::{ReferenceProduct, PRODUCT_ACCOUNT_SIZE, PRODUCT_METADATA_CAPACITY};
use solana_sdk::pubkey::Pubkey;

use super::{IssueKind, PlacedProduct, Planner, ProductTarget};
use crate::instructions;
use crate::keys::product_label;

impl Planner<'_> {
    /// Decides, per reference product, whether it exists on chain and which key it uses.
    /// Products that cannot be handled at all are reported here and left out.
    pub(super) fn classify_products(&mut self) -> BTreeMap<String, ProductTarget> {
        let reference = self.reference;
        let mut out = BTreeMap::new();
        for (jump, rp) in reference.products {
            if let Some(target) = self.classify(jump, rp) {
                out.insert(jump.clone(), target);
            }
        }
        out
    }

    fn classify(&mut self, jump: &str, rp: &ReferenceProduct) -> Option<ProductTarget> {
        let graph = self.graph;
        let label = product_label(jump);
        let on_chain = graph.product_by_symbol(&rp.symbol);

        let known = match self.keys.lookup(&label) {
            Ok(k) => k,
            Err(e) => {
                self.issue(IssueKind::KeyStore, Some(jump), None, format!("`{label}`: {e}"));
                return None;
            }
        };

        match (known, on_chain) {
            (Some(k), _) if graph.products.contains_key(&k) => {
                if let Some(p) = on_chain.filter(|p| p.key != k) {
                    self.issue(
                        IssueKind::KeyMismatch,
                        Some(jump),
                        Some(k),
                        format!("`{label}` and the on-chain product {} disagree", p.key),
                    );
                    return None;
                }
                Some(ProductTarget::Existing(k))
            }
            (Some(k), Some(p)) => {
                self.issue(
                    IssueKind::KeyMismatch,
                    Some(jump),
                    Some(k),
                    format!("{} is on chain as {} but `{label}` points elsewhere", rp.symbol, p.key),
                );
                None
            }
            (Some(k), None) if graph.is_uninitialized(&k) => Some(ProductTarget::Allocated(k)),
            (Some(k), None) => Some(ProductTarget::Known(k)),
            (None, Some(p)) => {
                self.issue(
                    IssueKind::MissingKey,
                    Some(jump),
                    Some(p.key),
                    format!("{} is on chain but `{label}` is missing; run restore-links", rp.symbol),
                );
                None
            }
            (None, None) if self.opts.generate_keys => Some(ProductTarget::Generate),
            (None, None) => {
                self.issue(
                    IssueKind::MissingKey,
                    Some(jump),
                    None,
                    format!("no keypair `{label}` and key generation is disabled"),
                );
                None
            }
        }
    }

    /// Creates missing products and rewrites drifted metadata.
    pub(super) fn plan_products(
        &mut self,
        targets: &BTreeMap<String, ProductTarget>,
    ) -> BTreeMap<String, PlacedProduct> {
        let reference = self.reference;
        let mut placed = BTreeMap::new();

        for (jump, target) in targets {
            let Some(rp) = reference.products.get(jump) else { continue };

            if let Err(e) = rp.metadata.encode_with_capacity(PRODUCT_METADATA_CAPACITY) {
                let account = match target {
                    ProductTarget::Existing(k) => Some(*k),
                    _ => None,
                };
                self.issue(IssueKind::Encoding, Some(jump), account, e.to_string());
                // an existing product still gets its price account reconciled
                if let Some(key) = account {
                    placed.insert(jump.clone(), PlacedProduct { key, created: false });
                }
                continue;
            }

            if let ProductTarget::Existing(key) = *target {
                self.plan_metadata_update(jump, rp, key);
                placed.insert(jump.clone(), PlacedProduct { key, created: false });
                continue;
            }

            let Some(mapping_key) = self.take_slot(jump) else {
                self.issue(IssueKind::Capacity, Some(jump), None, "no mapping account has room".to_string());
                continue;
            };
            let key = match *target {
                ProductTarget::Allocated(k) | ProductTarget::Known(k) => {
                    self.add_signer(product_label(jump), k);
                    k
                }
                _ => match self.resolve_key(&product_label(jump), Some(jump), true) {
                    Some(k) => k,
                    None => continue,
                },
            };

            let opts = self.opts;
            let mut ixs = Vec::with_capacity(2);
            if !matches!(target, ProductTarget::Allocated(_)) {
                ixs.push(self.create_ix(&key, opts.rent.product, PRODUCT_ACCOUNT_SIZE));
            }
            ixs.push(instructions::add_product(&opts.program_key, &opts.funding_key, &mapping_key, &key));
            self.push_step(format!("add product {jump}"), Some(jump), ixs);

            match instructions::update_product(&opts.program_key, &opts.funding_key, &key, &rp.metadata) {
                Ok(ix) => self.push_step(format!("update product {jump}"), Some(jump), vec![ix]),
                Err(e) => self.issue(IssueKind::Encoding, Some(jump), Some(key), e.to_string()),
            }
            placed.insert(jump.clone(), PlacedProduct { key, created: true });
        }
        placed
    }

    fn plan_metadata_update(&mut self, jump: &str, rp: &ReferenceProduct, key: Pubkey) {
        let graph = self.graph;
        let Some(current) = graph.products.get(&key) else { return };
        if current.metadata == rp.metadata {
            return;
        }
        if !self.require_signer(key, Some(jump), "product") {
            return;
        }
        let opts = self.opts;
        match instructions::update_product(&opts.program_key, &opts.funding_key, &key, &rp.metadata) {
            Ok(ix) => self.push_step(format!("update product {jump}"), Some(jump), vec![ix]),
            Err(e) => self.issue(IssueKind::Encoding, Some(jump), Some(key), e.to_string()),
        }
    }
}
