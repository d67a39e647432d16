use std::collections::{BTreeMap, BTreeSet};

use oracle_types::{PriceAccount, ReferenceProduct, MAX_PRICE_COMPONENTS, PRICE_ACCOUNT_SIZE, PRICE_ACCOUNT_TYPE};
use solana_sdk::pubkey::Pubkey;

use super::{IssueKind, PlacedProduct, Planner};
use crate::instructions;
use crate::keys::price_label;

/// The price account of one product, as the price phase sees it.
struct PriceTarget<'g> {
    key: Pubkey,
    /// `None` when this plan creates the account.
    current: Option<&'g PriceAccount>,
}

impl<'a> Planner<'a> {
    pub(super) fn plan_prices(&mut self, placed: &BTreeMap<String, PlacedProduct>) {
        let reference = self.reference;
        for (jump, product) in placed {
            let Some(rp) = reference.products.get(jump) else { continue };
            let Some(price) = self.price_target(jump, rp, *product) else { continue };
            self.plan_publishers(jump, &price);
            self.plan_min_publishers(jump, rp, &price);
        }
    }

    fn price_target(&mut self, jump: &str, rp: &ReferenceProduct, product: PlacedProduct) -> Option<PriceTarget<'a>> {
        let graph = self.graph;

        if !product.created {
            if let Some(existing) = graph.products.get(&product.key).filter(|p| p.has_price()) {
                let key = existing.first_price_key;
                let Some(current) = graph.prices.get(&key) else {
                    self.issue(
                        IssueKind::MissingAccount,
                        Some(jump),
                        Some(key),
                        "product links a price account that was not fetched".to_string(),
                    );
                    return None;
                };
                if current.exponent != rp.exponent {
                    tracing::warn!(
                        target: "sync",
                        jump_symbol = jump,
                        on_chain = current.exponent,
                        reference = rp.exponent,
                        "price exponent differs; exponents cannot be changed in place"
                    );
                }
                return Some(PriceTarget { key, current: Some(current) });
            }
            if !self.require_signer(product.key, Some(jump), "product") {
                return None;
            }
        }

        let label = price_label(jump);
        let key = match self.keys.lookup(&label) {
            Ok(Some(k)) if graph.prices.contains_key(&k) => {
                self.issue(
                    IssueKind::KeyMismatch,
                    Some(jump),
                    Some(k),
                    format!("`{label}` is already a price account of another product"),
                );
                return None;
            }
            Ok(Some(k)) => {
                self.add_signer(label.clone(), k);
                k
            }
            Ok(None) => self.resolve_key(&label, Some(jump), self.opts.generate_keys)?,
            Err(e) => {
                self.issue(IssueKind::KeyStore, Some(jump), None, format!("`{label}`: {e}"));
                return None;
            }
        };

        let opts = self.opts;
        let mut ixs = Vec::with_capacity(2);
        if !graph.is_uninitialized(&key) {
            ixs.push(self.create_ix(&key, opts.rent.price, PRICE_ACCOUNT_SIZE));
        }
        ixs.push(instructions::add_price(&opts.program_key, &opts.funding_key, &product.key, &key, rp.exponent));
        self.push_step(format!("add price {jump}"), Some(jump), ixs);
        Some(PriceTarget { key, current: None })
    }

    /// Disables publishers that lost permission, then enables new ones.
    fn plan_publishers(&mut self, jump: &str, price: &PriceTarget<'_>) {
        let reference = self.reference;
        let Some(tiers) = reference.permissions.get(jump) else {
            tracing::warn!(target: "sync", jump_symbol = jump, "no permissions entry; publishers left as they are");
            return;
        };

        let mut desired = BTreeSet::new();
        for name in tiers.get(PRICE_ACCOUNT_TYPE).into_iter().flatten() {
            match reference.publishers.key(name) {
                Some(k) => {
                    desired.insert(k);
                }
                None => self.issue(
                    IssueKind::UnknownPublisher,
                    Some(jump),
                    Some(price.key),
                    format!("publisher `{name}` is not in the publishers directory"),
                ),
            }
        }

        let current = price.current.map(PriceAccount::enabled_publishers).unwrap_or_default();
        let occupied = price.current.map_or(0, |p| p.components.len());
        let to_disable: Vec<Pubkey> = current.difference(&desired).copied().collect();
        let mut to_enable: Vec<Pubkey> = desired.difference(&current).copied().collect();
        if to_disable.is_empty() && to_enable.is_empty() {
            return;
        }
        if price.current.is_some() && !self.require_signer(price.key, Some(jump), "price account") {
            return;
        }

        let room = MAX_PRICE_COMPONENTS.saturating_sub(occupied - to_disable.len());
        if to_enable.len() > room {
            self.issue(
                IssueKind::Capacity,
                Some(jump),
                Some(price.key),
                format!("{} publisher(s) requested but only {room} slot(s) free", to_enable.len()),
            );
            to_enable.truncate(room);
        }

        let (program, funding) = (self.opts.program_key, self.opts.funding_key);
        for (publishers, enable) in [(to_disable, false), (to_enable, true)] {
            for publisher in publishers {
                let name = reference.publishers.display(&publisher);
                let verb = if enable { "enable" } else { "disable" };
                let ix = instructions::toggle_publisher(&program, &funding, &price.key, &publisher, enable);
                self.push_step(format!("{verb} {name} on {jump}"), Some(jump), vec![ix]);
            }
        }
    }

    fn plan_min_publishers(&mut self, jump: &str, rp: &ReferenceProduct, price: &PriceTarget<'_>) {
        let Some(wanted) = rp.min_publishers else { return };
        if let Some(current) = price.current {
            if current.min_publishers == wanted {
                return;
            }
            if !self.require_signer(price.key, Some(jump), "price account") {
                return;
            }
        }
        let opts = self.opts;
        let ix = instructions::set_minimum_publishers(&opts.program_key, &opts.funding_key, &price.key, wanted);
        self.push_step(format!("set min publishers {wanted} on {jump}"), Some(jump), vec![ix]);
    }
}
