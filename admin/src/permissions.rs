use std::collections::BTreeSet;

use oracle_types::{ReferenceOverrides, ReferencePermissions};

/// Applies `overrides[network]` to the reference permissions.
///
/// A `false` override revokes every publisher of that symbol: each account
/// type keeps its entry, with an empty set, so the reconciler still disables
/// publishers that are enabled on chain. Everything else passes through.
pub fn resolve(
    permissions: &ReferencePermissions,
    overrides: &ReferenceOverrides,
    network: &str,
) -> ReferencePermissions {
    let Some(network_overrides) = overrides.get(network) else {
        return permissions.clone();
    };

    permissions
        .iter()
        .map(|(symbol, tiers)| {
            let revoked = network_overrides.get(symbol) == Some(&false);
            let tiers = if revoked {
                tracing::info!(target: "sync", network, symbol = %symbol, "publishers revoked by override");
                tiers.keys().map(|tier| (tier.clone(), BTreeSet::new())).collect()
            } else {
                tiers.clone()
            };
            (symbol.clone(), tiers)
        })
        .collect()
}
