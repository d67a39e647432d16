//! Recovers the order of the mapping-account linked list from an unordered fetch.
//!
//! Accounts are addressed by index into the input slice; `previous[i]` holds the
//! index of the account whose `next_mapping_key` is account `i`. The walk starts
//! at the tail (the only account with a zero `next_mapping_key`) and follows
//! `previous` back to the head.

use std::collections::HashMap;

use oracle_types::MappingAccount;
use solana_sdk::pubkey::Pubkey;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralError {
    #[error("mapping linked list has no end")]
    NoEnd,
    #[error("mapping linked list has {} ends: {keys:?}", keys.len())]
    MultipleEnds { keys: Vec<Pubkey> },
    #[error("mapping linked list is broken at {key}: reached {found} of {expected} accounts")]
    Broken { key: Pubkey, found: usize, expected: usize },
}

/// Mapping keys in list order, head first.
pub fn order_mapping_keys<'a, I>(accounts: I) -> Result<Vec<Pubkey>, StructuralError>
where
    I: IntoIterator<Item = &'a MappingAccount>,
{
    let accounts: Vec<&MappingAccount> = accounts.into_iter().collect();
    if accounts.is_empty() {
        return Ok(Vec::new());
    }

    let index_of: HashMap<Pubkey, usize> = accounts.iter().enumerate().map(|(i, a)| (a.key, i)).collect();
    let mut previous: Vec<Option<usize>> = vec![None; accounts.len()];
    let mut tails = Vec::new();

    for (i, account) in accounts.iter().enumerate() {
        if account.is_tail() {
            tails.push(i);
            continue;
        }
        match index_of.get(&account.next_mapping_key) {
            Some(&next) => {
                // two accounts pointing at the same successor is a fork
                if previous[next].replace(i).is_some() {
                    return Err(StructuralError::Broken {
                        key: account.next_mapping_key,
                        found: 0,
                        expected: accounts.len(),
                    });
                }
            }
            None => {
                return Err(StructuralError::Broken {
                    key: account.next_mapping_key,
                    found: 0,
                    expected: accounts.len(),
                })
            }
        }
    }

    let tail = match tails.as_slice() {
        [] => return Err(StructuralError::NoEnd),
        [only] => *only,
        many => {
            return Err(StructuralError::MultipleEnds {
                keys: many.iter().map(|&i| accounts[i].key).collect(),
            })
        }
    };

    let mut ordered = Vec::with_capacity(accounts.len());
    let mut visited = vec![false; accounts.len()];
    let mut current = tail;
    loop {
        if visited[current] {
            return Err(StructuralError::Broken {
                key: accounts[current].key,
                found: ordered.len(),
                expected: accounts.len(),
            });
        }
        visited[current] = true;
        ordered.push(accounts[current].key);
        if ordered.len() == accounts.len() {
            break;
        }
        current = match previous[current] {
            Some(p) => p,
            None => {
                return Err(StructuralError::Broken {
                    key: accounts[current].key,
                    found: ordered.len(),
                    expected: accounts.len(),
                })
            }
        };
    }
    ordered.reverse();
    Ok(ordered)
}
