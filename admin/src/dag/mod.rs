//! Dependency graph between batches.
//!
//! Two batches that write the same account must land in plan order: a price
//! account cannot take publishers before the transaction that creates it has
//! confirmed. For every writable account we chain the batches touching it in
//! ascending batch index (n_i -> n_{i+1}); the union over all accounts is a
//! DAG whose layers can be submitted concurrently, layer after layer.
//!
//! The fee payer is writable in every transaction and is excluded, otherwise
//! the whole plan would collapse into one chain.
//!
//! Edges always point from a lower to a higher index, so the graph is acyclic
//! by construction; `topo_order` and `layers` still detect cycles.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use solana_sdk::pubkey::Pubkey;

use crate::chunking::Batch;

/// Node identifier inside the DAG (index into the batch list).
pub type NodeId = u32;

/// Why an ordering edge exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub account: Pubkey,
    pub before: NodeId,
    pub after: NodeId,
}

#[derive(Debug, Clone)]
pub struct Dag {
    len: usize,
    /// edges[u] contains v for each edge u -> v.
    pub edges: Vec<Vec<NodeId>>,
    pub rev_edges: Vec<Vec<NodeId>>,
    pub conflicts: Vec<Conflict>,
}

#[derive(Debug, thiserror::Error)]
pub enum DagError {
    #[error("cycle detected between batches")]
    CycleDetected,
    #[error("batch index out of bounds")]
    IndexOob,
}

impl Dag {
    pub fn build(batches: &[Batch], payer: &Pubkey) -> Self {
        let n = batches.len();
        let mut dag = Dag {
            len: n,
            edges: vec![Vec::new(); n],
            rev_edges: vec![Vec::new(); n],
            conflicts: Vec::new(),
        };

        // BTreeMap so conflicts come out in a stable order
        let mut by_account: BTreeMap<Pubkey, Vec<NodeId>> = BTreeMap::new();
        for (idx, batch) in batches.iter().enumerate() {
            let writes: BTreeSet<Pubkey> = batch
                .instructions
                .iter()
                .flat_map(|ix| ix.accounts.iter())
                .filter(|m| m.is_writable && m.pubkey != *payer)
                .map(|m| m.pubkey)
                .collect();
            for key in writes {
                by_account.entry(key).or_default().push(idx as NodeId);
            }
        }

        let mut edge_set = HashSet::new();
        for (account, nodes) in by_account {
            for pair in nodes.windows(2) {
                let (u, v) = (pair[0], pair[1]);
                if edge_set.insert((u, v)) {
                    dag.edges[u as usize].push(v);
                    dag.rev_edges[v as usize].push(u);
                }
                dag.conflicts.push(Conflict { account, before: u, after: v });
            }
        }
        dag
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn indegrees(&self) -> Vec<usize> {
        self.rev_edges.iter().map(Vec::len).collect()
    }

    /// Kahn's algorithm, seeded in index order.
    pub fn topo_order(&self) -> Result<Vec<NodeId>, DagError> {
        let mut indeg = self.indegrees();
        let mut q: VecDeque<NodeId> = (0..self.len).filter(|&v| indeg[v] == 0).map(|v| v as NodeId).collect();

        let mut out = Vec::with_capacity(self.len);
        while let Some(u) = q.pop_front() {
            out.push(u);
            for &v in &self.edges[u as usize] {
                let dv = &mut indeg[v as usize];
                *dv -= 1;
                if *dv == 0 {
                    q.push_back(v);
                }
            }
        }

        if out.len() != self.len {
            return Err(DagError::CycleDetected);
        }
        Ok(out)
    }

    /// Batches grouped so that every batch's predecessors sit in earlier layers.
    pub fn layers(&self) -> Result<Vec<Vec<NodeId>>, DagError> {
        let mut indeg = self.indegrees();
        let mut frontier: BTreeSet<NodeId> =
            (0..self.len).filter(|&v| indeg[v] == 0).map(|v| v as NodeId).collect();

        let mut layers: Vec<Vec<NodeId>> = Vec::new();
        let mut placed = 0;
        while !frontier.is_empty() {
            let layer: Vec<NodeId> = frontier.iter().copied().collect();
            let mut next = BTreeSet::new();
            for &u in &layer {
                for &v in &self.edges[u as usize] {
                    let dv = &mut indeg[v as usize];
                    *dv -= 1;
                    if *dv == 0 {
                        next.insert(v);
                    }
                }
            }
            placed += layer.len();
            layers.push(layer);
            frontier = next;
        }

        if placed != self.len {
            return Err(DagError::CycleDetected);
        }
        Ok(layers)
    }

    pub fn predecessors(&self, v: NodeId) -> Result<&[NodeId], DagError> {
        self.rev_edges.get(v as usize).map(Vec::as_slice).ok_or(DagError::IndexOob)
    }
}
