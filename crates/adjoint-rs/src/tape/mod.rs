//! Reverse-mode AD tape: dependency graph construction, lifetime
//! management, and the backward sweep.
//!
//! The tape records a DAG of differentiable variables. Nodes are keyed by
//! monotonically issued [`NodeId`]s; each node owns the list of edges to
//! its producers, carrying either a linear weight or a
//! scatter/gather pull-back. Two rewrites run eagerly while the graph is
//! built: chains of pointwise-linear nodes are contracted into single
//! edges, and parallel edges between the same pair of nodes are merged by
//! weight addition. `set_gradient` schedules the reachable subgraph and
//! `backward` consumes it in one descending-id pass.
//!
//! One tape instance serves one value type; construction and sweeps are
//! single-threaded by design. Callers needing parallelism partition work
//! across separate tapes.

mod context;
mod graphviz;
mod node;
mod special;
mod store;
mod sweep;

pub use context::{index_slot, IndexSlot};
pub use node::NodeId;

use std::collections::BTreeSet;

use crate::env;
use crate::error::{TapeError, TapeResult};
use crate::tape::context::ScatterGatherContext;
use crate::tape::node::{Edge, EdgeKind};
use crate::tape::store::NodeStore;
use crate::value::{safe_mul, TapeValue};

/// Construction and sweep counters, exposed for telemetry and tests.
/// The `*_last` marks snapshot the totals at the end of each freeing
/// sweep so the backward summary can report per-pass deltas.
#[derive(Debug, Default, Clone, Copy)]
pub struct TapeStats {
    pub nodes_created: u32,
    pub edge_contractions: u32,
    pub edge_merges: u32,
    pub(crate) nodes_created_last: u32,
    pub(crate) edge_contractions_last: u32,
    pub(crate) edge_merges_last: u32,
}

/// Reverse-mode AD tape over the value type `V`.
///
/// External holders (the differentiable-array wrapper) pin nodes through
/// [`inc_ref`](Tape::inc_ref)/[`dec_ref`](Tape::dec_ref); every edge
/// additionally holds one reference to its source. A node is reclaimed
/// when the last reference disappears, cascading to producers that were
/// only kept alive by its edges.
pub struct Tape<V: TapeValue> {
    store: NodeStore<V>,
    scheduled: BTreeSet<NodeId>,
    prefix: Vec<String>,
    ctx: Option<ScatterGatherContext>,
    log_level: u32,
    contract_edges: bool,
    stats: TapeStats,
}

impl<V: TapeValue> Tape<V> {
    pub fn new() -> Self {
        Tape {
            store: NodeStore::new(),
            scheduled: BTreeSet::new(),
            prefix: Vec::new(),
            ctx: None,
            log_level: env::default_log_level(),
            contract_edges: env::default_contract_edges(),
            stats: TapeStats::default(),
        }
    }

    /// Diagnostic verbosity: 0 silent, 1 sweep summaries, 3 node events,
    /// 4 per-edge trace.
    pub fn set_log_level(&mut self, level: u32) {
        self.log_level = level;
    }

    /// Enables or disables the edge-contraction rewrite. Disabling
    /// produces larger graphs with simpler invariants; gradients are
    /// unchanged up to floating-point associativity.
    pub fn set_contract_edges(&mut self, value: bool) {
        self.contract_edges = value;
    }

    pub fn stats(&self) -> &TapeStats {
        &self.stats
    }

    /// Number of live nodes in the store.
    pub fn node_count(&self) -> usize {
        self.store.len()
    }

    // ── Construction ────────────────────────────────────────────────

    /// Creates a fresh differentiable input of `size` lanes with a zeroed
    /// gradient.
    pub fn append_leaf(&mut self, size: usize) -> NodeId {
        let index = self.append_node(size, "'unnamed'");
        let node = self.store.get_mut(index).expect("node was just allocated");
        node.grad = V::zero(size);
        index
    }

    /// Creates a pointwise interior node with one parent. Returns the
    /// null id without allocating when the parent is null.
    pub fn append(&mut self, label: &str, size: usize, i1: NodeId, w1: V) -> TapeResult<NodeId> {
        if i1.is_none() {
            return Ok(NodeId::NONE);
        }
        let index = self.append_node(size, label);
        if self.log_level >= 3 {
            eprintln!("tape: append(\"{label}\", {index} <- {i1})");
        }
        self.append_edge(i1, index, w1)?;
        Ok(index)
    }

    /// Two-parent variant of [`append`](Tape::append). Null parents are
    /// skipped; if both are null, nothing is allocated.
    pub fn append2(
        &mut self,
        label: &str,
        size: usize,
        i1: NodeId,
        i2: NodeId,
        w1: V,
        w2: V,
    ) -> TapeResult<NodeId> {
        if i1.is_none() && i2.is_none() {
            return Ok(NodeId::NONE);
        }
        let index = self.append_node(size, label);
        if self.log_level >= 3 {
            eprintln!("tape: append(\"{label}\", {index} <- [{i1}, {i2}])");
        }
        self.append_edge(i1, index, w1)?;
        self.append_edge(i2, index, w2)?;
        Ok(index)
    }

    /// Three-parent variant of [`append`](Tape::append).
    pub fn append3(
        &mut self,
        label: &str,
        size: usize,
        i1: NodeId,
        i2: NodeId,
        i3: NodeId,
        w1: V,
        w2: V,
        w3: V,
    ) -> TapeResult<NodeId> {
        if i1.is_none() && i2.is_none() && i3.is_none() {
            return Ok(NodeId::NONE);
        }
        let index = self.append_node(size, label);
        if self.log_level >= 3 {
            eprintln!("tape: append(\"{label}\", {index} <- [{i1}, {i2}, {i3}])");
        }
        self.append_edge(i1, index, w1)?;
        self.append_edge(i2, index, w2)?;
        self.append_edge(i3, index, w3)?;
        Ok(index)
    }

    pub(crate) fn append_node(&mut self, size: usize, label: &str) -> NodeId {
        let prefixed = self.prefixed(label);
        let index = self.store.allocate(size, prefixed);
        self.stats.nodes_created += 1;
        if self.log_level >= 3 {
            eprintln!("tape: append_node(\"{label}\", size={size}) -> {index}");
        }
        if self.log_level >= 4 {
            eprintln!("tape: inc_ref({index}) -> 1");
        }
        index
    }

    /// Wires `source -> target` with the given weight, applying the
    /// contraction and merging rewrites first. Contraction is realized
    /// with an explicit worklist: folding `gp -> source` links into
    /// direct `gp -> target` links can recurse to the full DAG height,
    /// which must not consume stack.
    pub(crate) fn append_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        weight: V,
    ) -> TapeResult<()> {
        debug_assert!(!target.is_none());
        let target_size = self.store.node(target)?.size;

        let mut pending: Vec<(NodeId, V)> = vec![(source, weight)];
        while let Some((src, w)) = pending.pop() {
            if src.is_none() {
                continue;
            }
            if self.log_level >= 4 {
                eprintln!("tape: append_edge({target} <- {src})");
            }

            let src_node = self.store.node(src)?;
            if self.contract_edges
                && src_node.size == target_size
                && !src_node.edges.is_empty()
                && !src_node.has_special()
            {
                for edge in &src_node.edges {
                    if let EdgeKind::Weight(gp_weight) = &edge.kind {
                        if self.log_level >= 4 {
                            eprintln!(" ... contracting with edge -> {}", edge.source);
                        }
                        pending.push((edge.source, safe_mul(&w, gp_weight)));
                    }
                }
                self.stats.edge_contractions += src_node.edges.len() as u32;
                continue;
            }

            let mut merged = false;
            {
                let target_node = self.store.node_mut(target)?;
                for edge in target_node.edges.iter_mut() {
                    if edge.source != src {
                        continue;
                    }
                    if let EdgeKind::Weight(existing) = &mut edge.kind {
                        *existing = existing.add(&w);
                        merged = true;
                        break;
                    }
                }
                if !merged {
                    debug_assert!(src < target, "edges must point at earlier nodes");
                    target_node.edges.push(Edge {
                        source: src,
                        kind: EdgeKind::Weight(w),
                    });
                }
            }
            if merged {
                self.stats.edge_merges += 1;
                if self.log_level >= 4 {
                    eprintln!(" ... merging into existing edge");
                }
            } else {
                // the new edge owns one reference to its source
                self.inc_ref(src)?;
            }
        }
        Ok(())
    }

    // ── Reference counting ──────────────────────────────────────────

    /// Takes an external reference on `index`. No-op for the null id.
    pub fn inc_ref(&mut self, index: NodeId) -> TapeResult<()> {
        if index.is_none() {
            return Ok(());
        }
        let node = self.store.node_mut(index)?;
        node.ref_count += 1;
        let count = node.ref_count;
        if self.log_level >= 4 {
            eprintln!("tape: inc_ref({index}) -> {count}");
        }
        Ok(())
    }

    /// Releases an external reference on `index`; reclaims the node when
    /// its count reaches zero and cascades to producers no longer held by
    /// any edge. No-op for the null id.
    pub fn dec_ref(&mut self, index: NodeId) -> TapeResult<()> {
        let mut pending = vec![index];
        while let Some(idx) = pending.pop() {
            if idx.is_none() {
                continue;
            }
            let count = {
                let node = self.store.node_mut(idx)?;
                if node.ref_count == 0 {
                    return Err(TapeError::UseAfterFree { index: idx });
                }
                node.ref_count -= 1;
                node.ref_count
            };
            if self.log_level >= 4 {
                eprintln!("tape: dec_ref({idx}) -> {count}");
            }
            if count == 0 {
                if self.log_level >= 4 {
                    eprintln!("tape: free_node({idx})");
                }
                let node = self.store.remove(idx)?;
                // each edge held one reference to its source; releasing
                // them here may cascade
                for edge in node.edges {
                    pending.push(edge.source);
                }
            }
        }
        Ok(())
    }

    // ── Labels and prefixes ─────────────────────────────────────────

    /// Replaces the node's label with a quoted copy of `label`; quoted
    /// labels are highlighted by the DOT renderer. No-op for the null id.
    pub fn set_label(&mut self, index: NodeId, label: &str) -> TapeResult<()> {
        if index.is_none() {
            return Ok(());
        }
        if self.log_level >= 3 {
            eprintln!("tape: set_label({index}) -> {label}");
        }
        self.store.node_mut(index)?.label = format!("'{label}'");
        Ok(())
    }

    /// Pushes a scope name; labels of nodes created while the scope is
    /// active are prefixed with the stack entries joined by `/`.
    pub fn push_prefix(&mut self, name: &str) {
        self.prefix.push(name.to_string());
    }

    pub fn pop_prefix(&mut self) -> TapeResult<()> {
        self.prefix
            .pop()
            .map(|_| ())
            .ok_or(TapeError::PrefixUnderflow)
    }

    fn prefixed(&self, label: &str) -> String {
        if self.prefix.is_empty() {
            label.to_string()
        } else {
            let mut out = self.prefix.join("/");
            out.push('/');
            out.push_str(label);
            out
        }
    }

    // ── Gradient access ─────────────────────────────────────────────

    /// Reads the accumulated cotangent of `index`. Fails with
    /// [`TapeError::NoGradient`] for the null id: the variable was never
    /// marked as requiring gradients.
    pub fn gradient(&self, index: NodeId) -> TapeResult<&V> {
        if index.is_none() {
            return Err(TapeError::NoGradient);
        }
        Ok(&self.store.node(index)?.grad)
    }
}

impl<V: TapeValue> Default for Tape<V> {
    fn default() -> Self {
        Tape::new()
    }
}

impl<V: TapeValue> Drop for Tape<V> {
    fn drop(&mut self) {
        if cfg!(debug_assertions) && self.log_level >= 1 && !self.store.is_empty() {
            for (index, node) in self.store.iter() {
                eprintln!(
                    "tape: node {index} still live at shutdown (ref_count={})",
                    node.ref_count
                );
            }
        }
    }
}
