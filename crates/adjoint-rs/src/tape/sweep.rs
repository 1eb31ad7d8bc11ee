//! Scheduling and the reverse accumulation pass.

use crate::error::{TapeError, TapeResult};
use crate::tape::node::{EdgeKind, NodeId};
use crate::tape::Tape;
use crate::value::{safe_fmadd, TapeValue};

impl<V: TapeValue> Tape<V> {
    /// Schedules everything reachable from `index` for the next backward
    /// pass and seeds its cotangent.
    ///
    /// The DFS zeroes the gradient of every node it newly schedules.
    /// Nodes already scheduled by an earlier call are skipped entirely,
    /// so seeds planted by previous `set_gradient` calls survive until
    /// `backward` consumes the union — this is what makes seeding several
    /// outputs before a single sweep work.
    pub fn set_gradient(&mut self, index: NodeId, seed: V) -> TapeResult<()> {
        if index.is_none() {
            return Err(TapeError::NoGradient);
        }
        self.schedule(index)?;
        self.store.node_mut(index)?.grad = seed;
        Ok(())
    }

    fn schedule(&mut self, root: NodeId) -> TapeResult<()> {
        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            if !self.scheduled.insert(index) {
                continue;
            }
            let node = self.store.node_mut(index)?;
            node.grad = V::zero(node.size);
            stack.extend(node.edges.iter().map(|edge| edge.source));
        }
        Ok(())
    }

    /// Propagates cotangents through the scheduled subgraph in one pass.
    ///
    /// Scheduled identifiers are visited from largest to smallest; since
    /// a node only references strictly smaller identifiers, every target
    /// has received all of its contributions by the time it is consumed.
    ///
    /// With `free_graph`, edges are released as they are processed and
    /// every node loses one reference at its own turn, returning the tape
    /// to an empty steady state apart from externally held nodes. An
    /// extra reference is taken on each scheduled node up front so the
    /// cascade cannot reclaim a node before its turn.
    pub fn backward(&mut self, free_graph: bool) -> TapeResult<()> {
        let order: Vec<NodeId> = self.scheduled.iter().rev().copied().collect();
        if free_graph {
            for &index in &order {
                self.inc_ref(index)?;
            }
        }

        let mut edge_count: u32 = 0;
        for &target in &order {
            let (edges, grad_target) = {
                let node = self.store.node_mut(target)?;
                // a scalar node may have accumulated a vector-shaped
                // partial through a broadcast edge; collapse it before
                // anyone consumes it
                if node.size == 1 && node.grad.size() != 1 {
                    node.grad = node.grad.hsum();
                }
                (
                    std::mem::take(&mut node.edges),
                    std::mem::replace(&mut node.grad, V::zero(0)),
                )
            };

            for edge in &edges {
                match &edge.kind {
                    EdgeKind::Weight(weight) => {
                        let source = self.store.node_mut(edge.source)?;
                        source.grad = safe_fmadd(weight, &grad_target, &source.grad);
                        edge_count += 1;
                    }
                    EdgeKind::Special(special) => {
                        special.apply(&mut self.store, edge.source, &grad_target)?;
                    }
                }
            }

            {
                let node = self.store.node_mut(target)?;
                node.grad = grad_target;
                if !free_graph {
                    node.edges = edges;
                    continue;
                }
            }
            for edge in &edges {
                self.dec_ref(edge.source)?;
            }
            drop(edges); // releases any Special pull-backs
            self.dec_ref(target)?;
        }

        if self.log_level >= 1 {
            eprintln!(
                "tape: processed {}/{} nodes, {} edges [{} edge contractions, {} edge merges]",
                order.len(),
                self.stats.nodes_created - self.stats.nodes_created_last,
                edge_count,
                self.stats.edge_contractions - self.stats.edge_contractions_last,
                self.stats.edge_merges - self.stats.edge_merges_last,
            );
        }
        if free_graph {
            self.stats.nodes_created_last = self.stats.nodes_created;
            self.stats.edge_contractions_last = self.stats.edge_contractions;
            self.stats.edge_merges_last = self.stats.edge_merges;
        }
        self.scheduled.clear();
        Ok(())
    }
}
