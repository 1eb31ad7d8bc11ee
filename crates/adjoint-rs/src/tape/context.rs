//! Scatter/gather context and the non-pointwise construction operations.
//!
//! Indexed reads and writes break the pointwise assumption the rest of
//! the constructor relies on, so they are recorded through a context the
//! dynamic-array layer installs around each operation: a shared slot
//! holding the identifier of the buffer being indexed, the buffer's lane
//! count, and whether the access pattern is a pure permutation. Scatter
//! retargets the slot at the node representing the buffer's new state,
//! which is why the slot is shared rather than passed by value.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::TapeResult;
use crate::tape::node::{Edge, EdgeKind, NodeId};
use crate::tape::special::Special;
use crate::tape::Tape;
use crate::value::TapeValue;

/// Shared handle to the caller's buffer-identifier slot. The dynamic
/// array owns it; the tape reads the current buffer id from it and
/// writes back the post-scatter id.
pub type IndexSlot = Rc<Cell<NodeId>>;

/// A slot holding `index`.
pub fn index_slot(index: NodeId) -> IndexSlot {
    Rc::new(Cell::new(index))
}

pub(crate) struct ScatterGatherContext {
    pub slot: IndexSlot,
    pub size: usize,
    pub permute: bool,
}

impl<V: TapeValue> Tape<V> {
    /// Installs the scatter/gather context. The caller is responsible for
    /// saving and restoring it across nested operations.
    pub fn set_scatter_gather_operand(&mut self, slot: IndexSlot, size: usize, permute: bool) {
        self.ctx = Some(ScatterGatherContext {
            slot,
            size,
            permute,
        });
    }

    pub fn clear_scatter_gather_operand(&mut self) {
        self.ctx = None;
    }

    fn context_parts(&self) -> Option<(IndexSlot, usize, bool)> {
        self.ctx
            .as_ref()
            .map(|ctx| (Rc::clone(&ctx.slot), ctx.size, ctx.permute))
    }

    /// Records a differentiable gather from the context buffer. Returns
    /// the null id when no context is installed or the buffer is not
    /// tape-tracked.
    ///
    /// The reverse rule routes the gathered cotangent back into the
    /// buffer: a plain scatter when the forward access was a permutation,
    /// scatter-add otherwise (duplicate offsets must accumulate).
    pub fn append_gather(&mut self, offsets: V::Offsets, mask: V::Mask) -> TapeResult<NodeId> {
        let Some((slot, _, permute)) = self.context_parts() else {
            return Ok(NodeId::NONE);
        };
        let source = slot.get();
        if source.is_none() {
            return Ok(NodeId::NONE);
        }

        let source_size = self.store.node(source)?.size;
        let target = self.append_node(V::offsets_len(&offsets), "gather");
        self.store
            .get_mut(target)
            .expect("node was just allocated")
            .edges
            .push(Edge {
                source,
                kind: EdgeKind::Special(Special::Gather {
                    offsets,
                    mask,
                    source_size,
                    permute,
                }),
            });
        self.inc_ref(source)?;

        if self.log_level >= 3 {
            eprintln!("tape: append_gather({target} <- {source})");
        }
        Ok(target)
    }

    /// Records a differentiable scatter of `source` into the context
    /// buffer and retargets the context slot at the buffer's new state.
    /// Silently does nothing when no context is installed.
    pub fn append_scatter(
        &mut self,
        source: NodeId,
        offsets: V::Offsets,
        mask: V::Mask,
    ) -> TapeResult<()> {
        let Some((slot, size, permute)) = self.context_parts() else {
            return Ok(());
        };
        let target_orig = slot.get();

        let target_new = self.append_node(size, "scatter");
        if !source.is_none() {
            self.store
                .get_mut(target_new)
                .expect("node was just allocated")
                .edges
                .push(Edge {
                    source,
                    kind: EdgeKind::Special(Special::Scatter {
                        offsets: offsets.clone(),
                        mask: mask.clone(),
                    }),
                });
            self.inc_ref(source)?;
        }

        let result = if target_orig.is_none() {
            target_new
        } else {
            // the buffer state is the scattered lanes from target_new plus
            // the untouched lanes of target_orig; in the permutation case
            // nothing overlaps and the old state keeps unit weight
            let weight = if permute {
                V::from_scalar(1.0)
            } else {
                let mut w = V::full(1.0, size);
                w.scatter(&V::from_scalar(0.0), &offsets, &mask);
                w
            };
            let combined = self.append2(
                "scatter_combine",
                size,
                target_new,
                target_orig,
                V::from_scalar(1.0),
                weight,
            )?;
            self.dec_ref(target_new)?;
            self.dec_ref(target_orig)?;
            combined
        };
        slot.set(result);

        if self.log_level >= 3 {
            eprintln!("tape: append_scatter({target_orig} <- {source}) -> {result}");
        }
        Ok(())
    }

    /// Records a differentiable scatter-add into the context buffer.
    /// Unlike [`append_scatter`](Tape::append_scatter), old and new
    /// buffer states combine linearly everywhere, since an additive write
    /// leaves the previous contents in place.
    pub fn append_scatter_add(
        &mut self,
        source: NodeId,
        offsets: V::Offsets,
        mask: V::Mask,
    ) -> TapeResult<()> {
        let Some((slot, size, _)) = self.context_parts() else {
            return Ok(());
        };
        let target_orig = slot.get();

        let target_new = self.append_node(size, "scatter_add");
        if !source.is_none() {
            self.store
                .get_mut(target_new)
                .expect("node was just allocated")
                .edges
                .push(Edge {
                    source,
                    kind: EdgeKind::Special(Special::ScatterAdd { offsets, mask }),
                });
            self.inc_ref(source)?;
        }

        let result = if target_orig.is_none() {
            target_new
        } else {
            let combined = self.append2(
                "add",
                size,
                target_new,
                target_orig,
                V::from_scalar(1.0),
                V::from_scalar(1.0),
            )?;
            self.dec_ref(target_new)?;
            self.dec_ref(target_orig)?;
            combined
        };
        slot.set(result);

        if self.log_level >= 3 {
            eprintln!("tape: append_scatter_add({target_orig} <- {source}) -> {result}");
        }
        Ok(())
    }
}
