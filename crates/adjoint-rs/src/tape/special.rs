//! Pull-backs for non-pointwise primitives.
//!
//! Gather and scatter have Jacobians that are permutation-like selection
//! matrices rather than diagonal factors, so their reverse-mode rules are
//! stored as opaque edge payloads instead of weights. The set is closed:
//! three variants, each capturing the index vector and mask of the
//! forward operation.

use crate::error::TapeResult;
use crate::tape::node::NodeId;
use crate::tape::store::NodeStore;
use crate::value::TapeValue;

#[derive(Debug)]
pub(crate) enum Special<V: TapeValue> {
    /// Reverse of `target = gather(source, offsets, mask)`: routes the
    /// target cotangent back into the source buffer. When the forward
    /// gather was a pure permutation the scatter may overwrite; otherwise
    /// duplicate offsets must accumulate.
    Gather {
        offsets: V::Offsets,
        mask: V::Mask,
        source_size: usize,
        permute: bool,
    },

    /// Reverse of `scatter(buffer, source, offsets, mask)`: the source
    /// receives the cotangent lanes its forward write landed on.
    Scatter {
        offsets: V::Offsets,
        mask: V::Mask,
    },

    /// Reverse of `scatter_add(buffer, source, offsets, mask)`. Identical
    /// pull-back to [`Special::Scatter`]; kept distinct so diagnostics can
    /// tell the two apart.
    ScatterAdd {
        offsets: V::Offsets,
        mask: V::Mask,
    },
}

impl<V: TapeValue> Special<V> {
    /// Applies the pull-back: reads the target cotangent and accumulates
    /// into the source node's gradient.
    pub fn apply(
        &self,
        store: &mut NodeStore<V>,
        source: NodeId,
        grad_target: &V,
    ) -> TapeResult<()> {
        match self {
            Special::Gather {
                offsets,
                mask,
                source_size,
                permute,
            } => {
                let grad_source = &mut store.node_mut(source)?.grad;
                debug_assert_eq!(grad_source.size(), *source_size);
                if *permute {
                    grad_source.scatter(grad_target, offsets, mask);
                } else {
                    grad_source.scatter_add(grad_target, offsets, mask);
                }
            }
            Special::Scatter { offsets, mask } | Special::ScatterAdd { offsets, mask } => {
                let picked = grad_target.gather(offsets, mask);
                store.node_mut(source)?.grad.add_assign(&picked);
            }
        }
        Ok(())
    }
}
