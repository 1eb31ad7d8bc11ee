//! Value contract consumed by the tape.
//!
//! The tape is generic over a numeric container `V` and touches it only
//! through [`TapeValue`]: elementwise arithmetic with scalar broadcasting,
//! fused multiply-add, horizontal sum, and masked gather/scatter for the
//! dynamically-sized case. The SIMD kernel packages provide their own
//! implementations; [`Vector`] is the portable reference used by the test
//! suite and by callers that do not need vectorized storage.

mod vector;

pub use vector::Vector;

use std::fmt;

/// Capability set the tape requires from a differentiable value type.
///
/// Every value carries a runtime `size`: 1 for scalar-shaped values, ≥ 1
/// for dynamic arrays. Binary operations broadcast a size-1 operand
/// against a sized one; mixing two distinct non-unit sizes is a caller
/// bug.
pub trait TapeValue: Clone + fmt::Debug + 'static {
    /// Boolean lane mask. Size-1 masks broadcast like values do.
    type Mask: Clone + fmt::Debug;

    /// Index vector addressing lanes of a dynamic buffer.
    type Offsets: Clone + fmt::Debug;

    /// A value of `size` lanes, all zero.
    fn zero(size: usize) -> Self;

    /// A value of `size` lanes, all equal to `value`.
    fn full(value: f32, size: usize) -> Self;

    /// A scalar-shaped value, broadcastable against any size.
    fn from_scalar(value: f32) -> Self {
        Self::full(value, 1)
    }

    /// Number of lanes.
    fn size(&self) -> usize;

    fn is_scalar(&self) -> bool {
        self.size() == 1
    }

    fn add(&self, rhs: &Self) -> Self;
    fn sub(&self, rhs: &Self) -> Self;
    fn mul(&self, rhs: &Self) -> Self;
    fn div(&self, rhs: &Self) -> Self;
    fn add_assign(&mut self, rhs: &Self);

    /// `a * b + c`, with the usual broadcasting rules.
    fn fmadd(a: &Self, b: &Self, c: &Self) -> Self;

    /// Horizontal sum, collapsing to a scalar-shaped value.
    fn hsum(&self) -> Self;

    /// Per-lane comparison against exact zero.
    fn eq_zero(&self) -> Self::Mask;

    fn mask_or(a: &Self::Mask, b: &Self::Mask) -> Self::Mask;

    /// Per-lane selection: `mask ? when_true : when_false`.
    fn select(mask: &Self::Mask, when_true: &Self, when_false: &Self) -> Self;

    /// Reads `offsets.len()` lanes out of `self`; masked-off lanes read 0.
    fn gather(&self, offsets: &Self::Offsets, mask: &Self::Mask) -> Self;

    /// Writes `source` lanes into `self` at `offsets`; masked-off lanes are
    /// untouched. A scalar-shaped `source` broadcasts.
    fn scatter(&mut self, source: &Self, offsets: &Self::Offsets, mask: &Self::Mask);

    /// Like [`scatter`](TapeValue::scatter) but accumulates instead of
    /// overwriting, so lanes addressed more than once sum up.
    fn scatter_add(&mut self, source: &Self, offsets: &Self::Offsets, mask: &Self::Mask);

    fn offsets_len(offsets: &Self::Offsets) -> usize;
}

/// `a * b`, with lanes where either operand is exactly zero forced to zero.
///
/// The reverse sweep multiplies edge weights that are legitimately zero
/// against partials that may hold `inf`/`nan` in unused lanes; the mask
/// restores the mathematically correct zero without branching.
pub fn safe_mul<V: TapeValue>(a: &V, b: &V) -> V {
    let tentative = a.mul(b);
    let is_zero = V::mask_or(&a.eq_zero(), &b.eq_zero());
    V::select(&is_zero, &V::zero(1), &tentative)
}

/// `a * b + c`, with lanes where `a` or `b` is exactly zero passing `c`
/// through unchanged.
pub fn safe_fmadd<V: TapeValue>(a: &V, b: &V, c: &V) -> V {
    let tentative = V::fmadd(a, b, c);
    let is_zero = V::mask_or(&a.eq_zero(), &b.eq_zero());
    V::select(&is_zero, c, &tentative)
}
