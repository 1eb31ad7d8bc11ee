//! Portable reference implementation of the value contract.

use super::TapeValue;

/// Contiguous `f32` storage with scalar broadcasting.
///
/// A size-1 vector behaves as a scalar: binary operations replicate it
/// against the other operand's lanes. This mirrors the semantics the
/// packed SIMD containers implement in their own lanes-and-registers
/// representation, without any alignment or width constraints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    pub fn from_slice(values: &[f32]) -> Self {
        Vector {
            data: values.to_vec(),
        }
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Lane accessor with broadcast: size-1 vectors repeat their value.
    #[inline]
    fn lane(&self, i: usize) -> f32 {
        if self.data.len() == 1 {
            self.data[0]
        } else {
            self.data[i]
        }
    }

    fn zip_with(&self, rhs: &Self, f: impl Fn(f32, f32) -> f32) -> Self {
        let n = self.data.len().max(rhs.data.len());
        debug_assert!(
            self.data.len() == n || self.data.len() == 1,
            "lane count mismatch: {} vs {}",
            self.data.len(),
            rhs.data.len()
        );
        debug_assert!(rhs.data.len() == n || rhs.data.len() == 1);
        Vector {
            data: (0..n).map(|i| f(self.lane(i), rhs.lane(i))).collect(),
        }
    }
}

impl From<f32> for Vector {
    fn from(value: f32) -> Self {
        Vector { data: vec![value] }
    }
}

fn mask_lane(mask: &[bool], i: usize) -> bool {
    if mask.len() == 1 {
        mask[0]
    } else {
        mask[i]
    }
}

impl TapeValue for Vector {
    type Mask = Vec<bool>;
    type Offsets = Vec<i64>;

    fn zero(size: usize) -> Self {
        Vector {
            data: vec![0.0; size],
        }
    }

    fn full(value: f32, size: usize) -> Self {
        Vector {
            data: vec![value; size],
        }
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn add(&self, rhs: &Self) -> Self {
        self.zip_with(rhs, |a, b| a + b)
    }

    fn sub(&self, rhs: &Self) -> Self {
        self.zip_with(rhs, |a, b| a - b)
    }

    fn mul(&self, rhs: &Self) -> Self {
        self.zip_with(rhs, |a, b| a * b)
    }

    fn div(&self, rhs: &Self) -> Self {
        self.zip_with(rhs, |a, b| a / b)
    }

    fn add_assign(&mut self, rhs: &Self) {
        *self = self.add(rhs);
    }

    fn fmadd(a: &Self, b: &Self, c: &Self) -> Self {
        let n = a.size().max(b.size()).max(c.size());
        Vector {
            data: (0..n)
                .map(|i| a.lane(i).mul_add(b.lane(i), c.lane(i)))
                .collect(),
        }
    }

    fn hsum(&self) -> Self {
        Vector {
            data: vec![self.data.iter().sum()],
        }
    }

    fn eq_zero(&self) -> Self::Mask {
        self.data.iter().map(|&v| v == 0.0).collect()
    }

    fn mask_or(a: &Self::Mask, b: &Self::Mask) -> Self::Mask {
        let n = a.len().max(b.len());
        (0..n).map(|i| mask_lane(a, i) || mask_lane(b, i)).collect()
    }

    fn select(mask: &Self::Mask, when_true: &Self, when_false: &Self) -> Self {
        let n = mask.len().max(when_true.size()).max(when_false.size());
        Vector {
            data: (0..n)
                .map(|i| {
                    if mask_lane(mask, i) {
                        when_true.lane(i)
                    } else {
                        when_false.lane(i)
                    }
                })
                .collect(),
        }
    }

    fn gather(&self, offsets: &Self::Offsets, mask: &Self::Mask) -> Self {
        Vector {
            data: offsets
                .iter()
                .enumerate()
                .map(|(i, &off)| {
                    if mask_lane(mask, i) {
                        self.data[off as usize]
                    } else {
                        0.0
                    }
                })
                .collect(),
        }
    }

    fn scatter(&mut self, source: &Self, offsets: &Self::Offsets, mask: &Self::Mask) {
        for (i, &off) in offsets.iter().enumerate() {
            if mask_lane(mask, i) {
                self.data[off as usize] = source.lane(i);
            }
        }
    }

    fn scatter_add(&mut self, source: &Self, offsets: &Self::Offsets, mask: &Self::Mask) {
        for (i, &off) in offsets.iter().enumerate() {
            if mask_lane(mask, i) {
                self.data[off as usize] += source.lane(i);
            }
        }
    }

    fn offsets_len(offsets: &Self::Offsets) -> usize {
        offsets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_broadcasts_against_vector() {
        let s = Vector::from_scalar(2.0);
        let v = Vector::from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(s.mul(&v).data(), &[2.0, 4.0, 6.0]);
        assert_eq!(v.add(&s).data(), &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn hsum_collapses_to_scalar() {
        let v = Vector::from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let h = v.hsum();
        assert!(h.is_scalar());
        assert_eq!(h.data(), &[10.0]);
    }

    #[test]
    fn gather_respects_mask() {
        let buf = Vector::from_slice(&[10.0, 20.0, 30.0, 40.0]);
        let picked = buf.gather(&vec![3, 0, 1], &vec![true, false, true]);
        assert_eq!(picked.data(), &[40.0, 0.0, 20.0]);
    }

    #[test]
    fn scatter_overwrites_and_scatter_add_accumulates() {
        let mut buf = Vector::zero(4);
        buf.scatter(
            &Vector::from_slice(&[1.0, 2.0]),
            &vec![1, 1],
            &vec![true, true],
        );
        assert_eq!(buf.data(), &[0.0, 2.0, 0.0, 0.0]);

        let mut buf = Vector::zero(4);
        buf.scatter_add(
            &Vector::from_slice(&[1.0, 2.0]),
            &vec![1, 1],
            &vec![true, true],
        );
        assert_eq!(buf.data(), &[0.0, 3.0, 0.0, 0.0]);
    }

    #[test]
    fn scatter_broadcasts_scalar_source() {
        let mut buf = Vector::full(1.0, 4);
        buf.scatter(&Vector::from_scalar(0.0), &vec![0, 2], &vec![true, true]);
        assert_eq!(buf.data(), &[0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn fmadd_matches_mul_add() {
        let a = Vector::from_slice(&[2.0, 3.0]);
        let b = Vector::from_slice(&[5.0, 7.0]);
        let c = Vector::from_slice(&[1.0, 1.0]);
        assert_eq!(Vector::fmadd(&a, &b, &c).data(), &[11.0, 22.0]);
    }
}
