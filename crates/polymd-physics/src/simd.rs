//! Abstract SIMD vocabulary for the pair kernel.
//!
//! The kernel is written once against [`SimdReal`]; `f64` provides the
//! scalar backend used as the test oracle, `wide::f64x4` the 256-bit one.
//! Masks are represented as lane values whose bits are either all set or
//! all clear, so masking is a bitwise AND and a cleared lane contributes
//! exactly zero to every accumulator.

use std::ops::{Add, Div, Mul, Neg, Sub};

use wide::f64x4;

/// Lane value with every bit set; used as the "interaction enabled" mask.
pub const MASK_ON: f64 = f64::from_bits(!0u64);
/// Lane value with every bit clear.
pub const MASK_OFF: f64 = 0.0;

#[inline]
pub fn mask_value(enabled: bool) -> f64 {
    if enabled {
        MASK_ON
    } else {
        MASK_OFF
    }
}

/// The operations the pair kernel needs from a SIMD register of `f64`s.
pub trait SimdReal:
    Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    const WIDTH: usize;

    fn splat(x: f64) -> Self;

    /// Build a register lane by lane.
    fn from_lanes(f: impl FnMut(usize) -> f64) -> Self;

    #[inline]
    fn zero() -> Self {
        Self::splat(0.0)
    }

    #[inline]
    fn load(slice: &[f64], at: usize) -> Self {
        let mut idx = at;
        Self::from_lanes(|_| {
            let v = slice[idx];
            idx += 1;
            v
        })
    }

    fn write(self, slice: &mut [f64], at: usize);

    fn sqrt(self) -> Self;

    /// Fused multiply-add: self * m + a.
    fn mul_add(self, m: Self, a: Self) -> Self;

    /// Bitwise AND, used to apply interaction masks.
    fn and(self, mask: Self) -> Self;

    /// True if any lane is non-zero (mask lanes read back as NaN).
    fn any_nonzero(self) -> bool;

    /// Horizontal sum of all lanes.
    fn hsum(self) -> f64;

    /// a - self * m (the fused negate-multiply-add of the kernel bodies).
    #[inline]
    fn nmul_add(self, m: Self, a: Self) -> Self {
        (-self).mul_add(m, a)
    }
}

impl SimdReal for f64 {
    const WIDTH: usize = 1;

    #[inline]
    fn splat(x: f64) -> Self {
        x
    }

    #[inline]
    fn from_lanes(mut f: impl FnMut(usize) -> f64) -> Self {
        f(0)
    }

    #[inline]
    fn write(self, slice: &mut [f64], at: usize) {
        slice[at] = self;
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    #[inline]
    fn mul_add(self, m: Self, a: Self) -> Self {
        f64::mul_add(self, m, a)
    }

    #[inline]
    fn and(self, mask: Self) -> Self {
        f64::from_bits(self.to_bits() & mask.to_bits())
    }

    #[inline]
    fn any_nonzero(self) -> bool {
        self != 0.0
    }

    #[inline]
    fn hsum(self) -> f64 {
        self
    }
}

impl SimdReal for f64x4 {
    const WIDTH: usize = 4;

    #[inline]
    fn splat(x: f64) -> Self {
        f64x4::splat(x)
    }

    #[inline]
    fn from_lanes(mut f: impl FnMut(usize) -> f64) -> Self {
        f64x4::from([f(0), f(1), f(2), f(3)])
    }

    #[inline]
    fn write(self, slice: &mut [f64], at: usize) {
        let a: [f64; 4] = self.into();
        slice[at..at + 4].copy_from_slice(&a);
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64x4::sqrt(self)
    }

    #[inline]
    fn mul_add(self, m: Self, a: Self) -> Self {
        f64x4::mul_add(self, m, a)
    }

    #[inline]
    fn and(self, mask: Self) -> Self {
        self & mask
    }

    #[inline]
    fn any_nonzero(self) -> bool {
        let a: [f64; 4] = self.into();
        a.iter().any(|&x| x != 0.0)
    }

    #[inline]
    fn hsum(self) -> f64 {
        let a: [f64; 4] = self.into();
        a[0] + a[1] + a[2] + a[3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_and_clears_lane() {
        let v = f64x4::from([1.0, 2.0, 3.0, 4.0]);
        let m = f64x4::from([MASK_ON, MASK_OFF, MASK_ON, MASK_OFF]);
        let r: [f64; 4] = v.and(m).into();
        assert_eq!(r, [1.0, 0.0, 3.0, 0.0]);
    }

    #[test]
    fn test_mask_kills_infinity() {
        // Masking an infinite reciprocal must give exact zero, not NaN.
        let inf = f64x4::splat(1.0) / f64x4::splat(0.0);
        let r: [f64; 4] = inf.and(f64x4::splat(MASK_OFF)).into();
        assert_eq!(r, [0.0; 4]);
    }

    #[test]
    fn test_any_nonzero_sees_mask_lanes() {
        let m = f64x4::from([MASK_OFF, MASK_OFF, MASK_ON, MASK_OFF]);
        assert!(m.any_nonzero());
        assert!(!f64x4::splat(MASK_OFF).any_nonzero());
        // The scalar backend agrees.
        assert!(MASK_ON.any_nonzero());
        assert!(!MASK_OFF.any_nonzero());
    }

    #[test]
    fn test_scalar_vector_arithmetic_agreement() {
        let xs = [0.5, 1.5, 2.5, 3.5];
        let v = f64x4::from(xs);
        let vr: [f64; 4] = v.mul_add(f64x4::splat(2.0), f64x4::splat(1.0)).into();
        for (i, &x) in xs.iter().enumerate() {
            assert_eq!(vr[i], x.mul_add(2.0, 1.0));
        }
    }

    #[test]
    fn test_load_write_roundtrip() {
        let src = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let v = <f64x4 as SimdReal>::load(&src, 4);
        let mut dst = [0.0; 8];
        v.write(&mut dst, 0);
        assert_eq!(&dst[0..4], &src[4..8]);
    }
}
