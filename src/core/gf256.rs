//! GF(2^8) arithmetic.
//!
//! Field elements are bytes; the reduction polynomial is x^8 + x^4 + x^3 + x + 1
//! (0x11B). Multiplication and inversion run a fixed number of iterations with
//! mask-based conditionals, so timing does not depend on the secret bytes being
//! shared.

use std::ops::{Add, AddAssign, Mul, MulAssign};
use zeroize::Zeroize;

/// Full irreducible polynomial (x^8 + x^4 + x^3 + x + 1).
const POLY: u16 = 0x11B;

/// A GF(2^8) element.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroize)]
#[repr(transparent)]
pub struct GF256(pub u8);

impl From<u8> for GF256 {
    #[inline(always)]
    fn from(value: u8) -> Self {
        GF256(value)
    }
}

impl From<GF256> for u8 {
    #[inline(always)]
    fn from(gf: GF256) -> u8 {
        gf.0
    }
}

/// Addition in characteristic 2 is XOR (and so is subtraction).
impl Add for GF256 {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        GF256(self.0 ^ rhs.0)
    }
}

impl AddAssign for GF256 {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Mul for GF256 {
    type Output = Self;

    /// Bit-serial multiply with reduction, branch-free.
    #[inline(always)]
    fn mul(self, rhs: Self) -> Self {
        let mut acc: u8 = 0;
        let mut a: u16 = self.0 as u16;
        let mut b: u8 = rhs.0;

        for _ in 0..8 {
            let take = (b & 1).wrapping_mul(0xFF) as u16;
            acc ^= (a & take) as u8;

            let carry = ((a >> 7) & 1) as u8;
            let reduce = carry.wrapping_mul(0xFF) as u16 | ((carry as u16) << 8);
            a = ((a << 1) & 0x1FF) ^ (POLY & reduce);

            b >>= 1;
        }

        GF256(acc)
    }
}

impl MulAssign for GF256 {
    #[inline(always)]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl GF256 {
    pub const ZERO: GF256 = GF256(0);
    pub const ONE: GF256 = GF256(1);

    /// Multiplicative inverse via a^254. Zero maps to zero.
    #[inline(always)]
    pub fn inv(self) -> Self {
        let mut result = GF256::ONE;
        let mut base = self;
        let mut exp: u8 = 0xFE;

        for _ in 0..8 {
            let mask = (exp & 1).wrapping_mul(0xFF);
            let factor = GF256((base.0 & mask) | (1 & !mask));
            result *= factor;
            base *= base;
            exp >>= 1;
        }

        result
    }

    /// `self / rhs`, or `None` when dividing by zero.
    pub fn div(self, rhs: Self) -> Option<Self> {
        if rhs.0 == 0 {
            None
        } else {
            Some(self * rhs.inv())
        }
    }
}
