//! Polynomial evaluation shared by split and its tests.

use crate::core::gf256::GF256;

/// Evaluates `c[0] + c[1]*x + ... + c[k-1]*x^(k-1)` by Horner's method.
#[inline(always)]
pub(crate) fn evaluate_polynomial(coeffs: &[GF256], x: GF256) -> GF256 {
    coeffs
        .iter()
        .rev()
        .fold(GF256::ZERO, |acc, coeff| acc * x + *coeff)
}
