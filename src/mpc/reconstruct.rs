//! Secret reconstruction from shares.
//!
//! Lagrange interpolation over GF(256) at x = 0.
//!
//! # Security
//! - **Constant-Time**: Uses `GF256` arithmetic.
//! - **Validation**: Identical duplicates are merged, conflicting ones rejected,
//!   and fewer than `threshold` distinct points is an error rather than a
//!   plausible-looking wrong secret.

use super::{Share, ShareError};
use crate::core::gf256::GF256;
use crate::core::secret::{Secret, SecretVec, SECRET_LEN};

/// Reconstructs the 32-byte secret from at least `threshold` distinct shares.
pub fn reconstruct_secret(shares: &[Share], threshold: u8) -> Result<Secret, ShareError> {
    let bytes = reconstruct_payload(shares, threshold)?;
    Secret::from_slice(bytes.as_bytes()).ok_or(ShareError::InvalidSecretLength {
        expected: SECRET_LEN,
        actual: bytes.len(),
    })
}

/// Reconstructs a value of any length; every share must be as long as it.
pub fn reconstruct_payload(shares: &[Share], threshold: u8) -> Result<SecretVec, ShareError> {
    // 1. Validation and dedup
    let mut distinct: Vec<&Share> = Vec::with_capacity(shares.len());
    for share in shares {
        if share.x == 0 {
            return Err(ShareError::InvalidShareIndex);
        }
        match distinct.iter().find(|s| s.x == share.x) {
            Some(seen) if seen.y == share.y => continue,
            Some(_) => return Err(ShareError::DuplicateShareIndex),
            None => distinct.push(share),
        }
    }
    if distinct.len() < threshold as usize || threshold < 2 {
        return Err(ShareError::InsufficientShares {
            needed: threshold,
            have: distinct.len(),
        });
    }
    let len = distinct[0].y.len();
    if distinct.iter().any(|s| s.y.len() != len) {
        return Err(ShareError::LengthMismatch);
    }

    // 2. Lagrange basis at x=0:
    // lambda_j = prod_{m != j} x_m / (x_m + x_j)   (subtraction is XOR)
    let mut lambdas = Vec::with_capacity(distinct.len());
    for (j, sj) in distinct.iter().enumerate() {
        let xj = GF256(sj.x);
        let mut numerator = GF256::ONE;
        let mut denominator = GF256::ONE;
        for (m, sm) in distinct.iter().enumerate() {
            if j == m {
                continue;
            }
            let xm = GF256(sm.x);
            numerator *= xm;
            denominator *= xm + xj;
        }
        lambdas.push(
            numerator
                .div(denominator)
                .ok_or(ShareError::InvalidShareIndex)?,
        );
    }

    // 3. S[p] = sum_j y_j[p] * lambda_j
    let mut secret = SecretVec::zeroed(len);
    for (p, out) in secret.as_mut_bytes().iter_mut().enumerate() {
        let mut sum = GF256::ZERO;
        for (share, lambda) in distinct.iter().zip(lambdas.iter()) {
            sum += GF256(share.y.as_bytes()[p]) * *lambda;
        }
        *out = sum.0;
    }

    Ok(secret)
}
