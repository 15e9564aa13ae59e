//! Splitting a secret into shares.
//!
//! Each secret byte gets an independent random polynomial of degree
//! `threshold - 1` whose constant term is that byte; share `x` holds the
//! evaluations at `x` for every byte.
//!
//! # Security
//! - **Constant-Time**: Uses `GF256` arithmetic which is branch-free.
//! - **Zeroization**: Polynomial coefficients are zeroized after use.
//! - **Fixed coordinates**: Share x-coordinates are the card slots 1..=n,
//!   never random.

use zeroize::Zeroizing;

use super::polynomial::evaluate_polynomial;
use super::{Share, ShareError, MAX_PAYLOAD_LEN};
use crate::core::gf256::GF256;
use crate::core::secret::{SecretVec, SECRET_LEN};
use crate::entropy::EntropySource;

/// Checks `2 <= k <= n`.
pub fn validate_threshold(k: u8, n: u8) -> Result<(), ShareError> {
    if k < 2 || k > n {
        return Err(ShareError::InvalidThreshold);
    }
    Ok(())
}

/// Splits a 32-byte secret into `n` shares, requiring `k` to reconstruct.
pub fn split_secret<R: EntropySource + ?Sized>(
    secret: &[u8],
    n: u8,
    k: u8,
    rng: &mut R,
) -> Result<Vec<Share>, ShareError> {
    if secret.len() != SECRET_LEN {
        return Err(ShareError::InvalidSecretLength {
            expected: SECRET_LEN,
            actual: secret.len(),
        });
    }
    split_bytes(secret, n, k, rng)
}

/// Splits 1..=`MAX_PAYLOAD_LEN` bytes of arbitrary data. Each share is as
/// long as the payload.
pub fn split_payload<R: EntropySource + ?Sized>(
    data: &[u8],
    n: u8,
    k: u8,
    rng: &mut R,
) -> Result<Vec<Share>, ShareError> {
    if data.is_empty() || data.len() > MAX_PAYLOAD_LEN {
        return Err(ShareError::InvalidSecretLength {
            expected: MAX_PAYLOAD_LEN,
            actual: data.len(),
        });
    }
    split_bytes(data, n, k, rng)
}

fn split_bytes<R: EntropySource + ?Sized>(
    secret: &[u8],
    n: u8,
    k: u8,
    rng: &mut R,
) -> Result<Vec<Share>, ShareError> {
    validate_threshold(k, n)?;

    let mut values: Vec<SecretVec> = (0..n).map(|_| SecretVec::zeroed(secret.len())).collect();

    // Reused per byte: coefficient scratch and the random draw.
    let mut random_buf = Zeroizing::new(vec![0u8; (k - 1) as usize]);
    let mut coeffs: Zeroizing<Vec<GF256>> = Zeroizing::new(vec![GF256::ZERO; k as usize]);

    for (p, &byte) in secret.iter().enumerate() {
        rng.fill(&mut random_buf)
            .map_err(|_| ShareError::RngFailure)?;

        coeffs[0] = GF256(byte);
        for (c, &r) in coeffs[1..].iter_mut().zip(random_buf.iter()) {
            *c = GF256(r);
        }

        for (i, value) in values.iter_mut().enumerate() {
            let x = GF256(i as u8 + 1);
            value.as_mut_bytes()[p] = evaluate_polynomial(&coeffs, x).0;
        }
    }

    values
        .into_iter()
        .enumerate()
        .map(|(i, y)| Share::new(i as u8 + 1, y))
        .collect()
}
