// SPDX-License-Identifier: MIT OR Apache-2.0

//! HKDF-SHA256 key derivation.
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

/// Derives `N` bytes of output key material from the given input key material.
///
/// All callers pass a domain-separating `info` string so independently derived keys can never
/// collide across contexts.
pub fn hkdf<const N: usize>(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
) -> Result<[u8; N], HkdfError> {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut out = [0u8; N];
    hkdf.expand(info, &mut out)
        .map_err(|_| HkdfError::InvalidOutputLength)?;
    Ok(out)
}

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("requested output length is invalid for hkdf expansion")]
    InvalidOutputLength,
}
