// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic primitives: X25519 key agreement, (X)ChaCha20-Poly1305 AEAD, HKDF-SHA256 key
//! derivation and a seedable CSPRNG.
pub mod aead;
pub mod hkdf;
mod rng;
mod secret;
pub mod sha2;
pub mod x25519;

pub use rng::{Rng, RngError};
pub use secret::{Secret, SymmetricKey};
