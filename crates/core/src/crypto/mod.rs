//! Trapdoor primitive for onion layers
//!
//! Per-symbol asymmetric transform with keypairs generated from two small
//! random primes. Offers no padding, no authentication and no forward secrecy.

mod cipher;
mod keys;

pub use cipher::{
    decode_symbols, encode_symbols, looks_like_symbols, LayerCipher, TrapdoorCipher, SENTINEL,
    SYMBOL_SEPARATOR,
};
pub use keys::{
    gcd, is_prime, is_usable_modulus, mod_inverse, mod_pow, KeyPair, PrivateKey, PublicKey,
};

/// Cryptographic errors
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid prime range [{min}, {max}]")]
    InvalidPrimeRange { min: u64, max: u64 },

    #[error("Prime range [{min}, {max}] does not hold two distinct primes")]
    InsufficientPrimes { min: u64, max: u64 },

    #[error("{e} has no inverse modulo {phi}")]
    NoInverse { e: u64, phi: u64 },

    #[error("Empty payload")]
    EmptyPayload,

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),
}
