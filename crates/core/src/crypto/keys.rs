use onionnet_common::CryptoConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::CryptoError;

/// Public half of a trapdoor keypair: `(e, n)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    pub e: u64,
    pub n: u64,
}

impl PublicKey {
    pub fn new(e: u64, n: u64) -> Self {
        Self { e, n }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.e, self.n)
    }
}

/// Private half of a trapdoor keypair: `(d, n)`
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    pub d: u64,
    pub n: u64,
}

impl PrivateKey {
    pub fn new(d: u64, n: u64) -> Self {
        Self { d, n }
    }
}

// Keeps the exponent out of log lines.
impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("d", &"<redacted>")
            .field("n", &self.n)
            .finish()
    }
}

/// A matched public/private keypair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl KeyPair {
    /// Generate a keypair with the default prime range
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with_config(&CryptoConfig::default())
    }

    pub fn generate_with_config(config: &CryptoConfig) -> Result<Self, CryptoError> {
        Self::generate_with_rng(&mut rand::thread_rng(), config.prime_min, config.prime_max)
    }

    /// Generate with a caller-supplied RNG (tests use a seeded one)
    ///
    /// Picks two distinct primes `p`, `q` in `[min, max]`, then `n = p*q`,
    /// `phi = (p-1)(q-1)`, `e` = smallest odd integer >= 3 coprime to `phi`,
    /// `d = e^-1 mod phi`.
    pub fn generate_with_rng<R: Rng + ?Sized>(
        rng: &mut R,
        min: u64,
        max: u64,
    ) -> Result<Self, CryptoError> {
        if min < 2 || min > max {
            return Err(CryptoError::InvalidPrimeRange { min, max });
        }
        // p * q must fit in u64
        if max > u32::MAX as u64 {
            return Err(CryptoError::InvalidPrimeRange { min, max });
        }

        let p = random_prime(rng, min, max, None)
            .ok_or(CryptoError::InsufficientPrimes { min, max })?;
        let q = random_prime(rng, min, max, Some(p))
            .ok_or(CryptoError::InsufficientPrimes { min, max })?;

        let n = p * q;
        let phi = (p - 1) * (q - 1);

        let mut e = 3;
        while gcd(e, phi) != 1 {
            e += 2;
        }

        let d = mod_inverse(e, phi).ok_or(CryptoError::NoInverse { e, phi })?;

        Ok(Self {
            public: PublicKey::new(e, n),
            private: PrivateKey::new(d, n),
        })
    }

    pub fn modulus(&self) -> u64 {
        self.public.n
    }
}

/// Deterministic primality test by 6k +/- 1 trial division
pub fn is_prime(n: u64) -> bool {
    if n <= 1 {
        return false;
    }
    if n <= 3 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }

    let mut i = 5u64;
    while i * i <= n {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}

/// Smallest modulus a key received off the wire may carry
const MIN_MODULUS: u64 = 2;

/// Whether `n` can serve as a key modulus
pub fn is_usable_modulus(n: u64) -> bool {
    n >= MIN_MODULUS
}

/// `base^exp mod modulus`, widened to u128 so no intermediate overflows.
/// A modulus below 2 yields 0.
pub fn mod_pow(base: u64, exp: u64, modulus: u64) -> u64 {
    if modulus <= 1 {
        return 0;
    }

    let m = modulus as u128;
    let mut result: u128 = 1;
    let mut base = base as u128 % m;
    let mut exp = exp;

    while exp > 0 {
        if exp & 1 == 1 {
            result = result * base % m;
        }
        base = base * base % m;
        exp >>= 1;
    }

    result as u64
}

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Modular inverse via the extended Euclidean algorithm
pub fn mod_inverse(a: u64, m: u64) -> Option<u64> {
    let (mut old_r, mut r) = (a as i128, m as i128);
    let (mut old_s, mut s) = (1i128, 0i128);

    while r != 0 {
        let quotient = old_r / r;
        (old_r, r) = (r, old_r - quotient * r);
        (old_s, s) = (s, old_s - quotient * s);
    }

    if old_r != 1 {
        return None;
    }

    Some(old_s.rem_euclid(m as i128) as u64)
}

/// Random prime in `[min, max]`, scanning forward (with wrap-around) from a
/// random starting point. `None` when the range holds no acceptable prime.
fn random_prime<R: Rng + ?Sized>(
    rng: &mut R,
    min: u64,
    max: u64,
    exclude: Option<u64>,
) -> Option<u64> {
    let start = rng.gen_range(min..=max);

    (start..=max)
        .chain(min..start)
        .find(|&candidate| Some(candidate) != exclude && is_prime(candidate))
}
