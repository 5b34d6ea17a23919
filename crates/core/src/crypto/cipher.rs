use super::keys::{mod_pow, PrivateKey, PublicKey};
use super::CryptoError;

/// Separator between encrypted symbols in a relay payload
pub const SYMBOL_SEPARATOR: char = ',';

/// Character substituted for decoded values that are not Unicode scalar values
pub const SENTINEL: char = char::REPLACEMENT_CHARACTER;

/// Symbol-wise trapdoor transform used for every onion layer.
///
/// The codec and relay only ever talk to this trait, so the concrete
/// primitive can be swapped without touching them.
pub trait LayerCipher: Send + Sync {
    /// Encrypt text one symbol (Unicode scalar) at a time
    fn seal(&self, key: &PublicKey, plaintext: &str) -> Vec<u64>;

    /// Invert `seal` with the matching private key
    fn open(&self, key: &PrivateKey, symbols: &[u64]) -> String;
}

/// Textbook per-symbol exponentiation: `c = m^e mod n`, `m = c^d mod n`.
///
/// No padding, chaining, or authentication. Symbols at or above the modulus
/// do not survive a round trip.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapdoorCipher;

impl TrapdoorCipher {
    pub fn new() -> Self {
        Self
    }

    pub fn encrypt_symbol(symbol: u64, key: &PublicKey) -> u64 {
        mod_pow(symbol, key.e, key.n)
    }

    pub fn decrypt_symbol(value: u64, key: &PrivateKey) -> u64 {
        mod_pow(value, key.d, key.n)
    }
}

impl LayerCipher for TrapdoorCipher {
    fn seal(&self, key: &PublicKey, plaintext: &str) -> Vec<u64> {
        plaintext
            .chars()
            .map(|c| Self::encrypt_symbol(c as u64, key))
            .collect()
    }

    fn open(&self, key: &PrivateKey, symbols: &[u64]) -> String {
        symbols
            .iter()
            .map(|&value| {
                let decoded = Self::decrypt_symbol(value, key);
                u32::try_from(decoded)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(SENTINEL)
            })
            .collect()
    }
}

/// Render symbols as comma-separated decimal integers
pub fn encode_symbols(symbols: &[u64]) -> String {
    let mut out = String::with_capacity(symbols.len() * 8);
    for (i, symbol) in symbols.iter().enumerate() {
        if i > 0 {
            out.push(SYMBOL_SEPARATOR);
        }
        out.push_str(&symbol.to_string());
    }
    out
}

/// Parse comma-separated decimal integers. Surrounding whitespace per token is
/// tolerated; anything else that is not a decimal integer is rejected.
pub fn decode_symbols(text: &str) -> Result<Vec<u64>, CryptoError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CryptoError::EmptyPayload);
    }

    text.split(SYMBOL_SEPARATOR)
        .map(|token| {
            let token = token.trim();
            token
                .parse::<u64>()
                .map_err(|_| CryptoError::InvalidSymbol(token.to_string()))
        })
        .collect()
}

/// Cheap shape check used to tell a nested layer from cleartext.
pub fn looks_like_symbols(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty()
        && text
            .split(SYMBOL_SEPARATOR)
            .all(|t| !t.trim().is_empty() && t.trim().bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_symbol_roundtrip_below_modulus() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..10 {
            let keys = KeyPair::generate_with_rng(&mut rng, 11, 50).unwrap();
            for s in 0..keys.public.n {
                let c = TrapdoorCipher::encrypt_symbol(s, &keys.public);
                assert!(c < keys.public.n);
                assert_eq!(TrapdoorCipher::decrypt_symbol(c, &keys.private), s);
            }
        }
    }

    #[test]
    fn test_text_roundtrip_with_default_range() {
        let keys = KeyPair::generate().unwrap();
        let cipher = TrapdoorCipher::new();

        let text = "127.0.0.1;5002|alice:héllo wörld ✓ 🧅";
        let sealed = cipher.seal(&keys.public, text);
        assert_eq!(sealed.len(), text.chars().count());
        assert_eq!(cipher.open(&keys.private, &sealed), text);
    }

    #[test]
    fn test_out_of_range_decodes_to_sentinel() {
        // d = 1 decodes to the value itself; 0xD800 is a surrogate
        let key = PrivateKey::new(1, 0xE000);
        let cipher = TrapdoorCipher::new();
        assert_eq!(cipher.open(&key, &[0xD800]), SENTINEL.to_string());
    }

    #[test]
    fn test_encode_decode_symbols() {
        assert_eq!(encode_symbols(&[1, 22, 333]), "1,22,333");
        assert_eq!(encode_symbols(&[]), "");
        assert_eq!(decode_symbols(" 1, 22 ,333 ").unwrap(), vec![1, 22, 333]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_symbols(""), Err(CryptoError::EmptyPayload)));
        assert!(matches!(
            decode_symbols("1,x,3"),
            Err(CryptoError::InvalidSymbol(_))
        ));
        assert!(matches!(
            decode_symbols("1,,3"),
            Err(CryptoError::InvalidSymbol(_))
        ));
        assert!(matches!(
            decode_symbols("-4"),
            Err(CryptoError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn test_looks_like_symbols() {
        assert!(looks_like_symbols("12,3,456"));
        assert!(!looks_like_symbols("alice:hello"));
        assert!(!looks_like_symbols("12,,3"));
        assert!(!looks_like_symbols(""));
        assert!(!looks_like_symbols("1234:5"));
    }
}
