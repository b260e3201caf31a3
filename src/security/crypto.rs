//! Cryptographic helpers.
//!
//! - Constant-time comparison for every secret comparison
//! - Random tokens from the OS CSPRNG
//! - Delimiter-safe field encoding for cookie payloads

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;

/// Entropy of series, token values and CSRF tokens.
pub const RANDOM_TOKEN_BYTES: usize = 64;

/// Constant-time comparison of two byte slices.
///
/// Length mismatch returns early; the length of a random token is not secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Constant-time comparison of two strings.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Base64 of `RANDOM_TOKEN_BYTES` bytes from the OS generator.
pub fn random_token() -> String {
    let mut bytes = [0u8; RANDOM_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Encode an untrusted string so it can never contain a payload delimiter.
pub fn encode_field(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Inverse of [`encode_field`]. `None` on invalid base64 or UTF-8.
pub fn decode_field(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}
