//! Webhook payload signatures.
//!
//! HMAC-SHA256 over the raw payload with a shared app secret,
//! GitHub-style header (`X-Hub-Signature-256: sha256=<hex>`). The
//! comparison is constant-time and hex case does not matter.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute the lowercase hex HMAC-SHA256 signature of a payload.
pub fn sign(app_secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(app_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature header against a payload.
///
/// Accepts the bare hex digest or the `sha256=` prefixed form, in
/// either hex case. Comparison runs in constant time over the decoded
/// bytes so a mismatch position does not leak through timing.
pub fn verify_signature(app_secret: &str, payload: &[u8], header: &str) -> bool {
    let hex_part = header.trim().strip_prefix("sha256=").unwrap_or(header.trim());

    // Decoding normalizes case; a non-hex header can never match.
    let Ok(claimed) = hex::decode(hex_part) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(app_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    claimed.ct_eq(expected.as_slice()).unwrap_u8() == 1
}
