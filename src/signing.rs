//! HMAC-SHA256 payload signing for outbound dispatch.
//!
//! Signatures are computed over the exact payload bytes being sent and
//! emitted as `sha256=<lowercase hex>` in the `X-Webhook-Signature-256`
//! header. Verification is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature on outbound requests.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Sign `payload` with `secret`, returning `sha256=<hex digest>`.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify that `signature` matches `payload` under `secret`.
///
/// The hex digest comparison is constant-time via `Mac::verify_slice`.
pub fn verify(payload: &[u8], secret: &str, signature: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(digest) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    mac.verify_slice(&digest).is_ok()
}
