//! Signature primitives shared by provider adapters

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of `payload` keyed by `secret`
pub(crate) fn hmac_sha256(secret: &[u8], payload: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Constant-time byte comparison; length mismatch returns early
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Verify a hex HMAC-SHA256 signature, tolerating a `sha256=` prefix
pub(crate) fn verify_hex_hmac(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);

    let Ok(provided) = hex::decode(signature) else {
        tracing::debug!("Failed to decode webhook signature as hex");
        return false;
    };

    match hmac_sha256(secret, payload) {
        Some(expected) => constant_time_eq(&expected, &provided),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_hex_hmac_accepts_plain_and_prefixed() {
        let payload = br#"{"id":"evt_1"}"#;
        let sig = hex::encode(hmac_sha256(b"secret", payload).unwrap());

        assert!(verify_hex_hmac(b"secret", payload, &sig));
        assert!(verify_hex_hmac(b"secret", payload, &format!("sha256={}", sig)));
        assert!(!verify_hex_hmac(b"other", payload, &sig));
    }

    #[test]
    fn test_verify_hex_hmac_rejects_malformed() {
        assert!(!verify_hex_hmac(b"secret", b"{}", "not-hex"));
        assert!(!verify_hex_hmac(b"secret", b"{}", ""));
        assert!(!verify_hex_hmac(b"secret", b"{}", "abc"));
    }

    #[test]
    fn test_constant_time_eq_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"abc", b"abc"));
    }
}
