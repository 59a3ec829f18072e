//! HMAC-SHA256 helpers shared by every adapter's webhook verification path
//! (Stripe, Razorpay and Airwallex all sign with HMAC-SHA256 over some
//! variant of the raw body; Xendit uses a bearer token instead, see
//! `xendit.rs`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn compute_hex(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex_encode(mac.finalize().into_bytes().as_slice())
}

/// Constant-time verification. The MAC is always computed, even when the
/// signature fails to hex-decode, so a malformed header doesn't take a
/// different code path timing-wise than a wrong-but-valid-hex one.
pub fn verify_hex(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let expected = hex_decode(signature).unwrap_or_default();
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let secret = b"shh";
        let body = b"event body";
        let sig = compute_hex(secret, body);
        assert!(verify_hex(secret, body, &sig));
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = b"shh";
        let sig = compute_hex(secret, b"original");
        assert!(!verify_hex(secret, b"tampered", &sig));
    }

    #[test]
    fn rejects_invalid_hex_without_panicking() {
        assert!(!verify_hex(b"shh", b"body", "zz-not-hex"));
    }
}
