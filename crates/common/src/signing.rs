use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `t=<unix ms>,v1=<base64 hmac>` on outgoing webhooks.
pub const SIGNATURE_HEADER: &str = "X-Aimon-Signature";

/// Signs `"{timestamp_ms}.{body}"` so receivers can reject replayed bodies.
pub fn sign_body(secret: &[u8], timestamp_ms: i64, body: &[u8]) -> String {
    let sig = STANDARD.encode(mac(secret, timestamp_ms, body).finalize().into_bytes());
    format!("t={timestamp_ms},v1={sig}")
}

/// Checks a header produced by [`sign_body`]. Returns false on any
/// malformed input instead of erroring.
pub fn verify_body(secret: &[u8], header: &str, body: &[u8]) -> bool {
    let Some((timestamp_ms, sig_b64)) = parse_header(header) else {
        return false;
    };
    let Ok(sig_bytes) = STANDARD.decode(sig_b64) else {
        return false;
    };
    mac(secret, timestamp_ms, body).verify_slice(&sig_bytes).is_ok()
}

fn mac(secret: &[u8], timestamp_ms: i64, body: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

fn parse_header(header: &str) -> Option<(i64, &str)> {
    let mut timestamp = None;
    let mut sig = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => sig = Some(v),
            _ => {}
        }
    }
    Some((timestamp?, sig?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify() {
        let header = sign_body(b"hook-secret", 1_700_000_000_000, b"{\"status\":\"firing\"}");
        assert!(header.starts_with("t=1700000000000,v1="));
        assert!(verify_body(b"hook-secret", &header, b"{\"status\":\"firing\"}"));
    }

    #[test]
    fn tampered_body_rejected() {
        let header = sign_body(b"k", 1, b"original");
        assert!(!verify_body(b"k", &header, b"changed"));
    }

    #[test]
    fn timestamp_is_covered() {
        let header = sign_body(b"k", 1, b"body");
        let forged = header.replacen("t=1", "t=2", 1);
        assert!(!verify_body(b"k", &forged, b"body"));
    }

    #[test]
    fn malformed_header_rejected() {
        assert!(!verify_body(b"k", "garbage", b"body"));
        assert!(!verify_body(b"k", "t=1,v1=!!notbase64", b"body"));
    }
}
