//! HMAC-SHA256 verification of webhook bodies.
//!
//! GitHub sends `X-Hub-Signature-256: sha256=<hex>`, Gitea and Gogs send
//! `X-Gitea-Signature: <hex>`. Both carry the same digest.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::HookError;

type HmacSha256 = Hmac<Sha256>;

/// Header names checked for a signature, in order of preference.
pub const SIGNATURE_HEADERS: &[&str] = &[
    "x-hub-signature-256",
    "x-gitea-signature",
    "x-gogs-signature",
];

/// Check `signature` (with or without a `sha256=` prefix) against `body`.
///
/// Comparison is constant-time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> Result<(), HookError> {
    let signature = signature.trim();
    let sig_hex = match signature.split_once('=') {
        Some(("sha256", hex)) => hex,
        Some((algo, _)) => {
            return Err(HookError::SignatureMalformed(format!(
                "unsupported digest '{}'",
                algo
            )))
        }
        None => signature,
    };

    let expected = hex::decode(sig_hex)
        .map_err(|e| HookError::SignatureMalformed(format!("invalid hex in signature: {}", e)))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| HookError::SignatureMalformed(format!("HMAC init failed: {}", e)))?;
    mac.update(body);

    mac.verify_slice(&expected)
        .map_err(|_| HookError::SignatureInvalid)
}

/// `sha256=<hex>` signature of `body`, as GitHub would send it.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, HookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| HookError::SignatureMalformed(format!("HMAC init failed: {}", e)))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
