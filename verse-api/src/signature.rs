//! HMAC signatures: inbound webhook verification and unsubscribe tokens.
//!
//! All comparisons go through `Mac::verify_slice`, which is constant time.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature header malformed: {0}")]
    Malformed(&'static str),
    #[error("timestamp outside tolerance ({age_secs}s)")]
    Expired { age_secs: i64 },
    #[error("signature mismatch")]
    Mismatch,
}

impl From<SignatureError> for ApiError {
    fn from(err: SignatureError) -> Self {
        tracing::warn!(error = %err, "Rejected webhook signature");
        ApiError::invalid_signature(err.to_string())
    }
}

fn mac_over(key: &[u8], parts: &[&[u8]]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    for part in parts {
        mac.update(part);
    }
    Some(mac)
}

fn sign(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    mac_over(key, parts)
        .map(|mac| mac.finalize().into_bytes().to_vec())
        .unwrap_or_default()
}

fn verify(key: &[u8], parts: &[&[u8]], candidate: &[u8]) -> bool {
    mac_over(key, parts).is_some_and(|mac| mac.verify_slice(candidate).is_ok())
}

/// Constant-time equality for shared secrets such as admin keys.
pub fn constant_time_eq(expected: &[u8], candidate: &[u8]) -> bool {
    let digest = sign(b"verse-key-compare", &[expected]);
    verify(b"verse-key-compare", &[candidate], &digest)
}

/// `timestamp` comes straight from a request header, so any i64 must be
/// handled without overflow.
fn check_tolerance(timestamp: i64, now: i64, tolerance_secs: i64) -> Result<(), SignatureError> {
    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if now.abs_diff(timestamp) > tolerance {
        return Err(SignatureError::Expired {
            age_secs: now.saturating_sub(timestamp),
        });
    }
    Ok(())
}

// ============================================================================
// STRIPE
// ============================================================================

/// Verify a `Stripe-Signature: t=<ts>,v1=<hex>[,v1=<hex>]` header.
///
/// Returns the signed timestamp.
pub fn verify_stripe(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<i64, SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for item in header.split(',') {
        match item.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::Malformed("timestamp"))?,
                )
            }
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed("missing t"))?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed("missing v1"));
    }
    check_tolerance(timestamp, now, tolerance_secs)?;

    let ts = timestamp.to_string();
    let parts: [&[u8]; 3] = [ts.as_bytes(), b".", payload];
    let matched = signatures
        .iter()
        .filter_map(|sig| hex::decode(sig).ok())
        .any(|sig| verify(secret.as_bytes(), &parts, &sig));
    if matched {
        Ok(timestamp)
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a `Stripe-Signature` header value.
pub fn sign_stripe(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let ts = timestamp.to_string();
    let sig = sign(secret.as_bytes(), &[ts.as_bytes(), b".", payload]);
    format!("t={},v1={}", ts, hex::encode(sig))
}

// ============================================================================
// SVIX (RESEND)
// ============================================================================

fn svix_key(secret: &str) -> Result<Vec<u8>, SignatureError> {
    let encoded = secret.strip_prefix("whsec_").unwrap_or(secret);
    STANDARD
        .decode(encoded)
        .map_err(|_| SignatureError::Malformed("secret"))
}

/// Svix headers (`svix-id`, `svix-timestamp`, `svix-signature`).
#[derive(Debug, Clone, Copy)]
pub struct SvixHeaders<'a> {
    pub id: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub signature: Option<&'a str>,
}

/// Verify a Svix-signed payload. The signature header holds space-separated
/// `v1,<base64>` entries; any match is accepted.
pub fn verify_svix(
    payload: &[u8],
    headers: SvixHeaders<'_>,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let id = headers.id.ok_or(SignatureError::Missing)?;
    let ts_raw = headers.timestamp.ok_or(SignatureError::Missing)?;
    let signature = headers.signature.ok_or(SignatureError::Missing)?;
    let timestamp = ts_raw
        .trim()
        .parse::<i64>()
        .map_err(|_| SignatureError::Malformed("timestamp"))?;
    check_tolerance(timestamp, now, tolerance_secs)?;

    let key = svix_key(secret)?;
    let parts: [&[u8]; 5] = [id.as_bytes(), b".", ts_raw.trim().as_bytes(), b".", payload];
    let matched = signature
        .split_whitespace()
        .filter_map(|entry| entry.strip_prefix("v1,"))
        .filter_map(|b64| STANDARD.decode(b64).ok())
        .any(|sig| verify(&key, &parts, &sig));
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a `svix-signature` header value.
pub fn sign_svix(payload: &[u8], secret: &str, id: &str, timestamp: i64) -> Result<String, SignatureError> {
    let key = svix_key(secret)?;
    let ts = timestamp.to_string();
    let sig = sign(&key, &[id.as_bytes(), b".", ts.as_bytes(), b".", payload]);
    Ok(format!("v1,{}", STANDARD.encode(sig)))
}

// ============================================================================
// COINBASE COMMERCE
// ============================================================================

/// Verify `X-CC-Webhook-Signature`: hex HMAC-SHA256 of the raw body.
pub fn verify_coinbase(payload: &[u8], header: Option<&str>, secret: &str) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let sig = hex::decode(header.trim()).map_err(|_| SignatureError::Malformed("hex"))?;
    if verify(secret.as_bytes(), &[payload], &sig) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

pub fn sign_coinbase(payload: &[u8], secret: &str) -> String {
    hex::encode(sign(secret.as_bytes(), &[payload]))
}

// ============================================================================
// UNSUBSCRIBE TOKENS
// ============================================================================

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// `base64url(email).hex(hmac_sha256(secret, email))`
pub fn unsubscribe_token(secret: &str, email: &str) -> String {
    let email = normalize_email(email);
    let sig = sign(secret.as_bytes(), &[email.as_bytes()]);
    format!("{}.{}", URL_SAFE_NO_PAD.encode(email.as_bytes()), hex::encode(sig))
}

/// Return the email an unsubscribe token was issued for.
pub fn verify_unsubscribe_token(secret: &str, token: &str) -> Result<String, SignatureError> {
    let (encoded, sig_hex) = token
        .trim()
        .split_once('.')
        .ok_or(SignatureError::Malformed("token"))?;
    let email_bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| SignatureError::Malformed("email"))?;
    let email = String::from_utf8(email_bytes).map_err(|_| SignatureError::Malformed("email"))?;
    let sig = hex::decode(sig_hex).map_err(|_| SignatureError::Malformed("hex"))?;
    if !verify(secret.as_bytes(), &[email.as_bytes()], &sig) {
        return Err(SignatureError::Mismatch);
    }
    if !email.contains('@') {
        return Err(SignatureError::Malformed("email"));
    }
    Ok(email)
}
