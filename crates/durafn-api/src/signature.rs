//! Request and response signatures: `t=<unix_seconds>&s=<hmac_hex>`.
//!
//! The HMAC input is the exact body bytes followed by the decimal
//! timestamp; HTTP bodies are read once and signed as bytes. JSON the
//! handler produces itself serializes with stable key order (the
//! default `serde_json` map is ordered), so canonical form is what we
//! emit.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signatures older than this never verify.
pub const SIGNATURE_MAX_AGE_SECONDS: i64 = 5 * 60;

#[derive(Debug, Error, PartialEq)]
pub enum SignatureError {
    #[error("signature header is missing t= or s=")]
    Malformed,

    #[error("signature has expired")]
    Expired,

    #[error("signature does not match")]
    Mismatch,
}

/// Split a `signkey-<env>-` prefix off a signing key.
fn split_prefix(key: &str) -> (&str, &str) {
    if let Some(rest) = key.strip_prefix("signkey-") {
        if let Some(dash) = rest.find('-') {
            let material_start = "signkey-".len() + dash + 1;
            return (&key[..material_start], &key[material_start..]);
        }
    }
    ("", key)
}

/// The key material actually used for HMAC, with any env prefix removed.
pub fn normalize_key(key: &str) -> &str {
    split_prefix(key).1
}

/// A stable, shareable identifier for a signing key: the prefix plus the
/// SHA-256 of the key material. Hex-shaped material is hashed as bytes.
pub fn hashed_signing_key(key: &str) -> String {
    let (prefix, material) = split_prefix(key);
    let bytes = hex::decode(material).unwrap_or_else(|_| material.as_bytes().to_vec());
    let digest = Sha256::digest(&bytes);
    format!("{prefix}{digest:x}")
}

fn mac_for(body: &[u8], timestamp: &str, key: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(normalize_key(key).as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(body);
    mac.update(timestamp.as_bytes());
    mac
}

/// Sign a payload with the given key at the given unix time.
pub fn sign(body: &[u8], key: &str, unix_seconds: i64) -> String {
    let timestamp = unix_seconds.to_string();
    let digest = mac_for(body, &timestamp, key).finalize().into_bytes();
    format!("t={timestamp}&s={digest:x}")
}

/// Sign with the current wall clock.
pub fn sign_now(body: &[u8], key: &str) -> String {
    sign(body, key, chrono::Utc::now().timestamp())
}

fn parse_header(header: &str) -> Result<(i64, Vec<u8>), SignatureError> {
    let mut timestamp = None;
    let mut signature = None;

    for pair in header.split('&') {
        match pair.split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("s", value)) => signature = hex::decode(value).ok(),
            _ => {}
        }
    }

    match (timestamp, signature) {
        (Some(t), Some(s)) => Ok((t, s)),
        _ => Err(SignatureError::Malformed),
    }
}

/// Verify a signature header against the body at an explicit wall-clock
/// time. On mismatch the fallback key is retried; the key that verified
/// is returned so the response can be signed with it.
pub fn verify_at<'a>(
    body: &[u8],
    key: &'a str,
    fallback: Option<&'a str>,
    header: &str,
    now_unix_seconds: i64,
) -> Result<&'a str, SignatureError> {
    let (timestamp, signature) = parse_header(header)?;

    if now_unix_seconds - timestamp > SIGNATURE_MAX_AGE_SECONDS {
        return Err(SignatureError::Expired);
    }

    let ts = timestamp.to_string();
    if mac_for(body, &ts, key).verify_slice(&signature).is_ok() {
        return Ok(key);
    }
    if let Some(fallback) = fallback {
        if mac_for(body, &ts, fallback).verify_slice(&signature).is_ok() {
            return Ok(fallback);
        }
    }

    Err(SignatureError::Mismatch)
}

/// Verify against the current wall clock.
pub fn verify<'a>(
    body: &[u8],
    key: &'a str,
    fallback: Option<&'a str>,
    header: &str,
) -> Result<&'a str, SignatureError> {
    verify_at(body, key, fallback, header, chrono::Utc::now().timestamp())
}
