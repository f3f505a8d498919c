//! HMAC-SHA256 request signing for exchange APIs.
//!
//! Uses the `ring` crate for constant-time HMAC computation, avoiding
//! OpenSSL dependencies. Every function here is pure: the same secret and
//! canonical payload always produce the same signature. Secrets are never
//! logged or included in error messages.
//!
//! Canonical payloads per exchange:
//! - Binance, MEXC: the exact query string sent, `signature` excluded.
//! - Bybit v5: `timestamp + api_key + recv_window + (query string | JSON body)`.
//! - Bitget v2: `timestamp + METHOD + path + ["?" + query] + body`, base64.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::hmac;

fn hmac_sha256(secret: &str, payload: &str) -> hmac::Tag {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    hmac::sign(&key, payload.as_bytes())
}

/// Lowercase hex HMAC-SHA256 of `payload`.
pub fn sign_hex(secret: &str, payload: &str) -> String {
    hex::encode(hmac_sha256(secret, payload).as_ref())
}

/// Sign a Binance or MEXC spot request.
///
/// Both sign the query string: `HMAC-SHA256(secret, query_string)`.
/// The hex signature is appended as `&signature=...`.
pub fn sign_query_string(secret: &str, query_string: &str) -> String {
    sign_hex(secret, query_string)
}

/// Canonical Bybit v5 payload.
pub fn bybit_prehash(timestamp: u64, api_key: &str, recv_window: u64, payload: &str) -> String {
    format!("{}{}{}{}", timestamp, api_key, recv_window, payload)
}

/// Sign a Bybit REST API v5 request.
///
/// Bybit signs the concatenation `timestamp + api_key + recv_window + payload`
/// where payload is the query string for GET and the raw JSON body for POST.
/// The hex signature is sent in the `X-BAPI-SIGN` header.
pub fn sign_bybit_request(
    secret: &str,
    timestamp: u64,
    api_key: &str,
    recv_window: u64,
    payload: &str,
) -> String {
    sign_hex(secret, &bybit_prehash(timestamp, api_key, recv_window, payload))
}

/// Canonical Bitget v2 payload.
///
/// `method` must already be upper case; an empty `query` adds no `?`.
pub fn bitget_prehash(timestamp: u64, method: &str, path: &str, query: &str, body: &str) -> String {
    if query.is_empty() {
        format!("{}{}{}{}", timestamp, method, path, body)
    } else {
        format!("{}{}{}?{}{}", timestamp, method, path, query, body)
    }
}

/// Sign a Bitget REST API v2 request.
///
/// Bitget base64-encodes the raw HMAC instead of hex-encoding it. The result
/// is sent in the `ACCESS-SIGN` header.
pub fn sign_bitget_request(
    secret: &str,
    timestamp: u64,
    method: &str,
    path: &str,
    query: &str,
    body: &str,
) -> String {
    let prehash = bitget_prehash(timestamp, method, path, query, body);
    BASE64.encode(hmac_sha256(secret, &prehash).as_ref())
}
