// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

// Token clock
// Decodes a bearer token's expiry claim and decides when to refresh it

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Refresh this many seconds before the token expires.
const REFRESH_LEAD_SECS: i64 = 300;

/// Never refresh sooner than this, even for a token at or past expiry.
const MIN_REFRESH_DELAY_SECS: i64 = 60;

/// Decode the `exp` claim (Unix seconds) from a JWT-shaped bearer token.
///
/// The payload is the second dot-separated segment, Base64URL-encoded JSON.
/// Returns `None` for anything that does not decode; this boundary never
/// panics on malformed input.
pub fn decode_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}

/// Compute how long to wait before proactively refreshing `token`.
///
/// Returns `None` when the token carries no usable expiry; the caller must
/// treat the credential as having unknown life and arm no timer.
pub fn time_until_refresh(token: &str, now: DateTime<Utc>) -> Option<Duration> {
    let exp = match decode_expiry(token) {
        Some(exp) => exp,
        None => {
            tracing::warn!("Credential has no decodable expiry; refresh not scheduled");
            return None;
        }
    };

    let seconds_left = exp - now.timestamp();
    let delay = (seconds_left - REFRESH_LEAD_SECS).max(MIN_REFRESH_DELAY_SECS);
    Some(Duration::from_secs(delay as u64))
}
