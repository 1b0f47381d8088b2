//! grpc-timeout parsing and computation.
//!
//! Clients can send a `grpc-timeout` header to bound how long they are
//! willing to wait. The value is up to eight ASCII digits followed by a unit:
//! `H` (hours), `M` (minutes), `S` (seconds), `m` (milliseconds),
//! `u` (microseconds) or `n` (nanoseconds).

use std::time::Duration;

use axum::http::HeaderMap;
use transcode_axum_core::GRPC_TIMEOUT_HEADER;

const MAX_TIMEOUT_DIGITS: usize = 8;

/// Parse the `grpc-timeout` header from request headers.
///
/// Returns `None` if the header is missing or malformed. A malformed value
/// is logged and ignored, leaving the call unbounded by the client.
pub fn parse_timeout(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(GRPC_TIMEOUT_HEADER)?;
    let parsed = value.to_str().ok().and_then(parse_grpc_timeout);
    if parsed.is_none() {
        tracing::debug!(value = ?value, "ignoring invalid grpc-timeout header");
    }
    parsed
}

/// Parse a `grpc-timeout` value such as `100m` or `5S`.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > MAX_TIMEOUT_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    let duration = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}

/// Compute the effective timeout from server and client timeouts.
///
/// The smaller of the two wins. Returns `None` if neither is set.
pub fn compute_effective_timeout(
    server_timeout: Option<Duration>,
    client_timeout: Option<Duration>,
) -> Option<Duration> {
    match (server_timeout, client_timeout) {
        (Some(server), Some(client)) => Some(server.min(client)),
        (Some(server), None) => Some(server),
        (None, Some(client)) => Some(client),
        (None, None) => None,
    }
}
