//! Protocol constants and header helpers.
//!
//! HTTP headers become call metadata on the way in. A fixed set of transport
//! headers is never copied, and headers with the `-bin` suffix carry base64
//! encoded bytes whose `=` padding the sender is allowed to strip.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use bytes::Bytes;

use crate::error::Status;

/// Header carrying the client's requested timeout.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Header carrying the message encoding.
pub const GRPC_ENCODING_HEADER: &str = "grpc-encoding";

/// Header listing accepted message encodings.
pub const GRPC_ACCEPT_ENCODING_HEADER: &str = "grpc-accept-encoding";

/// Trailer carrying an encoded `google.rpc.Status` with structured error details.
pub const STATUS_DETAILS_TRAILER: &str = "grpc-status-details-bin";

/// Suffix marking a metadata key whose value is binary.
pub const BINARY_HEADER_SUFFIX: &str = "-bin";

/// Content type of every JSON response written by the gateway.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Full name of the raw-bytes passthrough message type.
pub const HTTP_BODY_TYPE: &str = "google.api.HttpBody";

/// Headers that are consumed by the transport and never become metadata.
pub const FILTERED_HEADERS: &[&str] = &[
    GRPC_TIMEOUT_HEADER,
    GRPC_ENCODING_HEADER,
    GRPC_ACCEPT_ENCODING_HEADER,
    "content-type",
    "te",
    "host",
    "accept-encoding",
];

/// Returns true if the header must not be copied into call metadata.
///
/// Pseudo-headers (`:path`, `:authority`, ...) are always filtered.
pub fn is_filtered_header(name: &str) -> bool {
    name.starts_with(':')
        || FILTERED_HEADERS
            .iter()
            .any(|filtered| filtered.eq_ignore_ascii_case(name))
}

/// Returns true if the metadata key carries a binary value.
pub fn is_binary_header(name: &str) -> bool {
    name.len() > BINARY_HEADER_SUFFIX.len()
        && name[name.len() - BINARY_HEADER_SUFFIX.len()..].eq_ignore_ascii_case(BINARY_HEADER_SUFFIX)
}

/// Decode a binary header value, repairing stripped base64 padding.
///
/// Values whose unpadded length is `1 (mod 4)` can never be valid base64 and
/// are rejected with `InvalidArgument`, as is any other malformed input.
///
/// # Example
///
/// ```
/// use transcode_axum_core::decode_binary_header;
///
/// assert_eq!(&decode_binary_header("AQI").unwrap()[..], &[1, 2]);
/// assert_eq!(&decode_binary_header("AQI=").unwrap()[..], &[1, 2]);
/// assert!(decode_binary_header("AQIDB").is_err());
/// ```
pub fn decode_binary_header(value: &str) -> Result<Bytes, Status> {
    let unpadded = value.trim_end_matches('=');
    let padding = match unpadded.len() % 4 {
        0 => "",
        2 => "==",
        3 => "=",
        _ => return Err(malformed_base64()),
    };

    let mut padded = String::with_capacity(unpadded.len() + padding.len());
    padded.push_str(unpadded);
    padded.push_str(padding);

    STANDARD
        .decode(padded.as_bytes())
        .map(Bytes::from)
        .map_err(|_| malformed_base64())
}

/// Encode a binary header value the way senders are expected to: without padding.
pub fn encode_binary_header(value: &[u8]) -> String {
    STANDARD_NO_PAD.encode(value)
}

fn malformed_base64() -> Status {
    Status::invalid_argument("Invalid Base64 encoded binary header value.")
}
