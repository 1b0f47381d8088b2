//! Status codes and error types.
//!
//! This module provides the protocol error types used by the transcoding layer:
//! - [`Code`]: gRPC status codes
//! - [`Status`]: A code, a message and the trailers that travel with them
//! - [`RpcStatus`]: The `google.rpc.Status` wire message carried in
//!   the `grpc-status-details-bin` trailer

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use http::StatusCode;
use prost::Message;

use crate::metadata::{Metadata, MetadataValue};
use crate::protocol::STATUS_DETAILS_TRAILER;

/// gRPC status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Get the string representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "Cancelled",
            Code::Unknown => "Unknown",
            Code::InvalidArgument => "InvalidArgument",
            Code::DeadlineExceeded => "DeadlineExceeded",
            Code::NotFound => "NotFound",
            Code::AlreadyExists => "AlreadyExists",
            Code::PermissionDenied => "PermissionDenied",
            Code::ResourceExhausted => "ResourceExhausted",
            Code::FailedPrecondition => "FailedPrecondition",
            Code::Aborted => "Aborted",
            Code::OutOfRange => "OutOfRange",
            Code::Unimplemented => "Unimplemented",
            Code::Internal => "Internal",
            Code::Unavailable => "Unavailable",
            Code::DataLoss => "DataLoss",
            Code::Unauthenticated => "Unauthenticated",
        }
    }

    /// Look up a code by its numeric value.
    pub fn from_i32(value: i32) -> Option<Code> {
        let code = match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => return None,
        };
        Some(code)
    }

    /// The numeric value of this code, as written in JSON error bodies.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// The HTTP status code used when this code is returned to a JSON caller.
    ///
    /// # Example
    ///
    /// ```
    /// use transcode_axum_core::Code;
    /// use http::StatusCode;
    ///
    /// assert_eq!(Code::NotFound.http_status(), StatusCode::NOT_FOUND);
    /// assert_eq!(Code::Cancelled.http_status(), StatusCode::REQUEST_TIMEOUT);
    /// ```
    pub fn http_status(self) -> StatusCode {
        match self {
            Code::Ok => StatusCode::OK,
            Code::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists => StatusCode::CONFLICT,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Code::FailedPrecondition => StatusCode::BAD_REQUEST,
            Code::Aborted => StatusCode::CONFLICT,
            Code::OutOfRange => StatusCode::BAD_REQUEST,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a raw numeric status code to an HTTP status.
///
/// Codes outside the known range map to `500 Internal Server Error`.
pub fn http_status_for(code: i32) -> StatusCode {
    Code::from_i32(code)
        .map(Code::http_status)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseCodeError(());

impl fmt::Display for ParseCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status code")
    }
}

impl std::error::Error for ParseCodeError {}

impl FromStr for Code {
    type Err = ParseCodeError;

    /// Accepts `InvalidArgument`, `INVALID_ARGUMENT` and `invalid_argument` forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "ok" => Ok(Code::Ok),
            "cancelled" | "canceled" => Ok(Code::Cancelled),
            "unknown" => Ok(Code::Unknown),
            "invalidargument" => Ok(Code::InvalidArgument),
            "deadlineexceeded" => Ok(Code::DeadlineExceeded),
            "notfound" => Ok(Code::NotFound),
            "alreadyexists" => Ok(Code::AlreadyExists),
            "permissiondenied" => Ok(Code::PermissionDenied),
            "resourceexhausted" => Ok(Code::ResourceExhausted),
            "failedprecondition" => Ok(Code::FailedPrecondition),
            "aborted" => Ok(Code::Aborted),
            "outofrange" => Ok(Code::OutOfRange),
            "unimplemented" => Ok(Code::Unimplemented),
            "internal" => Ok(Code::Internal),
            "unavailable" => Ok(Code::Unavailable),
            "dataloss" => Ok(Code::DataLoss),
            "unauthenticated" => Ok(Code::Unauthenticated),
            _ => Err(ParseCodeError(())),
        }
    }
}

// ============================================================================
// RpcStatus
// ============================================================================

/// The `google.rpc.Status` message.
///
/// Encoded into the `grpc-status-details-bin` trailer to carry structured
/// error details alongside a status.
#[derive(Clone, PartialEq, Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<prost_types::Any>,
}

// ============================================================================
// Status
// ============================================================================

/// A status returned by an RPC method.
///
/// Handlers return this (boxed) to report a declared protocol error. The
/// code and message are passed through to the caller and the metadata is
/// forwarded as response trailers.
///
/// # Example
///
/// ```
/// use transcode_axum_core::{Code, Status};
///
/// let status = Status::not_found("shelf 42 does not exist");
/// assert_eq!(status.code(), Code::NotFound);
/// assert_eq!(status.http_status(), http::StatusCode::NOT_FOUND);
/// ```
#[derive(Clone, Debug)]
pub struct Status {
    code: Code,
    message: String,
    metadata: Metadata,
}

impl Status {
    /// Create a new status with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    /// Create a new status with just a code.
    pub fn from_code(code: Code) -> Self {
        Self::new(code, "")
    }

    /// Get the status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the status message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Trailers that travel with this status.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable access to the trailers.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Replace the trailers.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach structured details.
    ///
    /// The details are wrapped in a `google.rpc.Status` with this status'
    /// code and message and stored in the `grpc-status-details-bin` trailer.
    pub fn with_details(mut self, details: Vec<prost_types::Any>) -> Self {
        let rpc_status = RpcStatus {
            code: self.code.as_i32(),
            message: self.message.clone(),
            details,
        };
        self.metadata.insert(
            STATUS_DETAILS_TRAILER,
            MetadataValue::Binary(Bytes::from(rpc_status.encode_to_vec())),
        );
        self
    }

    /// Decode the `google.rpc.Status` carried in the details trailer, if any.
    pub fn rpc_status(&self) -> Option<RpcStatus> {
        decode_rpc_status(&self.metadata)
    }

    /// The HTTP status for this status' code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    // Convenience constructors for all error codes

    /// Create a cancelled status.
    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Cancelled, message)
    }

    /// Create an unknown status.
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unknown, message)
    }

    /// Create an invalid argument status.
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Create a deadline exceeded status.
    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// Create a not found status.
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// Create an already exists status.
    pub fn already_exists<S: Into<String>>(message: S) -> Self {
        Self::new(Code::AlreadyExists, message)
    }

    /// Create a permission denied status.
    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    /// Create a resource exhausted status.
    pub fn resource_exhausted<S: Into<String>>(message: S) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    /// Create a failed precondition status.
    pub fn failed_precondition<S: Into<String>>(message: S) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    /// Create an aborted status.
    pub fn aborted<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Aborted, message)
    }

    /// Create an out of range status.
    pub fn out_of_range<S: Into<String>>(message: S) -> Self {
        Self::new(Code::OutOfRange, message)
    }

    /// Create an unimplemented status.
    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// Create an internal status.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Create an unavailable status.
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// Create a data loss status.
    pub fn data_loss<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DataLoss, message)
    }

    /// Create an unauthenticated status.
    pub fn unauthenticated<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unauthenticated, message)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

/// Decode the `google.rpc.Status` stored in the details trailer of `metadata`.
///
/// Returns `None` if the trailer is absent, not binary, or not a valid message.
pub fn decode_rpc_status(metadata: &Metadata) -> Option<RpcStatus> {
    let bytes = metadata.get_bin(STATUS_DETAILS_TRAILER)?;
    RpcStatus::decode(bytes.clone()).ok()
}

/// Flatten an error and its chain of sources into a single line.
///
/// Each error is written as `Type: message`, or just the message when the
/// type cannot be told. Parts are joined with a space. A source whose
/// message is already part of the previous message (as produced by
/// `#[error("...: {0}")]`) is skipped.
pub fn flatten_error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(error);

    while let Some(err) = current {
        let message = err.to_string();
        let repeated = parts.last().is_some_and(|last| last.contains(&message));
        if !message.is_empty() && !repeated {
            match error_type_name(err) {
                Some(name) => parts.push(format!("{name}: {message}")),
                None => parts.push(message),
            }
        }
        current = err.source();
    }

    parts.join(" ")
}

/// Best effort type name of a type-erased error.
///
/// `dyn Error` carries no type name, so this reads the leading identifier of
/// the derived `Debug` output. Errors built from strings debug-print as a
/// quoted literal and have no name.
fn error_type_name(error: &(dyn std::error::Error + 'static)) -> Option<String> {
    if error.is::<std::io::Error>() {
        return Some("std::io::Error".to_string());
    }
    let debug = format!("{error:?}");
    let name: String = debug
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    name.starts_with(|c: char| c.is_ascii_uppercase()).then_some(name)
}
