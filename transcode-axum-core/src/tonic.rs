//! Conversions from tonic types.
//!
//! Lets handlers that wrap tonic clients or services return `tonic::Status`
//! directly; the gateway treats it like a declared [`Status`].

use bytes::Bytes;
use tonic::metadata::KeyAndValueRef;

use crate::error::{Code, Status};
use crate::metadata::{Metadata, MetadataValue};
use crate::protocol::STATUS_DETAILS_TRAILER;

impl From<tonic::Code> for Code {
    fn from(code: tonic::Code) -> Self {
        Code::from_i32(code as i32).unwrap_or(Code::Unknown)
    }
}

impl From<Code> for tonic::Code {
    fn from(code: Code) -> Self {
        tonic::Code::from_i32(code.as_i32())
    }
}

impl From<tonic::Status> for Status {
    fn from(status: tonic::Status) -> Self {
        let mut metadata = Metadata::new();
        for entry in status.metadata().iter() {
            match entry {
                KeyAndValueRef::Ascii(key, value) => {
                    if let Ok(text) = value.to_str() {
                        metadata.append(key.as_str(), MetadataValue::Ascii(text.to_string()));
                    }
                }
                KeyAndValueRef::Binary(key, value) => {
                    if let Ok(bytes) = value.to_bytes() {
                        metadata.append(key.as_str(), MetadataValue::Binary(bytes));
                    }
                }
            }
        }

        if !status.details().is_empty() {
            metadata.insert(
                STATUS_DETAILS_TRAILER,
                MetadataValue::Binary(Bytes::copy_from_slice(status.details())),
            );
        }

        Status::new(status.code().into(), status.message()).with_metadata(metadata)
    }
}
