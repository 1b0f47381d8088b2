//! Response and error marshalling.
//!
//! Output messages are written as proto3 JSON, either whole or just the
//! field named by the rule's `response_body`. A `google.api.HttpBody` output
//! is written raw with its own content type. Errors are written as
//! `{"code", "message", "details"}` objects.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http_body_util::StreamBody;
use http_body::Frame;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, ReflectMessage, SerializeOptions};
use transcode_axum_core::{
    HTTP_BODY_TYPE, JSON_CONTENT_TYPE, Metadata, Status, http_status_for,
};

use crate::limits::MessageLimits;
use crate::registry::SchemaRegistry;

/// JSON formatting options.
///
/// # Example
///
/// ```rust
/// use transcode_axum::JsonSettings;
///
/// let settings = JsonSettings::new()
///     .write_enums_as_integers(true)
///     .write_indented(true);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JsonSettings {
    ignore_default_values: bool,
    write_enums_as_integers: bool,
    write_int64s_as_strings: bool,
    write_indented: bool,
}

impl JsonSettings {
    /// Default settings: defaults are written, enums by name, 64-bit
    /// integers as numbers, compact output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Omit fields that hold their default value.
    pub fn ignore_default_values(mut self, ignore: bool) -> Self {
        self.ignore_default_values = ignore;
        self
    }

    /// Write enum values as numbers instead of names.
    pub fn write_enums_as_integers(mut self, enabled: bool) -> Self {
        self.write_enums_as_integers = enabled;
        self
    }

    /// Write 64-bit integers as JSON strings.
    pub fn write_int64s_as_strings(mut self, enabled: bool) -> Self {
        self.write_int64s_as_strings = enabled;
        self
    }

    /// Pretty-print unary responses. Stream frames are always compact.
    pub fn write_indented(mut self, enabled: bool) -> Self {
        self.write_indented = enabled;
        self
    }

    pub fn get_ignore_default_values(&self) -> bool {
        self.ignore_default_values
    }

    pub fn get_write_enums_as_integers(&self) -> bool {
        self.write_enums_as_integers
    }

    pub fn get_write_int64s_as_strings(&self) -> bool {
        self.write_int64s_as_strings
    }

    pub fn get_write_indented(&self) -> bool {
        self.write_indented
    }

    fn serialize_options(&self) -> SerializeOptions {
        SerializeOptions::new()
            .skip_default_fields(self.ignore_default_values)
            .use_enum_numbers(self.write_enums_as_integers)
            .stringify_64_bit_integers(self.write_int64s_as_strings)
    }
}

/// An encoded response body and its content type.
#[derive(Clone, Debug)]
pub struct EncodedBody {
    pub content_type: HeaderValue,
    pub bytes: Bytes,
}

/// Serialize a message to a JSON value.
pub fn to_json_value(message: &DynamicMessage, settings: &JsonSettings) -> Result<serde_json::Value, Status> {
    message
        .serialize_with_options(serde_json::value::Serializer, &settings.serialize_options())
        .map_err(|err| Status::internal(format!("failed to serialize response: {err}")))
}

/// Encode a unary response.
pub fn encode_response(
    message: &DynamicMessage,
    response_body: Option<&FieldDescriptor>,
    settings: &JsonSettings,
    limits: &MessageLimits,
) -> Result<EncodedBody, Status> {
    let encoded = match response_body {
        None if message.descriptor().full_name() == HTTP_BODY_TYPE => raw_http_body(message),
        None => json_body(&to_json_value(message, settings)?, settings.write_indented)?,
        Some(field) => {
            let selected = message.get_field(field);
            match selected.as_message() {
                Some(http_body) if !field.is_list() && http_body.descriptor().full_name() == HTTP_BODY_TYPE => {
                    raw_http_body(http_body)
                }
                _ => json_body(&response_field_value(message, field, settings)?, settings.write_indented)?,
            }
        }
    };
    limits.check_send_size(encoded.bytes.len())?;
    Ok(encoded)
}

/// Encode one stream frame: compact JSON followed by a newline.
pub fn encode_stream_frame(message: &DynamicMessage, settings: &JsonSettings) -> Result<Bytes, Status> {
    let value = to_json_value(message, settings)?;
    let mut bytes = serde_json::to_vec(&value)
        .map_err(|err| Status::internal(format!("failed to serialize response: {err}")))?;
    bytes.push(b'\n');
    Ok(Bytes::from(bytes))
}

/// The JSON value of one top-level field. An unset singular message field
/// is `null`.
fn response_field_value(
    message: &DynamicMessage,
    field: &FieldDescriptor,
    settings: &JsonSettings,
) -> Result<serde_json::Value, Status> {
    let is_message = matches!(field.kind(), Kind::Message(_)) && !field.is_list() && !field.is_map();
    if is_message && !message.has_field(field) {
        return Ok(serde_json::Value::Null);
    }

    let settings = settings.ignore_default_values(false);
    let mut value = to_json_value(message, &settings)?;
    Ok(value
        .as_object_mut()
        .and_then(|object| object.remove(field.json_name()))
        .unwrap_or(serde_json::Value::Null))
}

fn json_body(value: &serde_json::Value, indented: bool) -> Result<EncodedBody, Status> {
    let bytes = if indented {
        serde_json::to_vec_pretty(value)
    } else {
        serde_json::to_vec(value)
    }
    .map_err(|err| Status::internal(format!("failed to serialize response: {err}")))?;

    Ok(EncodedBody {
        content_type: HeaderValue::from_static(JSON_CONTENT_TYPE),
        bytes: Bytes::from(bytes),
    })
}

fn raw_http_body(http_body: &DynamicMessage) -> EncodedBody {
    let content_type = http_body
        .get_field_by_name("content_type")
        .and_then(|value| value.as_str().and_then(|text| HeaderValue::from_str(text).ok()))
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let bytes = http_body
        .get_field_by_name("data")
        .and_then(|value| value.as_bytes().cloned())
        .unwrap_or_default();
    EncodedBody { content_type, bytes }
}

/// Build the JSON error object for a status.
///
/// When the status carries a `google.rpc.Status` in its details trailer,
/// that supplies the code, message and details.
pub fn error_json(status: &Status, registry: &SchemaRegistry, settings: &JsonSettings) -> serde_json::Value {
    let (code, message, details) = match status.rpc_status() {
        Some(rpc_status) => {
            let details: Vec<serde_json::Value> = rpc_status
                .details
                .iter()
                .map(|any| render_detail(any, registry, settings))
                .collect();
            (rpc_status.code, rpc_status.message, details)
        }
        None => (status.code().as_i32(), status.message().to_string(), Vec::new()),
    };

    serde_json::json!({
        "code": code,
        "message": message,
        "details": details,
    })
}

fn render_detail(any: &prost_types::Any, registry: &SchemaRegistry, settings: &JsonSettings) -> serde_json::Value {
    let known = registry
        .resolve_type_url(&any.type_url)
        .and_then(|descriptor| DynamicMessage::decode(descriptor, any.value.as_slice()).ok())
        .and_then(|message| to_json_value(&message, settings).ok());

    match known {
        Some(serde_json::Value::Object(mut object)) => {
            object.insert("@type".to_string(), serde_json::Value::String(any.type_url.clone()));
            serde_json::Value::Object(object)
        }
        _ => serde_json::json!({
            "@type": any.type_url,
            "value": STANDARD.encode(&any.value),
        }),
    }
}

/// Build a successful unary response.
pub fn success_response(encoded: EncodedBody, headers: &Metadata, trailers: &Metadata) -> Response {
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, encoded.content_type)
        .body(body_with_trailers(encoded.bytes, trailers))
        .unwrap_or_else(|_| internal_error_response());
    extend_headers(response.headers_mut(), headers);
    response
}

/// Build an error response.
///
/// `trailers` (plus the status' own metadata) are sent as HTTP trailers.
pub fn error_response(
    status: &Status,
    registry: &SchemaRegistry,
    settings: &JsonSettings,
    headers: &Metadata,
    trailers: &Metadata,
) -> Response {
    let value = error_json(status, registry, settings);
    let code = value
        .get("code")
        .and_then(serde_json::Value::as_i64)
        .and_then(|code| i32::try_from(code).ok())
        .unwrap_or(status.code().as_i32());
    let Ok(encoded) = json_body(&value, settings.write_indented) else {
        return internal_error_response();
    };

    let mut all_trailers = trailers.clone();
    all_trailers.extend(status.metadata().clone());

    let mut response = Response::builder()
        .status(http_status_for(code))
        .header(header::CONTENT_TYPE, encoded.content_type)
        .body(body_with_trailers(encoded.bytes, &all_trailers))
        .unwrap_or_else(|_| internal_error_response());
    extend_headers(response.headers_mut(), headers);
    response
}

/// Encode an error as a final stream frame.
pub fn error_frame(status: &Status, registry: &SchemaRegistry, settings: &JsonSettings) -> Bytes {
    let value = error_json(status, registry, settings);
    let mut bytes = serde_json::to_vec(&value).unwrap_or_else(|_| INTERNAL_ERROR_BODY.to_vec());
    bytes.push(b'\n');
    Bytes::from(bytes)
}

/// A body of `bytes` followed by `trailers`, if there are any.
fn body_with_trailers(bytes: Bytes, trailers: &Metadata) -> Body {
    if trailers.is_empty() {
        return Body::from(bytes);
    }
    let frames = [
        Ok::<_, std::convert::Infallible>(Frame::data(bytes)),
        Ok(Frame::trailers(trailers.to_headers())),
    ];
    Body::new(StreamBody::new(futures::stream::iter(frames)))
}

pub(crate) fn extend_headers(target: &mut HeaderMap, headers: &Metadata) {
    for (name, value) in headers.to_headers() {
        if let Some(name) = name {
            target.append(name, value);
        }
    }
}

const INTERNAL_ERROR_BODY: &[u8] = br#"{"code":13,"message":"Internal serialization error","details":[]}"#;

/// Fallback response when a response cannot be built.
pub(crate) fn internal_error_response() -> Response {
    let mut response = Response::new(Body::from(INTERNAL_ERROR_BODY));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}
