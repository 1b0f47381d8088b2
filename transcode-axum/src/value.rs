//! Coercion of route and query string values into message fields.
//!
//! Every field kind has one conversion from text: numbers and bools are
//! parsed, enums accept a value name or number, bytes accept base64 with or
//! without padding, and message kinds go through the proto3 JSON form so
//! well-known types like `google.protobuf.Timestamp` and the wrappers work.

use bytes::Bytes;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MapKey, Value};
use transcode_axum_core::{Status, decode_binary_header};

/// Convert `text` to a value of `kind`.
pub fn parse_value(kind: &Kind, text: &str) -> Result<Value, Status> {
    let value = match kind {
        Kind::Double => Value::F64(parse_number(text)?),
        Kind::Float => Value::F32(parse_number(text)?),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Value::I32(parse_number(text)?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Value::I64(parse_number(text)?),
        Kind::Uint32 | Kind::Fixed32 => Value::U32(parse_number(text)?),
        Kind::Uint64 | Kind::Fixed64 => Value::U64(parse_number(text)?),
        Kind::Bool => Value::Bool(parse_bool(text)?),
        Kind::String => Value::String(text.to_string()),
        Kind::Bytes => Value::Bytes(parse_bytes(text)?),
        Kind::Enum(descriptor) => {
            let value = descriptor.get_value_by_name(text).or_else(|| {
                text.parse::<i32>()
                    .ok()
                    .and_then(|number| descriptor.get_value(number))
            });
            match value {
                Some(value) => Value::EnumNumber(value.number()),
                None => {
                    return Err(Status::invalid_argument(format!(
                        "Invalid value '{text}' for enum type {}.",
                        descriptor.name()
                    )));
                }
            }
        }
        Kind::Message(descriptor) => {
            let json = serde_json::Value::String(text.to_string());
            let message = DynamicMessage::deserialize(descriptor.clone(), json)
                .or_else(|_| {
                    let json: serde_json::Value = serde_json::from_str(text)
                        .map_err(|_| invalid_value(text, descriptor.full_name()))?;
                    DynamicMessage::deserialize(descriptor.clone(), json)
                        .map_err(|_| invalid_value(text, descriptor.full_name()))
                })?;
            Value::Message(message)
        }
    };
    Ok(value)
}

/// Convert `text` to a map key for a map field whose key field is `key_field`.
pub fn parse_map_key(key_field: &FieldDescriptor, text: &str) -> Result<MapKey, Status> {
    let key = match parse_value(&key_field.kind(), text)? {
        Value::Bool(value) => MapKey::Bool(value),
        Value::I32(value) => MapKey::I32(value),
        Value::I64(value) => MapKey::I64(value),
        Value::U32(value) => MapKey::U32(value),
        Value::U64(value) => MapKey::U64(value),
        Value::String(value) => MapKey::String(value),
        _ => {
            return Err(Status::invalid_argument(format!(
                "Map key '{text}' is not a valid key type."
            )));
        }
    };
    Ok(key)
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T, Status> {
    text.trim()
        .parse::<T>()
        .map_err(|_| invalid_value(text, std::any::type_name::<T>()))
}

fn parse_bool(text: &str) -> Result<bool, Status> {
    if text.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if text.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(invalid_value(text, "bool"))
    }
}

fn parse_bytes(text: &str) -> Result<Bytes, Status> {
    // URL-safe alphabet is accepted too.
    let standard: String = text
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    decode_binary_header(&standard).map_err(|_| invalid_value(text, "bytes"))
}

fn invalid_value(text: &str, type_name: &str) -> Status {
    Status::invalid_argument(format!("Invalid value '{text}' for type {type_name}."))
}
