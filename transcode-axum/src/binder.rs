//! Binding HTTP requests onto input messages.
//!
//! A request is bound in three passes, each overriding the previous one:
//!
//! 1. The body, as JSON into the whole message or one top-level field, or
//!    raw into `google.api.HttpBody`.
//! 2. Route variables, written to their field paths.
//! 3. Query parameters not already covered by the body or the route.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::Query;
use axum::http::{header, request::Parts};
use bytes::Bytes;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, Value};
use transcode_axum_core::Status;

use crate::body::read_body;
use crate::context::RequestEncoding;
use crate::descriptor::{BodyBinding, DescriptorInfo, FieldPath};
use crate::limits::MessageLimits;
use crate::route::RouteValues;
use crate::value::{parse_map_key, parse_value};

const MALFORMED_JSON: &str = "Request JSON payload is not correctly formatted.";

/// Build the input message for one request.
///
/// All binding failures are `InvalidArgument`, except an oversized body
/// (`ResourceExhausted`).
pub async fn bind(
    info: &DescriptorInfo,
    parts: &Parts,
    body: Body,
    route_values: &RouteValues,
    encoding: &RequestEncoding,
    limits: &MessageLimits,
) -> Result<DynamicMessage, Status> {
    let mut message = match info.body() {
        BodyBinding::None => DynamicMessage::new(info.input().clone()),
        binding => {
            if !info.body_is_http_body() && !encoding.is_json() {
                return Err(Status::invalid_argument(format!(
                    "Unable to read the request as JSON because the request content type '{}' is not a known JSON content type.",
                    encoding.content_type().unwrap_or_default()
                )));
            }

            let content_length = parts
                .headers
                .get(header::CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            let bytes = read_body(body, content_length, limits).await?;

            if info.body_is_http_body() {
                bind_http_body(info, binding, encoding, bytes)?
            } else {
                bind_json_body(info, binding, &bytes)?
            }
        }
    };

    for (variable, path) in info.route_params() {
        if let Some(text) = route_values.get(variable) {
            assign(&mut message, path, std::slice::from_ref(text))?;
        }
    }

    bind_query(info, parts, &mut message)?;

    Ok(message)
}

fn bind_http_body(
    info: &DescriptorInfo,
    binding: &BodyBinding,
    encoding: &RequestEncoding,
    data: Bytes,
) -> Result<DynamicMessage, Status> {
    let content_type = encoding.content_type().unwrap_or_default().to_string();

    match binding {
        BodyBinding::Field(field) => {
            let Kind::Message(descriptor) = field.kind() else {
                return Err(Status::internal("body field is not a message"));
            };
            let http_body = new_http_body(descriptor, content_type, data)?;
            let mut message = DynamicMessage::new(info.input().clone());
            message
                .try_set_field(field, Value::Message(http_body))
                .map_err(|err| Status::internal(err.to_string()))?;
            Ok(message)
        }
        _ => new_http_body(info.input().clone(), content_type, data),
    }
}

fn new_http_body(
    descriptor: MessageDescriptor,
    content_type: String,
    data: Bytes,
) -> Result<DynamicMessage, Status> {
    let mut http_body = DynamicMessage::new(descriptor);
    http_body
        .try_set_field_by_name("content_type", Value::String(content_type))
        .map_err(|err| Status::internal(err.to_string()))?;
    http_body
        .try_set_field_by_name("data", Value::Bytes(data))
        .map_err(|err| Status::internal(err.to_string()))?;
    Ok(http_body)
}

fn bind_json_body(
    info: &DescriptorInfo,
    binding: &BodyBinding,
    bytes: &[u8],
) -> Result<DynamicMessage, Status> {
    let input = info.input();
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(DynamicMessage::new(input.clone()));
    }

    let json: serde_json::Value = serde_json::from_slice(bytes).map_err(|err| {
        tracing::debug!(error = %err, "request body is not valid JSON");
        Status::invalid_argument(MALFORMED_JSON)
    })?;

    let json = match binding {
        BodyBinding::Field(field) => {
            if json.is_null() {
                return Err(null_body(&field_type_name(field)));
            }
            let mut wrapper = serde_json::Map::with_capacity(1);
            wrapper.insert(field.json_name().to_string(), json);
            serde_json::Value::Object(wrapper)
        }
        _ => {
            if json.is_null() {
                return Err(null_body(input.name()));
            }
            json
        }
    };

    DynamicMessage::deserialize(input.clone(), json).map_err(|err| {
        tracing::debug!(error = %err, message = input.full_name(), "request body does not match the message");
        Status::invalid_argument(MALFORMED_JSON)
    })
}

fn null_body(type_name: &str) -> Status {
    Status::invalid_argument(format!("Unable to deserialize null to {type_name}."))
}

fn field_type_name(field: &FieldDescriptor) -> String {
    match field.kind() {
        Kind::Message(message) if !field.is_list() && !field.is_map() => message.name().to_string(),
        Kind::Enum(enum_descriptor) if !field.is_list() => enum_descriptor.name().to_string(),
        _ => field.full_name().to_string(),
    }
}

/// Bind query parameters.
///
/// Values for the same key are grouped. Repeated fields take every value, a
/// singular field takes the last one, and `field[key]` inserts into a map.
/// Keys that resolve to no field are ignored.
fn bind_query(
    info: &DescriptorInfo,
    parts: &Parts,
    message: &mut DynamicMessage,
) -> Result<(), Status> {
    if parts.uri.query().is_none_or(str::is_empty) {
        return Ok(());
    }

    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
        .map_err(|err| Status::invalid_argument(err.body_text()))?;

    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in pairs {
        grouped
            .entry(key)
            .or_insert_with_key(|key| {
                order.push(key.clone());
                Vec::new()
            })
            .push(value);
    }

    for key in order {
        let Some(values) = grouped.remove(&key) else {
            continue;
        };

        let (field_key, map_key) = split_map_key(&key);
        if info.is_query_key_consumed(field_key) {
            continue;
        }
        let Some(path) = info.resolve_query_key(field_key) else {
            tracing::trace!(key, "ignoring unknown query parameter");
            continue;
        };
        let leaf = &path[path.len() - 1];

        match map_key {
            Some(map_key) if leaf.is_map() => {
                assign_map_entry(message, &path, map_key, &values)?;
            }
            None if !leaf.is_map() => assign(message, &path, &values)?,
            _ => {
                tracing::trace!(key, "ignoring query parameter that does not fit its field");
            }
        }
    }

    Ok(())
}

/// Split `field[key]` into `("field", Some("key"))`.
fn split_map_key(key: &str) -> (&str, Option<&str>) {
    if let Some(open) = key.find('[')
        && let Some(inner) = key[open + 1..].strip_suffix(']')
    {
        return (&key[..open], Some(inner));
    }
    (key, None)
}

/// Walk to the message that owns the last field of `path`, creating empty
/// parent messages on the way.
fn owner<'a>(
    message: &'a mut DynamicMessage,
    path: &FieldPath,
) -> Result<&'a mut DynamicMessage, Status> {
    let mut current = message;
    for field in &path[..path.len() - 1] {
        current = match current.get_field_mut(field) {
            Value::Message(child) => child,
            _ => {
                return Err(Status::internal(format!(
                    "field '{}' is not a message",
                    field.full_name()
                )));
            }
        };
    }
    Ok(current)
}

/// Write text values to the field at `path`.
fn assign(message: &mut DynamicMessage, path: &FieldPath, values: &[String]) -> Result<(), Status> {
    let leaf = &path[path.len() - 1];
    let kind = leaf.kind();
    let owner = owner(message, path)?;

    if leaf.is_list() {
        let parsed = values
            .iter()
            .map(|text| parse_value(&kind, text))
            .collect::<Result<Vec<_>, _>>()?;
        if let Value::List(list) = owner.get_field_mut(leaf) {
            list.extend(parsed);
        }
        return Ok(());
    }

    let Some(text) = values.last() else {
        return Ok(());
    };
    owner
        .try_set_field(leaf, parse_value(&kind, text)?)
        .map_err(|err| Status::internal(err.to_string()))
}

fn assign_map_entry(
    message: &mut DynamicMessage,
    path: &FieldPath,
    key: &str,
    values: &[String],
) -> Result<(), Status> {
    let leaf = &path[path.len() - 1];
    let Kind::Message(entry) = leaf.kind() else {
        return Ok(());
    };
    let key = parse_map_key(&entry.map_entry_key_field(), key)?;
    let Some(text) = values.last() else {
        return Ok(());
    };
    let value = parse_value(&entry.map_entry_value_field().kind(), text)?;

    let owner = owner(message, path)?;
    if let Value::Map(map) = owner.get_field_mut(leaf) {
        map.insert(key, value);
    }
    Ok(())
}
