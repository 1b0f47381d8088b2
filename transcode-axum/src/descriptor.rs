//! Per-binding descriptor metadata.
//!
//! [`DescriptorInfo`] is resolved once per route when the gateway is built:
//! which field (if any) the body maps to, which field the response body is
//! taken from, and the field paths of the route variables. Query keys are
//! resolved lazily and memoized.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor};
use transcode_axum_core::HTTP_BODY_TYPE;

use crate::error::BuildError;

/// Maximum number of distinct query keys remembered per binding.
const QUERY_CACHE_CAPACITY: usize = 512;

/// A resolved chain of fields from the input message to a leaf.
pub type FieldPath = Arc<[FieldDescriptor]>;

/// How the request body maps onto the input message.
#[derive(Clone, Debug)]
pub enum BodyBinding {
    /// No body is read.
    None,
    /// The body is the whole input message (`body: "*"`).
    Whole,
    /// The body is one top-level field.
    Field(FieldDescriptor),
}

/// Binding metadata for one route of one method.
#[derive(Debug)]
pub struct DescriptorInfo {
    input: MessageDescriptor,
    body: BodyBinding,
    response_body: Option<FieldDescriptor>,
    route_params: Vec<(String, FieldPath)>,
    query_cache: RwLock<HashMap<String, Option<FieldPath>>>,
}

impl DescriptorInfo {
    /// Resolve the body, response body and route variable paths of a binding.
    pub fn new(
        method_name: &str,
        input: MessageDescriptor,
        output: &MessageDescriptor,
        body: Option<&str>,
        response_body: Option<&str>,
        route_variables: &[String],
    ) -> Result<Self, BuildError> {
        let body = match body {
            None => BodyBinding::None,
            Some("*") => BodyBinding::Whole,
            Some(path) if path.contains('.') => {
                return Err(BuildError::NestedBodyField {
                    method: method_name.to_string(),
                    path: path.to_string(),
                });
            }
            Some(path) => BodyBinding::Field(top_level_field(method_name, &input, path)?),
        };

        let response_body = match response_body {
            None => None,
            Some(path) if path.contains('.') => {
                return Err(BuildError::NestedResponseBodyField {
                    method: method_name.to_string(),
                    path: path.to_string(),
                });
            }
            Some(path) => Some(top_level_field(method_name, output, path)?),
        };

        let mut route_params = Vec::with_capacity(route_variables.len());
        for variable in route_variables {
            let path = resolve_path(&input, variable, NameOrder::ProtoFirst).ok_or_else(|| {
                BuildError::FieldNotFound {
                    method: method_name.to_string(),
                    path: variable.clone(),
                    message: input.full_name().to_string(),
                }
            })?;
            let leaf = &path[path.len() - 1];
            let plain_message = matches!(
                leaf.kind(),
                Kind::Message(message) if !message.full_name().starts_with("google.protobuf.")
            );
            if leaf.is_map() || plain_message {
                return Err(BuildError::InvalidRouteField {
                    method: method_name.to_string(),
                    path: variable.clone(),
                });
            }
            route_params.push((variable.clone(), path));
        }

        Ok(Self {
            input,
            body,
            response_body,
            route_params,
            query_cache: RwLock::new(HashMap::new()),
        })
    }

    /// The input message type.
    pub fn input(&self) -> &MessageDescriptor {
        &self.input
    }

    /// How the body is bound.
    pub fn body(&self) -> &BodyBinding {
        &self.body
    }

    /// Whether the body is read as raw bytes into `google.api.HttpBody`.
    pub fn body_is_http_body(&self) -> bool {
        match &self.body {
            BodyBinding::None => false,
            BodyBinding::Whole => self.input.full_name() == HTTP_BODY_TYPE,
            BodyBinding::Field(field) => {
                !field.is_list() && is_http_body_kind(&field.kind())
            }
        }
    }

    /// The response body field, if only a sub-field of the output is returned.
    pub fn response_body(&self) -> Option<&FieldDescriptor> {
        self.response_body.as_ref()
    }

    /// Route variables and their resolved field paths.
    pub fn route_params(&self) -> &[(String, FieldPath)] {
        &self.route_params
    }

    /// Returns true if a query key must not be bound because the body or a
    /// route variable already supplies it.
    pub fn is_query_key_consumed(&self, key: &str) -> bool {
        let body_consumes = match &self.body {
            BodyBinding::None => false,
            BodyBinding::Whole => true,
            BodyBinding::Field(field) => covers(field.name(), key) || covers(field.json_name(), key),
        };
        body_consumes || self.route_params.iter().any(|(path, _)| path == key)
    }

    /// Resolve a query key to a field path, JSON names first.
    ///
    /// Results (including misses) are memoized. Concurrent callers may both
    /// compute a missing entry; the results are equal so either write wins.
    pub fn resolve_query_key(&self, key: &str) -> Option<FieldPath> {
        {
            let cache = self.query_cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = cache.get(key) {
                return cached.clone();
            }
        }

        let resolved = resolve_path(&self.input, key, NameOrder::JsonFirst);

        let mut cache = self.query_cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.len() < QUERY_CACHE_CAPACITY {
            cache.insert(key.to_string(), resolved.clone());
        }
        resolved
    }

    #[cfg(test)]
    fn cached_query_keys(&self) -> usize {
        self.query_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Returns true if `key` is `path` or lies under it (`path.` prefix).
fn covers(path: &str, key: &str) -> bool {
    key == path
        || key
            .strip_prefix(path)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Returns true if the kind is the `google.api.HttpBody` message.
pub fn is_http_body_kind(kind: &Kind) -> bool {
    matches!(kind, Kind::Message(message) if message.full_name() == HTTP_BODY_TYPE)
}

fn top_level_field(
    method_name: &str,
    message: &MessageDescriptor,
    name: &str,
) -> Result<FieldDescriptor, BuildError> {
    message
        .get_field_by_name(name)
        .or_else(|| message.get_field_by_json_name(name))
        .ok_or_else(|| BuildError::FieldNotFound {
            method: method_name.to_string(),
            path: name.to_string(),
            message: message.full_name().to_string(),
        })
}

/// Which name is tried first for each path segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameOrder {
    ProtoFirst,
    JsonFirst,
}

/// Resolve a dotted path of field names against `message`.
///
/// Every segment except the last must be a singular message field.
pub fn resolve_path(message: &MessageDescriptor, path: &str, order: NameOrder) -> Option<FieldPath> {
    let mut fields = Vec::new();
    let mut current = message.clone();
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        let field = match order {
            NameOrder::ProtoFirst => current
                .get_field_by_name(segment)
                .or_else(|| current.get_field_by_json_name(segment)),
            NameOrder::JsonFirst => current
                .get_field_by_json_name(segment)
                .or_else(|| current.get_field_by_name(segment)),
        }?;

        if segments.peek().is_some() {
            match field.kind() {
                Kind::Message(next) if !field.is_list() && !field.is_map() => current = next,
                _ => return None,
            }
        }
        fields.push(field);
    }

    Some(fields.into())
}
