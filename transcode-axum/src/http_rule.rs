//! `google.api.http` rules.
//!
//! The rule is read from a method's options. Options are re-encoded and the
//! extension field is decoded into [`HttpRule`], so extraction works whether
//! or not `google/api/annotations.proto` is part of the descriptor pool.

use http::Method;
use prost::Message;
use prost_reflect::MethodDescriptor;

use crate::error::BuildError;

/// Field number of the `google.api.http` extension on `MethodOptions`.
pub const HTTP_RULE_EXTENSION_NUMBER: u32 = 72295728;

/// The `google.api.HttpRule` message.
#[derive(Clone, PartialEq, Message)]
pub struct HttpRule {
    #[prost(string, tag = "1")]
    pub selector: String,
    #[prost(oneof = "Pattern", tags = "2, 3, 4, 5, 6, 8")]
    pub pattern: Option<Pattern>,
    #[prost(string, tag = "7")]
    pub body: String,
    #[prost(string, tag = "12")]
    pub response_body: String,
    #[prost(message, repeated, tag = "11")]
    pub additional_bindings: Vec<HttpRule>,
}

/// The verb and URL template of an [`HttpRule`].
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Pattern {
    #[prost(string, tag = "2")]
    Get(String),
    #[prost(string, tag = "3")]
    Put(String),
    #[prost(string, tag = "4")]
    Post(String),
    #[prost(string, tag = "5")]
    Delete(String),
    #[prost(string, tag = "6")]
    Patch(String),
    #[prost(message, tag = "8")]
    Custom(CustomHttpPattern),
}

/// The `google.api.CustomHttpPattern` message.
#[derive(Clone, PartialEq, Message)]
pub struct CustomHttpPattern {
    #[prost(string, tag = "1")]
    pub kind: String,
    #[prost(string, tag = "2")]
    pub path: String,
}

/// `MethodOptions` narrowed to the one extension we care about.
#[derive(Clone, PartialEq, Message)]
struct HttpRuleOptions {
    #[prost(message, optional, tag = "72295728")]
    http: Option<HttpRule>,
}

/// One verb + template binding of a rule, with its body mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteBinding {
    pub method: Method,
    pub template: String,
    pub body: Option<String>,
    pub response_body: Option<String>,
}

impl HttpRule {
    /// A GET rule for `template`.
    pub fn get(template: impl Into<String>) -> Self {
        Self::with_pattern(Pattern::Get(template.into()))
    }

    /// A PUT rule for `template`.
    pub fn put(template: impl Into<String>) -> Self {
        Self::with_pattern(Pattern::Put(template.into()))
    }

    /// A POST rule for `template`.
    pub fn post(template: impl Into<String>) -> Self {
        Self::with_pattern(Pattern::Post(template.into()))
    }

    /// A DELETE rule for `template`.
    pub fn delete(template: impl Into<String>) -> Self {
        Self::with_pattern(Pattern::Delete(template.into()))
    }

    /// A PATCH rule for `template`.
    pub fn patch(template: impl Into<String>) -> Self {
        Self::with_pattern(Pattern::Patch(template.into()))
    }

    /// A rule with a custom HTTP method.
    pub fn custom(kind: impl Into<String>, template: impl Into<String>) -> Self {
        Self::with_pattern(Pattern::Custom(CustomHttpPattern {
            kind: kind.into(),
            path: template.into(),
        }))
    }

    fn with_pattern(pattern: Pattern) -> Self {
        Self {
            pattern: Some(pattern),
            ..Default::default()
        }
    }

    /// Set the body mapping (`*` for the whole request message).
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the response body field.
    pub fn with_response_body(mut self, response_body: impl Into<String>) -> Self {
        self.response_body = response_body.into();
        self
    }

    /// Add an additional binding.
    pub fn with_additional_binding(mut self, binding: HttpRule) -> Self {
        self.additional_bindings.push(binding);
        self
    }

    /// Read the `google.api.http` rule from a method's options.
    pub fn from_method(method: &MethodDescriptor) -> Option<HttpRule> {
        let encoded = method.options().encode_to_vec();
        HttpRuleOptions::decode(encoded.as_slice()).ok()?.http
    }

    /// Flatten this rule and its additional bindings into route bindings.
    ///
    /// Additional bindings nested inside additional bindings are ignored.
    pub fn bindings(&self, method_name: &str) -> Result<Vec<RouteBinding>, BuildError> {
        let mut bindings = vec![self.binding(method_name)?];
        for additional in &self.additional_bindings {
            bindings.push(additional.binding(method_name)?);
        }
        Ok(bindings)
    }

    fn binding(&self, method_name: &str) -> Result<RouteBinding, BuildError> {
        let (method, template) = match &self.pattern {
            Some(Pattern::Get(path)) => (Method::GET, path.clone()),
            Some(Pattern::Put(path)) => (Method::PUT, path.clone()),
            Some(Pattern::Post(path)) => (Method::POST, path.clone()),
            Some(Pattern::Delete(path)) => (Method::DELETE, path.clone()),
            Some(Pattern::Patch(path)) => (Method::PATCH, path.clone()),
            Some(Pattern::Custom(custom)) => {
                let method = Method::from_bytes(custom.kind.as_bytes()).map_err(|_| {
                    BuildError::InvalidHttpMethod {
                        method: method_name.to_string(),
                        kind: custom.kind.clone(),
                    }
                })?;
                (method, custom.path.clone())
            }
            None => {
                return Err(BuildError::MissingPattern {
                    method: method_name.to_string(),
                });
            }
        };

        Ok(RouteBinding {
            method,
            template,
            body: non_empty(&self.body),
            response_body: non_empty(&self.response_body),
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
