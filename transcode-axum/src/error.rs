//! Error types for building the gateway.
//!
//! Per-request failures are reported as [`Status`](transcode_axum_core::Status);
//! the types here cover configuration mistakes caught while the route table
//! is built, before any request is served.

/// Error type returned by handlers.
///
/// Return a [`Status`](transcode_axum_core::Status) (boxed) to report a
/// declared protocol error. Any other error is reported to the caller as
/// `Unknown`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A URL template that could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid template '{template}' at position {position}: {message}")]
pub struct TemplateError {
    template: String,
    position: usize,
    message: &'static str,
}

impl TemplateError {
    pub(crate) fn new(template: &str, position: usize, message: &'static str) -> Self {
        Self {
            template: template.to_string(),
            position,
            message,
        }
    }

    /// The template that failed to parse.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Byte offset of the error in the template.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Errors raised while building a [`Gateway`](crate::Gateway).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("service '{0}' was not found in the descriptor pool")]
    ServiceNotFound(String),

    #[error("method '{0}' was not found in the descriptor pool")]
    MethodNotFound(String),

    #[error("file '{0}' was not found in the descriptor pool")]
    FileNotFound(String),

    #[error("method '{method}' has an HTTP rule without a pattern")]
    MissingPattern { method: String },

    #[error("method '{method}' uses invalid HTTP method '{kind}'")]
    InvalidHttpMethod { method: String, kind: String },

    #[error("method '{method}': {source}")]
    Template {
        method: String,
        #[source]
        source: TemplateError,
    },

    #[error("method '{method}': field '{path}' was not found on message '{message}'")]
    FieldNotFound {
        method: String,
        path: String,
        message: String,
    },

    #[error("method '{method}': body field '{path}' must be a top-level field")]
    NestedBodyField { method: String, path: String },

    #[error("method '{method}': response body field '{path}' must be a top-level field")]
    NestedResponseBodyField { method: String, path: String },

    #[error("method '{method}': route variable '{path}' must bind a scalar, enum or well-known type field")]
    InvalidRouteField { method: String, path: String },

    #[error("method '{method}' is client streaming and cannot be transcoded")]
    ClientStreaming { method: String },

    #[error("handler for '{method}' expects a {expected} method")]
    HandlerKindMismatch {
        method: String,
        expected: &'static str,
    },

    #[error("route {http_method} {path} is bound to both '{first}' and '{second}'")]
    DuplicateRoute {
        http_method: http::Method,
        path: String,
        first: String,
        second: String,
    },
}
