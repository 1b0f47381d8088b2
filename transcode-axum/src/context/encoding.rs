//! Request content type detection.
//!
//! JSON bodies are recognised by media type: `application/json` or any
//! `+json` structured suffix. Bodies are always decoded as UTF-8; a declared
//! charset other than UTF-8 is logged and otherwise ignored.

use axum::http::{HeaderMap, header};

/// Content type information for one request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestEncoding {
    content_type: Option<String>,
    is_json: bool,
}

impl RequestEncoding {
    /// Inspect the `Content-Type` header.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(content_type) = headers
            .get(header::CONTENT_TYPE)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        else {
            return Self::default();
        };

        let mut params = content_type.split(';');
        let media_type = params.next().unwrap_or_default().trim().to_ascii_lowercase();
        let is_json = is_json_media_type(&media_type);

        if is_json {
            for param in params {
                let Some((name, value)) = param.split_once('=') else {
                    continue;
                };
                if !name.trim().eq_ignore_ascii_case("charset") {
                    continue;
                }
                let charset = value.trim().trim_matches('"');
                if !is_utf8(charset) {
                    tracing::trace!(charset, "unsupported request charset, reading body as UTF-8");
                }
            }
        }

        Self {
            content_type: Some(content_type),
            is_json,
        }
    }

    /// The raw `Content-Type` header, if one was sent.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Whether the body is JSON.
    pub fn is_json(&self) -> bool {
        self.is_json
    }
}

fn is_json_media_type(media_type: &str) -> bool {
    media_type == "application/json" || media_type.ends_with("+json")
}

fn is_utf8(charset: &str) -> bool {
    charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8")
}
