//! Per-call context handed to handlers.
//!
//! A [`CallContext`] is built from the request head once a route has
//! matched. It exposes what a gRPC server call would: the method, host, peer,
//! request metadata, deadline and a cancellation token. Handlers can also
//! set a response status without failing, add response headers and add
//! trailers; the gateway folds those into the HTTP response.

pub mod encoding;
pub mod error;
pub mod timeout;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::{header, request::Parts};
use prost_reflect::{MessageDescriptor, MethodDescriptor};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use transcode_axum_core::{Metadata, MetadataValue, Status};

pub use encoding::RequestEncoding;
pub use error::classify_error;
pub use timeout::{compute_effective_timeout, parse_grpc_timeout, parse_timeout};

/// Lifecycle of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Request head inspected, handler not yet invoked.
    Initialized,
    /// Handler running.
    Active,
    /// Response written.
    Completed,
}

/// Response state a handler may change while it runs.
#[derive(Debug, Default)]
pub(crate) struct ResponseState {
    pub(crate) status: Option<Status>,
    pub(crate) headers: Metadata,
    pub(crate) trailers: Metadata,
}

#[derive(Debug)]
struct CallInner {
    method: MethodDescriptor,
    method_path: String,
    host: String,
    peer: String,
    request_metadata: Metadata,
    encoding: RequestEncoding,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
    state: Mutex<CallState>,
    response: Mutex<ResponseState>,
}

/// Context for one transcoded call.
///
/// Cheap to clone; clones share the same call.
#[derive(Clone, Debug)]
pub struct CallContext {
    inner: Arc<CallInner>,
}

impl CallContext {
    /// Build the context from the request head.
    ///
    /// Fails with `InvalidArgument` if a `-bin` header is not valid base64.
    pub(crate) fn from_parts(
        method: MethodDescriptor,
        parts: &Parts,
        server_timeout: Option<Duration>,
    ) -> Result<Self, Status> {
        let request_metadata = Metadata::from_headers(&parts.headers)?;
        let encoding = RequestEncoding::from_headers(&parts.headers);
        let timeout = compute_effective_timeout(server_timeout, parse_timeout(&parts.headers));

        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|authority| authority.to_string()))
            .unwrap_or_default();

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| format_peer(addr))
            .unwrap_or_else(|| "unknown".to_string());

        let method_path = format!(
            "/{}/{}",
            method.parent_service().full_name(),
            method.name()
        );

        Ok(Self {
            inner: Arc::new(CallInner {
                method,
                method_path,
                host,
                peer,
                request_metadata,
                encoding,
                timeout,
                deadline: timeout.map(|timeout| Instant::now() + timeout),
                cancellation: CancellationToken::new(),
                state: Mutex::new(CallState::Initialized),
                response: Mutex::new(ResponseState::default()),
            }),
        })
    }

    /// The method path, `/package.Service/Method`.
    pub fn method(&self) -> &str {
        &self.inner.method_path
    }

    /// The method descriptor.
    pub fn method_descriptor(&self) -> &MethodDescriptor {
        &self.inner.method
    }

    /// The output message type of the method.
    pub fn output_descriptor(&self) -> MessageDescriptor {
        self.inner.method.output()
    }

    /// The `Host` of the request.
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// The remote peer: `ipv4:<addr>:<port>`, `ipv6:[<addr>]:<port>` or
    /// `unknown`.
    ///
    /// Requires the router to be served with
    /// `into_make_service_with_connect_info::<SocketAddr>()`.
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Request headers as metadata, transport headers removed.
    pub fn request_metadata(&self) -> &Metadata {
        &self.inner.request_metadata
    }

    /// Content type information of the request.
    pub fn encoding(&self) -> &RequestEncoding {
        &self.inner.encoding
    }

    /// The effective timeout of the call, if bounded.
    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    /// The instant the call expires, if bounded.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Token cancelled when the client goes away or the call ends.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    /// Returns true once the call has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CallState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: CallState) {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Set the response status without failing the call.
    ///
    /// A non-OK status replaces the handler's response with an error
    /// response once the handler returns.
    pub fn set_status(&self, status: Status) {
        self.response().status = Some(status);
    }

    /// The status set with [`set_status`](Self::set_status), if any.
    pub fn status(&self) -> Option<Status> {
        self.response().status.clone()
    }

    /// Add a response header.
    pub fn append_response_header(&self, key: impl AsRef<str>, value: impl Into<MetadataValue>) {
        self.response().headers.append(key, value);
    }

    /// Add a response trailer.
    ///
    /// Trailers are sent as HTTP trailers on error responses and on streams.
    pub fn append_trailer(&self, key: impl AsRef<str>, value: impl Into<MetadataValue>) {
        self.response().trailers.append(key, value);
    }

    /// Take the response headers added so far.
    pub(crate) fn take_response_headers(&self) -> Metadata {
        std::mem::take(&mut self.response().headers)
    }

    /// Take the trailers added so far.
    pub(crate) fn take_trailers(&self) -> Metadata {
        std::mem::take(&mut self.response().trailers)
    }

    /// Take the response state, leaving it empty.
    pub(crate) fn take_response_state(&self) -> ResponseState {
        std::mem::take(&mut *self.response())
    }

    fn response(&self) -> std::sync::MutexGuard<'_, ResponseState> {
        self.inner.response.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn format_peer(addr: &SocketAddr) -> String {
    match addr {
        SocketAddr::V4(addr) => format!("ipv4:{}:{}", addr.ip(), addr.port()),
        SocketAddr::V6(addr) => format!("ipv6:[{}]:{}", addr.ip(), addr.port()),
    }
}
