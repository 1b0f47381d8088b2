//! # transcode-axum
//!
//! A gRPC JSON transcoding gateway for [Axum](https://github.com/tokio-rs/axum).
//!
//! Methods annotated with `google.api.http` rules are served as plain
//! HTTP/JSON endpoints. Requests are bound from the route, the query string
//! and the body onto the method's input message, handed to a handler, and the
//! output is written back as proto3 JSON.
//!
//! ## Features
//!
//! - **Descriptor driven:** routes come from the method options in a
//!   [`prost_reflect::DescriptorPool`]; no generated routing code.
//! - **Full URL templates:** multi-segment variables, `**`, custom verbs and
//!   route precedence.
//! - **Query and body binding:** nested field paths, repeated and map fields,
//!   well-known types and `google.api.HttpBody`.
//! - **Unary and server streaming:** streams are written as newline-delimited
//!   JSON.
//! - **gRPC semantics:** deadlines from `grpc-timeout`, cancellation, metadata,
//!   trailers and `google.rpc.Status` error details.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//!
//! use prost_reflect::DescriptorPool;
//! use transcode_axum::{BoxError, CallContext, Gateway};
//!
//! # async fn run(pool: DescriptorPool) -> Result<(), BoxError> {
//! let router = Gateway::builder(pool)
//!     .unary("greet.v1.Greeter.SayHello", |_ctx: CallContext, request| async move {
//!         Ok::<_, BoxError>(request)
//!     })
//!     .build()?
//!     .into_router();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(
//!     listener,
//!     router.into_make_service_with_connect_info::<SocketAddr>(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

mod binder;
mod body;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod http_rule;
pub mod limits;
pub mod marshal;
pub mod registry;
pub mod route;
pub mod stream;
pub mod template;
mod value;

#[cfg(test)]
mod test_support;

pub use context::{CallContext, CallState, RequestEncoding};
pub use error::{BoxError, BuildError, TemplateError};
pub use gateway::{Gateway, GatewayBuilder};
pub use handler::{transcode_from, transcode_to};
pub use http_rule::HttpRule;
pub use limits::MessageLimits;
pub use marshal::JsonSettings;
pub use registry::SchemaRegistry;
pub use stream::{ServerStreamWriter, StreamWriteError};

// Re-export several crates
pub use prost;
pub use prost_reflect;
pub use transcode_axum_core::{Code, Metadata, MetadataValue, Status};
