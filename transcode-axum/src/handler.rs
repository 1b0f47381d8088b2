//! Handler types.
//!
//! Handlers receive the bound input as a [`DynamicMessage`] and return the
//! output the same way. Generated prost types can be used instead through
//! the `_typed` registration methods, which transcode at the boundary.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use prost_reflect::{DynamicMessage, MessageDescriptor};
use transcode_axum_core::Status;

use crate::context::CallContext;
use crate::error::BoxError;
use crate::stream::ServerStreamWriter;

/// Future returned by a unary handler.
pub type UnaryFuture = Pin<Box<dyn Future<Output = Result<DynamicMessage, BoxError>> + Send + 'static>>;

/// Future returned by a server streaming handler.
pub type StreamingFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'static>>;

/// Boxed callable for unary methods.
pub type BoxedUnaryCall = Arc<dyn Fn(CallContext, DynamicMessage) -> UnaryFuture + Send + Sync>;

/// Boxed callable for server streaming methods.
pub type BoxedStreamingCall =
    Arc<dyn Fn(CallContext, DynamicMessage, ServerStreamWriter) -> StreamingFuture + Send + Sync>;

/// A registered handler.
#[derive(Clone)]
pub(crate) enum MethodHandler {
    Unary(BoxedUnaryCall),
    ServerStreaming(BoxedStreamingCall),
}

impl MethodHandler {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            MethodHandler::Unary(_) => "unary",
            MethodHandler::ServerStreaming(_) => "server streaming",
        }
    }
}

impl std::fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MethodHandler").field(&self.kind()).finish()
    }
}

pub(crate) fn box_unary<F, Fut>(handler: F) -> BoxedUnaryCall
where
    F: Fn(CallContext, DynamicMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<DynamicMessage, BoxError>> + Send + 'static,
{
    Arc::new(move |ctx: CallContext, request: DynamicMessage| -> UnaryFuture {
        Box::pin(handler(ctx, request))
    })
}

pub(crate) fn box_unary_typed<Req, Resp, F, Fut>(handler: F) -> BoxedUnaryCall
where
    Req: prost::Message + Default + 'static,
    Resp: prost::Message + 'static,
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, BoxError>> + Send + 'static,
{
    Arc::new(move |ctx: CallContext, request: DynamicMessage| -> UnaryFuture {
        let output = ctx.output_descriptor();
        let request = match transcode_to::<Req>(&request) {
            Ok(request) => request,
            Err(status) => return Box::pin(std::future::ready(Err(status.into()))),
        };
        let response = handler(ctx, request);
        Box::pin(async move {
            let response = response.await?;
            Ok::<_, BoxError>(transcode_from(output, &response)?)
        })
    })
}

pub(crate) fn box_streaming<F, Fut>(handler: F) -> BoxedStreamingCall
where
    F: Fn(CallContext, DynamicMessage, ServerStreamWriter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(
        move |ctx: CallContext, request: DynamicMessage, writer: ServerStreamWriter| -> StreamingFuture {
            Box::pin(handler(ctx, request, writer))
        },
    )
}

pub(crate) fn box_streaming_typed<Req, F, Fut>(handler: F) -> BoxedStreamingCall
where
    Req: prost::Message + Default + 'static,
    F: Fn(CallContext, Req, ServerStreamWriter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(
        move |ctx: CallContext, request: DynamicMessage, writer: ServerStreamWriter| -> StreamingFuture {
            match transcode_to::<Req>(&request) {
                Ok(request) => Box::pin(handler(ctx, request, writer)),
                Err(status) => Box::pin(std::future::ready(Err(status.into()))),
            }
        },
    )
}

/// Convert a dynamic message into a generated type.
pub fn transcode_to<T: prost::Message + Default>(message: &DynamicMessage) -> Result<T, Status> {
    message
        .transcode_to::<T>()
        .map_err(|err| Status::internal(format!("failed to convert request message: {err}")))
}

/// Convert a generated type into a dynamic message of `descriptor`.
pub fn transcode_from<T: prost::Message>(
    descriptor: MessageDescriptor,
    message: &T,
) -> Result<DynamicMessage, Status> {
    let mut dynamic = DynamicMessage::new(descriptor);
    dynamic
        .transcode_from(message)
        .map_err(|err| Status::internal(format!("failed to convert response message: {err}")))?;
    Ok(dynamic)
}
