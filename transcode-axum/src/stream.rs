//! Server streaming responses.
//!
//! A streaming handler runs on its own task and writes messages through a
//! [`ServerStreamWriter`]. Each message becomes one line of compact JSON.
//! The writer feeds a bounded channel that backs the response body, so a
//! slow client applies backpressure to the handler.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http_body::Frame;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::{CancellationToken, DropGuard};
use transcode_axum_core::{Metadata, Status};

use crate::handler::transcode_from;
use crate::limits::MessageLimits;
use crate::marshal::{JsonSettings, encode_stream_frame, error_frame};
use crate::registry::SchemaRegistry;

/// Number of encoded frames buffered between the handler and the client.
pub(crate) const STREAM_BUFFER: usize = 16;

/// Errors returned by [`ServerStreamWriter::write`].
#[derive(Debug, thiserror::Error)]
pub enum StreamWriteError {
    /// Another write on this stream has not finished yet.
    #[error("a write is already in progress on this stream")]
    WriteInProgress,

    #[error("the call was cancelled")]
    Cancelled,

    #[error("the response stream is closed")]
    Closed,

    #[error("failed to encode stream message: {0}")]
    Encode(#[from] Status),
}

impl From<StreamWriteError> for Status {
    fn from(err: StreamWriteError) -> Self {
        match err {
            StreamWriteError::Encode(status) => status,
            StreamWriteError::Cancelled => Status::cancelled("The call was cancelled."),
            other => Status::internal(other.to_string()),
        }
    }
}

/// What the handler task sends to the response body.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    /// One encoded message line.
    Message(Bytes),
    /// The call failed.
    Error(Status, Metadata),
    /// The handler finished; the trailers close the stream.
    End(Metadata),
}

/// Writes messages to a server streaming response.
///
/// Clones share the same stream. Writes are serialized: a write issued while
/// another is pending fails immediately with
/// [`StreamWriteError::WriteInProgress`].
#[derive(Clone, Debug)]
pub struct ServerStreamWriter {
    sender: Arc<Mutex<mpsc::Sender<StreamEvent>>>,
    output: MessageDescriptor,
    settings: JsonSettings,
    limits: MessageLimits,
    cancellation: CancellationToken,
}

impl ServerStreamWriter {
    pub(crate) fn new(
        sender: mpsc::Sender<StreamEvent>,
        output: MessageDescriptor,
        settings: JsonSettings,
        limits: MessageLimits,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            sender: Arc::new(Mutex::new(sender)),
            output,
            settings,
            limits,
            cancellation,
        }
    }

    /// The message type this stream carries.
    pub fn output_descriptor(&self) -> &MessageDescriptor {
        &self.output
    }

    /// Write one message.
    ///
    /// Waits while the client is slow to read, and returns
    /// [`StreamWriteError::Cancelled`] if the call is cancelled before or
    /// during the write.
    pub async fn write(&self, message: &DynamicMessage) -> Result<(), StreamWriteError> {
        if self.cancellation.is_cancelled() {
            return Err(StreamWriteError::Cancelled);
        }
        if message.descriptor() != self.output {
            return Err(StreamWriteError::Encode(Status::internal(format!(
                "expected message of type '{}', got '{}'",
                self.output.full_name(),
                message.descriptor().full_name()
            ))));
        }

        let sender = self
            .sender
            .try_lock()
            .map_err(|_| StreamWriteError::WriteInProgress)?;

        let frame = encode_stream_frame(message, &self.settings)?;
        self.limits.check_send_size(frame.len())?;

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(StreamWriteError::Cancelled),
            sent = sender.send(StreamEvent::Message(frame)) => {
                sent.map_err(|_| StreamWriteError::Closed)
            }
        }
    }

    /// Write one generated message type.
    pub async fn write_typed<T: prost::Message>(&self, message: &T) -> Result<(), StreamWriteError> {
        let message = transcode_from(self.output.clone(), message)?;
        self.write(&message).await
    }
}

type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame<Bytes>, Infallible>> + Send>>;

/// Response body stream for a server streaming call.
///
/// Owns the call's [`DropGuard`]: dropping the body (client gone, or stream
/// finished) cancels the call.
pub(crate) struct ResponseStream {
    inner: FrameStream,
    _guard: DropGuard,
}

impl ResponseStream {
    /// Build the body stream from the first event and the rest of the
    /// channel.
    pub(crate) fn new(
        first: StreamEvent,
        receiver: mpsc::Receiver<StreamEvent>,
        registry: Arc<SchemaRegistry>,
        settings: JsonSettings,
        guard: DropGuard,
    ) -> Self {
        use futures::StreamExt;

        let events = futures::stream::once(async move { first })
            .chain(tokio_stream::wrappers::ReceiverStream::new(receiver));
        let inner = events
            .flat_map(move |event| futures::stream::iter(frames_for(event, &registry, &settings)))
            .map(Ok);

        Self {
            inner: Box::pin(inner),
            _guard: guard,
        }
    }
}

impl Stream for ResponseStream {
    type Item = Result<Frame<Bytes>, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

fn frames_for(
    event: StreamEvent,
    registry: &SchemaRegistry,
    settings: &JsonSettings,
) -> Vec<Frame<Bytes>> {
    let (data, trailers) = match event {
        StreamEvent::Message(bytes) => return vec![Frame::data(bytes)],
        StreamEvent::Error(status, mut trailers) => {
            trailers.extend(status.metadata().clone());
            (Some(error_frame(&status, registry, settings)), trailers)
        }
        StreamEvent::End(trailers) => (None, trailers),
    };

    let mut frames = Vec::with_capacity(2);
    if let Some(data) = data {
        frames.push(Frame::data(data));
    }
    if !trailers.is_empty() {
        frames.push(Frame::trailers(trailers.to_headers()));
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use futures::StreamExt;
    use prost_reflect::Value;

    fn reply(message: &str) -> DynamicMessage {
        let mut reply = DynamicMessage::new(test_support::message("transcoding.v1.HelloReply"));
        reply.set_field_by_name("message", Value::String(message.to_string()));
        reply
    }

    fn writer(buffer: usize) -> (ServerStreamWriter, mpsc::Receiver<StreamEvent>, CancellationToken) {
        let (sender, receiver) = mpsc::channel(buffer);
        let cancellation = CancellationToken::new();
        let writer = ServerStreamWriter::new(
            sender,
            test_support::message("transcoding.v1.HelloReply"),
            JsonSettings::new().ignore_default_values(true),
            MessageLimits::default(),
            cancellation.clone(),
        );
        (writer, receiver, cancellation)
    }

    #[tokio::test]
    async fn test_write_sends_json_lines() {
        let (writer, mut receiver, _) = writer(4);
        writer.write(&reply("one")).await.unwrap();
        writer.write(&reply("two")).await.unwrap();

        let Some(StreamEvent::Message(first)) = receiver.recv().await else {
            panic!("expected message");
        };
        let Some(StreamEvent::Message(second)) = receiver.recv().await else {
            panic!("expected message");
        };
        assert_eq!(&first[..], b"{\"message\":\"one\"}\n");
        assert_eq!(&second[..], b"{\"message\":\"two\"}\n");
    }

    #[tokio::test]
    async fn test_concurrent_write_fails_immediately() {
        let (writer, mut receiver, _) = writer(1);
        writer.write(&reply("fills the buffer")).await.unwrap();

        // The second write blocks on the full channel while holding the lock.
        let blocked = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.write(&reply("blocked")).await })
        };
        tokio::task::yield_now().await;
        while writer.sender.try_lock().is_ok() {
            tokio::task::yield_now().await;
        }

        let err = writer.write(&reply("third")).await.unwrap_err();
        assert!(matches!(err, StreamWriteError::WriteInProgress));

        receiver.recv().await.unwrap();
        blocked.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_write_after_cancel() {
        let (writer, _receiver, cancellation) = writer(1);
        cancellation.cancel();
        let err = writer.write(&reply("late")).await.unwrap_err();
        assert!(matches!(err, StreamWriteError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_during_blocked_write() {
        let (writer, _receiver, cancellation) = writer(1);
        writer.write(&reply("fills the buffer")).await.unwrap();

        let pending = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.write(&reply("blocked")).await })
        };
        tokio::task::yield_now().await;
        cancellation.cancel();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, StreamWriteError::Cancelled));
    }

    #[tokio::test]
    async fn test_write_after_close() {
        let (writer, receiver, _) = writer(1);
        drop(receiver);
        let err = writer.write(&reply("nobody listening")).await.unwrap_err();
        assert!(matches!(err, StreamWriteError::Closed));
    }

    #[tokio::test]
    async fn test_wrong_message_type_is_rejected() {
        let (writer, _receiver, _) = writer(1);
        let wrong = DynamicMessage::new(test_support::message("transcoding.v1.HelloRequest"));
        let err = writer.write(&wrong).await.unwrap_err();
        assert!(matches!(err, StreamWriteError::Encode(_)));
    }

    #[tokio::test]
    async fn test_response_stream_frames() {
        let (sender, receiver) = mpsc::channel(4);
        let mut trailers = Metadata::new();
        trailers.append("x-done", "yes");
        sender
            .send(StreamEvent::Error(Status::aborted("stop"), trailers))
            .await
            .unwrap();
        drop(sender);

        let cancellation = CancellationToken::new();
        let stream = ResponseStream::new(
            StreamEvent::Message(Bytes::from_static(b"{}\n")),
            receiver,
            Arc::new(SchemaRegistry::new(test_support::descriptor_pool())),
            JsonSettings::default(),
            cancellation.clone().drop_guard(),
        );
        let frames: Vec<_> = stream.map(Result::unwrap).collect().await;

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].data_ref().unwrap(), &Bytes::from_static(b"{}\n"));
        let error: serde_json::Value =
            serde_json::from_slice(frames[1].data_ref().unwrap()).unwrap();
        assert_eq!(error["code"], 10);
        assert!(frames[1].data_ref().unwrap().ends_with(b"\n"));
        assert_eq!(frames[2].trailers_ref().unwrap()["x-done"], "yes");

        // The stream was consumed and dropped, which cancels the call.
        assert!(cancellation.is_cancelled());
    }
}
