//! Request body reading.
//!
//! Small bodies with a known length are collected straight into memory.
//! Everything else is streamed frame by frame through a
//! [`SpooledTempFile`], which stays in memory up to the buffer threshold and
//! spills to disk past it. Disk I/O runs on the blocking pool. Both paths
//! enforce the receive limit.

use std::io::{Read, Seek, SeekFrom, Write};

use axum::body::Body;
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tempfile::SpooledTempFile;
use transcode_axum_core::Status;

use crate::limits::MessageLimits;

/// Read a whole request body, enforcing `limits`.
///
/// Errors:
/// - `ResourceExhausted` when the body exceeds the receive limit
/// - `InvalidArgument` when the body stream fails
/// - `Internal` when the spool file cannot be written or read
pub async fn read_body(
    body: Body,
    content_length: Option<u64>,
    limits: &MessageLimits,
) -> Result<Bytes, Status> {
    if let Some(length) = content_length {
        limits.check_size(usize::try_from(length).unwrap_or(usize::MAX))?;
        if length <= limits.get_buffer_threshold() as u64 {
            return collect(body, limits).await;
        }
    }
    spool(body, limits).await
}

async fn collect(body: Body, limits: &MessageLimits) -> Result<Bytes, Status> {
    let max = limits.get_receive_max_bytes().unwrap_or(usize::MAX);
    let collected = Limited::new(body, max).collect().await.map_err(|err| {
        if err.downcast_ref::<LengthLimitError>().is_some() {
            Status::resource_exhausted(format!(
                "message size exceeds maximum allowed size of {max} bytes"
            ))
        } else {
            Status::invalid_argument(format!("failed to read request body: {err}"))
        }
    })?;
    Ok(collected.to_bytes())
}

async fn spool(mut body: Body, limits: &MessageLimits) -> Result<Bytes, Status> {
    let mut file = SpooledTempFile::new(limits.get_buffer_threshold());
    let mut total = 0usize;

    while let Some(frame) = body.frame().await {
        let frame = frame
            .map_err(|err| Status::invalid_argument(format!("failed to read request body: {err}")))?;
        if let Ok(data) = frame.into_data() {
            total += data.len();
            limits.check_size(total)?;
            if total > limits.get_buffer_threshold() {
                // Past the threshold the write lands on disk.
                file = blocking(move || {
                    file.write_all(&data)?;
                    Ok(file)
                })
                .await?;
            } else {
                file.write_all(&data).map_err(spool_error)?;
            }
        }
    }

    let read_back = move || -> std::io::Result<Vec<u8>> {
        let mut file = file;
        let mut buffer = Vec::with_capacity(total);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    };
    let buffer = if total > limits.get_buffer_threshold() {
        blocking(read_back).await?
    } else {
        read_back().map_err(spool_error)?
    };
    Ok(Bytes::from(buffer))
}

/// Run spool file I/O off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T, Status>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(spool_error),
        Err(err) => {
            tracing::error!(error = %err, "request body spool task failed");
            Err(Status::internal("failed to buffer request body"))
        }
    }
}

fn spool_error(err: std::io::Error) -> Status {
    tracing::error!(error = %err, "failed to buffer request body");
    Status::internal("failed to buffer request body")
}
