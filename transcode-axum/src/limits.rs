//! Message size limits for transcoded requests and responses.
//!
//! # Receive vs Send Limits
//!
//! - **Receive limit** (`receive_max_bytes`): Limits request body sizes.
//!   Defaults to 4 MB, matching gRPC's default receive limit.
//!
//! - **Send limit** (`send_max_bytes`): Limits encoded response message sizes.
//!   Unlimited by default.
//!
//! # Buffer threshold
//!
//! Request bodies up to `buffer_threshold` bytes with a known content length
//! are collected in memory. Larger bodies, and bodies without a content
//! length, are spooled through a temporary file that only spills to disk
//! past the threshold.

use transcode_axum_core::Status;

/// Default maximum request body size (4 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Default in-memory buffering threshold (30 KB).
pub const DEFAULT_BUFFER_THRESHOLD: usize = 30 * 1024;

/// Configuration for message size limits.
///
/// # Example
///
/// ```rust
/// use transcode_axum::MessageLimits;
///
/// let limits = MessageLimits::new()
///     .receive_max_bytes(16 * 1024 * 1024)  // 16 MB for requests
///     .send_max_bytes(8 * 1024 * 1024)      // 8 MB for responses
///     .buffer_threshold(64 * 1024);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageLimits {
    receive_max_bytes: Option<usize>,
    send_max_bytes: Option<usize>,
    buffer_threshold: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            receive_max_bytes: Some(DEFAULT_MAX_MESSAGE_SIZE),
            send_max_bytes: None,
            buffer_threshold: DEFAULT_BUFFER_THRESHOLD,
        }
    }
}

impl MessageLimits {
    /// Create the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create limits with no maximum sizes (not recommended for production).
    pub fn unlimited() -> Self {
        Self {
            receive_max_bytes: None,
            send_max_bytes: None,
            buffer_threshold: DEFAULT_BUFFER_THRESHOLD,
        }
    }

    /// Set the maximum request body size.
    ///
    /// Returns `ResourceExhausted` if a request exceeds this limit.
    pub fn receive_max_bytes(mut self, max: usize) -> Self {
        self.receive_max_bytes = Some(max);
        self
    }

    /// Set the maximum encoded response message size.
    ///
    /// Returns `ResourceExhausted` if a response would exceed this limit.
    pub fn send_max_bytes(mut self, max: usize) -> Self {
        self.send_max_bytes = Some(max);
        self
    }

    /// Set how many body bytes are held in memory before spilling to disk.
    pub fn buffer_threshold(mut self, threshold: usize) -> Self {
        self.buffer_threshold = threshold;
        self
    }

    /// Returns the maximum receive size, or `None` if unlimited.
    pub fn get_receive_max_bytes(&self) -> Option<usize> {
        self.receive_max_bytes
    }

    /// Returns the maximum send size, or `None` if unlimited.
    pub fn get_send_max_bytes(&self) -> Option<usize> {
        self.send_max_bytes
    }

    /// Returns the in-memory buffering threshold.
    pub fn get_buffer_threshold(&self) -> usize {
        self.buffer_threshold
    }

    /// Check a request body size against the receive limit.
    pub fn check_size(&self, size: usize) -> Result<(), Status> {
        if let Some(max) = self.receive_max_bytes
            && size > max
        {
            return Err(Status::resource_exhausted(format!(
                "message size {} bytes exceeds maximum allowed size of {} bytes",
                size, max
            )));
        }
        Ok(())
    }

    /// Check an encoded response size against the send limit.
    pub fn check_send_size(&self, size: usize) -> Result<(), Status> {
        if let Some(max) = self.send_max_bytes
            && size > max
        {
            return Err(Status::resource_exhausted(format!(
                "message size {} exceeds sendMaxBytes {}",
                size, max
            )));
        }
        Ok(())
    }
}
