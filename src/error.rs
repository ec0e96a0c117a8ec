//! Error types for the streaming pipeline.
//!
//! Every failure inside a streaming session resolves to a disconnect, so most
//! variants describe *why* a session ended rather than something a caller can
//! fix in place. Connection-level errors are returned directly from
//! [`Record3DStream::connect`](crate::Record3DStream::connect).
//!
//! ## Error Categories
//!
//! - **Connection Errors**: socket open rejected, already streaming, discovery failures
//! - **Transport Errors**: short or failed reads on the byte stream
//! - **Protocol Errors**: body sizes that contradict the frame header
//! - **Decode Errors**: JPEG parse failures and unexpected image dimensions
//! - **Decompression Errors**: LZFSE failures or depth size mismatches
//! - **Config Errors**: invalid or unreadable configuration
//!
//! ## Retrying
//!
//! The library never reconnects on its own. [`StreamError::is_retryable`]
//! tells the caller whether reconnecting is likely to help:
//!
//! ```rust
//! use record3d::StreamError;
//!
//! let error = StreamError::connection_failed("device refused port 1337");
//! if error.is_retryable() {
//!     println!("Reconnect later");
//! }
//! ```

use thiserror::Error;

/// Result type alias for streaming operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Failed to connect to device: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("A streaming session is already active")]
    AlreadyStreaming,

    #[error("Device discovery failed: {reason}")]
    DeviceDiscovery { reason: String },

    #[error("Short read while receiving {context}: expected {expected} bytes, received {received}")]
    ShortRead { context: &'static str, expected: usize, received: usize },

    #[error("Protocol violation in {context}: {details}")]
    Protocol { context: String, details: String },

    #[error("RGB decode failed: {details}")]
    Decode { details: String },

    #[error("Decoded image is {}x{}, expected {}x{}", found.0, found.1, expected.0, expected.1)]
    DimensionMismatch { expected: (u32, u32), found: (u32, u32) },

    #[error("Depth decompression failed: expected {expected} bytes, produced {produced} ({details})")]
    Decompression { expected: usize, produced: usize, details: String },

    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },
}

impl StreamError {
    /// Returns whether reconnecting could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Connection { .. } => true,
            StreamError::ShortRead { .. } => true,
            StreamError::DeviceDiscovery { .. } => true,
            StreamError::AlreadyStreaming => false,
            StreamError::Protocol { .. } => false,
            StreamError::Decode { .. } => false,
            StreamError::DimensionMismatch { .. } => false,
            StreamError::Decompression { .. } => false,
            StreamError::Config { .. } => false,
        }
    }

    /// Returns whether the error means the remote end stopped sending.
    ///
    /// A short read is how a closed or failed transport surfaces; the framer
    /// treats it as the natural end of a session rather than a corrupt stream.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, StreamError::ShortRead { .. })
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::Connection { .. } => vec![
                "Ensure the device is unlocked and the streaming app is in USB mode",
                "Check that the usbmux forwarding is running",
                "Reconnect the USB cable",
            ],
            StreamError::AlreadyStreaming => {
                vec!["Call disconnect() before connecting to another device"]
            }
            StreamError::DeviceDiscovery { .. } => vec![
                "Check that the transport service is running",
                "Verify the device is trusted by this host",
            ],
            StreamError::ShortRead { .. } => vec![
                "Reconnect to the device",
                "Check the cable and the device's streaming state",
            ],
            StreamError::Protocol { .. } => vec![
                "Update the streaming app and this library to compatible versions",
                "Reconnect; the stream cannot resynchronise on its own",
            ],
            StreamError::Decode { .. } | StreamError::DimensionMismatch { .. } => vec![
                "Verify the configured frame width and height match the device",
                "Update the streaming app to a compatible version",
            ],
            StreamError::Decompression { .. } => vec![
                "Verify the configured frame size matches the device's depth map",
                "Reconnect to the device",
            ],
            StreamError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Remove unknown or out-of-range fields",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        StreamError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for protocol violations.
    pub fn protocol_violation(context: impl Into<String>, details: impl Into<String>) -> Self {
        StreamError::Protocol { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        StreamError::Config { context: context.into(), details: details.into() }
    }
}
