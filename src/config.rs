//! Stream configuration.
//!
//! Every field has a default matching the device's fixed stream layout, so a
//! plain `StreamConfig::default()` works for a stock device. Configuration can
//! also be loaded from YAML:
//!
//! ```rust
//! use record3d::StreamConfig;
//!
//! let config = StreamConfig::from_yaml_str("device_port: 1337\nread_timeout_ms: 2000\n").unwrap();
//! assert_eq!(config.frame_width, 480);
//! assert_eq!(config.read_timeout_ms, Some(2000));
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, StreamError};

/// Port the device listens on for stream connections.
pub const DEFAULT_DEVICE_PORT: u16 = 1337;
/// Width of every transmitted frame in pixels.
pub const DEFAULT_FRAME_WIDTH: u32 = 480;
/// Height of every transmitted frame in pixels.
pub const DEFAULT_FRAME_HEIGHT: u32 = 640;
/// Bytes per RGB pixel.
pub const RGB_CHANNELS: usize = 3;
/// Bytes per depth sample (one `f32`).
pub const DEPTH_SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

// Upper bound on a single dimension; anything larger is a typo, not a camera.
const MAX_FRAME_DIMENSION: u32 = 16_384;

/// Configuration for a [`Record3DStream`](crate::Record3DStream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Device-side port the stream socket is opened on.
    pub device_port: u16,

    /// Frame width in pixels. Decoded images must match exactly.
    pub frame_width: u32,

    /// Frame height in pixels. Decoded images must match exactly.
    pub frame_height: u32,

    /// Capacity of the raw receive buffer. Defaults to twice the depth buffer size.
    pub receive_buffer_size: Option<usize>,

    /// Read timeout applied by transports that support one.
    ///
    /// A timed-out read ends the session like any other failed read.
    pub read_timeout_ms: Option<u64>,

    /// Nominal device frame rate, used to normalize throttled subscriptions.
    pub source_hz: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            device_port: DEFAULT_DEVICE_PORT,
            frame_width: DEFAULT_FRAME_WIDTH,
            frame_height: DEFAULT_FRAME_HEIGHT,
            receive_buffer_size: None,
            read_timeout_ms: None,
            source_hz: 30.0,
        }
    }
}

impl StreamConfig {
    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| StreamError::config_error("YAML parsing", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading stream configuration from {}", path.display());
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            StreamError::config_error(format!("reading {}", path.display()), e.to_string())
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Check that the configuration describes a usable stream.
    pub fn validate(&self) -> Result<()> {
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(StreamError::config_error(
                "frame dimensions",
                format!("{}x{} has a zero dimension", self.frame_width, self.frame_height),
            ));
        }

        if self.frame_width > MAX_FRAME_DIMENSION || self.frame_height > MAX_FRAME_DIMENSION {
            return Err(StreamError::config_error(
                "frame dimensions",
                format!(
                    "{}x{} exceeds the {} pixel limit",
                    self.frame_width, self.frame_height, MAX_FRAME_DIMENSION
                ),
            ));
        }

        if self.device_port == 0 {
            return Err(StreamError::config_error("device_port", "port 0 is not connectable"));
        }

        if let Some(size) = self.receive_buffer_size {
            if size < crate::wire::body::MIN_BODY_SIZE {
                return Err(StreamError::config_error(
                    "receive_buffer_size",
                    format!(
                        "{} bytes cannot hold the {}-byte fixed body prefix",
                        size,
                        crate::wire::body::MIN_BODY_SIZE
                    ),
                ));
            }
        }

        if !(self.source_hz.is_finite() && self.source_hz > 0.0) {
            return Err(StreamError::config_error(
                "source_hz",
                format!("{} is not a positive frame rate", self.source_hz),
            ));
        }

        Ok(())
    }

    /// Number of pixels in a frame.
    pub fn pixel_count(&self) -> usize {
        self.frame_width as usize * self.frame_height as usize
    }

    /// Size in bytes of a decoded RGB frame.
    pub fn rgb_buffer_size(&self) -> usize {
        self.pixel_count() * RGB_CHANNELS
    }

    /// Size in bytes of a decompressed depth frame.
    pub fn depth_buffer_size(&self) -> usize {
        self.pixel_count() * DEPTH_SAMPLE_SIZE
    }

    /// Effective raw receive buffer capacity.
    pub fn receive_buffer_size(&self) -> usize {
        // Overallocate so a full frame always fits.
        self.receive_buffer_size.unwrap_or_else(|| self.depth_buffer_size() * 2)
    }

    /// Read timeout as a [`Duration`], if configured.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}
