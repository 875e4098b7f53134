//! Configuration for output streams.

use std::time::Duration;

use crate::codec::{CodecOptions, PixelFormat};
use crate::{MediaKind, StreamError};

/// Configuration of one output stream.
///
/// Use [`StreamConfig::default()`] and override what you need. Numeric
/// encoder hints outside their valid range fall back to the documented
/// defaults when a connection attempt starts instead of failing `open()`.
///
/// # Example
///
/// ```
/// use stream_video::StreamConfig;
///
/// let config = StreamConfig {
///     server: "rtmp://live.example.com/app/key".into(),
///     format: Some("flv".into()),
///     width: 1280,
///     height: 720,
///     ..Default::default()
/// };
/// assert_eq!(config.video_frame_size(), 1280 * 720 * 3 / 2);
/// ```
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Output target URL or path. Required.
    pub server: String,

    /// Container format name. `-f` in [`options`](Self::options) wins.
    ///
    /// Default: `None` (`"matroska"`)
    pub format: Option<String>,

    /// Free-form `-key value` option string.
    ///
    /// Engine keys: `-f`, `-c:v`, `-c:a`, `-pix_fmt`, `-b:v`, `-b:a`, `-g`.
    /// Everything else is forwarded to the encoders. When unset and the
    /// video encoder is `libx264`, low-latency x264 defaults apply.
    /// Default: `None`
    pub options: Option<String>,

    /// Video encoder name. `-c:v` wins.
    ///
    /// Default: `None` (`"libx264"`)
    pub video_codec: Option<String>,

    /// Audio encoder name. Audio is captured and encoded only when this
    /// (or `-c:a`) is set.
    ///
    /// Default: `None`
    pub audio_codec: Option<String>,

    /// Frame width in pixels. Default: 640
    pub width: u32,

    /// Frame height in pixels. Default: 480
    pub height: u32,

    /// Pixel format of submitted video frames. Default: NV21
    pub pixel_format: PixelFormat,

    /// Video quality in `1..=100`, mapped onto the encoder quantizer range.
    /// Default: 50
    pub video_quality: i32,

    /// Video bitrate in bits per second; below 1000 means 128000.
    /// Default: 128000
    pub video_bitrate: i32,

    /// Group-of-pictures size; below 1 means 25. Default: 25
    pub gop_size: i32,

    /// Audio quality hint in `1..=100`; anything else is not forwarded.
    /// Default: 0
    pub audio_quality: i32,

    /// Audio bitrate in bits per second; below 1000 means 64000.
    /// Default: 64000
    pub audio_bitrate: i32,

    /// Audio capture sample rate in Hz. Default: 44100
    pub audio_sample_rate: u32,

    /// Audio capture channel count. Default: 1
    pub audio_channels: u16,

    /// Bytes per audio capture buffer. Default: 4096
    pub audio_buffer_size: usize,

    /// Number of pooled video frame buffers. Default: 4
    pub video_buffers: usize,

    /// Number of pooled audio buffers. Default: 8
    pub audio_buffers: usize,

    /// Wait between an I/O failure and the next connection attempt.
    /// Default: 2 seconds
    pub reconnect_backoff: Duration,
}

impl StreamConfig {
    /// Bytes of one video frame at the configured geometry and pixel format.
    pub fn video_frame_size(&self) -> usize {
        self.pixel_format.frame_size(self.width, self.height)
    }

    /// Whether an audio encoder is configured, directly or through `-c:a`.
    pub fn audio_requested(&self) -> bool {
        self.audio_codec.is_some()
            || self
                .options
                .as_deref()
                .and_then(|raw| CodecOptions::parse(raw).ok())
                .is_some_and(|options| options.contains("-c:a"))
    }

    /// Checks everything `open()` can reject up front.
    ///
    /// # Errors
    ///
    /// The first configuration problem found.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.width < 2 || self.height < 2 {
            return Err(StreamError::InvalidGeometry {
                width: self.width,
                height: self.height,
            });
        }
        if self.server.trim().is_empty() {
            return Err(StreamError::MissingServer);
        }
        if self.video_buffers == 0 {
            return Err(StreamError::InvalidBufferCount {
                kind: MediaKind::Video,
            });
        }
        if self.audio_requested() {
            if self.audio_buffers == 0 {
                return Err(StreamError::InvalidBufferCount {
                    kind: MediaKind::Audio,
                });
            }
            if self.audio_buffer_size == 0 {
                return Err(StreamError::InvalidAudioConfig {
                    reason: "audio buffer size must be non-zero".into(),
                });
            }
            if self.audio_sample_rate == 0 || self.audio_channels == 0 {
                return Err(StreamError::InvalidAudioConfig {
                    reason: format!(
                        "{} Hz x {} channels",
                        self.audio_sample_rate, self.audio_channels
                    ),
                });
            }
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            format: None,
            options: None,
            video_codec: None,
            audio_codec: None,
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Nv21,
            video_quality: 50,
            video_bitrate: 128_000,
            gop_size: 25,
            audio_quality: 0,
            audio_bitrate: 64_000,
            audio_sample_rate: 44_100,
            audio_channels: 1,
            audio_buffer_size: 4096,
            video_buffers: 4,
            audio_buffers: 8,
            reconnect_backoff: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> StreamConfig {
        StreamConfig {
            server: "tcp://127.0.0.1:9000".into(),
            ..StreamConfig::default()
        }
    }

    #[test]
    fn test_stream_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.pixel_format, PixelFormat::Nv21);
        assert_eq!(config.video_quality, 50);
        assert_eq!(config.video_bitrate, 128_000);
        assert_eq!(config.gop_size, 25);
        assert_eq!(config.audio_bitrate, 64_000);
        assert_eq!(config.audio_sample_rate, 44_100);
        assert_eq!(config.video_buffers, 4);
        assert_eq!(config.audio_buffers, 8);
        assert_eq!(config.reconnect_backoff, Duration::from_secs(2));
        assert_eq!(config.video_frame_size(), 460_800);
    }

    #[test]
    fn test_validate_geometry() {
        let config = StreamConfig {
            width: 1,
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(StreamError::InvalidGeometry { width: 1, .. })
        ));
    }

    #[test]
    fn test_validate_server() {
        let config = StreamConfig {
            server: "  ".into(),
            ..valid()
        };
        assert!(matches!(config.validate(), Err(StreamError::MissingServer)));
    }

    #[test]
    fn test_validate_buffer_counts() {
        let config = StreamConfig {
            video_buffers: 0,
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(StreamError::InvalidBufferCount {
                kind: MediaKind::Video
            })
        ));

        // Audio pool size only matters when audio is requested
        let config = StreamConfig {
            audio_buffers: 0,
            ..valid()
        };
        assert!(config.validate().is_ok());

        let config = StreamConfig {
            audio_buffers: 0,
            options: Some("-c:a aac".into()),
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(StreamError::InvalidBufferCount {
                kind: MediaKind::Audio
            })
        ));
    }

    #[test]
    fn test_validate_audio_buffer_size() {
        let config = StreamConfig {
            audio_codec: Some("aac".into()),
            audio_buffer_size: 0,
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(StreamError::InvalidAudioConfig { .. })
        ));
    }
}
