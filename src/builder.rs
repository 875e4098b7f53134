//! Builder pattern for `OutputStream`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::AudioSubsystem;
use crate::codec::{MediaBackend, PixelFormat};
use crate::{state_listener, OutputStream, StateChange, StateListener, StreamConfig, StreamError};

/// Builder for configuring and opening an [`OutputStream`].
///
/// Use [`OutputStream::builder()`] to create a new builder.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use stream_video::{codec::mock::MockBackend, OutputStream, PixelFormat};
///
/// let stream = OutputStream::builder()
///     .server("rtmp://live.example.com/app/key")
///     .format("flv")
///     .options("-preset ultrafast -tune zerolatency")
///     .geometry(1280, 720)
///     .pixel_format(PixelFormat::Nv12)
///     .video_quality(70)
///     .gop_size(50)
///     .reconnect_backoff(Duration::from_secs(5))
///     .on_state_change(|change| tracing::info!(state = %change.state, "state"))
///     .backend(Arc::new(MockBackend::new()))
///     .open()
///     .unwrap();
///
/// assert_eq!(stream.video_frame_size(), 1280 * 720 * 3 / 2);
/// ```
#[derive(Default)]
#[must_use]
pub struct OutputStreamBuilder {
    config: StreamConfig,
    backend: Option<Arc<dyn MediaBackend>>,
    audio: Option<AudioSubsystem>,
    listener: Option<StateListener>,
}

impl OutputStreamBuilder {
    /// Creates a builder with [`StreamConfig::default()`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the output target URL or path.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.config.server = server.into();
        self
    }

    /// Sets the container format name.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.config.format = Some(format.into());
        self
    }

    /// Sets the `-key value` option string.
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.config.options = Some(options.into());
        self
    }

    /// Sets the video encoder name.
    pub fn video_codec(mut self, name: impl Into<String>) -> Self {
        self.config.video_codec = Some(name.into());
        self
    }

    /// Sets the audio encoder name, enabling audio capture.
    pub fn audio_codec(mut self, name: impl Into<String>) -> Self {
        self.config.audio_codec = Some(name.into());
        self
    }

    /// Sets the frame size in pixels.
    pub fn geometry(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    /// Sets the pixel format of submitted frames.
    pub fn pixel_format(mut self, format: PixelFormat) -> Self {
        self.config.pixel_format = format;
        self
    }

    /// Sets the video quality (`1..=100`).
    pub fn video_quality(mut self, quality: i32) -> Self {
        self.config.video_quality = quality;
        self
    }

    /// Sets the video bitrate in bits per second.
    pub fn video_bitrate(mut self, bitrate: i32) -> Self {
        self.config.video_bitrate = bitrate;
        self
    }

    /// Sets the group-of-pictures size.
    pub fn gop_size(mut self, gop_size: i32) -> Self {
        self.config.gop_size = gop_size;
        self
    }

    /// Sets the audio quality hint (`1..=100`).
    pub fn audio_quality(mut self, quality: i32) -> Self {
        self.config.audio_quality = quality;
        self
    }

    /// Sets the audio bitrate in bits per second.
    pub fn audio_bitrate(mut self, bitrate: i32) -> Self {
        self.config.audio_bitrate = bitrate;
        self
    }

    /// Sets the audio capture format.
    pub fn audio_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.config.audio_sample_rate = sample_rate;
        self.config.audio_channels = channels;
        self
    }

    /// Sets the audio capture buffer size in bytes.
    pub fn audio_buffer_size(mut self, bytes: usize) -> Self {
        self.config.audio_buffer_size = bytes;
        self
    }

    /// Sets the number of pooled video and audio buffers.
    pub fn buffers(mut self, video: usize, audio: usize) -> Self {
        self.config.video_buffers = video;
        self.config.audio_buffers = audio;
        self
    }

    /// Sets the wait between an I/O failure and the next attempt.
    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.config.reconnect_backoff = backoff;
        self
    }

    /// Sets the codec/mux backend. Required.
    pub fn backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the audio subsystem used when an audio encoder is configured.
    pub fn audio(mut self, audio: AudioSubsystem) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Registers a state-change listener.
    ///
    /// The listener runs with the stream lock held and must not call back
    /// into the stream.
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        self.listener = Some(state_listener(f));
        self
    }

    /// Registers a prebuilt listener such as a
    /// [`channel_listener()`](crate::channel_listener).
    pub fn listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Validates the configuration and opens the stream.
    ///
    /// # Errors
    ///
    /// [`StreamError::MissingBackend`] without a backend, otherwise whatever
    /// [`OutputStream::open()`] rejects.
    pub fn open(self) -> Result<OutputStream, StreamError> {
        let backend = self.backend.ok_or(StreamError::MissingBackend)?;
        OutputStream::open(self.config, backend, self.listener, self.audio)
    }
}

impl fmt::Debug for OutputStreamBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStreamBuilder")
            .field("config", &self.config)
            .field("backend", &self.backend.is_some())
            .field("audio", &self.audio)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::mock::MockBackend;

    #[test]
    fn test_builder_sets_config() {
        let builder = OutputStream::builder()
            .server("tcp://x")
            .format("flv")
            .video_codec("mpeg4")
            .geometry(320, 240)
            .buffers(2, 3)
            .reconnect_backoff(Duration::from_millis(10));

        assert_eq!(builder.config.server, "tcp://x");
        assert_eq!(builder.config.format.as_deref(), Some("flv"));
        assert_eq!(builder.config.video_codec.as_deref(), Some("mpeg4"));
        assert_eq!((builder.config.width, builder.config.height), (320, 240));
        assert_eq!(builder.config.video_buffers, 2);
        assert_eq!(builder.config.audio_buffers, 3);
        assert_eq!(builder.config.reconnect_backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_builder_requires_backend() {
        let err = OutputStream::builder().server("tcp://x").open().unwrap_err();
        assert!(matches!(err, StreamError::MissingBackend));
    }

    #[test]
    fn test_builder_validates_config() {
        let err = OutputStream::builder()
            .backend(Arc::new(MockBackend::new()))
            .open()
            .unwrap_err();
        assert!(matches!(err, StreamError::MissingServer));
    }

    #[test]
    fn test_builder_opens_idle_stream() {
        let stream = OutputStream::builder()
            .server("tcp://x")
            .geometry(8, 8)
            .backend(Arc::new(MockBackend::new()))
            .open()
            .unwrap();
        assert_eq!(stream.state(), crate::StreamState::Idle);
        assert_eq!(stream.buffer_census().total, 4);
    }
}
