//! Codec/mux capability used by the encode loop.
//!
//! The engine never converts pixels, compresses or multiplexes on its own.
//! It drives a [`MediaBackend`] through a narrow interface:
//!
//! ```text
//! find_format / find_encoder → open_converter → open_encoder(s)
//!     → open_output → add_track(s) → connect → write_header
//!     → { convert → encode → write_packet }* → write_trailer
//! ```
//!
//! Everything a backend hands out is closed by dropping it. Failures are
//! reported as [`MediaError`]s whose [`ErrorCode`](crate::ErrorCode) the
//! engine classifies with [`is_io_error()`](crate::ErrorCode::is_io_error)
//! and nothing else.
//!
//! [`mock::MockBackend`] is a scriptable in-memory implementation for tests.

pub mod mock;
mod options;
mod params;
mod pixel;
mod time;

pub use options::CodecOptions;
pub use params::{generic_quantizer, x264_qp, DEFAULT_X264_OPTIONS};
pub(crate) use params::{audio_params, video_params, AttemptPlan};
pub use pixel::PixelFormat;
pub use time::{Rational, NOPTS};

use std::fmt;
use std::sync::Arc;

use crate::{MediaError, MediaKind};

/// Container formats known to work with the live streaming path.
pub const SUPPORTED_FORMATS: &[&str] = &["matroska", "asf", "mjpeg", "avi", "flv", "ffm"];

/// Container format resolved by [`MediaBackend::find_format()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatInfo {
    /// Short muxer name (e.g. `"flv"`).
    pub name: String,
}

/// Encoder resolved by [`MediaBackend::find_encoder()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// Encoder name (e.g. `"libx264"`, `"aac"`).
    pub name: String,
    /// Media kind the encoder accepts.
    pub kind: MediaKind,
    /// Pixel formats accepted by a video encoder, preferred first.
    pub pixel_formats: Vec<PixelFormat>,
}

/// Media-specific encoder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackFormat {
    /// Video track settings.
    Video {
        /// Frame width in pixels.
        width: u32,
        /// Frame height in pixels.
        height: u32,
        /// Pixel format the encoder receives.
        pixel_format: PixelFormat,
        /// Group-of-pictures size.
        gop_size: u32,
        /// Lower quantizer bound.
        qmin: u32,
        /// Upper quantizer bound.
        qmax: u32,
    },
    /// Audio track settings.
    Audio {
        /// Sample rate in Hz.
        sample_rate: u32,
        /// Interleaved channel count.
        channels: u16,
    },
}

/// Parameters passed to [`MediaBackend::open_encoder()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderParams {
    /// Time base of timestamps passed to [`Encoder::encode()`].
    pub time_base: Rational,
    /// Target bitrate in bits per second.
    pub bit_rate: u32,
    /// Quality hint in `1..=100`, when one was configured.
    pub quality: Option<u32>,
    /// Encoder-private options (keys without the leading `-`).
    pub options: CodecOptions,
    /// Media-specific settings.
    pub format: TrackFormat,
}

/// Pixel conversion request passed to [`MediaBackend::open_converter()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionSpec {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of submitted frames.
    pub input: PixelFormat,
    /// Pixel format the video encoder expects.
    pub output: PixelFormat,
}

/// One compressed unit produced by an [`Encoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Compressed payload.
    pub data: Vec<u8>,
    /// Presentation timestamp in the encoder time base.
    pub pts: i64,
    /// Decode timestamp in the encoder time base.
    pub dts: i64,
    /// Whether the packet starts a keyframe.
    pub key: bool,
}

impl Packet {
    /// Rescales both timestamps from one time base to another.
    pub fn rescale_ts(&mut self, from: Rational, to: Rational) {
        self.pts = Rational::rescale(self.pts, from, to);
        self.dts = Rational::rescale(self.dts, from, to);
    }
}

/// Cancellation probe handed to blocking backend calls.
///
/// Backends poll [`is_interrupted()`](Self::is_interrupted) while blocked in
/// connect or write and give up with [`ErrorCode::Aborted`](crate::ErrorCode::Aborted)
/// once it returns `true`.
#[derive(Clone)]
pub struct Interrupt {
    check: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl Interrupt {
    /// Wraps a polling closure.
    pub fn new<F>(check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(check),
        }
    }

    /// An interrupt that never fires.
    pub fn never() -> Self {
        Self::new(|| false)
    }

    /// Returns `true` once the owning stream has been asked to stop.
    pub fn is_interrupted(&self) -> bool {
        (self.check)()
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Converts raw frames into the encoder pixel format.
pub trait FrameConverter {
    /// Converts one frame. The returned slice stays valid until the next call.
    fn convert(&mut self, input: &[u8]) -> Result<&[u8], MediaError>;
}

/// An open encoder. Dropping it closes the codec.
pub trait Encoder {
    /// Time base of the timestamps on produced packets.
    fn time_base(&self) -> Rational;

    /// Encodes one frame.
    ///
    /// Returns `Ok(None)` while the encoder is still buffering input.
    fn encode(&mut self, data: &[u8], pts: i64) -> Result<Option<Packet>, MediaError>;
}

/// An output container bound to a network/file target. Dropping it closes
/// the connection.
pub trait MuxOutput {
    /// Adds a track for an opened encoder and returns its index.
    fn add_track(&mut self, encoder: &EncoderInfo, params: &EncoderParams)
        -> Result<usize, MediaError>;

    /// Time base the container chose for a track.
    fn track_time_base(&self, track: usize) -> Rational;

    /// Opens the connection to the target.
    fn connect(&mut self) -> Result<(), MediaError>;

    /// Writes the container header.
    fn write_header(&mut self) -> Result<(), MediaError>;

    /// Writes a packet directly.
    fn write_packet(&mut self, track: usize, packet: &Packet) -> Result<(), MediaError>;

    /// Writes a packet through the container's interleaving queue.
    fn write_interleaved(&mut self, track: usize, packet: &Packet) -> Result<(), MediaError>;

    /// Writes the container trailer.
    fn write_trailer(&mut self) -> Result<(), MediaError>;
}

/// Factory for everything the encode loop needs per connection attempt.
///
/// One backend is shared by every attempt of a stream (and may be shared
/// between streams), so it must be `Send + Sync`. The objects it opens live
/// on the worker thread only.
pub trait MediaBackend: Send + Sync {
    /// Resolves a container format by name.
    fn find_format(&self, name: &str) -> Option<FormatInfo>;

    /// Resolves an encoder by kind and name.
    fn find_encoder(&self, kind: MediaKind, name: &str) -> Option<EncoderInfo>;

    /// Allocates a pixel converter sized for the configured geometry.
    fn open_converter(&self, spec: &ConversionSpec) -> Result<Box<dyn FrameConverter>, MediaError>;

    /// Opens an encoder.
    fn open_encoder(
        &self,
        encoder: &EncoderInfo,
        params: &EncoderParams,
    ) -> Result<Box<dyn Encoder>, MediaError>;

    /// Allocates an output container for `target`. No I/O happens until
    /// [`MuxOutput::connect()`].
    fn open_output(
        &self,
        format: &FormatInfo,
        target: &str,
        interrupt: Interrupt,
    ) -> Result<Box<dyn MuxOutput>, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_interrupt_polls_closure() {
        let flag = Arc::new(AtomicBool::new(false));
        let interrupt = {
            let flag = Arc::clone(&flag);
            Interrupt::new(move || flag.load(Ordering::SeqCst))
        };

        assert!(!interrupt.is_interrupted());
        flag.store(true, Ordering::SeqCst);
        assert!(interrupt.clone().is_interrupted());
        assert!(!Interrupt::never().is_interrupted());
    }

    #[test]
    fn test_packet_rescale() {
        let mut packet = Packet {
            data: vec![0; 4],
            pts: 40,
            dts: 40,
            key: true,
        };
        packet.rescale_ts(Rational::MILLIS, Rational::new(1, 90_000));
        assert_eq!(packet.pts, 3600);
        assert_eq!(packet.dts, 3600);
    }

    #[test]
    fn test_supported_formats_include_defaults() {
        assert!(SUPPORTED_FORMATS.contains(&"matroska"));
        assert!(SUPPORTED_FORMATS.contains(&"flv"));
    }
}
