//! Resolution of configuration + option string into per-attempt encoder
//! parameters.

use tracing::debug;

use super::{CodecOptions, EncoderInfo, EncoderParams, PixelFormat, Rational, TrackFormat};
use crate::{ErrorCode, MediaError, StreamConfig};

/// Options applied when no option string is configured and the video
/// encoder is `libx264`.
pub const DEFAULT_X264_OPTIONS: &str =
    "-preset veryfast -tune zerolatency -rc-lookahead 3 -profile Main -level 42";

const DEFAULT_FORMAT: &str = "matroska";
const DEFAULT_VIDEO_CODEC: &str = "libx264";

const DEFAULT_VIDEO_BITRATE: u32 = 128_000;
const DEFAULT_AUDIO_BITRATE: u32 = 64_000;
const DEFAULT_GOP_SIZE: u32 = 25;
const DEFAULT_QUALITY: u32 = 50;
const MIN_BITRATE: i64 = 1000;

const QMIN: u32 = 1;
const QMAX: u32 = 32;

/// Keys interpreted by the engine itself and never forwarded to encoders.
const ENGINE_KEYS: &[&str] = &["-f", "-c:v", "-c:a", "-pix_fmt", "-b:v", "-b:a", "-g"];

/// Maps a `1..=100` quality to an x264 constant quantizer.
///
/// ```
/// assert_eq!(stream_video::codec::x264_qp(100), 10);
/// assert_eq!(stream_video::codec::x264_qp(50), 35);
/// assert_eq!(stream_video::codec::x264_qp(1), 51);
/// ```
pub fn x264_qp(quality: u32) -> u32 {
    ((100 - quality.min(100)) * 50 / 100 + 10).min(51)
}

/// Maps a `1..=100` quality to a fixed quantizer for non-x264 encoders.
///
/// ```
/// assert_eq!(stream_video::codec::generic_quantizer(100), 1);
/// assert_eq!(stream_video::codec::generic_quantizer(50), 17);
/// assert_eq!(stream_video::codec::generic_quantizer(1), 31);
/// ```
pub fn generic_quantizer(quality: u32) -> u32 {
    ((100 - quality.min(100)) * 32 / 100 + 1).min(31)
}

/// Names and options resolved once per connection attempt.
#[derive(Debug, Clone)]
pub(crate) struct AttemptPlan {
    pub format: String,
    pub video_codec: String,
    pub audio_codec: Option<String>,
    pub pixel_format: Option<PixelFormat>,
    pub options: CodecOptions,
}

impl AttemptPlan {
    /// Parses the option string (or the x264 defaults) and applies the
    /// `-f`, `-c:v`, `-c:a` and `-pix_fmt` overrides.
    pub fn resolve(config: &StreamConfig) -> Result<Self, MediaError> {
        let configured_codec = config.video_codec.as_deref().unwrap_or(DEFAULT_VIDEO_CODEC);

        let options = match config.options.as_deref() {
            Some(raw) => CodecOptions::parse(raw)?,
            None if configured_codec == DEFAULT_VIDEO_CODEC => {
                CodecOptions::parse(DEFAULT_X264_OPTIONS)?
            }
            None => CodecOptions::new(),
        };

        let format = options
            .get("-f")
            .or(config.format.as_deref())
            .unwrap_or(DEFAULT_FORMAT)
            .to_owned();
        let video_codec = options.get("-c:v").unwrap_or(configured_codec).to_owned();
        let audio_codec = options
            .get("-c:a")
            .or(config.audio_codec.as_deref())
            .map(str::to_owned);
        let pixel_format = options
            .get("-pix_fmt")
            .map(str::parse::<PixelFormat>)
            .transpose()?;

        debug!(
            format = %format,
            video_codec = %video_codec,
            audio_codec = ?audio_codec,
            options = %options,
            "resolved output plan"
        );

        Ok(Self {
            format,
            video_codec,
            audio_codec,
            pixel_format,
            options,
        })
    }

    /// Encoder pixel format: `-pix_fmt`, else the encoder's first supported
    /// format, else the input format.
    pub fn output_pixel_format(&self, encoder: &EncoderInfo, input: PixelFormat) -> PixelFormat {
        self.pixel_format
            .or_else(|| encoder.pixel_formats.first().copied())
            .unwrap_or(input)
    }
}

/// Builds video encoder parameters.
pub(crate) fn video_params(
    config: &StreamConfig,
    plan: &AttemptPlan,
    encoder: &EncoderInfo,
    pixel_format: PixelFormat,
) -> Result<EncoderParams, MediaError> {
    let options = &plan.options;

    let bit_rate = match options.get("-b:v") {
        Some(raw) => parse_bitrate("-b:v", raw)?,
        None => positive_or(config.video_bitrate, MIN_BITRATE, DEFAULT_VIDEO_BITRATE),
    };

    let gop_size = match options.get_i64("-g")? {
        Some(g) if g >= 1 => u32::try_from(g).unwrap_or(u32::MAX),
        Some(g) => {
            return Err(MediaError::new(
                ErrorCode::InvalidArgument,
                format!("bad gop size {g}"),
            ))
        }
        None => positive_or(config.gop_size, 1, DEFAULT_GOP_SIZE),
    };

    let quality = u32::try_from(config.video_quality)
        .ok()
        .filter(|q| (1..=100).contains(q))
        .unwrap_or(DEFAULT_QUALITY);

    let mut forwarded = options.forwarded(ENGINE_KEYS);
    let (mut qmin, mut qmax) = (QMIN, QMAX);

    if encoder.name == DEFAULT_VIDEO_CODEC {
        if !options.contains("-crf") && !options.contains("-qp") {
            let qp = x264_qp(quality);
            debug!(qp, quality, "mapped quality to x264 qp");
            forwarded.set("qp", qp.to_string());
        }
    } else if !options.contains("-qmin") && !options.contains("-qmax") {
        let q = generic_quantizer(quality);
        debug!(q, quality, encoder = %encoder.name, "mapped quality to fixed quantizer");
        qmin = q;
        qmax = q;
        forwarded.set("qmin", q.to_string());
        forwarded.set("qmax", q.to_string());
    }

    Ok(EncoderParams {
        time_base: Rational::MILLIS,
        bit_rate,
        quality: Some(quality),
        options: forwarded,
        format: TrackFormat::Video {
            width: config.width,
            height: config.height,
            pixel_format,
            gop_size,
            qmin,
            qmax,
        },
    })
}

/// Builds audio encoder parameters.
pub(crate) fn audio_params(
    config: &StreamConfig,
    plan: &AttemptPlan,
) -> Result<EncoderParams, MediaError> {
    let options = &plan.options;

    let bit_rate = match options.get("-b:a") {
        Some(raw) => parse_bitrate("-b:a", raw)?,
        None => positive_or(config.audio_bitrate, MIN_BITRATE, DEFAULT_AUDIO_BITRATE),
    };

    let sample_rate = i32::try_from(config.audio_sample_rate).map_err(|_| {
        MediaError::new(
            ErrorCode::InvalidArgument,
            format!("bad sample rate {}", config.audio_sample_rate),
        )
    })?;

    let quality = u32::try_from(config.audio_quality)
        .ok()
        .filter(|q| (1..=100).contains(q));

    Ok(EncoderParams {
        time_base: Rational::new(1, sample_rate),
        bit_rate,
        quality,
        options: options.forwarded(ENGINE_KEYS),
        format: TrackFormat::Audio {
            sample_rate: config.audio_sample_rate,
            channels: config.audio_channels,
        },
    })
}

/// `value` when it is at least `min`, otherwise `default`.
fn positive_or(value: i32, min: i64, default: u32) -> u32 {
    if i64::from(value) >= min {
        u32::try_from(value).unwrap_or(default)
    } else {
        default
    }
}

/// Parses a bitrate with an optional `k`/`M` suffix (`"800k"`, `"2.5M"`).
fn parse_bitrate(key: &str, raw: &str) -> Result<u32, MediaError> {
    let (digits, scale) = match raw.as_bytes().last() {
        Some(b'k' | b'K') => (&raw[..raw.len() - 1], 1e3),
        Some(b'M') => (&raw[..raw.len() - 1], 1e6),
        _ => (raw, 1.0),
    };

    let bad = || {
        MediaError::new(
            ErrorCode::InvalidArgument,
            format!("bad bitrate {key} {raw}"),
        )
    };

    let value = digits.parse::<f64>().map_err(|_| bad())? * scale;
    if !value.is_finite() || value < MIN_BITRATE as f64 || value > f64::from(u32::MAX) {
        return Err(bad());
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(value as u32)
}
