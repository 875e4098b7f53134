//! One connection attempt: resolve, connect, encode until failure or stop,
//! disconnect.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{Shared, WaitLock};
use crate::audio::{AudioCapture, AudioLease, CaptureFormat};
use crate::codec::{
    self, AttemptPlan, ConversionSpec, Encoder, FrameConverter, MuxOutput, Packet, Rational,
};
use crate::{ErrorCode, FrameBuffer, MediaError, MediaKind, StreamState};

/// An opened encoder and the container track it feeds.
struct Track {
    encoder: Box<dyn Encoder>,
    index: usize,
    time_base: Rational,
}

impl Track {
    fn encode(&mut self, data: &[u8], pts_ms: i64) -> Result<Option<Packet>, MediaError> {
        let encoder_base = self.encoder.time_base();
        let pts = Rational::rescale(pts_ms, Rational::MILLIS, encoder_base);
        let Some(mut packet) = self.encoder.encode(data, pts)? else {
            return Ok(None);
        };
        if encoder_base != self.time_base {
            packet.rescale_ts(encoder_base, self.time_base);
        }
        Ok(Some(packet))
    }
}

/// Per-attempt resources, filled in as the attempt progresses. Dropping it
/// closes whatever was opened.
#[derive(Default)]
struct Resources {
    converter: Option<Box<dyn FrameConverter>>,
    video: Option<Track>,
    audio: Option<Track>,
    output: Option<Box<dyn MuxOutput>>,
    capture: Option<Box<dyn AudioCapture>>,
    header_written: bool,
}

impl Resources {
    /// Converts, encodes and writes one frame.
    ///
    /// Returns the written packet size, or `None` when the encoder buffered
    /// the frame.
    fn process(&mut self, frame: &FrameBuffer) -> Result<Option<usize>, MediaError> {
        let interleaved = self.audio.is_some();
        let packet = match frame.kind() {
            MediaKind::Video => {
                let (Some(converter), Some(track)) = (self.converter.as_mut(), self.video.as_mut())
                else {
                    return Err(MediaError::new(ErrorCode::Backend, "video track not open"));
                };
                let converted = converter.convert(frame.data())?;
                track.encode(converted, frame.pts())?.map(|p| (track.index, p))
            }
            MediaKind::Audio => match self.audio.as_mut() {
                Some(track) => track.encode(frame.data(), frame.pts())?.map(|p| (track.index, p)),
                None => None,
            },
        };

        let Some((index, packet)) = packet else {
            return Ok(None);
        };
        let Some(output) = self.output.as_mut() else {
            return Err(MediaError::new(ErrorCode::Backend, "output not open"));
        };
        if interleaved {
            output.write_interleaved(index, &packet)?;
        } else {
            output.write_packet(index, &packet)?;
        }
        Ok(Some(packet.data.len()))
    }
}

/// Runs one attempt and returns its terminal status.
///
/// Always publishes `Disconnecting` before returning, and leaves every
/// buffer of the stream in its pool.
pub(crate) fn run(shared: &Arc<Shared>, audio: Option<&AudioLease>) -> Result<(), MediaError> {
    let mut resources = Resources::default();
    let mut status = establish(shared, audio, &mut resources).and_then(|()| pump(shared, &mut resources));

    if let Err(err) = &status {
        if err.code == ErrorCode::Aborted {
            debug!("attempt interrupted");
        } else if err.is_io_error() {
            warn!(error = %err, server = %shared.config.server, "stream I/O failure");
        } else {
            error!(error = %err, server = %shared.config.server, "stream failed");
        }
    }

    {
        let mut engine = shared.engine.lock();
        if let Err(err) = &status {
            engine.note_reason(err.code);
        }
        shared.publish(&mut engine, StreamState::Disconnecting);
    }

    if let Some(capture) = resources.capture.as_mut() {
        capture.stop();
    }

    let io_failure = status.as_ref().err().is_some_and(MediaError::is_io_error);
    if resources.header_written && !io_failure {
        if let Some(output) = resources.output.as_mut() {
            if let Err(err) = output.write_trailer() {
                error!(error = %err, "failed to write trailer");
                if status.is_ok() {
                    status = Err(err);
                }
            }
        }
    }

    drop(resources);

    let drained = shared.engine.lock().drain_pending();
    if drained > 0 {
        debug!(drained, "returned undelivered frames to their pools");
    }

    status
}

/// `Starting → Connecting → Established`: resolves names, opens encoders and
/// the output, connects and writes the header.
fn establish(
    shared: &Arc<Shared>,
    audio: Option<&AudioLease>,
    resources: &mut Resources,
) -> Result<(), MediaError> {
    let config = &shared.config;
    let backend = shared.backend.as_ref();
    let plan = AttemptPlan::resolve(config)?;

    let format = backend.find_format(&plan.format).ok_or_else(|| {
        MediaError::new(ErrorCode::MuxerNotFound, format!("format {}", plan.format))
    })?;
    let video_info = backend
        .find_encoder(MediaKind::Video, &plan.video_codec)
        .ok_or_else(|| {
            MediaError::new(
                ErrorCode::EncoderNotFound,
                format!("video encoder {}", plan.video_codec),
            )
        })?;
    let audio_info = match plan.audio_codec.as_deref() {
        Some(name) => Some(backend.find_encoder(MediaKind::Audio, name).ok_or_else(|| {
            MediaError::new(ErrorCode::EncoderNotFound, format!("audio encoder {name}"))
        })?),
        None => None,
    };

    let pixel_format = plan.output_pixel_format(&video_info, config.pixel_format);
    resources.converter = Some(backend.open_converter(&ConversionSpec {
        width: config.width,
        height: config.height,
        input: config.pixel_format,
        output: pixel_format,
    })?);

    let mut output = backend.open_output(&format, &config.server, shared.interrupt())?;

    let video_params = codec::video_params(config, &plan, &video_info, pixel_format)?;
    let encoder = backend.open_encoder(&video_info, &video_params)?;
    let index = output.add_track(&video_info, &video_params)?;
    resources.video = Some(Track {
        encoder,
        index,
        time_base: output.track_time_base(index),
    });

    if let Some(info) = &audio_info {
        let params = codec::audio_params(config, &plan)?;
        let encoder = backend.open_encoder(info, &params)?;
        let index = output.add_track(info, &params)?;
        resources.audio = Some(Track {
            encoder,
            index,
            time_base: output.track_time_base(index),
        });

        let lease = audio.ok_or_else(|| {
            MediaError::new(ErrorCode::Unsupported, "audio encoder configured without audio subsystem")
        })?;
        resources.capture = Some(lease.open_capture()?);
    }
    resources.output = Some(output);

    publish(shared, StreamState::Connecting);

    info!(
        server = %config.server,
        format = %format.name,
        video = %video_info.name,
        audio = ?audio_info.as_ref().map(|a| &a.name),
        "connecting"
    );

    let output = resources
        .output
        .as_mut()
        .ok_or_else(|| MediaError::new(ErrorCode::Backend, "output not open"))?;
    output.connect()?;
    output.write_header()?;
    resources.header_written = true;

    publish(shared, StreamState::Established);
    info!(server = %config.server, "stream established");

    if let Some(capture) = resources.capture.as_mut() {
        capture.start(capture_format(shared), audio_callback(shared))?;
    }
    Ok(())
}

/// The encode loop. Only returns on failure or interruption.
fn pump(shared: &Arc<Shared>, resources: &mut Resources) -> Result<(), MediaError> {
    let mut engine = shared.engine.lock();
    loop {
        while !engine.interrupted && engine.pending.is_empty() {
            shared.engine.wait(&mut engine, None);
        }
        if engine.interrupted {
            return Err(MediaError::new(ErrorCode::Aborted, "stop requested"));
        }
        let Some(frame) = engine.pending.pop() else {
            continue;
        };

        let result = WaitLock::unlocked(&mut engine, || resources.process(&frame));

        engine.recycle(frame);
        if let Some(size) = result? {
            engine.counters.frames_sent += 1;
            engine.counters.bytes_sent += size as u64;
        }
    }
}

fn publish(shared: &Shared, state: StreamState) {
    let mut engine = shared.engine.lock();
    shared.publish(&mut engine, state);
}

fn capture_format(shared: &Shared) -> CaptureFormat {
    let config = &shared.config;
    CaptureFormat {
        buffer_count: config.audio_buffers,
        buffer_size: config.audio_buffer_size,
        sample_rate: config.audio_sample_rate,
        channels: config.audio_channels,
    }
}

/// Capture callback: acquire a free audio buffer, fill it, submit it.
/// Samples are dropped when the pool is exhausted.
fn audio_callback(shared: &Arc<Shared>) -> crate::audio::BufferCallback {
    let shared = Arc::downgrade(shared);
    Box::new(move |samples: &[u8]| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let now = shared.now_ms();
        let mut engine = shared.engine.lock();
        if let Some(mut buffer) = engine.acquire(MediaKind::Audio) {
            buffer.fill_from(samples);
            engine.submit(buffer, now);
            shared.engine.broadcast();
        }
    })
}
