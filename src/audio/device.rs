//! CPAL-backed audio capture.
//!
//! The CPAL callback runs on a realtime thread and must never touch the
//! stream lock, so samples flow through a `ringbuf` SPSC ring to a delivery
//! thread that slices them into fixed-size buffers for the engine callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig as CpalStreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;

use super::{AudioCapture, AudioDriver, BufferCallback, CaptureFormat};
use crate::{ErrorCode, MediaError};

/// Ring capacity in samples (two seconds at 48 kHz stereo).
pub const DEFAULT_RING_CAPACITY: usize = 48_000 * 2 * 2;

/// Symmetric i16 max for audio conversion (avoids asymmetric clipping).
const I16_MAX_SYMMETRIC: f32 = i16::MAX as f32;
const I16_MIN_F32: f32 = i16::MIN as f32;
const I16_MAX_F32: f32 = i16::MAX as f32;

const DELIVERY_POLL: Duration = Duration::from_millis(5);

fn backend_error(context: &str, err: impl std::fmt::Display) -> MediaError {
    MediaError::new(ErrorCode::Backend, format!("{context}: {err}"))
}

/// [`AudioDriver`] for the default CPAL host and its default input device.
#[derive(Debug, Clone)]
pub struct CpalDriver {
    ring_capacity: usize,
}

impl CpalDriver {
    /// Uses the host's default input device and [`DEFAULT_RING_CAPACITY`].
    pub fn new() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }

    /// Sets the sample ring capacity between the CPAL callback and delivery.
    #[must_use]
    pub fn with_ring_capacity(mut self, samples: usize) -> Self {
        self.ring_capacity = samples.max(1);
        self
    }
}

impl Default for CpalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDriver for CpalDriver {
    fn initialize(&self) -> Result<(), MediaError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| MediaError::new(ErrorCode::Unsupported, "no default input device"))?;
        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            "audio input available"
        );
        Ok(())
    }

    fn shutdown(&self) {}

    fn open_capture(&self) -> Result<Box<dyn AudioCapture>, MediaError> {
        Ok(Box::new(CpalCapture {
            ring_capacity: self.ring_capacity,
            stream: None,
            running: Arc::new(AtomicBool::new(false)),
            delivery: None,
            queued: 0,
        }))
    }
}

struct CpalCapture {
    ring_capacity: usize,
    stream: Option<Stream>,
    running: Arc<AtomicBool>,
    delivery: Option<JoinHandle<()>>,
    queued: usize,
}

impl CpalCapture {
    fn build_stream(
        format: CaptureFormat,
        producer: ringbuf::HeapProd<i16>,
    ) -> Result<Stream, MediaError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| MediaError::new(ErrorCode::Unsupported, "no default input device"))?;
        let supported = device
            .default_input_config()
            .map_err(|e| backend_error("default input config", e))?;

        let sample_format = supported.sample_format();
        let config = CpalStreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        match sample_format {
            SampleFormat::I16 => build_i16_stream(&device, &config, producer),
            SampleFormat::F32 => build_f32_stream(&device, &config, producer),
            other => Err(MediaError::new(
                ErrorCode::Unsupported,
                format!("unsupported sample format {other:?}"),
            )),
        }
    }
}

fn build_i16_stream(
    device: &cpal::Device,
    config: &CpalStreamConfig,
    mut producer: ringbuf::HeapProd<i16>,
) -> Result<Stream, MediaError> {
    device
        .build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // Drops samples when the delivery thread falls behind
                let _ = producer.push_slice(data);
            },
            |err| tracing::error!(error = %err, "audio stream error"),
            None,
        )
        .map_err(|e| backend_error("build input stream", e))
}

fn build_f32_stream(
    device: &cpal::Device,
    config: &CpalStreamConfig,
    mut producer: ringbuf::HeapProd<i16>,
) -> Result<Stream, MediaError> {
    device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    #[allow(clippy::cast_possible_truncation)]
                    let converted =
                        (sample * I16_MAX_SYMMETRIC).clamp(I16_MIN_F32, I16_MAX_F32) as i16;
                    let _ = producer.try_push(converted);
                }
            },
            |err| tracing::error!(error = %err, "audio stream error"),
            None,
        )
        .map_err(|e| backend_error("build input stream", e))
}

impl AudioCapture for CpalCapture {
    fn start(
        &mut self,
        format: CaptureFormat,
        mut on_buffer: BufferCallback,
    ) -> Result<(), MediaError> {
        if self.stream.is_some() {
            return Err(MediaError::new(ErrorCode::InvalidArgument, "capture already started"));
        }

        let (producer, mut consumer) = HeapRb::<i16>::new(self.ring_capacity).split();
        let stream = Self::build_stream(format, producer)?;

        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);
        let samples_per_buffer = (format.buffer_size / 2).max(1);

        let delivery = std::thread::Builder::new()
            .name("stream-video-audio".into())
            .spawn(move || {
                let mut samples = vec![0i16; samples_per_buffer];
                let mut bytes = vec![0u8; samples_per_buffer * 2];
                let mut filled = 0;
                while running.load(Ordering::SeqCst) {
                    filled += consumer.pop_slice(&mut samples[filled..]);
                    if filled < samples_per_buffer {
                        std::thread::sleep(DELIVERY_POLL);
                        continue;
                    }
                    for (dst, sample) in bytes.chunks_exact_mut(2).zip(&samples) {
                        dst.copy_from_slice(&sample.to_le_bytes());
                    }
                    on_buffer(&bytes);
                    filled = 0;
                }
            })
            .map_err(|e| MediaError::new(ErrorCode::ThreadSpawn, e.to_string()))?;

        if let Err(e) = stream.play() {
            self.running.store(false, Ordering::SeqCst);
            let _ = delivery.join();
            return Err(backend_error("start input stream", e));
        }

        self.stream = Some(stream);
        self.delivery = Some(delivery);
        self.queued = format.buffer_count;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(delivery) = self.delivery.take() {
            let _ = delivery.join();
        }
        self.queued = 0;
    }

    fn queue_size(&self) -> usize {
        self.queued
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
