//! Mock audio driver for testing without hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use super::{AudioCapture, AudioDriver, BufferCallback, CaptureFormat};
use crate::{ErrorCode, MediaError};

#[derive(Default)]
struct Counters {
    initialized: AtomicUsize,
    shut_down: AtomicUsize,
    opened: AtomicUsize,
    delivered: AtomicUsize,
}

/// An [`AudioDriver`] whose captures synthesize a 440 Hz tone on their own
/// thread.
///
/// Each started capture delivers `buffers` buffers, one per `interval`, then
/// idles until stopped.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stream_video::audio::{mock::MockAudioDriver, AudioSubsystem};
///
/// let driver = Arc::new(MockAudioDriver::new(16));
/// let audio = AudioSubsystem::new(driver.clone());
/// let lease = audio.acquire().unwrap();
/// drop(lease);
/// assert_eq!(driver.shutdown_count(), 1);
/// ```
pub struct MockAudioDriver {
    buffers: usize,
    interval: Mutex<Duration>,
    init_error: Mutex<Option<ErrorCode>>,
    counters: Arc<Counters>,
}

impl MockAudioDriver {
    /// Creates a driver whose captures keep `buffers` buffers in flight.
    pub fn new(buffers: usize) -> Self {
        Self {
            buffers,
            interval: Mutex::new(Duration::from_millis(1)),
            init_error: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Delay between delivered buffers.
    pub fn set_interval(&self, interval: Duration) {
        *self.interval.lock() = interval;
    }

    /// Makes [`AudioDriver::initialize()`] fail with `code`.
    pub fn fail_initialize(&self, code: ErrorCode) {
        *self.init_error.lock() = Some(code);
    }

    /// Calls to `initialize()`, successful or not.
    pub fn initialize_count(&self) -> usize {
        self.counters.initialized.load(Ordering::SeqCst)
    }

    /// Calls to `shutdown()`.
    pub fn shutdown_count(&self) -> usize {
        self.counters.shut_down.load(Ordering::SeqCst)
    }

    /// Captures opened so far.
    pub fn captures_opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Buffers handed to capture callbacks so far.
    pub fn buffers_delivered(&self) -> usize {
        self.counters.delivered.load(Ordering::SeqCst)
    }
}

impl AudioDriver for MockAudioDriver {
    fn initialize(&self) -> Result<(), MediaError> {
        if let Some(code) = *self.init_error.lock() {
            return Err(MediaError::new(code, "initialize mock audio"));
        }
        self.counters.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) {
        self.counters.shut_down.fetch_add(1, Ordering::SeqCst);
    }

    fn open_capture(&self) -> Result<Box<dyn AudioCapture>, MediaError> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockCapture {
            buffers: self.buffers,
            interval: *self.interval.lock(),
            counters: Arc::clone(&self.counters),
            running: Arc::new(AtomicBool::new(false)),
            queued: 0,
            thread: None,
        }))
    }
}

struct MockCapture {
    buffers: usize,
    interval: Duration,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    queued: usize,
    thread: Option<JoinHandle<()>>,
}

impl AudioCapture for MockCapture {
    fn start(
        &mut self,
        format: CaptureFormat,
        mut on_buffer: BufferCallback,
    ) -> Result<(), MediaError> {
        if self.thread.is_some() {
            return Err(MediaError::new(ErrorCode::InvalidArgument, "capture already started"));
        }
        if format.buffer_count == 0 || format.buffer_size == 0 {
            return Err(MediaError::new(ErrorCode::InvalidArgument, "empty capture buffers"));
        }

        let running = Arc::clone(&self.running);
        let counters = Arc::clone(&self.counters);
        let total = self.buffers;
        let interval = self.interval;
        running.store(true, Ordering::SeqCst);

        let thread = std::thread::Builder::new()
            .name("mock-audio-capture".into())
            .spawn(move || {
                let mut pool = vec![vec![0u8; format.buffer_size]; format.buffer_count];
                let mut phase = 0u64;
                let mut sent = 0;
                while running.load(Ordering::SeqCst) {
                    if sent < total {
                        let buffer = &mut pool[sent % format.buffer_count];
                        fill_tone(buffer, format.sample_rate, format.channels, &mut phase);
                        on_buffer(buffer);
                        counters.delivered.fetch_add(1, Ordering::SeqCst);
                        sent += 1;
                    }
                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| MediaError::new(ErrorCode::ThreadSpawn, e.to_string()))?;

        self.queued = format.buffer_count;
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.queued = 0;
    }

    fn queue_size(&self) -> usize {
        self.queued
    }
}

impl Drop for MockCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fills `buffer` with a 440 Hz sine as little-endian i16 samples.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn fill_tone(buffer: &mut [u8], sample_rate: u32, channels: u16, phase: &mut u64) {
    let channels = usize::from(channels.max(1));
    let rate = f64::from(sample_rate.max(1));
    for frame in buffer.chunks_exact_mut(2 * channels) {
        let t = *phase as f64 / rate;
        let sample = ((2.0 * std::f64::consts::PI * 440.0 * t).sin() * 16_383.0) as i16;
        for channel in frame.chunks_exact_mut(2) {
            channel.copy_from_slice(&sample.to_le_bytes());
        }
        *phase += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn format() -> CaptureFormat {
        CaptureFormat {
            buffer_count: 2,
            buffer_size: 64,
            sample_rate: 16_000,
            channels: 1,
        }
    }

    #[test]
    fn test_capture_delivers_requested_buffers() {
        let driver = MockAudioDriver::new(5);
        let mut capture = driver.open_capture().unwrap();
        let (tx, rx) = mpsc::channel();

        capture
            .start(
                format(),
                Box::new(move |buf: &[u8]| {
                    let _ = tx.send(buf.len());
                }),
            )
            .unwrap();
        assert_eq!(capture.queue_size(), 2);

        for _ in 0..5 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 64);
        }
        capture.stop();
        assert_eq!(capture.queue_size(), 0);
        assert_eq!(driver.buffers_delivered(), 5);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_tone_is_not_silent() {
        let mut buffer = vec![0u8; 256];
        let mut phase = 0;
        fill_tone(&mut buffer, 16_000, 2, &mut phase);
        assert_eq!(phase, 64);
        assert!(buffer.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_rejects_empty_buffers() {
        let driver = MockAudioDriver::new(1);
        let mut capture = driver.open_capture().unwrap();
        let format = CaptureFormat {
            buffer_size: 0,
            ..format()
        };
        assert!(capture.start(format, Box::new(|_| {})).is_err());
    }
}
