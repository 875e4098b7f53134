//! Audio capture collaborator and the process-wide audio subsystem handle.
//!
//! An [`AudioDriver`] stands for a platform audio engine that must be
//! initialized once per process and shut down when nothing uses it any more.
//! [`AudioSubsystem`] wraps one driver in a reference count: every stream
//! run holds an [`AudioLease`] from `start()` until its worker exits, the
//! first lease initializes the driver and the last one shuts it down.
//!
//! Captures deliver filled PCM buffers through a [`BufferCallback`] on the
//! collaborator's own thread and take the buffer back for re-use as soon as
//! the callback returns.

#[cfg(feature = "device-audio")]
mod device;
/// In-memory audio driver producing a test tone.
pub mod mock;

#[cfg(feature = "device-audio")]
pub use device::{CpalDriver, DEFAULT_RING_CAPACITY};

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::MediaError;

/// Invoked with each filled capture buffer (interleaved signed 16-bit PCM).
///
/// Runs on the capture thread and must return promptly.
pub type BufferCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Buffer layout requested from a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Number of buffers cycled between the device and the callback.
    pub buffer_count: usize,
    /// Bytes per buffer.
    pub buffer_size: usize,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

/// One open capture device.
///
/// Created and driven by the stream worker thread only.
pub trait AudioCapture {
    /// Starts delivering buffers to `on_buffer`.
    fn start(&mut self, format: CaptureFormat, on_buffer: BufferCallback)
        -> Result<(), MediaError>;

    /// Stops delivery. No callback runs after this returns.
    fn stop(&mut self);

    /// Buffers currently queued for recording.
    fn queue_size(&self) -> usize;
}

/// A process-wide audio engine.
pub trait AudioDriver: Send + Sync {
    /// Brings the engine up. Called by the first [`AudioSubsystem::acquire()`].
    fn initialize(&self) -> Result<(), MediaError>;

    /// Tears the engine down. Called when the last [`AudioLease`] drops.
    fn shutdown(&self);

    /// Creates a capture on the default input.
    fn open_capture(&self) -> Result<Box<dyn AudioCapture>, MediaError>;
}

struct Shared {
    driver: Arc<dyn AudioDriver>,
    users: Mutex<usize>,
}

/// Reference-counted handle to one [`AudioDriver`].
///
/// Clones share the same count; hand one clone to every stream that may
/// capture audio.
#[derive(Clone)]
pub struct AudioSubsystem {
    shared: Arc<Shared>,
}

impl AudioSubsystem {
    /// Wraps `driver`. Nothing is initialized until the first
    /// [`acquire()`](Self::acquire).
    pub fn new(driver: Arc<dyn AudioDriver>) -> Self {
        Self {
            shared: Arc::new(Shared {
                driver,
                users: Mutex::new(0),
            }),
        }
    }

    /// Takes a usage reference, initializing the driver if this is the first.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when initialization fails; the count is
    /// left unchanged.
    pub fn acquire(&self) -> Result<AudioLease, MediaError> {
        let mut users = self.shared.users.lock();
        if *users == 0 {
            self.shared.driver.initialize()?;
            tracing::debug!("audio subsystem initialized");
        }
        *users += 1;
        Ok(AudioLease {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Number of outstanding leases.
    pub fn users(&self) -> usize {
        *self.shared.users.lock()
    }
}

impl fmt::Debug for AudioSubsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSubsystem")
            .field("users", &self.users())
            .finish_non_exhaustive()
    }
}

/// One usage reference on an [`AudioSubsystem`]. Dropping it releases the
/// reference.
pub struct AudioLease {
    shared: Arc<Shared>,
}

impl AudioLease {
    /// Creates a capture on the leased driver.
    pub fn open_capture(&self) -> Result<Box<dyn AudioCapture>, MediaError> {
        self.shared.driver.open_capture()
    }
}

impl fmt::Debug for AudioLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioLease").finish_non_exhaustive()
    }
}

impl Drop for AudioLease {
    fn drop(&mut self) {
        let mut users = self.shared.users.lock();
        *users = users.saturating_sub(1);
        if *users == 0 {
            self.shared.driver.shutdown();
            tracing::debug!("audio subsystem shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockAudioDriver;
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn test_first_acquire_initializes_last_release_shuts_down() {
        let driver = Arc::new(MockAudioDriver::new(0));
        let subsystem = AudioSubsystem::new(driver.clone());

        let a = subsystem.acquire().unwrap();
        let b = subsystem.clone().acquire().unwrap();
        assert_eq!(subsystem.users(), 2);
        assert_eq!(driver.initialize_count(), 1);

        drop(a);
        assert_eq!(driver.shutdown_count(), 0);
        drop(b);
        assert_eq!(driver.shutdown_count(), 1);
        assert_eq!(subsystem.users(), 0);

        let _again = subsystem.acquire().unwrap();
        assert_eq!(driver.initialize_count(), 2);
    }

    #[test]
    fn test_failed_initialize_leaves_count() {
        let driver = Arc::new(MockAudioDriver::new(0));
        driver.fail_initialize(ErrorCode::Unsupported);
        let subsystem = AudioSubsystem::new(driver.clone());

        let err = subsystem.acquire().unwrap_err();
        assert_eq!(err.code, ErrorCode::Unsupported);
        assert_eq!(subsystem.users(), 0);
        assert_eq!(driver.shutdown_count(), 0);
    }
}
