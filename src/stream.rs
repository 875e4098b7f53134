//! Output stream handle and producer-side frame leases.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::audio::AudioSubsystem;
use crate::builder::OutputStreamBuilder;
use crate::codec::MediaBackend;
use crate::pipeline::{worker, Shared};
use crate::{
    ErrorCode, FrameBuffer, MediaKind, StateListener, StreamConfig, StreamError, StreamState,
    StreamStats,
};

/// Where every frame buffer of a stream currently sits.
///
/// Outside of buffers leased to producers or held by the encode loop,
/// `free_video + free_audio + pending == total` at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCensus {
    /// Buffers in the video pool.
    pub free_video: usize,
    /// Buffers in the audio pool.
    pub free_audio: usize,
    /// Buffers submitted and not yet encoded.
    pub pending: usize,
    /// Buffers allocated at open.
    pub total: usize,
}

impl BufferCensus {
    /// Buffers currently accounted for by the pools and the pending queue.
    pub fn accounted(&self) -> usize {
        self.free_video + self.free_audio + self.pending
    }
}

/// A live output stream.
///
/// Owns the frame pools, the worker thread and the connection state
/// machine. All methods take `&self` and may be called from any thread,
/// concurrently with the worker.
///
/// # Lifecycle
///
/// 1. [`open()`](Self::open) (or [`builder()`](Self::builder)) validates the
///    configuration and allocates every frame buffer
/// 2. [`start()`](Self::start) spawns the worker, which connects, encodes
///    and reconnects after I/O failures on its own
/// 3. Producers feed frames with [`push_video_sample()`](Self::push_video_sample)
///    or [`acquire()`](Self::acquire) + [`FrameLease::submit()`]
/// 4. [`stop()`](Self::stop) interrupts the worker and returns once it is idle
/// 5. Dropping the stream stops it and joins the worker
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stream_video::{codec::mock::MockBackend, OutputStream, StreamState};
///
/// let stream = OutputStream::builder()
///     .server("tcp://127.0.0.1:5000")
///     .geometry(320, 240)
///     .backend(Arc::new(MockBackend::new()))
///     .open()
///     .unwrap();
///
/// stream.start().unwrap();
/// stream.push_video_sample(&vec![0u8; stream.video_frame_size()]);
/// stream.stop();
/// assert_eq!(stream.state(), StreamState::Idle);
/// ```
pub struct OutputStream {
    shared: Arc<Shared>,
}

impl OutputStream {
    /// Creates a builder.
    pub fn builder() -> OutputStreamBuilder {
        OutputStreamBuilder::new()
    }

    /// Validates `config` and allocates the frame pools. The stream starts
    /// [`Idle`](StreamState::Idle).
    ///
    /// # Errors
    ///
    /// Any configuration problem found by [`StreamConfig::validate()`], or
    /// [`StreamError::InvalidAudioConfig`] when audio is requested without
    /// an [`AudioSubsystem`].
    pub fn open(
        config: StreamConfig,
        backend: Arc<dyn MediaBackend>,
        listener: Option<StateListener>,
        audio: Option<AudioSubsystem>,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        if config.audio_requested() && audio.is_none() {
            return Err(StreamError::InvalidAudioConfig {
                reason: "an audio encoder is configured but no audio subsystem was provided"
                    .into(),
            });
        }

        let shared = Arc::new(Shared::new(config, backend, listener, audio));
        debug!(
            server = %shared.config.server,
            buffers = shared.engine.lock().census().total,
            frame_size = shared.config.video_frame_size(),
            "stream opened"
        );
        Ok(Self { shared })
    }

    /// Starts a new run: `Idle → Starting`, then spawns the worker.
    ///
    /// Counters, the timestamp epoch, the reason code and the interrupted
    /// flag are reset. Frames left pending from before are recycled.
    ///
    /// # Errors
    ///
    /// [`StreamError::AlreadyActive`] unless idle, or
    /// [`StreamError::ThreadSpawn`] if the worker could not be spawned (the
    /// stream is back in `Idle` with reason [`ErrorCode::ThreadSpawn`]).
    pub fn start(&self) -> Result<(), StreamError> {
        let shared = &self.shared;
        let mut engine = shared.engine.lock();

        if engine.state != StreamState::Idle {
            return Err(StreamError::AlreadyActive {
                state: engine.state,
            });
        }
        // A worker that ended on its own has already released the lock
        // for good, so joining here cannot deadlock.
        if let Some(previous) = engine.worker.take() {
            let _ = previous.join();
        }

        engine.reset_run(Instant::now());
        engine.drain_pending();
        shared.publish(&mut engine, StreamState::Starting);

        let worker_shared = Arc::clone(shared);
        let spawned = std::thread::Builder::new()
            .name("stream-video-worker".into())
            .spawn(move || worker::run(worker_shared));

        match spawned {
            Ok(handle) => {
                engine.worker = Some(handle);
                info!(server = %shared.config.server, "stream started");
                Ok(())
            }
            Err(err) => {
                engine.note_reason(ErrorCode::ThreadSpawn);
                shared.publish(&mut engine, StreamState::Idle);
                Err(StreamError::ThreadSpawn(err))
            }
        }
    }

    /// Interrupts the current run and blocks until the stream is idle and
    /// the worker has exited.
    ///
    /// Blocked connects and writes are aborted through the backend's
    /// [`Interrupt`](crate::codec::Interrupt). Returns immediately when
    /// already idle. Must not be called from a [`StateListener`].
    pub fn stop(&self) {
        let shared = &self.shared;
        let mut engine = shared.engine.lock();

        engine.interrupted = true;
        while engine.state != StreamState::Idle {
            shared.engine.broadcast();
            shared.engine.wait(&mut engine, None);
        }
        let worker = engine.worker.take();
        drop(engine);

        if let Some(worker) = worker {
            let _ = worker.join();
            info!(server = %shared.config.server, "stream stopped");
        }
    }

    /// Stops the stream and releases it.
    pub fn close(self) {
        drop(self);
    }

    /// Current connection state.
    pub fn state(&self) -> StreamState {
        self.shared.engine.lock().state
    }

    /// First failure of the current disconnect cycle, if any.
    pub fn reason(&self) -> Option<ErrorCode> {
        self.shared.engine.lock().reason
    }

    /// Configuration the stream was opened with.
    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    /// Bytes of one raw video frame.
    pub fn video_frame_size(&self) -> usize {
        self.shared.config.video_frame_size()
    }

    /// Where every buffer currently sits.
    pub fn buffer_census(&self) -> BufferCensus {
        self.shared.engine.lock().census()
    }

    /// Samples dropped because a pool was exhausted during this run.
    pub fn dropped_samples(&self) -> u64 {
        self.shared.engine.lock().dropped
    }

    /// Milliseconds on the stream's monotonic clock; the default capture
    /// time of [`push_video_sample()`](Self::push_video_sample) and audio.
    pub fn clock_ms(&self) -> i64 {
        self.shared.now_ms()
    }

    /// Leases a free buffer of `kind` without blocking.
    ///
    /// Returns `None` when the pool is exhausted; the caller drops the
    /// sample.
    pub fn acquire(&self, kind: MediaKind) -> Option<FrameLease<'_>> {
        let buffer = self.shared.engine.lock().acquire(kind)?;
        Some(FrameLease {
            shared: &self.shared,
            buffer: Some(buffer),
        })
    }

    /// Copies one raw video frame into a pooled buffer and submits it,
    /// stamped with [`clock_ms()`](Self::clock_ms).
    ///
    /// `data` must be exactly [`video_frame_size()`](Self::video_frame_size)
    /// bytes. Returns `false` if the frame was rejected or dropped.
    pub fn push_video_sample(&self, data: &[u8]) -> bool {
        self.push_video_sample_at(data, self.shared.now_ms())
    }

    /// Like [`push_video_sample()`](Self::push_video_sample) with an explicit
    /// capture time in milliseconds.
    pub fn push_video_sample_at(&self, data: &[u8], capture_time_ms: i64) -> bool {
        let expected = self.video_frame_size();
        if data.len() != expected {
            debug!(len = data.len(), expected, "Rejected video sample of wrong size");
            return false;
        }
        let Some(mut lease) = self.acquire(MediaKind::Video) else {
            return false;
        };
        lease.fill_from(data);
        lease.submit(capture_time_ms);
        true
    }

    /// Counters and the rates since the previous call.
    pub fn stats(&self) -> StreamStats {
        let mut engine = self.shared.engine.lock();
        let counters = engine.counters;
        let state = engine.state;
        engine.sampler.sample(counters, state, Instant::now())
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // try_lock: a listener formatting the stream runs under the lock
        let state = self.shared.engine.try_lock().map(|engine| engine.state);
        f.debug_struct("OutputStream")
            .field("server", &self.shared.config.server)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Exclusive producer loan of one pooled buffer.
///
/// Fill it through `DerefMut<Target = FrameBuffer>`, then
/// [`submit()`](Self::submit) it. Dropping an unsubmitted lease returns the
/// buffer to its pool.
pub struct FrameLease<'a> {
    shared: &'a Arc<Shared>,
    buffer: Option<FrameBuffer>,
}

impl FrameLease<'_> {
    /// Queues the buffer for encoding with a capture time in milliseconds.
    ///
    /// The first frame submitted in a run becomes timestamp zero.
    pub fn submit(mut self, capture_time_ms: i64) {
        if let Some(buffer) = self.buffer.take() {
            let mut engine = self.shared.engine.lock();
            engine.submit(buffer, capture_time_ms);
            self.shared.engine.broadcast();
        }
    }
}

impl Deref for FrameLease<'_> {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        // Only `submit()` and `drop()` take the buffer, and both consume the lease
        self.buffer.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for FrameLease<'_> {
    fn deref_mut(&mut self) -> &mut FrameBuffer {
        self.buffer.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for FrameLease<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.shared.engine.lock().recycle(buffer);
        }
    }
}

impl fmt::Debug for FrameLease<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameLease")
            .field("buffer", &self.buffer)
            .finish()
    }
}
