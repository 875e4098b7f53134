//! State shared between the stream handle, producers and the worker.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, error, warn};

use super::{FramePool, PendingQueue, WaitLock};
use crate::audio::AudioSubsystem;
use crate::codec::{Interrupt, MediaBackend};
use crate::stats::{Counters, RateSampler};
use crate::{
    BufferCensus, ErrorCode, FrameBuffer, MediaKind, StateChange, StateListener, StreamConfig,
    StreamState,
};

/// Everything guarded by the stream lock.
pub(crate) struct Engine {
    pub state: StreamState,
    /// First failure of the current cycle. Cleared on entering `Starting`.
    pub reason: Option<ErrorCode>,
    pub interrupted: bool,
    pub video_pool: FramePool,
    pub audio_pool: FramePool,
    pub pending: PendingQueue,
    /// Capture time of the first frame submitted in this run.
    pub first_pts: Option<i64>,
    pub counters: Counters,
    pub sampler: RateSampler,
    pub dropped: u64,
    pub worker: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(config: &StreamConfig, now: Instant) -> Self {
        let audio_buffers = if config.audio_requested() {
            config.audio_buffers
        } else {
            0
        };

        Self {
            state: StreamState::Idle,
            reason: None,
            interrupted: false,
            video_pool: FramePool::new(
                MediaKind::Video,
                config.video_buffers,
                config.video_frame_size(),
            ),
            audio_pool: FramePool::new(MediaKind::Audio, audio_buffers, config.audio_buffer_size),
            pending: PendingQueue::new(config.video_buffers + audio_buffers),
            first_pts: None,
            counters: Counters::default(),
            sampler: RateSampler::new(now),
            dropped: 0,
            worker: None,
        }
    }

    fn pool_mut(&mut self, kind: MediaKind) -> &mut FramePool {
        match kind {
            MediaKind::Video => &mut self.video_pool,
            MediaKind::Audio => &mut self.audio_pool,
        }
    }

    /// Takes a free buffer, or records a dropped sample.
    pub fn acquire(&mut self, kind: MediaKind) -> Option<FrameBuffer> {
        let buffer = self.pool_mut(kind).acquire();
        if buffer.is_none() {
            self.dropped += 1;
            if self.dropped.is_power_of_two() {
                warn!(%kind, dropped = self.dropped, "frame pool exhausted, dropping sample");
            }
        }
        buffer
    }

    /// Stamps a filled buffer relative to the run's first frame and queues it.
    pub fn submit(&mut self, mut frame: FrameBuffer, capture_ms: i64) {
        let epoch = *self.first_pts.get_or_insert(capture_ms);
        frame.set_pts(capture_ms - epoch);

        self.counters.frames_read += 1;
        self.counters.bytes_read += frame.byte_size() as u64;

        if let Err(frame) = self.pending.push(frame) {
            // Unreachable while every buffer comes from this engine's pools
            error!(kind = %frame.kind(), "pending queue overflow");
            self.recycle(frame);
        }
    }

    /// Returns a buffer to the pool it came from.
    pub fn recycle(&mut self, frame: FrameBuffer) {
        let kind = frame.kind();
        if let Err(frame) = self.pool_mut(kind).release(frame) {
            error!(?frame, "buffer does not belong to this stream, discarding");
        }
    }

    /// Moves every pending frame back to its pool.
    pub fn drain_pending(&mut self) -> usize {
        let mut drained = 0;
        while let Some(frame) = self.pending.pop() {
            self.recycle(frame);
            drained += 1;
        }
        drained
    }

    /// Records `code` unless this cycle already has a reason.
    pub fn note_reason(&mut self, code: ErrorCode) {
        self.reason.get_or_insert(code);
    }

    /// Resets per-run bookkeeping for `Idle → Starting`.
    pub fn reset_run(&mut self, now: Instant) {
        self.interrupted = false;
        self.reason = None;
        self.first_pts = None;
        self.counters = Counters::default();
        self.sampler.reset(now);
        self.dropped = 0;
    }

    pub fn census(&self) -> BufferCensus {
        BufferCensus {
            free_video: self.video_pool.len(),
            free_audio: self.audio_pool.len(),
            pending: self.pending.len(),
            total: self.video_pool.capacity() + self.audio_pool.capacity(),
        }
    }
}

/// Stream-wide state referenced by the handle, the worker and capture
/// callbacks.
pub(crate) struct Shared {
    pub config: StreamConfig,
    pub backend: Arc<dyn MediaBackend>,
    pub listener: Option<StateListener>,
    pub audio: Option<AudioSubsystem>,
    pub engine: WaitLock<Engine>,
    clock: Instant,
}

impl Shared {
    pub fn new(
        config: StreamConfig,
        backend: Arc<dyn MediaBackend>,
        listener: Option<StateListener>,
        audio: Option<AudioSubsystem>,
    ) -> Self {
        let clock = Instant::now();
        Self {
            engine: WaitLock::new(Engine::new(&config, clock)),
            config,
            backend,
            listener,
            audio,
            clock,
        }
    }

    /// Milliseconds on the stream's monotonic clock.
    pub fn now_ms(&self) -> i64 {
        i64::try_from(self.clock.elapsed().as_millis()).unwrap_or(i64::MAX)
    }

    /// Enters `state`, notifies the listener and wakes every waiter.
    ///
    /// Must be called with the stream lock held.
    pub fn publish(&self, engine: &mut Engine, state: StreamState) {
        engine.state = state;
        debug!(%state, reason = ?engine.reason, "state change");

        if let Some(listener) = &self.listener {
            listener(StateChange {
                state,
                reason: engine.reason,
            });
        }
        self.engine.broadcast();
    }

    /// Re-enters `Starting` for a new attempt, clearing the sticky reason.
    pub fn enter_starting(&self, engine: &mut Engine) {
        engine.reason = None;
        self.publish(engine, StreamState::Starting);
    }

    /// Probe for blocking backend calls; fires once `stop()` was requested.
    pub fn interrupt(self: &Arc<Self>) -> Interrupt {
        let shared: Weak<Self> = Arc::downgrade(self);
        Interrupt::new(move || {
            shared
                .upgrade()
                .map_or(true, |shared| shared.engine.lock().interrupted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::mock::MockBackend;
    use parking_lot::Mutex;

    fn shared(config: StreamConfig, listener: Option<StateListener>) -> Arc<Shared> {
        Arc::new(Shared::new(
            config,
            Arc::new(MockBackend::new()),
            listener,
            None,
        ))
    }

    fn config() -> StreamConfig {
        StreamConfig {
            server: "tcp://x".into(),
            width: 4,
            height: 4,
            ..StreamConfig::default()
        }
    }

    #[test]
    fn test_submit_anchors_first_timestamp() {
        let shared = shared(config(), None);
        let mut engine = shared.engine.lock();

        for capture in [1000, 1040, 1040, 1100] {
            let mut frame = engine.acquire(MediaKind::Video).unwrap();
            frame.fill_from(&[0; 24]);
            engine.submit(frame, capture);
        }

        let pts: Vec<_> = std::iter::from_fn(|| engine.pending.pop())
            .map(|f| f.pts())
            .collect();
        assert_eq!(pts, vec![0, 40, 40, 100]);
        assert_eq!(engine.counters.frames_read, 4);
        assert_eq!(engine.counters.bytes_read, 4 * 24);
    }

    #[test]
    fn test_audio_pool_empty_without_audio() {
        let shared = shared(config(), None);
        let mut engine = shared.engine.lock();
        assert!(engine.acquire(MediaKind::Audio).is_none());
        assert_eq!(engine.census().total, 4);
        assert_eq!(engine.dropped, 1);
    }

    #[test]
    fn test_drain_pending_conserves_buffers() {
        let mut cfg = config();
        cfg.audio_codec = Some("aac".into());
        let shared = shared(cfg, None);
        let mut engine = shared.engine.lock();

        let video = engine.acquire(MediaKind::Video).unwrap();
        engine.submit(video, 0);
        let audio = engine.acquire(MediaKind::Audio).unwrap();
        engine.submit(audio, 1);

        let census = engine.census();
        assert_eq!(census.pending, 2);
        assert_eq!(census.free_video + census.free_audio + census.pending, 12);

        assert_eq!(engine.drain_pending(), 2);
        let census = engine.census();
        assert_eq!((census.free_video, census.free_audio, census.pending), (4, 8, 0));
    }

    #[test]
    fn test_reason_is_sticky_until_starting() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener = {
            let seen = Arc::clone(&seen);
            crate::state_listener(move |change| seen.lock().push(change))
        };
        let shared = shared(config(), Some(listener));
        let mut engine = shared.engine.lock();

        engine.note_reason(ErrorCode::ConnectionReset);
        engine.note_reason(ErrorCode::Aborted);
        shared.publish(&mut engine, StreamState::Paused);
        shared.enter_starting(&mut engine);

        let seen = seen.lock();
        assert_eq!(seen[0].reason, Some(ErrorCode::ConnectionReset));
        assert_eq!(seen[1].state, StreamState::Starting);
        assert_eq!(seen[1].reason, None);
    }

    #[test]
    fn test_interrupt_reads_flag() {
        let shared = shared(config(), None);
        let interrupt = shared.interrupt();
        assert!(!interrupt.is_interrupted());
        shared.engine.lock().interrupted = true;
        assert!(interrupt.is_interrupted());
    }
}
