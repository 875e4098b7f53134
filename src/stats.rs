//! Stream throughput counters and rate sampling.

use std::time::Instant;

use crate::StreamState;

/// Monotonic throughput counters of one stream run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub frames_read: u64,
    pub frames_sent: u64,
    pub bytes_read: u64,
    pub bytes_sent: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Rates {
    input_fps: u64,
    output_fps: u64,
    input_bitrate: u64,
    output_bitrate: u64,
}

/// Derives short-interval rates from [`Counters`] between two samples.
///
/// Each sample stores the counters it saw as the baseline for the next one.
/// A sample taken in the same millisecond as the previous one keeps the
/// previous rates instead of dividing by zero.
#[derive(Debug)]
pub(crate) struct RateSampler {
    timer: Instant,
    marks: Counters,
    rates: Rates,
}

impl RateSampler {
    pub fn new(now: Instant) -> Self {
        Self {
            timer: now,
            marks: Counters::default(),
            rates: Rates::default(),
        }
    }

    /// Clears the baseline and rates for a new run.
    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }

    pub fn sample(&mut self, counters: Counters, state: StreamState, now: Instant) -> StreamStats {
        let elapsed_ms =
            u64::try_from(now.saturating_duration_since(self.timer).as_millis()).unwrap_or(u64::MAX);

        if elapsed_ms > 0 {
            let per_sec = |now: u64, mark: u64, scale: u64| {
                now.saturating_sub(mark).saturating_mul(scale) / elapsed_ms
            };
            self.rates = Rates {
                input_fps: per_sec(counters.frames_read, self.marks.frames_read, 1000),
                output_fps: per_sec(counters.frames_sent, self.marks.frames_sent, 1000),
                input_bitrate: per_sec(counters.bytes_read, self.marks.bytes_read, 8000),
                output_bitrate: per_sec(counters.bytes_sent, self.marks.bytes_sent, 8000),
            };
        }

        if now > self.timer {
            self.timer = now;
        }
        self.marks = counters;

        StreamStats {
            state,
            frames_read: counters.frames_read,
            frames_sent: counters.frames_sent,
            bytes_read: counters.bytes_read,
            bytes_sent: counters.bytes_sent,
            input_fps: self.rates.input_fps,
            output_fps: self.rates.output_fps,
            input_bitrate: self.rates.input_bitrate,
            output_bitrate: self.rates.output_bitrate,
        }
    }
}

/// Point-in-time statistics returned by [`OutputStream::stats()`](crate::OutputStream::stats).
///
/// Rates cover the interval since the previous `stats()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// Connection state when the snapshot was taken.
    pub state: StreamState,
    /// Frames submitted since the run started.
    pub frames_read: u64,
    /// Packets written since the run started.
    pub frames_sent: u64,
    /// Bytes submitted since the run started.
    pub bytes_read: u64,
    /// Packet bytes written since the run started.
    pub bytes_sent: u64,
    /// Submitted frames per second.
    pub input_fps: u64,
    /// Written packets per second.
    pub output_fps: u64,
    /// Submitted bits per second.
    pub input_bitrate: u64,
    /// Written bits per second.
    pub output_bitrate: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn counters(frames: u64, bytes: u64) -> Counters {
        Counters {
            frames_read: frames,
            frames_sent: frames / 2,
            bytes_read: bytes,
            bytes_sent: bytes / 4,
        }
    }

    #[test]
    fn test_rates_over_interval() {
        let t0 = Instant::now();
        let mut sampler = RateSampler::new(t0);

        let stats = sampler.sample(
            counters(50, 100_000),
            StreamState::Established,
            t0 + Duration::from_secs(2),
        );
        assert_eq!(stats.input_fps, 25);
        assert_eq!(stats.output_fps, 12);
        assert_eq!(stats.input_bitrate, 400_000);
        assert_eq!(stats.output_bitrate, 100_000);
        assert_eq!(stats.frames_read, 50);
    }

    #[test]
    fn test_zero_elapsed_keeps_previous_rates() {
        let t0 = Instant::now();
        let mut sampler = RateSampler::new(t0);
        let t1 = t0 + Duration::from_secs(1);

        let first = sampler.sample(counters(30, 3000), StreamState::Established, t1);
        let second = sampler.sample(counters(60, 6000), StreamState::Established, t1);

        assert_eq!(second.input_fps, first.input_fps);
        assert_eq!(second.output_bitrate, first.output_bitrate);
        assert_eq!(second.frames_read, 60);
    }

    #[test]
    fn test_baseline_moves_every_sample() {
        let t0 = Instant::now();
        let mut sampler = RateSampler::new(t0);
        let t1 = t0 + Duration::from_secs(1);
        let t2 = t1 + Duration::from_secs(1);

        sampler.sample(counters(10, 0), StreamState::Established, t1);
        let stats = sampler.sample(counters(15, 0), StreamState::Established, t2);
        assert_eq!(stats.input_fps, 5);
    }

    #[test]
    fn test_reset_clears_rates() {
        let t0 = Instant::now();
        let mut sampler = RateSampler::new(t0);
        sampler.sample(counters(10, 10), StreamState::Established, t0 + Duration::from_secs(1));

        let t1 = t0 + Duration::from_secs(5);
        sampler.reset(t1);
        let stats = sampler.sample(Counters::default(), StreamState::Starting, t1);
        assert_eq!(stats.input_fps, 0);
        assert_eq!(stats.input_bitrate, 0);
    }
}
