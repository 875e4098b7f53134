//! Worker thread driver: runs attempts and applies the retry policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::{attempt, Shared};
use crate::audio::AudioLease;
use crate::{MediaError, StreamState};

/// Upper bound of one wait slice during the reconnect backoff.
const BACKOFF_SLICE: Duration = Duration::from_millis(500);

/// Worker thread entry point.
///
/// `Starting` was already published by `start()`; the worker publishes it
/// again only when re-entering after a backoff. Ends by publishing `Idle`.
pub(crate) fn run(shared: Arc<Shared>) {
    info!(server = %shared.config.server, "stream worker started");

    let lease = acquire_audio(&shared);
    let status = match &lease {
        Ok(lease) => drive(&shared, lease.as_ref()),
        Err(err) => Err(err.clone()),
    };
    drop(lease);

    let mut engine = shared.engine.lock();
    if let Err(err) = &status {
        engine.note_reason(err.code);
    }
    shared.publish(&mut engine, StreamState::Idle);
    info!(
        interrupted = engine.interrupted,
        reason = ?engine.reason,
        "stream worker exited"
    );
}

fn acquire_audio(shared: &Shared) -> Result<Option<AudioLease>, MediaError> {
    if !shared.config.audio_requested() {
        return Ok(None);
    }
    shared.audio.as_ref().map(|audio| audio.acquire()).transpose()
}

/// Runs attempts until a fatal status or interruption.
fn drive(shared: &Arc<Shared>, audio: Option<&AudioLease>) -> Result<(), MediaError> {
    let mut first = true;
    loop {
        {
            let mut engine = shared.engine.lock();
            if engine.interrupted {
                return Ok(());
            }
            if !first {
                shared.enter_starting(&mut engine);
            }
        }
        first = false;

        let status = attempt::run(shared, audio);

        let mut engine = shared.engine.lock();
        if engine.interrupted {
            return status;
        }
        match status {
            Err(err) if err.is_io_error() => {
                shared.publish(&mut engine, StreamState::Paused);
                let backoff = shared.config.reconnect_backoff;
                warn!(error = %err, backoff_ms = backoff.as_millis(), "reconnecting after backoff");

                let deadline = Instant::now() + backoff;
                while !engine.interrupted {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    shared
                        .engine
                        .wait(&mut engine, Some((deadline - now).min(BACKOFF_SLICE)));
                }
            }
            Err(err) => return Err(err),
            Ok(()) => {}
        }
    }
}
