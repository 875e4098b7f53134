//! Connection state and state-change notifications.
//!
//! Every transition of a stream's connection state machine is published to
//! a [`StateListener`] together with the sticky reason code of the current
//! disconnect cycle. Listeners run on the publishing thread while the stream
//! lock is held, so they must return quickly and must not call back into the
//! stream.

use std::fmt;
use std::sync::Arc;

use crate::ErrorCode;

/// Connection state of an [`OutputStream`](crate::OutputStream).
///
/// ```text
/// idle → starting → connecting → established → disconnecting
///            ↑                                       │
///            └──────────── paused ←─────── (I/O error)┤
///                                                    └→ idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamState {
    /// No worker is running.
    #[default]
    Idle,
    /// A connection attempt is being prepared.
    Starting,
    /// Formats and encoders are resolved; the connection is being opened.
    Connecting,
    /// The header was written and frames are flowing.
    Established,
    /// The attempt is ending and its resources are being closed.
    Disconnecting,
    /// Waiting out the reconnect backoff after an I/O failure.
    Paused,
}

impl StreamState {
    /// Stable integer code (`idle = 0` .. `paused = 5`).
    pub fn as_code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Starting => 1,
            Self::Connecting => 2,
            Self::Established => 3,
            Self::Disconnecting => 4,
            Self::Paused => 5,
        }
    }

    /// Inverse of [`as_code()`](Self::as_code).
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Connecting,
            3 => Self::Established,
            4 => Self::Disconnecting,
            5 => Self::Paused,
            _ => return None,
        })
    }

    /// Returns `true` for every state except [`Idle`](Self::Idle).
    pub fn is_active(self) -> bool {
        self != Self::Idle
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Connecting => "connecting",
            Self::Established => "established",
            Self::Disconnecting => "disconnecting",
            Self::Paused => "paused",
        })
    }
}

/// One published transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State entered.
    pub state: StreamState,
    /// First failure of the current disconnect cycle, if any.
    pub reason: Option<ErrorCode>,
}

/// Callback type for receiving state transitions.
///
/// # Example
///
/// ```
/// use stream_video::{state_listener, StreamState};
///
/// let listener = state_listener(|change| {
///     if change.state == StreamState::Paused {
///         eprintln!("connection lost: {:?}", change.reason);
///     }
/// });
/// ```
pub type StateListener = Arc<dyn Fn(StateChange) + Send + Sync>;

/// Creates a [`StateListener`] from a closure.
pub fn state_listener<F>(f: F) -> StateListener
where
    F: Fn(StateChange) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Creates a [`StateListener`] that forwards every transition into a tokio
/// channel.
///
/// The unbounded sender never blocks the publishing thread. Transitions
/// published after the receiver is dropped are discarded.
pub fn channel_listener(tx: tokio::sync::mpsc::UnboundedSender<StateChange>) -> StateListener {
    Arc::new(move |change| {
        let _ = tx.send(change);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_state_codes_round_trip() {
        for code in 0..=5 {
            let state = StreamState::from_code(code).unwrap();
            assert_eq!(state.as_code(), code);
        }
        assert_eq!(StreamState::from_code(6), None);
        assert_eq!(StreamState::Paused.as_code(), 5);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(StreamState::Established.to_string(), "established");
        assert!(!StreamState::Idle.is_active());
        assert!(StreamState::Paused.is_active());
    }

    #[test]
    fn test_state_listener_helper() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let listener = state_listener(move |change| {
            assert_eq!(change.state, StreamState::Starting);
            called_clone.store(true, Ordering::SeqCst);
        });

        listener(StateChange {
            state: StreamState::Starting,
            reason: None,
        });
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_channel_listener_forwards() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let listener = channel_listener(tx);

        listener(StateChange {
            state: StreamState::Paused,
            reason: Some(ErrorCode::ConnectionReset),
        });

        let change = rx.recv().await.unwrap();
        assert_eq!(change.state, StreamState::Paused);
        assert_eq!(change.reason, Some(ErrorCode::ConnectionReset));
    }

    #[test]
    fn test_channel_listener_after_receiver_dropped() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        channel_listener(tx)(StateChange {
            state: StreamState::Idle,
            reason: None,
        });
    }
}
