//! Error types for stream-video.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`StreamError`]): Prevent a stream from being opened or started
//! - **Status codes** ([`ErrorCode`]): Terminal status of a connection attempt,
//!   surfaced as the sticky reason of a [`StateChange`](crate::StateChange)

/// Fatal errors returned synchronously by [`OutputStream::open()`] and
/// [`OutputStream::start()`].
///
/// Runtime failures (network faults, encoder errors) never surface here; they
/// drive the connection state machine and show up as the reason code of the
/// state change that follows.
///
/// [`OutputStream::open()`]: crate::OutputStream::open
/// [`OutputStream::start()`]: crate::OutputStream::start
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Frame geometry is too small to encode.
    #[error("invalid frame geometry {width}x{height} (both sides must be at least 2)")]
    InvalidGeometry {
        /// Configured frame width.
        width: u32,
        /// Configured frame height.
        height: u32,
    },

    /// No server target was configured.
    #[error("no server target configured")]
    MissingServer,

    /// A frame pool was configured with zero buffers.
    #[error("frame pool for {kind} must hold at least one buffer")]
    InvalidBufferCount {
        /// Which pool was misconfigured.
        kind: crate::MediaKind,
    },

    /// Audio encoding was requested with unusable capture parameters.
    #[error("invalid audio configuration: {reason}")]
    InvalidAudioConfig {
        /// What is wrong with the audio settings.
        reason: String,
    },

    /// The builder was asked to open a stream without a codec/mux backend.
    #[error("no media backend configured - call backend() before open()")]
    MissingBackend,

    /// `start()` was called while a run is already in progress.
    #[error("stream already active (state: {state})")]
    AlreadyActive {
        /// State observed when the request was rejected.
        state: crate::StreamState,
    },

    /// The worker thread could not be spawned.
    #[error("failed to spawn stream worker: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

/// Opaque status code of a failed media operation.
///
/// The engine never inspects these beyond [`is_io_error()`](Self::is_io_error):
/// I/O-class codes trigger a reconnect after the backoff window, everything
/// else terminates the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorCode {
    /// The remote end refused the connection.
    #[error("connection refused")]
    ConnectionRefused,
    /// The connection was reset by the peer.
    #[error("connection reset by peer")]
    ConnectionReset,
    /// The connection was aborted.
    #[error("connection aborted")]
    ConnectionAborted,
    /// A network operation timed out.
    #[error("connection timed out")]
    TimedOut,
    /// Write on a closed connection.
    #[error("broken pipe")]
    BrokenPipe,
    /// No route to the target network.
    #[error("network is unreachable")]
    NetworkUnreachable,
    /// The local network is down.
    #[error("network is down")]
    NetworkDown,
    /// The network dropped the connection on reset.
    #[error("network dropped connection on reset")]
    NetworkReset,
    /// The remote side reported an I/O failure.
    #[error("remote I/O error")]
    RemoteIo,
    /// Generic input/output failure.
    #[error("input/output error")]
    Io,

    /// The operation was interrupted by a stop request.
    #[error("operation aborted by stop request")]
    Aborted,
    /// A parameter or option value was rejected.
    #[error("invalid argument")]
    InvalidArgument,
    /// The requested container format is unknown.
    #[error("muxer not found")]
    MuxerNotFound,
    /// The requested encoder is unknown.
    #[error("encoder not found")]
    EncoderNotFound,
    /// An allocation failed.
    #[error("out of memory")]
    OutOfMemory,
    /// The backend does not support the requested operation.
    #[error("operation not supported")]
    Unsupported,
    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread")]
    ThreadSpawn,
    /// Any other backend failure.
    #[error("media backend failure")]
    Backend,
}

impl ErrorCode {
    /// Returns `true` for transient network/remote faults that are retried
    /// after the reconnect backoff.
    pub fn is_io_error(self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused
                | Self::ConnectionReset
                | Self::ConnectionAborted
                | Self::TimedOut
                | Self::BrokenPipe
                | Self::NetworkUnreachable
                | Self::NetworkDown
                | Self::NetworkReset
                | Self::RemoteIo
                | Self::Io
        )
    }
}

impl From<std::io::ErrorKind> for ErrorCode {
    fn from(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind;

        match kind {
            ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            ErrorKind::ConnectionReset => Self::ConnectionReset,
            ErrorKind::ConnectionAborted => Self::ConnectionAborted,
            ErrorKind::TimedOut => Self::TimedOut,
            ErrorKind::BrokenPipe => Self::BrokenPipe,
            ErrorKind::NotConnected | ErrorKind::UnexpectedEof | ErrorKind::WriteZero => Self::Io,
            ErrorKind::Interrupted => Self::Aborted,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => Self::InvalidArgument,
            ErrorKind::OutOfMemory => Self::OutOfMemory,
            ErrorKind::Unsupported => Self::Unsupported,
            _ => Self::Backend,
        }
    }
}

/// Error returned by the codec/mux and audio capture collaborators.
///
/// Carries the status [`ErrorCode`] the state machine acts on, plus a
/// human-readable context for logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}: {code}")]
pub struct MediaError {
    /// Status code driving the retry decision.
    pub code: ErrorCode,
    /// What the collaborator was doing when it failed.
    pub message: String,
}

impl MediaError {
    /// Creates a media error with the given code and context message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` if the underlying code is I/O-class.
    pub fn is_io_error(&self) -> bool {
        self.code.is_io_error()
    }
}

impl From<std::io::Error> for MediaError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.kind().into(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_class_is_closed_set() {
        let io = [
            ErrorCode::ConnectionRefused,
            ErrorCode::ConnectionReset,
            ErrorCode::ConnectionAborted,
            ErrorCode::TimedOut,
            ErrorCode::BrokenPipe,
            ErrorCode::NetworkUnreachable,
            ErrorCode::NetworkDown,
            ErrorCode::NetworkReset,
            ErrorCode::RemoteIo,
            ErrorCode::Io,
        ];
        for code in io {
            assert!(code.is_io_error(), "{code:?} should be I/O-class");
        }

        let fatal = [
            ErrorCode::Aborted,
            ErrorCode::InvalidArgument,
            ErrorCode::MuxerNotFound,
            ErrorCode::EncoderNotFound,
            ErrorCode::OutOfMemory,
            ErrorCode::Unsupported,
            ErrorCode::ThreadSpawn,
            ErrorCode::Backend,
        ];
        for code in fatal {
            assert!(!code.is_io_error(), "{code:?} should be fatal");
        }
    }

    #[test]
    fn test_from_io_error_kind() {
        assert_eq!(
            ErrorCode::from(std::io::ErrorKind::ConnectionReset),
            ErrorCode::ConnectionReset
        );
        assert_eq!(
            ErrorCode::from(std::io::ErrorKind::BrokenPipe),
            ErrorCode::BrokenPipe
        );
        assert_eq!(
            ErrorCode::from(std::io::ErrorKind::PermissionDenied),
            ErrorCode::Backend
        );
    }

    #[test]
    fn test_media_error_display() {
        let err = MediaError::new(ErrorCode::ConnectionRefused, "open rtmp://host/live");
        assert_eq!(err.to_string(), "open rtmp://host/live: connection refused");
        assert!(err.is_io_error());
    }

    #[test]
    fn test_media_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline");
        let err = MediaError::from(io_err);
        assert_eq!(err.code, ErrorCode::TimedOut);
    }

    #[test]
    fn test_stream_error_display() {
        let err = StreamError::InvalidGeometry {
            width: 1,
            height: 480,
        };
        assert_eq!(
            err.to_string(),
            "invalid frame geometry 1x480 (both sides must be at least 2)"
        );
    }
}
