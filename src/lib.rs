//! # stream-video
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Live video/audio streaming engine with bounded frame pools and automatic
//! reconnect.
//!
//! `stream-video` accepts raw video frames (and optionally microphone
//! audio), timestamps them, and hands them to an encode/mux worker that
//! keeps a connection to a streaming server alive across network failures.
//! Encoding, muxing and the transport sit behind the [`codec::MediaBackend`]
//! trait; audio capture sits behind [`audio::AudioDriver`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stream_video::{codec::mock::MockBackend, OutputStream};
//!
//! let stream = OutputStream::builder()
//!     .server("rtmp://live.example.com/app/key")
//!     .geometry(640, 480)
//!     .on_state_change(|change| tracing::info!(state = %change.state, reason = ?change.reason, "stream"))
//!     .backend(Arc::new(MockBackend::new()))
//!     .open()?;
//!
//! stream.start()?;
//! let frame = vec![0u8; stream.video_frame_size()];
//! for _ in 0..100 {
//!     // Returns false when every buffer is in flight; the frame is dropped
//!     stream.push_video_sample(&frame);
//! }
//! println!("{:?}", stream.stats());
//! stream.stop();
//! # Ok::<(), stream_video::StreamError>(())
//! ```
//!
//! ## Architecture
//!
//! The crate keeps a strict thread boundary:
//!
//! - **Producers**: any thread; take a pooled buffer, fill it, submit it. Never blocks on the network
//! - **Worker Thread**: drains the pending queue into the encoder and muxer, reconnects on I/O failures
//! - **Audio Capture**: driver-owned thread feeding the audio pool through the same submit path
//!
//! Every buffer is allocated at open. When the encoder falls behind, new
//! samples are dropped instead of queueing without bound.

#![warn(missing_docs)]
// Media code requires intentional numeric casts between sample and size types
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod audio;
mod builder;
pub mod codec;
mod config;
mod error;
mod event;
mod frame;
mod pipeline;
mod stats;
mod stream;

pub use builder::OutputStreamBuilder;
pub use codec::PixelFormat;
pub use config::StreamConfig;
pub use error::{ErrorCode, MediaError, StreamError};
pub use event::{channel_listener, state_listener, StateChange, StateListener, StreamState};
pub use frame::{FrameBuffer, MediaKind};
pub use stats::StreamStats;
pub use stream::{BufferCensus, FrameLease, OutputStream};
