//! Stream engine internals.
//!
//! Producers and the worker meet at a single [`WaitLock`] holding the frame
//! pools, the pending queue, the connection state and the counters:
//!
//! ```text
//! producer ─acquire→ FramePool ─fill/submit→ PendingQueue ─pop→ worker
//!                       ↑                                         │
//!                       └──────────── release ────────────────────┘
//! ```
//!
//! - **Pool / PendingQueue**: fixed-capacity rings, allocated once per stream
//! - **Engine**: every field shared between threads, guarded by the one lock
//! - **Attempt**: one connect → encode → disconnect cycle
//! - **Worker**: runs attempts and decides between retry and termination
//!
//! Producers never wait on the condition variable; pool exhaustion drops
//! the sample.

mod attempt;
mod engine;
mod pool;
mod wait;
pub(crate) mod worker;

pub(crate) use engine::Shared;
pub(crate) use pool::{FramePool, PendingQueue};
pub(crate) use wait::WaitLock;
