//! Mock streaming example.
//!
//! Streams a synthetic test pattern plus a mock microphone tone through the
//! in-memory backend, drops the connection once to show the reconnect, and
//! prints throughput every second.
//!
//! Run with: RUST_LOG=stream_video=debug cargo run --example mock_stream

use std::sync::Arc;
use std::time::Duration;

use stream_video::audio::{mock::MockAudioDriver, AudioSubsystem};
use stream_video::codec::mock::MockBackend;
use stream_video::{channel_listener, ErrorCode, OutputStream, StreamState};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const FPS: u64 = 25;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let backend = MockBackend::new();
    let driver = Arc::new(MockAudioDriver::new(usize::MAX));
    driver.set_interval(Duration::from_millis(46));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stream = OutputStream::builder()
        .server("rtmp://localhost/live/demo")
        .format("flv")
        .geometry(WIDTH, HEIGHT)
        .audio_codec("aac")
        .audio(AudioSubsystem::new(driver))
        .reconnect_backoff(Duration::from_millis(500))
        .listener(channel_listener(tx))
        .backend(Arc::new(backend.clone()))
        .open()?;

    tokio::spawn(async move {
        while let Some(change) = rx.recv().await {
            println!("state: {} (reason: {:?})", change.state, change.reason);
        }
    });

    stream.start()?;

    let mut frame = vec![0u8; stream.video_frame_size()];
    let mut ticker = tokio::time::interval(Duration::from_millis(1000 / FPS));
    for n in 0..(FPS * 6) {
        ticker.tick().await;
        // Moving luma gradient, neutral chroma
        let luma = (WIDTH * HEIGHT) as usize;
        for (i, px) in frame[..luma].iter_mut().enumerate() {
            *px = (i as u64 + n * 4) as u8;
        }
        frame[luma..].fill(0x80);

        if !stream.push_video_sample(&frame) {
            println!("frame {n} dropped");
        }

        if n == FPS * 2 {
            println!("simulating a dropped connection");
            backend.fail_write_after(0, ErrorCode::ConnectionReset);
        }
        if n == FPS * 3 {
            backend.clear_failures();
        }
        if n % FPS == 0 {
            println!("{:?}", stream.stats());
        }
    }

    stream.stop();
    assert_eq!(stream.state(), StreamState::Idle);
    println!(
        "packets written: {}, connections: {}",
        backend.packets().len(),
        backend.headers_written()
    );

    Ok(())
}
