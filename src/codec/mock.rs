//! In-memory media backend for testing without codec libraries or a server.
//!
//! [`MockBackend`] resolves a fixed set of formats and encoders, "encodes"
//! by copying converted frames into packets, and records everything the
//! engine does to it. Failures can be scripted per stage.
//!
//! # Example
//!
//! ```
//! use stream_video::codec::mock::MockBackend;
//! use stream_video::ErrorCode;
//!
//! let backend = MockBackend::new();
//! backend.fail_connect(2, ErrorCode::ConnectionRefused);
//! assert_eq!(backend.connect_attempts(), 0);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{
    ConversionSpec, Encoder, EncoderInfo, EncoderParams, FormatInfo, FrameConverter, Interrupt,
    MediaBackend, MuxOutput, Packet, PixelFormat, Rational, SUPPORTED_FORMATS,
};
use crate::{ErrorCode, MediaError, MediaKind};

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// A packet as it reached the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPacket {
    /// Track index the packet was written to.
    pub track: usize,
    /// Presentation timestamp in the track time base.
    pub pts: i64,
    /// Decode timestamp in the track time base.
    pub dts: i64,
    /// Payload size in bytes.
    pub size: usize,
    /// Whether the packet went through the interleaving write.
    pub interleaved: bool,
    /// Zero-based connection the packet was written on.
    pub connection: usize,
}

/// An encoder opened by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedEncoder {
    /// Encoder as found by the engine.
    pub info: EncoderInfo,
    /// Parameters it was opened with.
    pub params: EncoderParams,
}

#[derive(Default)]
struct Script {
    connect_failures: usize,
    connect_error: Option<ErrorCode>,
    block_connect: bool,
    header_error: Option<ErrorCode>,
    trailer_error: Option<ErrorCode>,
    write_failure: Option<(usize, ErrorCode)>,
    encoder_error: Option<ErrorCode>,
    track_time_base: Option<Rational>,
    encoder_delay: usize,
}

#[derive(Default)]
struct Record {
    targets: Vec<(String, String)>,
    conversions: Vec<ConversionSpec>,
    encoders: Vec<OpenedEncoder>,
    connect_attempts: usize,
    connections: usize,
    headers: usize,
    trailers: usize,
    packets: Vec<WrittenPacket>,
    frames_encoded: usize,
}

struct State {
    formats: Vec<String>,
    encoders: Vec<EncoderInfo>,
    script: Script,
    record: Record,
}

impl Default for State {
    fn default() -> Self {
        let video = |name: &str, formats: &[PixelFormat]| EncoderInfo {
            name: name.into(),
            kind: MediaKind::Video,
            pixel_formats: formats.to_vec(),
        };
        let audio = |name: &str| EncoderInfo {
            name: name.into(),
            kind: MediaKind::Audio,
            pixel_formats: Vec::new(),
        };

        Self {
            formats: SUPPORTED_FORMATS.iter().map(|&f| f.to_owned()).collect(),
            encoders: vec![
                video("libx264", &[PixelFormat::Yuv420p, PixelFormat::Nv12]),
                video("mpeg4", &[PixelFormat::Yuv420p]),
                video("mjpeg", &[PixelFormat::Yuv420p]),
                video("rawvideo", &[]),
                audio("aac"),
                audio("libopus"),
                audio("pcm_s16le"),
            ],
            script: Script::default(),
            record: Record::default(),
        }
    }
}

/// Scriptable, recording [`MediaBackend`].
///
/// Clones share state, so a test keeps one clone for inspection and hands
/// another to the stream.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    /// Creates a backend that knows the supported container formats plus
    /// `libx264`, `mpeg4`, `mjpeg`, `rawvideo`, `aac`, `libopus` and
    /// `pcm_s16le`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an extra encoder.
    pub fn add_encoder(&self, info: EncoderInfo) {
        self.state.lock().encoders.push(info);
    }

    /// Makes an encoder unresolvable.
    pub fn remove_encoder(&self, name: &str) {
        self.state.lock().encoders.retain(|e| e.name != name);
    }

    /// The next `times` connects fail with `code`.
    pub fn fail_connect(&self, times: usize, code: ErrorCode) {
        let mut state = self.state.lock();
        state.script.connect_failures = times;
        state.script.connect_error = Some(code);
    }

    /// Every connect fails with `code` until [`clear_failures()`](Self::clear_failures).
    pub fn fail_connect_always(&self, code: ErrorCode) {
        self.fail_connect(usize::MAX, code);
    }

    /// Connect blocks until the engine interrupts it, then fails with
    /// [`ErrorCode::Aborted`].
    pub fn block_connect(&self) {
        self.state.lock().script.block_connect = true;
    }

    /// Header writes fail with `code`.
    pub fn fail_header(&self, code: ErrorCode) {
        self.state.lock().script.header_error = Some(code);
    }

    /// Trailer writes fail with `code`.
    pub fn fail_trailer(&self, code: ErrorCode) {
        self.state.lock().script.trailer_error = Some(code);
    }

    /// On every connection, the packet write after `after` successful
    /// writes fails with `code`.
    pub fn fail_write_after(&self, after: usize, code: ErrorCode) {
        self.state.lock().script.write_failure = Some((after, code));
    }

    /// Opening any encoder fails with `code`.
    pub fn fail_encoder_open(&self, code: ErrorCode) {
        self.state.lock().script.encoder_error = Some(code);
    }

    /// Tracks use `time_base` instead of their encoder's time base.
    pub fn set_track_time_base(&self, time_base: Rational) {
        self.state.lock().script.track_time_base = Some(time_base);
    }

    /// Encoders swallow their first `frames` inputs before producing packets.
    pub fn set_encoder_delay(&self, frames: usize) {
        self.state.lock().script.encoder_delay = frames;
    }

    /// Removes every scripted failure.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        let script = &mut state.script;
        script.connect_failures = 0;
        script.connect_error = None;
        script.block_connect = false;
        script.header_error = None;
        script.trailer_error = None;
        script.write_failure = None;
        script.encoder_error = None;
    }

    /// `(format, target)` of every output opened.
    pub fn targets(&self) -> Vec<(String, String)> {
        self.state.lock().record.targets.clone()
    }

    /// Every converter opened, oldest first.
    pub fn conversions(&self) -> Vec<ConversionSpec> {
        self.state.lock().record.conversions.clone()
    }

    /// Every encoder opened, oldest first.
    pub fn opened_encoders(&self) -> Vec<OpenedEncoder> {
        self.state.lock().record.encoders.clone()
    }

    /// Calls to `connect()`, including failed ones.
    pub fn connect_attempts(&self) -> usize {
        self.state.lock().record.connect_attempts
    }

    /// Headers written successfully.
    pub fn headers_written(&self) -> usize {
        self.state.lock().record.headers
    }

    /// Trailers written successfully.
    pub fn trailers_written(&self) -> usize {
        self.state.lock().record.trailers
    }

    /// Frames handed to any encoder.
    pub fn frames_encoded(&self) -> usize {
        self.state.lock().record.frames_encoded
    }

    /// Every packet written, in write order.
    pub fn packets(&self) -> Vec<WrittenPacket> {
        self.state.lock().record.packets.clone()
    }

    /// Polls until at least `count` packets were written or `timeout` elapses.
    pub fn wait_for_packets(&self, count: usize, timeout: Duration) -> bool {
        self.poll_until(timeout, |record| record.packets.len() >= count)
    }

    /// Polls until at least `count` connects were attempted or `timeout` elapses.
    pub fn wait_for_connect_attempts(&self, count: usize, timeout: Duration) -> bool {
        self.poll_until(timeout, |record| record.connect_attempts >= count)
    }

    fn poll_until(&self, timeout: Duration, done: impl Fn(&Record) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.state.lock().record) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl MediaBackend for MockBackend {
    fn find_format(&self, name: &str) -> Option<FormatInfo> {
        self.state
            .lock()
            .formats
            .iter()
            .any(|f| f == name)
            .then(|| FormatInfo { name: name.into() })
    }

    fn find_encoder(&self, kind: MediaKind, name: &str) -> Option<EncoderInfo> {
        self.state
            .lock()
            .encoders
            .iter()
            .find(|e| e.kind == kind && e.name == name)
            .cloned()
    }

    fn open_converter(&self, spec: &ConversionSpec) -> Result<Box<dyn FrameConverter>, MediaError> {
        self.state.lock().record.conversions.push(*spec);
        Ok(Box::new(MockConverter {
            output: vec![0; spec.output.frame_size(spec.width, spec.height)],
        }))
    }

    fn open_encoder(
        &self,
        encoder: &EncoderInfo,
        params: &EncoderParams,
    ) -> Result<Box<dyn Encoder>, MediaError> {
        let mut state = self.state.lock();
        if let Some(code) = state.script.encoder_error {
            return Err(MediaError::new(code, format!("open encoder {}", encoder.name)));
        }
        state.record.encoders.push(OpenedEncoder {
            info: encoder.clone(),
            params: params.clone(),
        });

        Ok(Box::new(MockEncoder {
            state: Arc::clone(&self.state),
            time_base: params.time_base,
            gop_size: match params.format {
                super::TrackFormat::Video { gop_size, .. } => gop_size.max(1) as usize,
                super::TrackFormat::Audio { .. } => 1,
            },
            delay: state.script.encoder_delay,
            frames: 0,
        }))
    }

    fn open_output(
        &self,
        format: &FormatInfo,
        target: &str,
        interrupt: Interrupt,
    ) -> Result<Box<dyn MuxOutput>, MediaError> {
        self.state
            .lock()
            .record
            .targets
            .push((format.name.clone(), target.to_owned()));

        Ok(Box::new(MockOutput {
            state: Arc::clone(&self.state),
            interrupt,
            tracks: Vec::new(),
            connection: None,
            written: 0,
        }))
    }
}

struct MockConverter {
    output: Vec<u8>,
}

impl FrameConverter for MockConverter {
    fn convert(&mut self, input: &[u8]) -> Result<&[u8], MediaError> {
        let n = input.len().min(self.output.len());
        self.output[..n].copy_from_slice(&input[..n]);
        Ok(&self.output)
    }
}

struct MockEncoder {
    state: Arc<Mutex<State>>,
    time_base: Rational,
    gop_size: usize,
    delay: usize,
    frames: usize,
}

impl Encoder for MockEncoder {
    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn encode(&mut self, data: &[u8], pts: i64) -> Result<Option<Packet>, MediaError> {
        let index = self.frames;
        self.frames += 1;
        self.state.lock().record.frames_encoded += 1;

        if index < self.delay {
            return Ok(None);
        }
        Ok(Some(Packet {
            data: data.to_vec(),
            pts,
            dts: pts,
            key: (index - self.delay) % self.gop_size == 0,
        }))
    }
}

struct MockOutput {
    state: Arc<Mutex<State>>,
    interrupt: Interrupt,
    tracks: Vec<Rational>,
    connection: Option<usize>,
    written: usize,
}

impl MockOutput {
    fn write(&mut self, track: usize, packet: &Packet, interleaved: bool) -> Result<(), MediaError> {
        let Some(connection) = self.connection else {
            return Err(MediaError::new(ErrorCode::Io, "write on unconnected output"));
        };
        if track >= self.tracks.len() {
            return Err(MediaError::new(
                ErrorCode::InvalidArgument,
                format!("no track {track}"),
            ));
        }

        let mut state = self.state.lock();
        if let Some((after, code)) = state.script.write_failure {
            if self.written >= after {
                return Err(MediaError::new(code, "write packet"));
            }
        }
        self.written += 1;
        state.record.packets.push(WrittenPacket {
            track,
            pts: packet.pts,
            dts: packet.dts,
            size: packet.data.len(),
            interleaved,
            connection,
        });
        Ok(())
    }
}

impl MuxOutput for MockOutput {
    fn add_track(
        &mut self,
        _encoder: &EncoderInfo,
        params: &EncoderParams,
    ) -> Result<usize, MediaError> {
        let time_base = self
            .state
            .lock()
            .script
            .track_time_base
            .unwrap_or(params.time_base);
        self.tracks.push(time_base);
        Ok(self.tracks.len() - 1)
    }

    fn track_time_base(&self, track: usize) -> Rational {
        self.tracks.get(track).copied().unwrap_or(Rational::MILLIS)
    }

    fn connect(&mut self) -> Result<(), MediaError> {
        let blocking = {
            let mut state = self.state.lock();
            state.record.connect_attempts += 1;

            if state.script.connect_failures > 0 {
                if let Some(code) = state.script.connect_error {
                    if state.script.connect_failures != usize::MAX {
                        state.script.connect_failures -= 1;
                    }
                    return Err(MediaError::new(code, "connect"));
                }
            }
            state.script.block_connect
        };

        if blocking {
            while !self.interrupt.is_interrupted() {
                std::thread::sleep(POLL_INTERVAL);
            }
            return Err(MediaError::new(ErrorCode::Aborted, "connect interrupted"));
        }

        let mut state = self.state.lock();
        self.connection = Some(state.record.connections);
        state.record.connections += 1;
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        if let Some(code) = state.script.header_error {
            return Err(MediaError::new(code, "write header"));
        }
        state.record.headers += 1;
        Ok(())
    }

    fn write_packet(&mut self, track: usize, packet: &Packet) -> Result<(), MediaError> {
        self.write(track, packet, false)
    }

    fn write_interleaved(&mut self, track: usize, packet: &Packet) -> Result<(), MediaError> {
        self.write(track, packet, true)
    }

    fn write_trailer(&mut self) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        if let Some(code) = state.script.trailer_error {
            return Err(MediaError::new(code, "write trailer"));
        }
        state.record.trailers += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecOptions, TrackFormat};

    fn video_params() -> EncoderParams {
        EncoderParams {
            time_base: Rational::MILLIS,
            bit_rate: 128_000,
            quality: Some(50),
            options: CodecOptions::new(),
            format: TrackFormat::Video {
                width: 4,
                height: 2,
                pixel_format: PixelFormat::Yuv420p,
                gop_size: 2,
                qmin: 1,
                qmax: 32,
            },
        }
    }

    #[test]
    fn test_resolves_known_names() {
        let backend = MockBackend::new();
        assert!(backend.find_format("flv").is_some());
        assert!(backend.find_format("mp4").is_none());
        assert!(backend.find_encoder(MediaKind::Video, "libx264").is_some());
        assert!(backend.find_encoder(MediaKind::Video, "aac").is_none());
        assert!(backend.find_encoder(MediaKind::Audio, "aac").is_some());

        backend.remove_encoder("libx264");
        assert!(backend.find_encoder(MediaKind::Video, "libx264").is_none());
    }

    #[test]
    fn test_scripted_connect_failures() {
        let backend = MockBackend::new();
        backend.fail_connect(2, ErrorCode::ConnectionRefused);
        let format = backend.find_format("flv").unwrap();

        for _ in 0..2 {
            let mut output = backend
                .open_output(&format, "rtmp://x", Interrupt::never())
                .unwrap();
            assert_eq!(
                output.connect().unwrap_err().code,
                ErrorCode::ConnectionRefused
            );
        }
        let mut output = backend
            .open_output(&format, "rtmp://x", Interrupt::never())
            .unwrap();
        assert!(output.connect().is_ok());
        assert_eq!(backend.connect_attempts(), 3);
    }

    #[test]
    fn test_encode_and_write_records_packets() {
        let backend = MockBackend::new();
        let info = backend.find_encoder(MediaKind::Video, "libx264").unwrap();
        let params = video_params();
        let mut encoder = backend.open_encoder(&info, &params).unwrap();

        let format = backend.find_format("matroska").unwrap();
        let mut output = backend
            .open_output(&format, "tcp://x", Interrupt::never())
            .unwrap();
        let track = output.add_track(&info, &params).unwrap();
        output.connect().unwrap();
        output.write_header().unwrap();

        for pts in [0, 40, 80] {
            let packet = encoder.encode(&[1, 2, 3], pts).unwrap().unwrap();
            output.write_packet(track, &packet).unwrap();
        }
        output.write_trailer().unwrap();

        let packets = backend.packets();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2].pts, 80);
        assert!(packets.iter().all(|p| !p.interleaved && p.size == 3));
        assert_eq!(backend.headers_written(), 1);
        assert_eq!(backend.trailers_written(), 1);
    }

    #[test]
    fn test_write_failure_after_count() {
        let backend = MockBackend::new();
        backend.fail_write_after(1, ErrorCode::BrokenPipe);
        let info = backend.find_encoder(MediaKind::Video, "libx264").unwrap();
        let format = backend.find_format("flv").unwrap();
        let mut output = backend
            .open_output(&format, "rtmp://x", Interrupt::never())
            .unwrap();
        let track = output.add_track(&info, &video_params()).unwrap();
        output.connect().unwrap();

        let packet = Packet {
            data: vec![0],
            pts: 0,
            dts: 0,
            key: true,
        };
        assert!(output.write_interleaved(track, &packet).is_ok());
        assert_eq!(
            output.write_interleaved(track, &packet).unwrap_err().code,
            ErrorCode::BrokenPipe
        );
    }

    #[test]
    fn test_blocking_connect_honors_interrupt() {
        let backend = MockBackend::new();
        backend.block_connect();
        let format = backend.find_format("flv").unwrap();
        let started = Instant::now();
        let interrupt = Interrupt::new(move || started.elapsed() > Duration::from_millis(20));
        let mut output = backend.open_output(&format, "rtmp://x", interrupt).unwrap();
        assert_eq!(output.connect().unwrap_err().code, ErrorCode::Aborted);
    }

    #[test]
    fn test_encoder_delay() {
        let backend = MockBackend::new();
        backend.set_encoder_delay(2);
        let info = backend.find_encoder(MediaKind::Video, "mpeg4").unwrap();
        let mut encoder = backend.open_encoder(&info, &video_params()).unwrap();
        assert!(encoder.encode(&[0], 0).unwrap().is_none());
        assert!(encoder.encode(&[0], 1).unwrap().is_none());
        let packet = encoder.encode(&[0], 2).unwrap().unwrap();
        assert!(packet.key);
        assert_eq!(backend.frames_encoded(), 3);
    }
}
