//! Recyclable frame buffers with metadata.

use std::fmt;

/// Kind of media carried by a [`FrameBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// One raw video image in the configured input pixel format.
    Video,
    /// One chunk of interleaved 16-bit PCM.
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// A fixed-capacity byte buffer holding one unit of captured media.
///
/// `FrameBuffer`s are allocated once when a stream is opened and then cycle
/// between their pool, a producer, the pending queue and the encode loop.
/// The payload is never reallocated: its capacity is fixed at creation and
/// only [`byte_size()`](Self::byte_size) changes as producers fill it.
///
/// # Example
///
/// ```
/// use stream_video::{FrameBuffer, MediaKind};
///
/// let mut frame = FrameBuffer::new(MediaKind::Audio, 4096);
/// frame.fill_from(&[1, 2, 3, 4]);
/// assert_eq!(frame.data(), &[1, 2, 3, 4]);
/// assert_eq!(frame.capacity(), 4096);
/// ```
pub struct FrameBuffer {
    pts: i64,
    size: usize,
    kind: MediaKind,
    data: Box<[u8]>,
}

impl FrameBuffer {
    /// Allocates a zeroed buffer of `capacity` bytes.
    pub fn new(kind: MediaKind, capacity: usize) -> Self {
        Self {
            pts: 0,
            size: 0,
            kind,
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    /// Media kind this buffer was allocated for.
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Presentation timestamp in milliseconds, relative to the first frame
    /// of the current run once the frame has been submitted.
    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub(crate) fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    /// Number of valid payload bytes.
    pub fn byte_size(&self) -> usize {
        self.size
    }

    /// Fixed payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Full writable payload. Call [`set_byte_size()`](Self::set_byte_size)
    /// after writing into it directly.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Marks the first `size` bytes as valid, clamped to the capacity.
    pub fn set_byte_size(&mut self, size: usize) {
        self.size = size.min(self.data.len());
    }

    /// Copies `src` into the buffer, truncating to capacity.
    ///
    /// Returns the number of bytes copied.
    pub fn fill_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.data.len());
        self.data[..n].copy_from_slice(&src[..n]);
        self.size = n;
        n
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("kind", &self.kind)
            .field("pts", &self.pts)
            .field("size", &self.size)
            .field("capacity", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_empty() {
        let frame = FrameBuffer::new(MediaKind::Video, 640 * 480 * 3 / 2);
        assert_eq!(frame.byte_size(), 0);
        assert_eq!(frame.capacity(), 460_800);
        assert!(frame.data().is_empty());
    }

    #[test]
    fn test_fill_truncates_to_capacity() {
        let mut frame = FrameBuffer::new(MediaKind::Audio, 4);
        let copied = frame.fill_from(&[9, 8, 7, 6, 5, 4]);
        assert_eq!(copied, 4);
        assert_eq!(frame.data(), &[9, 8, 7, 6]);
    }

    #[test]
    fn test_set_byte_size_clamped() {
        let mut frame = FrameBuffer::new(MediaKind::Video, 16);
        frame.data_mut()[..3].copy_from_slice(&[1, 2, 3]);
        frame.set_byte_size(3);
        assert_eq!(frame.data(), &[1, 2, 3]);

        frame.set_byte_size(100);
        assert_eq!(frame.byte_size(), 16);
    }

    #[test]
    fn test_media_kind_display() {
        assert_eq!(MediaKind::Video.to_string(), "video");
        assert_eq!(MediaKind::Audio.to_string(), "audio");
    }
}
