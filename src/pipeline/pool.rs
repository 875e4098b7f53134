//! Bounded frame pools and the pending frame queue.
//!
//! Both are built on [`Ring`], an index-based circular buffer over a single
//! pre-sized slot array. Nothing here locks: the stream engine only touches
//! these structures while holding its [`WaitLock`](super::WaitLock).

use crate::{FrameBuffer, MediaKind};

/// Fixed-capacity FIFO ring.
///
/// Slots are allocated once; `push` and `pop` move values in and out in O(1)
/// and never grow the storage.
pub(crate) struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    len: usize,
}

impl<T> Ring<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = std::iter::repeat_with(|| None)
            .take(capacity)
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Appends at the tail. Hands the item back if the ring is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.slots.len();
        self.len += 1;
        Ok(())
    }

    /// Removes the item at the head, if any.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        item
    }

    #[cfg(test)]
    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            self.slots[self.head].as_ref()
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Free list of recyclable buffers of one media kind.
///
/// `acquire()` on an exhausted pool is not an error: the caller drops the
/// sample. This is the only backpressure producers ever see.
pub(crate) struct FramePool {
    kind: MediaKind,
    free: Ring<FrameBuffer>,
}

impl FramePool {
    /// Allocates `capacity` buffers of `item_size` bytes each.
    pub fn new(kind: MediaKind, capacity: usize, item_size: usize) -> Self {
        let mut free = Ring::with_capacity(capacity);
        for _ in 0..capacity {
            // Cannot fail: exactly `capacity` pushes into an empty ring.
            let _ = free.push(FrameBuffer::new(kind, item_size));
        }
        Self { kind, free }
    }

    pub fn acquire(&mut self) -> Option<FrameBuffer> {
        self.free.pop()
    }

    /// Returns a buffer to the pool, resetting its metadata.
    ///
    /// Fails (handing the buffer back) on a kind mismatch or a full pool;
    /// both indicate a buffer that never came from this pool.
    pub fn release(&mut self, mut buffer: FrameBuffer) -> Result<(), FrameBuffer> {
        if buffer.kind() != self.kind {
            return Err(buffer);
        }
        buffer.set_pts(0);
        buffer.set_byte_size(0);
        self.free.push(buffer)
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    #[cfg(test)]
    pub fn is_full(&self) -> bool {
        self.free.is_full()
    }
}

/// Ordered queue of submitted frames awaiting the encode loop.
///
/// Its capacity equals the total number of buffers in circulation, so a push
/// of a pool-issued buffer cannot overflow.
pub(crate) struct PendingQueue {
    frames: Ring<FrameBuffer>,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Ring::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, frame: FrameBuffer) -> Result<(), FrameBuffer> {
        self.frames.push(frame)
    }

    pub fn pop(&mut self) -> Option<FrameBuffer> {
        self.frames.pop()
    }

    #[cfg(test)]
    pub fn peek(&self) -> Option<&FrameBuffer> {
        self.frames.peek()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_fifo_and_wraparound() {
        let mut ring = Ring::with_capacity(3);
        assert!(ring.push(1).is_ok());
        assert!(ring.push(2).is_ok());
        assert_eq!(ring.pop(), Some(1));
        assert!(ring.push(3).is_ok());
        assert!(ring.push(4).is_ok());
        assert!(ring.is_full());
        assert_eq!(ring.push(5), Err(5));

        assert_eq!(ring.peek(), Some(&2));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(4));
        assert_eq!(ring.pop(), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_pool_exhaustion_and_release() {
        for capacity in 1..=8 {
            let mut pool = FramePool::new(MediaKind::Video, capacity, 16);
            let mut taken = Vec::new();
            for _ in 0..capacity {
                taken.push(pool.acquire().unwrap());
            }
            assert!(pool.acquire().is_none(), "capacity {capacity}");

            pool.release(taken.pop().unwrap()).unwrap();
            assert!(pool.acquire().is_some());
            assert!(pool.acquire().is_none());
        }
    }

    #[test]
    fn test_pool_release_resets_metadata() {
        let mut pool = FramePool::new(MediaKind::Audio, 1, 8);
        let mut buffer = pool.acquire().unwrap();
        buffer.fill_from(&[1, 2, 3]);
        buffer.set_pts(42);
        pool.release(buffer).unwrap();

        let buffer = pool.acquire().unwrap();
        assert_eq!(buffer.pts(), 0);
        assert_eq!(buffer.byte_size(), 0);
        assert_eq!(buffer.capacity(), 8);
    }

    #[test]
    fn test_pool_rejects_foreign_kind() {
        let mut pool = FramePool::new(MediaKind::Video, 2, 8);
        let stray = FrameBuffer::new(MediaKind::Audio, 8);
        assert!(pool.release(stray).is_err());
    }

    #[test]
    fn test_pool_rejects_overfill() {
        let mut pool = FramePool::new(MediaKind::Video, 1, 8);
        assert!(pool.is_full());
        assert!(pool.release(FrameBuffer::new(MediaKind::Video, 8)).is_err());
    }

    #[test]
    fn test_pending_queue_order_across_kinds() {
        let mut queue = PendingQueue::new(4);
        for (i, kind) in [MediaKind::Video, MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .enumerate()
        {
            let mut frame = FrameBuffer::new(kind, 4);
            frame.set_pts(i as i64);
            queue.push(frame).unwrap();
        }

        assert_eq!(queue.peek().map(FrameBuffer::kind), Some(MediaKind::Video));
        let order: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|f| (f.kind(), f.pts()))
            .collect();
        assert_eq!(
            order,
            vec![
                (MediaKind::Video, 0),
                (MediaKind::Audio, 1),
                (MediaKind::Video, 2)
            ]
        );
    }
}
