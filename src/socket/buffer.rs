//! Bookkeeping for the socket source's buffer ring.
//!
//! Buffers are not literally pooled and recycled — each read allocates a
//! fresh `Vec<u8>`, which is simpler and just as correct since ownership
//! of a delivered buffer moves downstream and never comes back. What the
//! ring actually bounds is concurrency: at most `capacity` reads may be
//! outstanding (read from the kernel but not yet acknowledged downstream)
//! at once, and that count is what back-pressure narrows to zero.

/// One buffer's worth of bytes, 4 KiB by default.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Four buffers in flight by default, per the concrete scenarios.
pub const DEFAULT_RING_SIZE: usize = 4;

/// Tracks how many of `capacity` buffer slots are currently checked out.
pub struct BufferRing {
    buffer_size: usize,
    capacity: usize,
    in_flight: usize,
}

impl BufferRing {
    pub fn new(capacity: usize, buffer_size: usize) -> BufferRing {
        BufferRing { buffer_size, capacity, in_flight: 0 }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// True if another buffer may be leased for a read.
    pub fn has_writable_slot(&self) -> bool {
        self.in_flight < self.capacity
    }

    /// Checks out one slot and returns a fresh buffer to read into.
    pub fn lease(&mut self) -> Vec<u8> {
        debug_assert!(self.has_writable_slot());
        self.in_flight += 1;
        vec![0u8; self.buffer_size]
    }

    /// Releases up to `n` outstanding slots, returning how many were
    /// actually released.
    pub fn release(&mut self, n: usize) -> usize {
        let released = n.min(self.in_flight);
        self.in_flight -= released;
        released
    }
}

impl Default for BufferRing {
    fn default() -> Self {
        BufferRing::new(DEFAULT_RING_SIZE, DEFAULT_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn capacity_bounds_in_flight_reads() {
        let mut ring = BufferRing::new(2, 16);
        assert!(ring.has_writable_slot());
        ring.lease();
        assert!(ring.has_writable_slot());
        ring.lease();
        assert!(!ring.has_writable_slot());

        assert_eq!(ring.release(1), 1);
        assert!(ring.has_writable_slot());
    }

    #[test]
    fn release_never_goes_negative() {
        let mut ring = BufferRing::new(4, 16);
        ring.lease();
        assert_eq!(ring.release(10), 1);
        assert_eq!(ring.release(10), 0);
    }
}
