//! Fixed-capacity circular byte store.
//!
//! `RingBuffer` is plain data: it does no locking itself. The recorder wraps it in a single
//! `Mutex` so writes, snapshots and resets are mutually exclusive.

/// Circular byte buffer that overwrites its oldest bytes once full.
///
/// Invariants:
/// - `write_cursor < capacity` whenever `capacity > 0`
/// - `has_overflowed` is set exactly when the bytes written since the last reset reach
///   `capacity`, and only `reset` clears it
#[derive(Debug)]
pub struct RingBuffer {
    storage: Vec<u8>,
    write_cursor: usize,
    has_overflowed: bool,
}

impl RingBuffer {
    /// Wrap pre-allocated storage. Its length becomes the fixed capacity.
    pub fn from_storage(storage: Vec<u8>) -> Self {
        Self {
            storage,
            write_cursor: 0,
            has_overflowed: false,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_storage(vec![0; capacity])
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn write_cursor(&self) -> usize {
        self.write_cursor
    }

    pub fn has_overflowed(&self) -> bool {
        self.has_overflowed
    }

    /// Number of live bytes a snapshot would return.
    pub fn len(&self) -> usize {
        if self.has_overflowed {
            self.capacity()
        } else {
            self.write_cursor
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `chunk`, wrapping at the end of storage.
    pub fn write(&mut self, chunk: &[u8]) {
        let capacity = self.capacity();
        if capacity == 0 || chunk.is_empty() {
            return;
        }

        // Only the newest `capacity` bytes of an oversized chunk can survive.
        if chunk.len() >= capacity {
            let tail = &chunk[chunk.len() - capacity..];
            self.storage.copy_from_slice(tail);
            self.write_cursor = 0;
            self.has_overflowed = true;
            return;
        }

        let end = self.write_cursor + chunk.len();
        if end >= capacity {
            let first = capacity - self.write_cursor;
            let rest = chunk.len() - first;
            self.storage[self.write_cursor..].copy_from_slice(&chunk[..first]);
            self.storage[..rest].copy_from_slice(&chunk[first..]);
            self.write_cursor = rest;
            self.has_overflowed = true;
        } else {
            self.storage[self.write_cursor..end].copy_from_slice(chunk);
            self.write_cursor = end;
        }
    }

    /// All live bytes, oldest first.
    pub fn snapshot(&self) -> Vec<u8> {
        if !self.has_overflowed {
            return self.storage[..self.write_cursor].to_vec();
        }

        let mut out = Vec::with_capacity(self.capacity());
        out.extend_from_slice(&self.storage[self.write_cursor..]);
        out.extend_from_slice(&self.storage[..self.write_cursor]);
        out
    }

    /// The newest `max_bytes` live bytes (fewer if less is buffered), oldest first.
    pub fn snapshot_last(&self, max_bytes: usize) -> Vec<u8> {
        let take = max_bytes.min(self.len());
        let mut out = Vec::with_capacity(take);

        if take <= self.write_cursor {
            out.extend_from_slice(&self.storage[self.write_cursor - take..self.write_cursor]);
            return out;
        }

        // The requested range starts before the cursor's wrap point.
        let from_end = take - self.write_cursor;
        let capacity = self.capacity();
        out.extend_from_slice(&self.storage[capacity - from_end..]);
        out.extend_from_slice(&self.storage[..self.write_cursor]);
        out
    }

    /// Logically clear the buffer. Stored bytes are not wiped.
    pub fn reset(&mut self) {
        self.write_cursor = 0;
        self.has_overflowed = false;
    }
}
