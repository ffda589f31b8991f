//! Fixed-capacity byte ring
//!
//! `read == write` is both "empty" and "full"; the `full` flag tells them
//! apart. Every transfer splits into at most two copies: up to the end of
//! the buffer, then from its start.

pub struct RingBuffer {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
    full: bool,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
            full: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        if self.full {
            self.capacity()
        } else {
            (self.write + self.capacity() - self.read) % self.capacity()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write && !self.full
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Free space in bytes
    pub fn space(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Appends as much of `data` as fits, returning the count
    pub fn write(&mut self, data: &[u8]) -> usize {
        if data.is_empty() || self.full {
            return 0;
        }

        let capacity = self.capacity();
        let mut written;
        if self.read > self.write {
            written = data.len().min(self.read - self.write);
            self.buf[self.write..self.write + written].copy_from_slice(&data[..written]);
        } else {
            written = data.len().min(capacity - self.write);
            self.buf[self.write..self.write + written].copy_from_slice(&data[..written]);

            if written < data.len() && self.read > 0 {
                let wrapped = (data.len() - written).min(self.read);
                self.buf[..wrapped].copy_from_slice(&data[written..written + wrapped]);
                written += wrapped;
            }
        }

        self.write = (self.write + written) % capacity;
        if self.write == self.read {
            self.full = true;
        }
        written
    }

    /// Removes up to `max` bytes from the front
    pub fn read(&mut self, max: usize) -> Vec<u8> {
        if max == 0 || self.is_empty() {
            return Vec::new();
        }

        let capacity = self.capacity();
        let mut out;
        if self.write > self.read {
            let count = max.min(self.write - self.read);
            out = self.buf[self.read..self.read + count].to_vec();
        } else {
            let count = max.min(capacity - self.read);
            out = self.buf[self.read..self.read + count].to_vec();

            if count < max && self.write > 0 {
                let wrapped = (max - count).min(self.write);
                out.extend_from_slice(&self.buf[..wrapped]);
            }
        }

        self.read = (self.read + out.len()) % capacity;
        self.full = false;
        out
    }
}
