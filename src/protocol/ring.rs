//! Fixed-capacity circular byte buffer.

/// Circular byte store used as the parser's reassembly substrate.
///
/// Appending past capacity overwrites the oldest bytes. Reads are split into
/// at most two borrowed slices so nothing is copied on the hot path.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    /// Read cursor.
    head: usize,
    len: usize,
}

impl RingBuffer {
    /// Creates a buffer holding at most `capacity` bytes.
    ///
    /// A zero capacity is bumped to one byte.
    pub fn new(capacity: usize) -> Self {
        Self { buf: vec![0u8; capacity.max(1)].into_boxed_slice(), head: 0, len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes that can be appended without overwriting.
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Appends `bytes`, returning how many buffered bytes were overwritten.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let cap = self.capacity();
        // Only the tail of an oversized chunk can survive.
        let (bytes, mut dropped) = if bytes.len() > cap {
            (&bytes[bytes.len() - cap..], self.len + (bytes.len() - cap))
        } else {
            (bytes, 0)
        };
        if bytes.len() == cap {
            self.buf.copy_from_slice(bytes);
            self.head = 0;
            self.len = cap;
            return dropped;
        }

        let overflow = (self.len + bytes.len()).saturating_sub(cap);
        if overflow > 0 {
            self.consume(overflow);
            dropped += overflow;
        }

        let tail = (self.head + self.len) % cap;
        let first = bytes.len().min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&bytes[..first]);
        self.buf[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.len += bytes.len();
        dropped
    }

    /// Up to `n` bytes from the read cursor, as two contiguous slices.
    pub fn peek(&self, n: usize) -> (&[u8], &[u8]) {
        let n = n.min(self.len);
        let first = n.min(self.capacity() - self.head);
        (&self.buf[self.head..self.head + first], &self.buf[..n - first])
    }

    /// Copies up to `out.len()` bytes from the read cursor into `out`.
    pub fn peek_into(&self, out: &mut [u8]) -> usize {
        let (a, b) = self.peek(out.len());
        out[..a.len()].copy_from_slice(a);
        out[a.len()..a.len() + b.len()].copy_from_slice(b);
        a.len() + b.len()
    }

    /// Byte at `offset` from the read cursor.
    pub fn get(&self, offset: usize) -> Option<u8> {
        (offset < self.len).then(|| self.buf[(self.head + offset) % self.capacity()])
    }

    /// Offset of the first occurrence of `needle` from the read cursor.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        let last_start = self.len.checked_sub(needle.len())?;
        (0..=last_start).find(|&start| {
            needle.iter().enumerate().all(|(i, b)| self.get(start + i) == Some(*b))
        })
    }

    /// Drops `n` bytes from the read cursor.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len);
        self.head = (self.head + n) % self.capacity();
        self.len -= n;
        if self.len == 0 {
            self.head = 0;
        }
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(ring: &RingBuffer) -> Vec<u8> {
        let (a, b) = ring.peek(ring.len());
        [a, b].concat()
    }

    #[test]
    fn append_and_consume_wrap_around() {
        let mut ring = RingBuffer::new(8);
        assert_eq!(ring.append(&[1, 2, 3, 4, 5, 6]), 0);
        ring.consume(4);
        assert_eq!(ring.append(&[7, 8, 9, 10]), 0);
        assert_eq!(contents(&ring), vec![5, 6, 7, 8, 9, 10]);

        let (a, b) = ring.peek(6);
        assert_eq!(a, &[5, 6, 7, 8]);
        assert_eq!(b, &[9, 10]);
    }

    #[test]
    fn overflow_overwrites_oldest() {
        let mut ring = RingBuffer::new(4);
        ring.append(&[1, 2, 3]);
        assert_eq!(ring.append(&[4, 5, 6]), 2);
        assert_eq!(contents(&ring), vec![3, 4, 5, 6]);

        assert_eq!(ring.append(&[7, 8, 9, 10, 11, 12]), 6);
        assert_eq!(contents(&ring), vec![9, 10, 11, 12]);
    }

    #[test]
    fn find_crosses_the_wrap() {
        let mut ring = RingBuffer::new(6);
        ring.append(&[0, 0, 0, 0, 0xAA]);
        ring.consume(4);
        ring.append(&[0x55, 1, 2]);
        assert_eq!(ring.find(&[0xAA, 0x55]), Some(0));
        assert_eq!(ring.find(&[1, 2]), Some(2));
        assert_eq!(ring.find(&[2, 1]), None);
    }

    #[test]
    fn peek_into_copies_without_consuming() {
        let mut ring = RingBuffer::new(4);
        ring.append(&[1, 2, 3]);
        let mut out = [0u8; 8];
        assert_eq!(ring.peek_into(&mut out), 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.get(2), Some(3));
        assert_eq!(ring.get(3), None);
    }
}
