//! Stream reassembly of frames from arbitrary byte chunks.

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::{FRAME_LEN, Frame, PREFIX, RingBuffer};

/// Default reassembly capacity, roughly 48 frames.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Scanning for the sync prefix.
    Seeking,
    /// Prefix sits at the read cursor, waiting for a full frame.
    HaveHeader,
}

/// Running parser counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    pub frames: u64,
    pub checksum_failures: u64,
    pub discarded_bytes: u64,
    pub overflowed_bytes: u64,
}

/// Extracts checksum-valid frames from a byte stream.
///
/// Garbage between frames is skipped. A candidate that fails validation
/// gives up only its first byte, so a real frame starting inside it is
/// still found.
#[derive(Debug)]
pub struct FrameParser {
    ring: RingBuffer,
    state: ParseState,
    stats: ParserStats,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a parser whose ring holds `capacity` bytes, at least two frames.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity.max(FRAME_LEN * 2)),
            state: ParseState::Seeking,
            stats: ParserStats::default(),
        }
    }

    /// Appends a chunk read from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        let overwritten = self.ring.append(chunk);
        if overwritten > 0 {
            warn!(overwritten, "Reassembly buffer overflow, oldest bytes dropped");
            self.stats.overflowed_bytes += overwritten as u64;
            self.state = ParseState::Seeking;
        }
    }

    /// Appends a chunk and drains every frame now complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.push(chunk);
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Next complete frame, or `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.state {
                ParseState::Seeking => match self.ring.find(&PREFIX) {
                    Some(offset) => {
                        if offset > 0 {
                            trace!(offset, "Skipping bytes before sync prefix");
                            self.discard(offset);
                        }
                        self.state = ParseState::HaveHeader;
                    }
                    None => {
                        // Noise with no prefix: keep only what could start one.
                        if self.ring.free() < FRAME_LEN {
                            let keep = PREFIX.len() - 1;
                            let excess = self.ring.len().saturating_sub(keep);
                            debug!(excess, "No sync prefix in full buffer, resynchronising");
                            self.discard(excess);
                        }
                        return None;
                    }
                },
                ParseState::HaveHeader => {
                    if self.ring.len() < FRAME_LEN {
                        return None;
                    }
                    let mut candidate = [0u8; FRAME_LEN];
                    self.ring.peek_into(&mut candidate);
                    match Frame::from_bytes(&candidate) {
                        Ok(frame) => {
                            self.ring.consume(FRAME_LEN);
                            self.state = ParseState::Seeking;
                            self.stats.frames += 1;
                            trace!(frame = %frame, "Frame complete");
                            return Some(frame);
                        }
                        Err(e) => {
                            debug!("Dropping candidate frame: {}", e);
                            self.stats.checksum_failures += 1;
                            self.discard(1);
                            self.state = ParseState::Seeking;
                        }
                    }
                }
            }
        }
    }

    /// Drops all buffered bytes, e.g. after the link was replaced.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.state = ParseState::Seeking;
    }

    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    fn discard(&mut self, n: usize) {
        self.ring.consume(n);
        self.stats.discarded_bytes += n as u64;
    }
}
