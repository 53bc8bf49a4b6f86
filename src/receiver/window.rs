//! Receive window and reorder buffer.
//!
//! A fixed-capacity ring indexed by `seq - next_expected`. Every byte carries
//! an occupancy bit so overlapping retransmissions and partial duplicates are
//! merged instead of double-counted.
//!
//! ```text
//!  next_expected                                  next_expected + capacity
//!  │                                                                     │
//!  ▼                                                                     ▼
//!  [■■■■■■■■■■■■][□□□□][■■■■□□■■■■■■]........................................
//!   └ low water ┘              └ high water
//! ```
//!
//! The low water mark is the length of the filled run starting at offset 0;
//! the high water mark is one past the highest filled offset.

use std::io::{self, Write};

use crate::transport::seq::{self, SeqNum};

/// Where an incoming DATA payload landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// Stored (possibly trimmed) in the reorder buffer.
    Buffered {
        /// Bytes that were not already held.
        new_bytes: usize,
        /// Bytes past the window end that were discarded.
        truncated: usize,
    },
    /// Entirely below `next_expected`: already delivered.
    Duplicate,
    /// Starts beyond the window end.
    OutOfWindow,
}

/// Out-of-order reassembly buffer in front of the output sink.
#[derive(Debug)]
pub struct ReceiveWindow {
    bytes: Vec<u8>,
    filled: Vec<bool>,
    /// Ring index of offset 0.
    head: usize,
    next_expected: SeqNum,
    low_water: usize,
    high_water: usize,
    buffered: usize,
}

impl ReceiveWindow {
    /// Create an empty window of `capacity` bytes starting at `next_expected`.
    pub fn new(next_expected: SeqNum, capacity: usize) -> Self {
        assert!(capacity > 0, "receive window must hold at least one byte");
        Self {
            bytes: vec![0; capacity],
            filled: vec![false; capacity],
            head: 0,
            next_expected,
            low_water: 0,
            high_water: 0,
            buffered: 0,
        }
    }

    /// Discard everything and restart at `next_expected`.
    pub fn reset(&mut self, next_expected: SeqNum) {
        self.filled.fill(false);
        self.head = 0;
        self.next_expected = next_expected;
        self.low_water = 0;
        self.high_water = 0;
        self.buffered = 0;
    }

    /// Sequence number of the oldest byte not yet delivered.
    pub fn next_expected(&self) -> SeqNum {
        self.next_expected
    }

    /// Window capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Last sequence number the window accepts.
    pub fn last_acceptable(&self) -> SeqNum {
        seq::advance(self.next_expected, self.capacity() - 1)
    }

    /// Length of the filled run starting at `next_expected`.
    pub fn low_water(&self) -> usize {
        self.low_water
    }

    /// One past the highest filled offset.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Bytes currently held.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Check if the next expected byte has arrived.
    pub fn is_ready(&self) -> bool {
        self.low_water > 0
    }

    /// Check if `seq` was already delivered.
    pub fn is_delivered(&self, seq: SeqNum) -> bool {
        seq::is_duplicate_or_old(seq, self.next_expected, self.last_acceptable())
    }

    /// Place `payload`, which starts at `seq`, into the buffer.
    ///
    /// A prefix that was already delivered is trimmed; bytes past the window
    /// end are cut off. Nothing is delivered here; see [`flush_into`](Self::flush_into).
    pub fn insert(&mut self, seq: SeqNum, payload: &[u8]) -> Insert {
        let lo = self.next_expected;
        let hi = self.last_acceptable();

        let (offset, payload) = if seq::is_duplicate_or_old(seq, lo, hi) {
            let stale = seq::distance(seq, lo) as usize;
            if stale >= payload.len() {
                return Insert::Duplicate;
            }
            (0, &payload[stale..])
        } else if seq::in_range(seq, lo, hi) {
            (seq::distance(lo, seq) as usize, payload)
        } else {
            return Insert::OutOfWindow;
        };

        let room = self.capacity() - offset;
        let take = payload.len().min(room);
        let mut new_bytes = 0;

        for (i, &byte) in payload[..take].iter().enumerate() {
            let slot = self.slot(offset + i);
            if !self.filled[slot] {
                self.filled[slot] = true;
                self.bytes[slot] = byte;
                new_bytes += 1;
            }
        }

        self.buffered += new_bytes;
        self.high_water = self.high_water.max(offset + take);
        while self.low_water < self.capacity() && self.filled[self.slot(self.low_water)] {
            self.low_water += 1;
        }

        Insert::Buffered {
            new_bytes,
            truncated: payload.len() - take,
        }
    }

    /// Deliver the contiguous run at the front of the window to `sink` and
    /// slide the window past it.
    ///
    /// Returns the number of bytes delivered. On a write error the window is
    /// left untouched.
    pub fn flush_into<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<usize> {
        let run = self.low_water;
        if run == 0 {
            return Ok(0);
        }

        let first = run.min(self.capacity() - self.head);
        sink.write_all(&self.bytes[self.head..self.head + first])?;
        if first < run {
            sink.write_all(&self.bytes[..run - first])?;
        }

        for offset in 0..run {
            let slot = self.slot(offset);
            self.filled[slot] = false;
        }
        self.head = self.slot(run);
        self.next_expected = seq::advance(self.next_expected, run);
        self.buffered -= run;
        self.high_water -= run;
        self.low_water = 0;
        Ok(run)
    }

    fn slot(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flushed(window: &mut ReceiveWindow) -> Vec<u8> {
        let mut out = Vec::new();
        window.flush_into(&mut out).unwrap();
        out
    }

    #[test]
    fn test_in_order_insert_and_flush() {
        let mut window = ReceiveWindow::new(100, 16);
        assert_eq!(
            window.insert(100, b"abcd"),
            Insert::Buffered {
                new_bytes: 4,
                truncated: 0
            }
        );
        assert!(window.is_ready());
        assert_eq!(window.low_water(), 4);

        assert_eq!(flushed(&mut window), b"abcd");
        assert_eq!(window.next_expected(), 104);
        assert_eq!(window.buffered(), 0);
        assert!(!window.is_ready());
    }

    #[test]
    fn test_gap_holds_back_delivery() {
        let mut window = ReceiveWindow::new(0, 16);
        window.insert(4, b"efgh");
        window.insert(8, b"ijkl");

        assert!(!window.is_ready());
        assert_eq!(window.high_water(), 12);
        assert!(flushed(&mut window).is_empty());
        assert_eq!(window.next_expected(), 0);

        window.insert(0, b"abcd");
        assert_eq!(window.low_water(), 12);
        assert_eq!(flushed(&mut window), b"abcdefghijkl");
        assert_eq!(window.next_expected(), 12);
        assert_eq!(window.high_water(), 0);
    }

    #[test]
    fn test_duplicate_below_window() {
        let mut window = ReceiveWindow::new(0, 16);
        window.insert(0, b"abcd");
        flushed(&mut window);

        assert_eq!(window.insert(0, b"abcd"), Insert::Duplicate);
        assert!(window.is_delivered(3));
        assert!(!window.is_delivered(4));
        assert_eq!(window.next_expected(), 4);
    }

    #[test]
    fn test_straddling_payload_is_trimmed() {
        let mut window = ReceiveWindow::new(0, 16);
        window.insert(0, b"abcd");
        flushed(&mut window);

        // bytes 2..6, of which 2 and 3 are already delivered
        assert_eq!(
            window.insert(2, b"cdef"),
            Insert::Buffered {
                new_bytes: 2,
                truncated: 0
            }
        );
        assert_eq!(flushed(&mut window), b"ef");
    }

    #[test]
    fn test_overlap_counts_new_bytes_once() {
        let mut window = ReceiveWindow::new(0, 16);
        window.insert(2, b"cdef");
        assert_eq!(
            window.insert(0, b"abcdef"),
            Insert::Buffered {
                new_bytes: 2,
                truncated: 0
            }
        );
        assert_eq!(window.buffered(), 6);
        assert_eq!(flushed(&mut window), b"abcdef");
    }

    #[test]
    fn test_past_window_end() {
        let mut window = ReceiveWindow::new(0, 8);
        assert_eq!(window.insert(8, b"x"), Insert::OutOfWindow);
        assert_eq!(
            window.insert(6, b"ghij"),
            Insert::Buffered {
                new_bytes: 2,
                truncated: 2
            }
        );
        assert_eq!(window.high_water(), 8);
    }

    #[test]
    fn test_ring_wraps_around_storage() {
        let mut window = ReceiveWindow::new(0, 8);
        window.insert(0, b"abcdef");
        assert_eq!(flushed(&mut window), b"abcdef");

        // offsets 0..6 now span the end of the backing storage
        window.insert(6, b"ghijkl");
        assert_eq!(window.low_water(), 6);
        assert_eq!(flushed(&mut window), b"ghijkl");
        assert_eq!(window.next_expected(), 12);
    }

    #[test]
    fn test_sequence_wraparound() {
        let start = u32::MAX - 2;
        let mut window = ReceiveWindow::new(start, 16);

        window.insert(1, b"ef");
        window.insert(start, b"abcd");
        assert_eq!(flushed(&mut window), b"abcdef");
        assert_eq!(window.next_expected(), 3);
        assert_eq!(window.insert(u32::MAX, b"c"), Insert::Duplicate);
    }

    #[test]
    fn test_failed_write_leaves_window_intact() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut window = ReceiveWindow::new(0, 8);
        window.insert(0, b"abc");
        assert!(window.flush_into(&mut Broken).is_err());
        assert_eq!(window.next_expected(), 0);
        assert_eq!(window.low_water(), 3);
    }

    #[test]
    fn test_reset() {
        let mut window = ReceiveWindow::new(0, 8);
        window.insert(2, b"cd");
        window.reset(500);
        assert_eq!(window.next_expected(), 500);
        assert_eq!(window.buffered(), 0);
        assert_eq!(window.high_water(), 0);
    }
}
