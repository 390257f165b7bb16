//! ring.rs
//! Ordered frame storage between one producer and its consumers.
//! Growth is unbounded between reaper passes; eviction drops the oldest
//! frames only, so relative order is preserved end to end.

use std::collections::VecDeque;

use crate::vision::frame::Frame;

#[derive(Default)]
pub struct FrameRing {
    frames: VecDeque<Frame>,
}

impl FrameRing {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
        }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }

    /// Drops the oldest frames until at most `threshold` remain.
    /// Returns the number dropped.
    pub fn evict_over(&mut self, threshold: usize) -> usize {
        let excess = self.frames.len().saturating_sub(threshold);
        self.frames.drain(..excess);
        excess
    }

    /// The most recent `n` frames in chronological order. Returns an empty
    /// vector when fewer than `n` are buffered; consumers get all or nothing.
    pub fn latest(&self, n: usize) -> Vec<Frame> {
        if n == 0 || self.frames.len() < n {
            return Vec::new();
        }
        self.frames.iter().skip(self.frames.len() - n).cloned().collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
