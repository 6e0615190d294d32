//! Atomic, field-level transport state shared between the UI thread and the
//! playback callback. No composite snapshot is ever needed — each field is
//! independently atomic, with `playing` using acquire/release since it gates
//! whether the callback looks at anything else.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

pub struct Transport {
    playing: AtomicBool,
    recording: AtomicBool,
    pos_frames: AtomicI64,
    total_frames: AtomicI64,
    loop_start_frames: AtomicI64,
    loop_end_frames: AtomicI64,
    loop_reset_count: AtomicI64,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            pos_frames: AtomicI64::new(0),
            total_frames: AtomicI64::new(0),
            loop_start_frames: AtomicI64::new(-1),
            loop_end_frames: AtomicI64::new(-1),
            loop_reset_count: AtomicI64::new(0),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::Relaxed);
    }

    pub fn pos_frames(&self) -> i64 {
        self.pos_frames.load(Ordering::Relaxed)
    }

    pub fn set_pos_frames(&self, pos: i64) {
        self.pos_frames.store(pos, Ordering::Relaxed);
    }

    pub fn total_frames(&self) -> i64 {
        self.total_frames.load(Ordering::Relaxed)
    }

    pub fn set_total_frames(&self, total: i64) {
        self.total_frames.store(total, Ordering::Relaxed);
    }

    pub fn loop_region(&self) -> (i64, i64) {
        (
            self.loop_start_frames.load(Ordering::Relaxed),
            self.loop_end_frames.load(Ordering::Relaxed),
        )
    }

    pub fn set_loop_region(&self, start: i64, end: i64) {
        self.loop_start_frames.store(start, Ordering::Relaxed);
        self.loop_end_frames.store(end, Ordering::Relaxed);
    }

    pub fn clear_loop_region(&self) {
        self.set_loop_region(-1, -1);
    }

    pub fn has_loop(&self) -> bool {
        let (start, end) = self.loop_region();
        start >= 0 && end > 0
    }

    pub fn loop_reset_count(&self) -> i64 {
        self.loop_reset_count.load(Ordering::Relaxed)
    }

    pub fn increment_loop_reset_count(&self) {
        self.loop_reset_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_inactive_by_default() {
        let t = Transport::new();
        assert!(!t.has_loop());
        assert_eq!(t.loop_region(), (-1, -1));
    }

    #[test]
    fn has_loop_iff_start_ge_0_and_end_gt_start() {
        let t = Transport::new();
        t.set_loop_region(100, 200);
        assert!(t.has_loop());
        t.set_loop_region(0, 0);
        assert!(!t.has_loop());
        t.clear_loop_region();
        assert!(!t.has_loop());
    }

    #[test]
    fn playing_is_observable_after_store() {
        let t = Transport::new();
        assert!(!t.is_playing());
        t.set_playing(true);
        assert!(t.is_playing());
    }
}
