//! Owns the mixer, transport, playback stream, and (when active) a capture
//! stream. Exposes the non-realtime control-plane API of spec.md §6.2.
//! Grounded on the teacher's `commands::run::App`, generalized from a
//! TUI-driven app struct to a plain library facade.

use crate::capture::CaptureStream;
use crate::config::{frames, ms, EngineConfig};
use crate::driver::AudioDriver;
use crate::error::EngineError;
use crate::mixer::{Mixer, TrackSlot};
use crate::playback::PlaybackStream;
use crate::source::MappedSource;
use crate::transport::Transport;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct Engine {
    config: EngineConfig,
    driver: Arc<dyn AudioDriver>,
    mixer: Arc<Mixer>,
    transport: Arc<Transport>,
    playback: Option<PlaybackStream>,
    capture: Option<CaptureStream>,
}

impl Engine {
    pub fn new(driver: Arc<dyn AudioDriver>, config: EngineConfig) -> Self {
        let mixer = Arc::new(Mixer::new(config.max_callback_frames));
        Self {
            config,
            driver,
            mixer,
            transport: Arc::new(Transport::new()),
            playback: None,
            capture: None,
        }
    }

    /// Idempotent: constructs subcomponents and starts the output stream,
    /// which sits outputting silence until `play()`.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        if self.playback.is_some() {
            return Ok(());
        }
        let mut playback = PlaybackStream::new(self.driver.clone());
        playback.start(Arc::clone(&self.mixer), Arc::clone(&self.transport))?;
        self.playback = Some(playback);
        tracing::info!("engine initialized");
        Ok(())
    }

    pub fn shutdown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            let _ = capture.stop();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
        tracing::info!("engine shut down");
    }

    // ---- Track control ----

    /// `duration_ms` is the caller's expectation of the clip's length; it is
    /// only used to sanity-check against the mapped source's actual duration
    /// (a mismatch is logged, not treated as a failure — the source itself
    /// is authoritative for playback). Pass 0 if the caller doesn't know it
    /// up front.
    #[allow(clippy::too_many_arguments)]
    pub fn add_track(
        &self,
        track_id: i32,
        path: &Path,
        duration_ms: i64,
        offset_ms: i64,
        trim_start_ms: i64,
        trim_end_ms: i64,
        volume: f32,
        muted: bool,
    ) -> bool {
        if self.mixer.has_track(track_id) {
            tracing::warn!(track_id, "add_track: id already in use");
            return false;
        }

        let source = match MappedSource::open(path) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                tracing::warn!(?path, error = %e, "add_track: failed to open source");
                return false;
            }
        };

        if duration_ms > 0 {
            let actual_ms = ms(source.total_frames());
            if (actual_ms - duration_ms).abs() > 50 {
                tracing::warn!(
                    track_id,
                    ?path,
                    claimed_ms = duration_ms,
                    actual_ms,
                    "add_track: claimed duration doesn't match the source"
                );
            }
        }

        let offset = frames(offset_ms.max(0));
        let trim_start = frames(trim_start_ms.max(0));
        let trim_end = frames(trim_end_ms.max(0));

        let slot = TrackSlot::new(track_id, source, offset, trim_start, trim_end, volume, muted);
        self.mixer.add_track(slot);
        self.transport
            .set_total_frames(self.mixer.compute_total_frames());
        true
    }

    pub fn remove_track(&self, track_id: i32) -> bool {
        let removed = self.mixer.remove_track(track_id);
        if removed {
            self.transport
                .set_total_frames(self.mixer.compute_total_frames());
        }
        removed
    }

    pub fn remove_all_tracks(&self) {
        self.mixer.remove_all_tracks();
        self.transport.set_total_frames(0);
        self.transport.set_pos_frames(0);
        self.transport.set_playing(false);
    }

    pub fn set_track_volume(&self, track_id: i32, volume: f32) -> bool {
        self.mixer.set_track_volume(track_id, volume)
    }

    pub fn set_track_muted(&self, track_id: i32, muted: bool) -> bool {
        self.mixer.set_track_muted(track_id, muted)
    }

    // ---- Playback control ----

    pub fn play(&self) {
        let pos = self.transport.pos_frames();
        let total = self.transport.total_frames();
        if pos >= total {
            let (loop_start, _) = self.transport.loop_region();
            let snap_to = if self.transport.has_loop() {
                loop_start
            } else {
                0
            };
            self.transport.set_pos_frames(snap_to);
        }
        self.transport.set_playing(true);
    }

    pub fn pause(&self) {
        self.transport.set_playing(false);
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn position_ms(&self) -> i64 {
        ms(self.transport.pos_frames())
    }

    pub fn total_duration_ms(&self) -> i64 {
        ms(self.transport.total_frames())
    }

    pub fn seek_to_ms(&self, target_ms: i64) {
        let total = self.transport.total_frames();
        let target = frames(target_ms.max(0)).clamp(0, total);
        self.transport.set_pos_frames(target);
    }

    pub fn set_loop_region(&self, start_ms: i64, end_ms: i64) {
        self.transport
            .set_loop_region(frames(start_ms.max(0)), frames(end_ms.max(0)));
    }

    pub fn clear_loop_region(&self) {
        self.transport.clear_loop_region();
    }

    pub fn loop_reset_count(&self) -> i64 {
        self.transport.loop_reset_count()
    }

    // ---- Recording control ----

    pub fn set_recording(&self, recording: bool) {
        self.transport.set_recording(recording);
    }

    pub fn start_recording(&mut self, path: &Path) -> Result<(), EngineError> {
        let mut capture = CaptureStream::new(
            Arc::clone(&self.driver),
            1usize << self.config.ring_capacity_pow2,
            self.config.sink_chunk_frames,
        );
        capture.start(path)?;
        self.capture = Some(capture);
        Ok(())
    }

    pub fn await_first_buffer(&mut self, timeout_ms: i64) -> Result<(), EngineError> {
        let capture = self
            .capture
            .as_mut()
            .ok_or(EngineError::RecordingNotActive)?;
        capture.await_first_buffer(Duration::from_millis(timeout_ms.max(0) as u64))
    }

    pub fn open_write_gate(&mut self) -> Result<(), EngineError> {
        let capture = self
            .capture
            .as_mut()
            .ok_or(EngineError::RecordingNotActive)?;
        capture.open_write_gate();
        Ok(())
    }

    /// Returns duration in ms, or -1 if no recording was active.
    pub fn stop_recording(&mut self) -> i64 {
        match self.capture.take() {
            Some(mut capture) => capture.stop().unwrap_or(-1),
            None => -1,
        }
    }

    pub fn get_latest_peak_amplitude(&self) -> f32 {
        self.capture
            .as_ref()
            .map(|c| c.latest_peak_amplitude())
            .unwrap_or(0.0)
    }

    pub fn get_recorded_duration_ms(&self) -> i64 {
        self.capture
            .as_ref()
            .map(|c| c.recorded_duration_ms())
            .unwrap_or(0)
    }

    pub fn is_healthy(&self) -> bool {
        self.playback.as_ref().map(|p| p.is_healthy()).unwrap_or(false)
    }
}
