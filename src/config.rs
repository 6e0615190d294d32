//! Fixed sample-rate frame math and the non-realtime engine configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// The engine mixes and captures at a single fixed sample rate. No resampling.
pub const SAMPLE_RATE: i64 = 44_100;
pub const CAPTURE_CHANNELS: u16 = 1;
pub const OUTPUT_CHANNELS: u16 = 2;
pub const BITS_PER_SAMPLE: u16 = 16;
pub const BYTES_PER_SAMPLE: i64 = (BITS_PER_SAMPLE / 8) as i64;

/// Convert a millisecond duration to a frame count. Truncates.
pub fn frames(ms: i64) -> i64 {
    ms * SAMPLE_RATE / 1000
}

/// Convert a frame count to a millisecond duration. Truncates.
pub fn ms(frames: i64) -> i64 {
    frames * 1000 / SAMPLE_RATE
}

/// Non-realtime engine settings, loaded once at `Engine::initialize` and never
/// touched by a callback. Mirrors the teacher's `config::Config` load/save shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// log2 of the capture ring's capacity in samples. Suggested 17 (~3s mono @ 44.1kHz).
    #[serde(default = "default_ring_capacity_pow2")]
    pub ring_capacity_pow2: u32,

    /// Chunk size the sink worker drains from the ring per iteration.
    #[serde(default = "default_sink_chunk_frames")]
    pub sink_chunk_frames: usize,

    /// Upper bound on frames-per-callback the mixer's stack buffer is sized for.
    /// Stream opens with a larger burst are rejected.
    #[serde(default = "default_max_callback_frames")]
    pub max_callback_frames: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_ring_capacity_pow2() -> u32 {
    17
}

fn default_sink_chunk_frames() -> usize {
    4096
}

fn default_max_callback_frames() -> usize {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_capacity_pow2: default_ring_capacity_pow2(),
            sink_chunk_frames: default_sink_chunk_frames(),
            max_callback_frames: default_max_callback_frames(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// `~/.config/fourtrack/engine.toml`, XDG-style on all platforms (teacher's convention).
    pub fn path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(home.join(".config").join("fourtrack").join("engine.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::path()?;

        if !path.exists() {
            tracing::debug!("engine config not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read engine config from {:?}", path))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {:?}", path))?;
        tracing::info!("loaded engine config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {:?}", parent))?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize engine config")?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write engine config to {:?}", path))?;
        tracing::info!("saved engine config to {:?}", path);
        Ok(())
    }
}
