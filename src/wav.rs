//! Placeholder-header WAV writer with a dedicated consumer thread.
//!
//! `open` writes a 44-byte placeholder header; `start` spawns a thread that
//! drains a `Ring` into the file; `stop` joins the thread and patches the
//! RIFF/data size fields. Grounded on the teacher's SHM header-writing style
//! (`ipc/shm.rs`) and `other_examples/.../wav_writer.rs`'s drain-loop shape.

use crate::config::{BYTES_PER_SAMPLE, CAPTURE_CHANNELS, SAMPLE_RATE};
use crate::error::EngineError;
use crate::ring::Ring;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const HEADER_LEN: usize = 44;
const IDLE_SLEEP: Duration = Duration::from_millis(3);

fn write_placeholder_header(file: &mut File, channels: u16) -> std::io::Result<()> {
    let byte_rate = SAMPLE_RATE as u32 * channels as u32 * BYTES_PER_SAMPLE as u32;
    let block_align = channels * BYTES_PER_SAMPLE as u16;

    file.write_all(b"RIFF")?;
    file.write_all(&0u32.to_le_bytes())?; // patched on stop: file_size - 8
    file.write_all(b"WAVE")?;
    file.write_all(b"fmt ")?;
    file.write_all(&16u32.to_le_bytes())?;
    file.write_all(&1u16.to_le_bytes())?; // PCM
    file.write_all(&channels.to_le_bytes())?;
    file.write_all(&(SAMPLE_RATE as u32).to_le_bytes())?;
    file.write_all(&byte_rate.to_le_bytes())?;
    file.write_all(&block_align.to_le_bytes())?;
    file.write_all(&16u16.to_le_bytes())?; // bits per sample
    file.write_all(b"data")?;
    file.write_all(&0u32.to_le_bytes())?; // patched on stop: data size
    Ok(())
}

struct SinkWorker {
    handle: JoinHandle<std::io::Result<()>>,
    run: Arc<AtomicBool>,
    total_bytes: Arc<AtomicU64>,
}

/// One instance per recording. `open` then `start` then (eventually) `stop`.
pub struct WavSink {
    path: PathBuf,
    channels: u16,
    worker: Option<SinkWorker>,
}

impl WavSink {
    /// Creates the file and writes the placeholder header.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let channels = CAPTURE_CHANNELS;
        let mut file = File::create(path).map_err(EngineError::Io)?;
        write_placeholder_header(&mut file, channels).map_err(EngineError::Io)?;
        Ok(Self {
            path: path.to_path_buf(),
            channels,
            worker: None,
        })
    }

    /// Spawns the consumer thread that drains `ring` to disk. Samples drained
    /// while `write_gate_open` is false are discarded rather than persisted
    /// (spec.md §4.7: gating is the sink's responsibility, not the producer
    /// callback's); `chunk_frames` sizes the drain buffer, normally sourced
    /// from `EngineConfig.sink_chunk_frames`.
    pub fn start(
        &mut self,
        ring: Arc<Ring>,
        write_gate_open: Arc<AtomicBool>,
        chunk_frames: usize,
    ) -> Result<(), EngineError> {
        let path = self.path.clone();
        let run = Arc::new(AtomicBool::new(true));
        let total_bytes = Arc::new(AtomicU64::new(0));

        let run_clone = run.clone();
        let total_bytes_clone = total_bytes.clone();

        let handle = std::thread::Builder::new()
            .name("wav-sink".into())
            .spawn(move || -> std::io::Result<()> {
                let mut file = std::fs::OpenOptions::new().write(true).open(&path)?;
                file.seek(SeekFrom::End(0))?;

                let mut chunk = vec![0.0f32; chunk_frames];
                let mut pcm = vec![0u8; chunk_frames * 2];

                loop {
                    let n = ring.read(&mut chunk);
                    if n == 0 {
                        if !run_clone.load(Ordering::Acquire) {
                            break;
                        }
                        std::thread::sleep(IDLE_SLEEP);
                        continue;
                    }
                    if write_gate_open.load(Ordering::Acquire) {
                        drain_chunk(&mut file, &chunk[..n], &mut pcm, &total_bytes_clone)?;
                    }
                }

                // Final drain: the producer may have written samples between
                // the last ring.read() above and run_clone going false.
                loop {
                    let n = ring.read(&mut chunk);
                    if n == 0 {
                        break;
                    }
                    if write_gate_open.load(Ordering::Acquire) {
                        drain_chunk(&mut file, &chunk[..n], &mut pcm, &total_bytes_clone)?;
                    }
                }

                file.flush()?;
                Ok(())
            })
            .map_err(|e| EngineError::DriverStartFailed(e.to_string()))?;

        self.worker = Some(SinkWorker {
            handle,
            run,
            total_bytes,
        });
        Ok(())
    }

    /// Stops the sink thread, patches the RIFF/data size fields, and returns
    /// the recorded duration in milliseconds. Returns `RecordingNotActive` if
    /// `start` was never called.
    pub fn stop(mut self) -> Result<i64, EngineError> {
        let worker = self.worker.take().ok_or(EngineError::RecordingNotActive)?;
        worker.run.store(false, Ordering::Release);
        let result = worker
            .handle
            .join()
            .map_err(|_| EngineError::DriverStartFailed("sink thread panicked".into()))?;
        result.map_err(EngineError::Io)?;

        let total_bytes = worker.total_bytes.load(Ordering::Relaxed);
        patch_header(&self.path, total_bytes).map_err(EngineError::Io)?;

        let total_frames = total_bytes / (self.channels as u64 * BYTES_PER_SAMPLE as u64);
        Ok((total_frames as i64 * 1000) / SAMPLE_RATE)
    }

    /// Duration recorded so far, for live UI display while a recording is
    /// still in progress. 0 if `start` was never called.
    pub fn elapsed_ms(&self) -> i64 {
        let Some(worker) = self.worker.as_ref() else {
            return 0;
        };
        let total_bytes = worker.total_bytes.load(Ordering::Relaxed);
        let total_frames = total_bytes / (self.channels as u64 * BYTES_PER_SAMPLE as u64);
        (total_frames as i64 * 1000) / SAMPLE_RATE
    }
}

fn drain_chunk(
    file: &mut File,
    samples: &[f32],
    pcm: &mut [u8],
    total_bytes: &Arc<AtomicU64>,
) -> std::io::Result<()> {
    for (i, &s) in samples.iter().enumerate() {
        let clamped = s.clamp(-1.0, 1.0);
        let i16_sample = (clamped * 32767.0).round() as i16;
        let bytes = i16_sample.to_le_bytes();
        pcm[i * 2] = bytes[0];
        pcm[i * 2 + 1] = bytes[1];
    }
    let byte_len = samples.len() * 2;
    file.write_all(&pcm[..byte_len])?;
    total_bytes.fetch_add(byte_len as u64, Ordering::Relaxed);
    Ok(())
}

fn patch_header(path: &Path, data_bytes: u64) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
    let file_size = HEADER_LEN as u64 + data_bytes;

    file.seek(SeekFrom::Start(4))?;
    file.write_all(&((file_size - 8) as u32).to_le_bytes())?;

    file.seek(SeekFrom::Start(40))?;
    file.write_all(&(data_bytes as u32).to_le_bytes())?;

    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn records_through_ring_and_patches_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let ring = Arc::new(Ring::new(1 << 14));
        let mut sink = WavSink::open(&path).unwrap();
        let write_gate_open = Arc::new(AtomicBool::new(true));
        sink.start(ring.clone(), write_gate_open, 4096).unwrap();

        // 1000 samples of a constant 0.5, as the producer would.
        let samples = vec![0.5f32; 1000];
        let mut off = 0;
        while off < samples.len() {
            off += ring.write(&samples[off..]);
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(20));

        let duration_ms = sink.stop().unwrap();
        assert_eq!(duration_ms, (1000i64 * 1000) / SAMPLE_RATE);

        let mut file = File::open(&path).unwrap();
        let mut header = [0u8; 44];
        file.read_exact(&mut header).unwrap();
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");

        let data_size = u32::from_le_bytes([header[40], header[41], header[42], header[43]]);
        assert_eq!(data_size, 2000);

        let mut rest = Vec::new();
        file.read_to_end(&mut rest).unwrap();
        assert_eq!(rest.len(), 2000);
        let first_sample = i16::from_le_bytes([rest[0], rest[1]]);
        assert!((first_sample as f32 / 32767.0 - 0.5).abs() < 1e-3);
    }

    #[test]
    fn samples_drained_before_gate_opens_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let ring = Arc::new(Ring::new(1 << 14));
        let mut sink = WavSink::open(&path).unwrap();
        let write_gate_open = Arc::new(AtomicBool::new(false));
        sink.start(ring.clone(), write_gate_open.clone(), 4096)
            .unwrap();

        // Producer writes unconditionally (spec.md §4.7), gate still closed.
        let pre_gate = vec![0.3f32; 500];
        let mut off = 0;
        while off < pre_gate.len() {
            off += ring.write(&pre_gate[off..]);
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.elapsed_ms(), 0);

        write_gate_open.store(true, Ordering::Release);
        let post_gate = vec![0.3f32; 1000];
        let mut off = 0;
        while off < post_gate.len() {
            off += ring.write(&post_gate[off..]);
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(20));

        let duration_ms = sink.stop().unwrap();
        assert_eq!(duration_ms, (1000i64 * 1000) / SAMPLE_RATE);

        let bytes = std::fs::read(&path).unwrap();
        let data_size = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
        assert_eq!(data_size, 2000);
    }

    #[test]
    fn stop_without_start_is_recording_not_active() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let sink = WavSink::open(&path).unwrap();
        let err = sink.stop().unwrap_err();
        assert!(matches!(err, EngineError::RecordingNotActive));
    }

    #[test]
    fn elapsed_ms_tracks_progress_before_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let ring = Arc::new(Ring::new(1 << 14));
        let mut sink = WavSink::open(&path).unwrap();
        assert_eq!(sink.elapsed_ms(), 0);
        let write_gate_open = Arc::new(AtomicBool::new(true));
        sink.start(ring.clone(), write_gate_open, 4096).unwrap();

        let samples = vec![0.1f32; SAMPLE_RATE as usize]; // 1 second
        let mut off = 0;
        while off < samples.len() {
            off += ring.write(&samples[off..]);
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(50));

        let elapsed = sink.elapsed_ms();
        assert!(elapsed >= 800 && elapsed <= 1200, "elapsed={elapsed}");

        let duration_ms = sink.stop().unwrap();
        assert!((duration_ms - elapsed).abs() <= 50);
    }
}
