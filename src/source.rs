//! Read-only, zero-syscall random access to a PCM file's sample frames.
//!
//! Opens a file, validates a RIFF/WAVE header, walks chunks to find `data`,
//! and memory-maps the data region. Safe to read concurrently from the output
//! callback while the UI thread only ever replaces the *owning slot*, never
//! mutates this struct in place (see `mixer::SlotList`).

use crate::error::EngineError;
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

pub struct MappedSource {
    mmap: Mmap,
    /// Byte offset of the `data` chunk's payload within `mmap`.
    data_offset: usize,
    /// Byte length of the `data` chunk's payload.
    data_len: usize,
    channel_count: u16,
    total_frames: i64,
}

impl MappedSource {
    /// Opens `path`, validates the WAV header, and maps the data chunk.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let mut file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::SourceNotFound(path.to_path_buf())
            } else {
                EngineError::Io(e)
            }
        })?;

        let mut header = [0u8; RIFF_HEADER_LEN];
        if file.read_exact(&mut header).is_err() {
            return Err(EngineError::SourceTooSmall(path.to_path_buf()));
        }
        if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
            return Err(EngineError::SourceBadHeader(path.to_path_buf()));
        }

        let (data_offset, data_len, channel_count) = walk_chunks(&mut file, path)?;

        // SAFETY: the file is opened read-only and not expected to be mutated
        // concurrently outside this process; the mapping is advised sequential
        // and only ever read via `read_frames`.
        let mmap = unsafe { Mmap::map(&file).map_err(EngineError::SourceMapFailed)? };
        #[cfg(unix)]
        let _ = mmap.advise(memmap2::Advice::Sequential);

        if data_offset + data_len > mmap.len() {
            return Err(EngineError::SourceBadHeader(path.to_path_buf()));
        }

        let bytes_per_frame = (channel_count as usize) * 2; // 16-bit samples
        let total_frames = if bytes_per_frame == 0 {
            0
        } else {
            (data_len / bytes_per_frame) as i64
        };

        Ok(Self {
            mmap,
            data_offset,
            data_len,
            channel_count,
            total_frames,
        })
    }

    pub fn total_frames(&self) -> i64 {
        self.total_frames
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Fills `out` with up to `out.len()` mono f32 samples starting at
    /// `frame_offset`, returning the count actually filled. `frame_offset >=
    /// total_frames` (or negative) returns 0. No syscalls: pure memory reads.
    pub fn read_frames(&self, out: &mut [f32], frame_offset: i64, n: usize) -> usize {
        if frame_offset < 0 || frame_offset >= self.total_frames || n == 0 {
            return 0;
        }

        let available = (self.total_frames - frame_offset) as usize;
        let count = n.min(available).min(out.len());
        let bytes_per_frame = self.channel_count as usize * 2;
        let start = self.data_offset + frame_offset as usize * bytes_per_frame;

        for i in 0..count {
            let off = start + i * bytes_per_frame;
            let sample_i16 = i16::from_le_bytes([self.mmap[off], self.mmap[off + 1]]);
            out[i] = sample_i16 as f32 / 32768.0;
        }
        count
    }
}

/// Walks RIFF chunks after the 12-byte header, returning (data_offset,
/// data_len, channel_count) for the first `data` chunk found. Chunk lengths
/// that are odd are padded to the next even byte per the RIFF spec.
fn walk_chunks(file: &mut File, path: &Path) -> Result<(usize, usize, u16), EngineError> {
    use std::io::{Seek, SeekFrom};

    file.seek(SeekFrom::Start(RIFF_HEADER_LEN as u64))
        .map_err(EngineError::Io)?;

    let mut offset = RIFF_HEADER_LEN;
    let mut channel_count: u16 = 1;
    let mut saw_fmt = false;

    loop {
        let mut chunk_header = [0u8; CHUNK_HEADER_LEN];
        if file.read_exact(&mut chunk_header).is_err() {
            break;
        }
        let chunk_id = &chunk_header[0..4];
        let chunk_len = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]) as usize;
        let payload_offset = offset + CHUNK_HEADER_LEN;

        if chunk_id == b"fmt " {
            let mut fmt = vec![0u8; chunk_len.max(16)];
            file.read_exact(&mut fmt[..chunk_len.min(fmt.len())])
                .map_err(|_| EngineError::SourceBadHeader(path.to_path_buf()))?;
            channel_count = u16::from_le_bytes([fmt[2], fmt[3]]);
            saw_fmt = true;
            if chunk_len % 2 == 1 {
                file.seek(SeekFrom::Current(1)).ok();
            }
        } else if chunk_id == b"data" {
            if !saw_fmt {
                return Err(EngineError::SourceBadHeader(path.to_path_buf()));
            }
            return Ok((payload_offset, chunk_len, channel_count));
        } else {
            let advance = chunk_len + (chunk_len % 2);
            if file.seek(SeekFrom::Current(advance as i64)).is_err() {
                break;
            }
        }
        offset = payload_offset + chunk_len + (chunk_len % 2);
    }

    Err(EngineError::SourceNoDataChunk(path.to_path_buf()))
}
