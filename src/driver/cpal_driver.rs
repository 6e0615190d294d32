//! `cpal`-backed binding of the [`AudioDriver`] trait. Grounded on the
//! teacher's `audio::capture::AudioCapture::build_stream` (per-sample-format
//! dispatch, `err_fn`) and `audio::devices` (enumeration).

use super::{
    AudioDriver, ErrorCallback, InputConfig, InputDataCallback, InputStream, OutputConfig,
    OutputDataCallback, OutputStream,
};
use crate::error::EngineError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

pub struct CpalDriver {
    host: cpal::Host,
    /// Upper bound on frames per input callback, matching
    /// `EngineConfig.max_callback_frames`. Used to pre-reserve the I16->f32
    /// conversion scratch buffer so the realtime input callback never
    /// allocates (spec.md §5/§9).
    max_input_frames: usize,
}

impl Default for CpalDriver {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl CpalDriver {
    pub fn new(max_input_frames: usize) -> Self {
        Self {
            host: cpal::default_host(),
            max_input_frames,
        }
    }
}

pub struct CpalOutputStream {
    stream: cpal::Stream,
}

pub struct CpalInputStream {
    stream: cpal::Stream,
}

impl OutputStream for CpalOutputStream {
    fn start(&mut self) -> Result<(), EngineError> {
        self.stream
            .play()
            .map_err(|e| EngineError::DriverStartFailed(e.to_string()))
    }

    fn stop(&mut self) {
        let _ = self.stream.pause();
    }
}

impl InputStream for CpalInputStream {
    fn start(&mut self) -> Result<(), EngineError> {
        self.stream
            .play()
            .map_err(|e| EngineError::DriverStartFailed(e.to_string()))
    }

    fn stop(&mut self) {
        let _ = self.stream.pause();
    }
}

impl AudioDriver for CpalDriver {
    fn open_output(
        &self,
        config: OutputConfig,
        mut data_cb: OutputDataCallback,
        err_cb: ErrorCallback,
    ) -> Result<Box<dyn OutputStream>, EngineError> {
        let device = self
            .host
            .default_output_device()
            .ok_or_else(|| EngineError::DriverOpenFailed("no default output device".into()))?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    data_cb(data);
                },
                move |err| {
                    tracing::error!("output stream error: {err}");
                    err_cb();
                },
                None,
            )
            .map_err(|e| EngineError::DriverOpenFailed(e.to_string()))?;

        Ok(Box::new(CpalOutputStream { stream }))
    }

    fn open_input(
        &self,
        config: InputConfig,
        mut data_cb: InputDataCallback,
        err_cb: ErrorCallback,
    ) -> Result<Box<dyn InputStream>, EngineError> {
        let device = self
            .host
            .default_input_device()
            .ok_or_else(|| EngineError::DriverOpenFailed("no default input device".into()))?;

        let default_config = device
            .default_input_config()
            .map_err(|e| EngineError::DriverOpenFailed(e.to_string()))?;
        let sample_format = default_config.sample_format();

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn_clone = move |err: cpal::StreamError| {
            tracing::error!("input stream error: {err}");
        };

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| data_cb(data),
                move |err| {
                    err_fn_clone(err);
                    err_cb();
                },
                None,
            ),
            SampleFormat::I16 => {
                // Pre-reserved before the stream starts; the callback only
                // ever clears and refills it, never grows it.
                let mut scratch: Vec<f32> = Vec::with_capacity(self.max_input_frames);
                device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        debug_assert!(data.len() <= scratch.capacity());
                        scratch.clear();
                        scratch.extend(data.iter().map(|s| *s as f32 / 32768.0));
                        data_cb(&scratch);
                    },
                    move |err| {
                        err_fn_clone(err);
                        err_cb();
                    },
                    None,
                )
            }
            other => {
                return Err(EngineError::DriverOpenFailed(format!(
                    "unsupported input sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| EngineError::DriverOpenFailed(e.to_string()))?;

        Ok(Box::new(CpalInputStream { stream }))
    }

    fn frames_per_burst(&self) -> u32 {
        // cpal does not expose this uniformly across hosts; the engine falls
        // back to its configured max_callback_frames as the planning figure
        // and the actual callback size is whatever cpal delivers (always
        // <= max_callback_frames on hosts tested against this driver).
        256
    }
}
