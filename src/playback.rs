//! Output callback: snapshot transport, render, advance, handle loop reset
//! and end-of-timeline. Holds references (never ownership) to the mixer and
//! transport, matching spec.md §4.8. Grounded on the teacher's stream-build
//! shape in `audio/capture.rs`, the dual of which is the output path here.

use crate::config::{OUTPUT_CHANNELS, SAMPLE_RATE};
use crate::driver::{AudioDriver, OutputConfig, OutputDataCallback, OutputStream};
use crate::error::EngineError;
use crate::mixer::Mixer;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const REOPEN_RETRY_DELAY: Duration = Duration::from_millis(50);
const REOPEN_MAX_ATTEMPTS: u32 = 5;

/// Rejects a driver whose advertised burst size wouldn't fit the mixer's
/// preallocated render buffer (spec.md §4.6/§9: "driver configurations
/// exceeding it are rejected at stream open").
fn reject_oversized_burst(driver: &Arc<dyn AudioDriver>, mixer: &Arc<Mixer>) -> Result<(), EngineError> {
    let burst = driver.frames_per_burst();
    let max = mixer.max_callback_frames();
    if burst as usize > max {
        return Err(EngineError::BurstTooLarge { burst, max });
    }
    Ok(())
}

fn build_data_cb(mixer: Arc<Mixer>, transport: Arc<Transport>) -> OutputDataCallback {
    Box::new(move |buf: &mut [f32]| {
        let n = buf.len() / OUTPUT_CHANNELS as usize;

        if !transport.is_playing() {
            buf.fill(0.0);
            return;
        }

        let pos = transport.pos_frames();
        let total = transport.total_frames();
        let (loop_start, loop_end) = transport.loop_region();
        let recording = transport.is_recording();
        let has_loop = loop_start >= 0 && loop_end > 0;

        mixer.render(buf, n, pos);

        let mut next_pos = pos + n as i64;
        if has_loop && next_pos >= loop_end {
            next_pos = loop_start;
            transport.increment_loop_reset_count();
        }

        if !recording && next_pos >= total {
            transport.set_playing(false);
            transport.set_pos_frames(0);
        } else {
            transport.set_pos_frames(next_pos);
        }
    })
}

/// Output stream wrapper that re-opens itself on device loss. Holds the
/// stream behind a mutex so the error callback's background reopen thread
/// and the owning `PlaybackStream` can both touch it.
pub struct PlaybackStream {
    driver: Arc<dyn AudioDriver>,
    stream: Arc<Mutex<Option<Box<dyn OutputStream>>>>,
    healthy: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl PlaybackStream {
    pub fn new(driver: Arc<dyn AudioDriver>) -> Self {
        Self {
            driver,
            stream: Arc::new(Mutex::new(None)),
            healthy: Arc::new(AtomicBool::new(true)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn open_once(&self, mixer: &Arc<Mixer>, transport: &Arc<Transport>) -> Result<Box<dyn OutputStream>, EngineError> {
        let data_cb = build_data_cb(mixer.clone(), transport.clone());

        let driver = self.driver.clone();
        let stream_slot = self.stream.clone();
        let healthy = self.healthy.clone();
        let running = self.running.clone();
        let mixer = mixer.clone();
        let transport = transport.clone();

        let err_cb: crate::driver::ErrorCallback = Box::new(move || {
            healthy.store(false, Ordering::Release);
            tracing::warn!("output device lost; scheduling reopen");
            spawn_reopen(
                driver.clone(),
                stream_slot.clone(),
                healthy.clone(),
                running.clone(),
                mixer.clone(),
                transport.clone(),
            );
        });

        self.driver.open_output(
            OutputConfig {
                sample_rate: SAMPLE_RATE as u32,
                channels: OUTPUT_CHANNELS,
            },
            data_cb,
            err_cb,
        )
    }

    /// Opens and starts the output stream, wiring the render callback
    /// described in spec.md §4.8 steps 1-7. On device loss the stream is
    /// reopened with identical parameters in the background (spec.md §7).
    pub fn start(&mut self, mixer: Arc<Mixer>, transport: Arc<Transport>) -> Result<(), EngineError> {
        reject_oversized_burst(&self.driver, &mixer)?;
        let mut stream = self.open_once(&mixer, &transport)?;
        stream.start()?;
        *self.stream.lock().unwrap() = Some(stream);
        self.healthy.store(true, Ordering::Release);
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(mut stream) = self.stream.lock().unwrap().take() {
            stream.stop();
        }
    }

    /// `false` if the output device was lost and re-open has not yet
    /// succeeded (spec.md §7, `DeviceLost` health flag).
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_reopen(
    driver: Arc<dyn AudioDriver>,
    stream_slot: Arc<Mutex<Option<Box<dyn OutputStream>>>>,
    healthy: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    mixer: Arc<Mixer>,
    transport: Arc<Transport>,
) {
    std::thread::spawn(move || {
        if let Some(mut old) = stream_slot.lock().unwrap().take() {
            old.stop();
        }

        for attempt in 0..REOPEN_MAX_ATTEMPTS {
            if !running.load(Ordering::Acquire) {
                return;
            }
            std::thread::sleep(REOPEN_RETRY_DELAY);

            if let Err(e) = reject_oversized_burst(&driver, &mixer) {
                tracing::error!(error = %e, "reopened driver's burst no longer fits; giving up");
                return;
            }

            let data_cb = build_data_cb(mixer.clone(), transport.clone());
            let err_driver = driver.clone();
            let err_stream_slot = stream_slot.clone();
            let err_healthy = healthy.clone();
            let err_running = running.clone();
            let err_mixer = mixer.clone();
            let err_transport = transport.clone();
            let err_cb: crate::driver::ErrorCallback = Box::new(move || {
                err_healthy.store(false, Ordering::Release);
                tracing::warn!("output device lost again; scheduling reopen");
                spawn_reopen(
                    err_driver.clone(),
                    err_stream_slot.clone(),
                    err_healthy.clone(),
                    err_running.clone(),
                    err_mixer.clone(),
                    err_transport.clone(),
                );
            });

            let opened = driver.open_output(
                OutputConfig {
                    sample_rate: SAMPLE_RATE as u32,
                    channels: OUTPUT_CHANNELS,
                },
                data_cb,
                err_cb,
            );

            match opened {
                Ok(mut stream) => {
                    if stream.start().is_ok() {
                        *stream_slot.lock().unwrap() = Some(stream);
                        healthy.store(true, Ordering::Release);
                        tracing::info!(attempt, "output stream reopened");
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "output stream reopen failed");
                }
            }
        }
        tracing::error!("giving up reopening output stream after {REOPEN_MAX_ATTEMPTS} attempts; output stays silent");
    });
}
