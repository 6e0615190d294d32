//! Abstract duplex-callback driver interface.
//!
//! The engine core programs only against these traits; `driver::cpal_driver`
//! (feature `cpal-driver`) is the one concrete binding this crate ships, the
//! way a platform shim would bind a real driver on a target host. Grounded on
//! the teacher's own `cpal` usage in `audio/capture.rs`, generalized behind a
//! trait so the realtime path never names `cpal` directly.

use crate::error::EngineError;

#[cfg(feature = "cpal-driver")]
pub mod cpal_driver;

/// Output stream configuration: the engine only ever asks for stereo f32 at
/// the fixed engine sample rate (spec.md §4.1); non-goal: variable rates.
#[derive(Debug, Clone, Copy)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct InputConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Called on the realtime output thread with an interleaved stereo buffer to fill.
pub type OutputDataCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;
/// Called on the realtime input thread with captured interleaved samples.
pub type InputDataCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;
/// Called (off the realtime thread) when the driver reports a stream error,
/// e.g. device loss.
pub type ErrorCallback = Box<dyn Fn() + Send + 'static>;

pub trait OutputStream: Send {
    fn start(&mut self) -> Result<(), EngineError>;
    fn stop(&mut self);
}

pub trait InputStream: Send {
    fn start(&mut self) -> Result<(), EngineError>;
    fn stop(&mut self);
}

/// A duplex-capable audio driver. One implementation is expected to manage
/// both an input and an output stream concurrently, as two independent
/// realtime threads (spec.md §5).
pub trait AudioDriver: Send + Sync {
    fn open_output(
        &self,
        config: OutputConfig,
        data_cb: OutputDataCallback,
        err_cb: ErrorCallback,
    ) -> Result<Box<dyn OutputStream>, EngineError>;

    fn open_input(
        &self,
        config: InputConfig,
        data_cb: InputDataCallback,
        err_cb: ErrorCallback,
    ) -> Result<Box<dyn InputStream>, EngineError>;

    /// Advertised burst size, used by callers to size fixed stack buffers up
    /// front; stream opens with a larger burst than the engine was built for
    /// are rejected (spec.md §4.6, "rejected at stream open").
    fn frames_per_burst(&self) -> u32;
}

#[cfg(any(test, feature = "mock-driver"))]
pub mod mock {
    //! A deterministic in-process driver used by tests and the integration
    //! suite, so the engine can be exercised without a sound card. Grounded
    //! on spec.md §9's own note that the engine core's correctness must not
    //! depend on having hardware: a plain thread loop invokes the registered
    //! callbacks at a fixed frame count.

    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Duration;

    pub struct MockDriver {
        pub frames_per_burst: u32,
    }

    impl MockDriver {
        pub fn new(frames_per_burst: u32) -> Self {
            Self { frames_per_burst }
        }
    }

    struct MockStream {
        running: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    }

    impl MockStream {
        fn spawn_output(frames: u32, mut data_cb: OutputDataCallback) -> Self {
            let running = Arc::new(AtomicBool::new(false));
            let running_clone = running.clone();
            let handle = std::thread::spawn(move || {
                let mut buf = vec![0.0f32; frames as usize * 2];
                loop {
                    if !running_clone.load(Ordering::Acquire) {
                        break;
                    }
                    data_cb(&mut buf);
                    // Paced to real wall-clock time (frames / 44100 Hz) so
                    // tests that sleep a fixed duration see a bounded number
                    // of callbacks rather than racing far ahead of real time.
                    std::thread::sleep(Duration::from_secs_f64(frames as f64 / 44_100.0));
                }
            });
            Self {
                running,
                handle: Some(handle),
            }
        }

        fn spawn_input(frames: u32, mut data_cb: InputDataCallback) -> Self {
            let running = Arc::new(AtomicBool::new(false));
            let running_clone = running.clone();
            let handle = std::thread::spawn(move || {
                let buf = vec![0.0f32; frames as usize];
                loop {
                    if !running_clone.load(Ordering::Acquire) {
                        break;
                    }
                    data_cb(&buf);
                    std::thread::sleep(Duration::from_secs_f64(frames as f64 / 44_100.0));
                }
            });
            Self {
                running,
                handle: Some(handle),
            }
        }
    }

    pub struct MockOutputStream(MockStream);
    pub struct MockInputStream(MockStream);

    impl OutputStream for MockOutputStream {
        fn start(&mut self) -> Result<(), EngineError> {
            self.0.running.store(true, Ordering::Release);
            Ok(())
        }
        fn stop(&mut self) {
            self.0.running.store(false, Ordering::Release);
            if let Some(h) = self.0.handle.take() {
                let _ = h.join();
            }
        }
    }

    impl InputStream for MockInputStream {
        fn start(&mut self) -> Result<(), EngineError> {
            self.0.running.store(true, Ordering::Release);
            Ok(())
        }
        fn stop(&mut self) {
            self.0.running.store(false, Ordering::Release);
            if let Some(h) = self.0.handle.take() {
                let _ = h.join();
            }
        }
    }

    impl AudioDriver for MockDriver {
        fn open_output(
            &self,
            _config: OutputConfig,
            data_cb: OutputDataCallback,
            _err_cb: ErrorCallback,
        ) -> Result<Box<dyn OutputStream>, EngineError> {
            Ok(Box::new(MockOutputStream(MockStream::spawn_output(
                self.frames_per_burst,
                data_cb,
            ))))
        }

        fn open_input(
            &self,
            _config: InputConfig,
            data_cb: InputDataCallback,
            _err_cb: ErrorCallback,
        ) -> Result<Box<dyn InputStream>, EngineError> {
            Ok(Box::new(MockInputStream(MockStream::spawn_input(
                self.frames_per_burst,
                data_cb,
            ))))
        }

        fn frames_per_burst(&self) -> u32 {
            self.frames_per_burst
        }
    }
}
