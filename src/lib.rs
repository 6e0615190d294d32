//! Engine core for a pocket musical-sketch recorder: a lock-free realtime
//! audio path (capture, playback, mixing) wrapped in a non-realtime control
//! plane. See `Engine` for the public facade.

pub mod capture;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod mixer;
pub mod playback;
pub mod ring;
pub mod source;
pub mod transport;
pub mod wav;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
