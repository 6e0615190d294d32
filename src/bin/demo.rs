use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cpal::traits::{DeviceTrait, HostTrait};
use fourtrack_core::driver::cpal_driver::CpalDriver;
use fourtrack_core::driver::AudioDriver;
use fourtrack_core::{Engine, EngineConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "fourtrack-demo")]
#[command(author, version, about = "Pocket musical-sketch recorder engine demo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List input and output devices on the default host
    Devices,
    /// Record from the default input device for a fixed duration
    Record {
        path: PathBuf,
        #[arg(long, default_value_t = 4)]
        seconds: u64,
    },
    /// Play back one or more tracks, laid out at offset 0
    Play { paths: Vec<PathBuf> },
    /// Scripted smoke test: record, add as a track, play it back
    Mix,
}

/// `-v` bumps verbosity above `config_level`; with no `-v`, the configured
/// level is used as-is. `config_level` is `EngineConfig.log_level`.
fn setup_logging(verbosity: u8, config_level: &str) {
    let base = match config_level.to_ascii_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        other => {
            eprintln!("unrecognized log_level {other:?} in config, defaulting to info");
            Level::INFO
        }
    };
    let level = match verbosity {
        0 => base,
        1 => Level::DEBUG.max(base),
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn cmd_devices() -> Result<()> {
    let host = cpal::default_host();
    println!("input devices:");
    for device in host.input_devices().context("enumerating input devices")? {
        println!("  {}", device.name().unwrap_or_else(|_| "<unknown>".into()));
    }
    println!("output devices:");
    for device in host.output_devices().context("enumerating output devices")? {
        println!("  {}", device.name().unwrap_or_else(|_| "<unknown>".into()));
    }
    Ok(())
}

fn cmd_record(path: PathBuf, seconds: u64, config: EngineConfig) -> Result<()> {
    let driver: Arc<dyn AudioDriver> = Arc::new(CpalDriver::new(config.max_callback_frames));
    let mut engine = Engine::new(driver, config);
    engine.initialize().context("initializing engine")?;

    engine.start_recording(&path).context("opening capture stream")?;
    engine
        .await_first_buffer(2_000)
        .context("awaiting first capture buffer")?;
    engine.open_write_gate().context("opening write gate")?;
    tracing::info!("recording to {:?} for {}s", path, seconds);

    // Ctrl-C should still patch the WAV header rather than leaving the
    // placeholder sizes in place, so stop the loop early and fall through to
    // the normal stop_recording() path below.
    let interrupted = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let interrupted_handler = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_handler.store(true, std::sync::atomic::Ordering::Release);
    })
    .context("installing Ctrl-C handler")?;

    let deadline = std::time::Instant::now() + Duration::from_secs(seconds);
    while std::time::Instant::now() < deadline
        && !interrupted.load(std::sync::atomic::Ordering::Acquire)
    {
        std::thread::sleep(Duration::from_millis(250));
        tracing::info!(peak = engine.get_latest_peak_amplitude(), "level");
    }

    let duration_ms = engine.stop_recording();
    println!("recorded {duration_ms}ms to {:?}", path);
    engine.shutdown();
    Ok(())
}

fn cmd_play(paths: Vec<PathBuf>, config: EngineConfig) -> Result<()> {
    let driver: Arc<dyn AudioDriver> = Arc::new(CpalDriver::new(config.max_callback_frames));
    let mut engine = Engine::new(driver, config);
    engine.initialize().context("initializing engine")?;

    for (i, path) in paths.iter().enumerate() {
        if !engine.add_track(i as i32, path, 0, 0, 0, 0, 1.0, false) {
            tracing::warn!(?path, "failed to add track");
        }
    }

    engine.play();
    while engine.is_playing() {
        std::thread::sleep(Duration::from_millis(200));
        println!("{}ms / {}ms", engine.position_ms(), engine.total_duration_ms());
    }
    engine.shutdown();
    Ok(())
}

fn cmd_mix(config: EngineConfig) -> Result<()> {
    let driver: Arc<dyn AudioDriver> = Arc::new(CpalDriver::new(config.max_callback_frames));
    let mut engine = Engine::new(driver, config);
    engine.initialize().context("initializing engine")?;

    let take_path = std::env::temp_dir().join("fourtrack-demo-take.wav");
    engine.start_recording(&take_path)?;
    engine.await_first_buffer(2_000)?;
    engine.open_write_gate()?;
    std::thread::sleep(Duration::from_secs(2));
    let duration_ms = engine.stop_recording();
    println!("recorded {duration_ms}ms click");

    engine.add_track(0, &take_path, duration_ms, 0, 0, 0, 1.0, false);
    engine.play();
    while engine.is_playing() {
        std::thread::sleep(Duration::from_secs(1));
        println!(
            "playing: {}ms / {}ms",
            engine.position_ms(),
            engine.total_duration_ms()
        );
    }
    engine.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load().unwrap_or_default();
    setup_logging(cli.verbose, &config.log_level);

    match cli.command {
        Commands::Devices => cmd_devices(),
        Commands::Record { path, seconds } => cmd_record(path, seconds, config),
        Commands::Play { paths } => cmd_play(paths, config),
        Commands::Mix => cmd_mix(config),
    }
}
