//! # Roadside MEC Fusion Core
//!
//! Cooperative-ITS roadside unit: ingests radar and (mock) video detections over a bounded
//! queue, fuses them into tracked objects with a constant-acceleration Kalman filter, and
//! emits V2X RSM packets for the resulting snapshot.
//!
//! ## Architecture
//! - **Sensors:** Radar adapter (serial, DFA-framed wire format) and a mock video adapter,
//!   each on their own thread, both pushing onto one bounded `MessageQueue`.
//! - **Fusion:** A consumer loop on the main thread (pop → ingest → encode) plus an
//!   independent 20 Hz tick thread (predict → age → cull → publish snapshot).
//! - **Monitor:** A Unix-domain-socket status endpoint on its own thread.
//! - **Config:** Loaded once at startup, reloadable on `SIGHUP` without restarting any
//!   component.
//!
//! ## Modes
//! - **Live:** radar + video adapters feed the queue.
//! - **`--sim`:** a scenario file replaces both adapters, feeding measurements directly.

mod config;
mod errors;
mod fusion;
mod metrics;
mod monitor;
mod pipeline;
mod queue;
mod radar;
mod simulator;
mod track;
mod v2x;
mod video;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use config::{Config, ConfigHandle};
use fusion::FusionProcessor;
use metrics::{new_shared_metrics, EventRecorder};
use monitor::MonitorService;
use pipeline::Coordinator;
use queue::MessageQueue;
use radar::RadarAdapter;
use simulator::ScenarioPlayer;
use video::VideoAdapter;

/// Roadside MEC fusion core.
#[derive(Parser, Debug)]
#[command(name = "mec-fusion", about = "Roadside multi-sensor fusion core for cooperative ITS")]
struct Cli {
    /// Replay a scenario file instead of driving the live radar/video adapters.
    #[arg(short, long)]
    sim: bool,

    /// Path to the TOML config file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Increase log verbosity (repeatable); currently informational only, level is set via
    /// `RUST_LOG`.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    info!("=== MEC FUSION CORE START ===");

    let initial_config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load config {:?}: {e}", cli.config);
            std::process::exit(1);
        }
    };
    let config = ConfigHandle::new(cli.config.clone(), initial_config);

    let running = Arc::new(AtomicBool::new(true));
    let metrics = new_shared_metrics();
    let event_recorder = Arc::new(EventRecorder::new());
    let csv_exporter = event_recorder.start_exporter("events.csv".to_string());

    let queue_capacity = config.current().queue.capacity;
    let queue = Arc::new(MessageQueue::new(queue_capacity));
    let fusion = Arc::new(FusionProcessor::new(config.clone(), metrics.clone(), event_recorder.clone()));

    let coordinator = Coordinator {
        queue: queue.clone(),
        fusion: fusion.clone(),
        running: running.clone(),
        config: config.clone(),
        metrics: metrics.clone(),
        event_recorder: event_recorder.clone(),
        rsu_id: 0xABCD,
    };

    let signal_handle = spawn_signal_thread(config.clone(), running.clone());

    let monitor = MonitorService::new(
        config.current().monitor.socket_path.clone(),
        running.clone(),
        metrics.clone(),
    );
    let monitor_handle = std::thread::spawn(move || monitor.run());

    let tick_handle = coordinator.spawn_fusion_tick();

    let sensor_handles = if cli.sim {
        spawn_sim_threads(&config, &queue, &running, &metrics, &event_recorder)
    } else {
        spawn_live_adapters(&config, &queue, &running, &metrics, &event_recorder)
    };

    coordinator.run_consumer_loop();

    info!("shutting down: joining sensor threads");
    for handle in sensor_handles {
        let _ = handle.join();
    }
    let _ = tick_handle.join();
    let _ = monitor_handle.join();
    signal_handle.close();
    queue.destroy();
    let _ = csv_exporter.join();

    info!("=== MEC FUSION CORE STOPPED ===");
}

fn spawn_live_adapters(
    config: &ConfigHandle,
    queue: &Arc<MessageQueue>,
    running: &Arc<AtomicBool>,
    metrics: &metrics::SharedMetrics,
    event_recorder: &Arc<EventRecorder>,
) -> Vec<std::thread::JoinHandle<()>> {
    let cfg = config.current();

    let radar = RadarAdapter::new(
        cfg.radar.clone(),
        queue.clone(),
        running.clone(),
        metrics.clone(),
        event_recorder.clone(),
    );
    let radar_handle = std::thread::spawn(move || radar.run());

    let video = VideoAdapter::new(
        cfg.video.clone(),
        queue.clone(),
        running.clone(),
        metrics.clone(),
        event_recorder.clone(),
    );
    let video_handle = std::thread::spawn(move || video.run());

    vec![radar_handle, video_handle]
}

fn spawn_sim_threads(
    config: &ConfigHandle,
    queue: &Arc<MessageQueue>,
    running: &Arc<AtomicBool>,
    metrics: &metrics::SharedMetrics,
    event_recorder: &Arc<EventRecorder>,
) -> Vec<std::thread::JoinHandle<()>> {
    let cfg = config.current();
    let path = PathBuf::from(&cfg.sim.data_path);

    let player = match ScenarioPlayer::load(&path) {
        Ok(p) => p,
        Err(e) => {
            error!("failed to load scenario {:?}: {e}", path);
            running.store(false, Ordering::Release);
            return Vec::new();
        }
    };
    if player.is_empty() {
        warn!("scenario {:?} has no records, running with no sensor input", path);
    }

    let queue = queue.clone();
    let running = running.clone();
    let playback_speed = cfg.sim.playback_speed;
    let looping = cfg.sim.looping;
    let metrics = metrics.clone();
    let event_recorder = event_recorder.clone();

    let handle = std::thread::spawn(move || {
        player.run(queue, running.clone(), playback_speed, looping, metrics, event_recorder);
        // a non-looping scenario running its course is a natural shutdown trigger, same
        // as end-of-file in the original simulator.
        running.store(false, Ordering::Release);
    });

    vec![handle]
}

fn spawn_signal_thread(config: ConfigHandle, running: Arc<AtomicBool>) -> signal_hook::iterator::Handle {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP]).expect("failed to register signal handlers");
    let handle = signals.handle();

    std::thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGINT | SIGTERM => {
                    info!("received shutdown signal {signal}, stopping");
                    running.store(false, Ordering::Release);
                }
                SIGHUP => {
                    info!("received SIGHUP, reloading config");
                    config.reload();
                }
                _ => {}
            }
        }
    });

    handle
}
