//! Multicam CLI
//!
//! Runs the capture pipeline against synthetic cameras and prints a
//! summary of the run.

use clap::Parser;
use multicam::{
    capture::{CaptureConfig, FileConfig, PatternKind, SyntheticConfig},
    coordinator::{CancellationToken, CaptureCoordinator, ChannelPublisher},
    metrics::CaptureMetrics,
    platform::{FpsRange, HostAllocator, SyntheticCamera, SyntheticPlatform, TestPattern},
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file. Built-in rear and front cameras when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many frames per camera.
    #[arg(long)]
    frames: Option<u64>,

    /// Stop after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,

    /// Serve Prometheus metrics on this port (needs the `metrics` feature).
    #[arg(long)]
    metrics_port: Option<u16>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("Multicam v{}", multicam::VERSION);

    let mut config = match &args.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => FileConfig::default(),
    };
    if let Some(frames) = args.frames {
        config.runtime.frame_limit = Some(frames);
    }
    if let Some(port) = args.metrics_port {
        config.runtime.metrics_port = port;
    }
    if config.runtime.frame_limit.is_none() && args.seconds.is_none() {
        info!("No frame or time limit, press Ctrl-C to stop");
    }

    let platform = Arc::new(synthetic_platform(&config.cameras, &config.synthetic));
    let (publisher, frames) = ChannelPublisher::bounded(256);
    let mut coordinator = match CaptureCoordinator::from_config(
        &config,
        platform,
        Arc::new(HostAllocator::new()),
        Arc::new(publisher),
    ) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let token = coordinator.cancellation_token();
    if let Some(metrics) = start_metrics(config.runtime.metrics_port, &token) {
        coordinator = coordinator.with_metrics(metrics);
    }

    let on_signal = token.clone();
    if let Err(e) = ctrlc::set_handler(move || on_signal.cancel()) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }
    if let Some(seconds) = args.seconds {
        let timer = token.clone();
        thread::spawn(move || {
            if !timer.wait_timeout(Duration::from_secs(seconds)) {
                info!(seconds, "Time limit reached");
                timer.cancel();
            }
        });
    }

    let sink = thread::spawn(move || {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for frame in frames {
            tracing::trace!(
                camera = %frame.camera,
                frame_id = frame.metadata.frame_id,
                "Frame received"
            );
            *counts.entry(frame.camera).or_default() += 1;
        }
        counts
    });

    let result = coordinator
        .init()
        .and_then(|()| coordinator.open())
        .and_then(|()| coordinator.run());
    drop(coordinator);
    let counts = sink.join().unwrap_or_default();

    match result {
        Ok(report) => {
            for (camera, received) in &counts {
                info!(camera = %camera, received, "Frames received downstream");
            }
            match report.to_toml() {
                Ok(text) => println!("{}", text),
                Err(e) => warn!("Failed to render report: {}", e),
            }
        }
        Err(e) => {
            eprintln!("Capture failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// One synthetic sensor per configured camera, advertising exactly the
/// configured size and rate.
fn synthetic_platform(cameras: &[CaptureConfig], synthetic: &SyntheticConfig) -> SyntheticPlatform {
    let sensors = cameras
        .iter()
        .enumerate()
        .map(|(index, camera)| {
            let pattern = match synthetic.pattern {
                PatternKind::MidGray => TestPattern::MidGray,
                PatternKind::Gradient => TestPattern::Gradient,
                PatternKind::Noise => TestPattern::Noise {
                    seed: synthetic.seed.wrapping_add(index as u64),
                },
            };
            let degrees = synthetic
                .mount_degrees
                .get(&camera.name)
                .copied()
                .unwrap_or(0);

            SyntheticCamera::new(index.to_string(), camera.facing, camera.width, camera.height)
                .with_orientation(degrees)
                .with_fps_ranges(vec![
                    FpsRange::new(1, camera.fps.max(30)),
                    FpsRange::constant(camera.fps),
                ])
                .with_pattern(pattern)
        })
        .collect();
    SyntheticPlatform::new(sensors)
}

#[cfg(feature = "metrics")]
fn start_metrics(port: u16, token: &CancellationToken) -> Option<Arc<CaptureMetrics>> {
    use multicam::metrics::{MetricsServer, MetricsServerConfig};

    if port == 0 {
        return None;
    }
    let metrics = match CaptureMetrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            return None;
        }
    };

    let server = MetricsServer::new(
        MetricsServerConfig::with_port(port),
        Arc::clone(&metrics),
        token.clone(),
    );
    thread::spawn(move || {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Failed to start metrics runtime: {}", e);
                return;
            }
        };
        if let Err(e) = runtime.block_on(server.run()) {
            warn!("Metrics server stopped: {}", e);
        }
    });
    Some(metrics)
}

#[cfg(not(feature = "metrics"))]
fn start_metrics(port: u16, _token: &CancellationToken) -> Option<Arc<CaptureMetrics>> {
    if port != 0 {
        warn!(port, "Built without the metrics feature, not serving metrics");
    }
    None
}
