//! Camwatch binary.
//!
use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use camwatch::{
    alert::LogNotifier,
    config::{AlertRule, WatchConfig, DEFAULT_COOLDOWN_MS, DEFAULT_PERIOD_MS},
    meter::spawn_meter_logger,
    sensors::Webcam,
    watcher::Watcher,
};
use clap::Parser;
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Video device to watch
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Detection model file, fetched to the cache directory when omitted
    #[clap(long)]
    model: Option<PathBuf>,

    /// Milliseconds between detection cycles
    #[clap(long, default_value_t = DEFAULT_PERIOD_MS)]
    period_ms: u64,

    /// Minimum milliseconds between alert batches
    #[clap(long, default_value_t = DEFAULT_COOLDOWN_MS)]
    cooldown_ms: u64,

    /// Minimum confidence for reported detections
    #[clap(long, default_value_t = 0.5)]
    min_confidence: f32,

    /// Monitored class as `label=max_count`, may be given multiple times.
    /// Defaults to `person=1` and `cell phone=1`.
    #[clap(long = "watch", value_name = "RULE")]
    rules: Vec<AlertRule>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let args = Args::parse();

    let mut config = WatchConfig {
        period: Duration::from_millis(args.period_ms.max(1)),
        cooldown: Duration::from_millis(args.cooldown_ms),
        min_confidence: args.min_confidence,
        model_path: args.model,
        ..WatchConfig::default()
    };
    if !args.rules.is_empty() {
        config.rules = args.rules;
    }

    let source = Arc::new(Webcam::open(&args.device, None, None)?);
    let watcher = Watcher::start(config, source, Arc::new(LogNotifier))
        .await
        .context("loading the detection model failed")?;

    let cancel = watcher.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutting down");
            cancel.cancel();
        }
    });

    spawn_meter_logger(watcher.meter());

    watcher.run().await;

    Ok(())
}
