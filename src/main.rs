//! CLI Entry Point for sapera-gige
//!
//! Drives the camera adapter from the command line:
//! - List servers that expose an acquisition device
//! - Snap one frame and write raw pixels plus JSON metadata
//! - Run a sequence and report throughput
//! - Dump the property table
//!
//! # Usage
//!
//! ```bash
//! sapera-gige servers
//! sapera-gige snap --binning 2 --pixel-type 10bit --exposure-ms 5 --output frame.raw
//! sapera-gige stream --frames 200
//! sapera-gige properties
//! ```
//!
//! This build runs against the simulated frame-grabber SDK.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sapera_gige::config::{AppConfig, DEFAULT_CONFIG_PATH};
use sapera_gige::logging;
use sapera_gige::prelude::*;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "sapera-gige")]
#[command(about = "Sapera GigE camera adapter tools", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List servers that expose an acquisition device
    Servers,

    /// Acquire one frame and write it to disk
    Snap {
        /// Binning factor (1, 2 or 4)
        #[arg(long)]
        binning: Option<u32>,

        /// Pixel type ("8bit" or "10bit")
        #[arg(long)]
        pixel_type: Option<String>,

        /// Exposure time in milliseconds
        #[arg(long)]
        exposure_ms: Option<f64>,

        /// Region of interest
        #[arg(long, num_args = 4, value_names = ["X", "Y", "WIDTH", "HEIGHT"])]
        roi: Option<Vec<u32>>,

        /// Raw pixel output; metadata goes next to it with a .json extension
        #[arg(long, default_value = "frame.raw")]
        output: PathBuf,
    },

    /// Run a sequence acquisition and report statistics
    Stream {
        /// Number of frames to acquire
        #[arg(long, default_value_t = 100)]
        frames: u64,

        /// Minimum delay between frames in milliseconds
        #[arg(long, default_value_t = 0.0)]
        interval_ms: f64,

        /// End the run instead of waiting when frames are not consumed in time
        #[arg(long)]
        stop_on_overflow: bool,
    },

    /// Print every property and its metadata as JSON
    Properties,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    config.validate().context("validating configuration")?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    tracing::debug!(app = %config.application.name, "Configuration loaded");

    match cli.command {
        Commands::Servers => list_servers(&config),
        Commands::Snap {
            binning,
            pixel_type,
            exposure_ms,
            roi,
            output,
        } => snap(&config, binning, pixel_type, exposure_ms, roi, &output).await,
        Commands::Stream {
            frames,
            interval_ms,
            stop_on_overflow,
        } => stream(&config, frames, interval_ms, stop_on_overflow).await,
        Commands::Properties => properties(&config).await,
    }
}

fn list_servers(config: &AppConfig) -> Result<()> {
    let camera = SaperaGigE::new_mock(config.camera.clone());
    let servers = camera.available_servers().context("enumerating servers")?;
    if servers.is_empty() {
        println!("No camera servers found");
    }
    for server in servers {
        println!("{}\t{} acquisition device(s)", server.name, server.acq_device_count);
    }
    Ok(())
}

async fn open_camera(config: &AppConfig) -> Result<SaperaGigE> {
    let mut camera = SaperaGigE::new_mock(config.camera.clone());
    camera
        .initialize()
        .await
        .context("initializing camera")?;
    Ok(camera)
}

async fn snap(
    config: &AppConfig,
    binning: Option<u32>,
    pixel_type: Option<String>,
    exposure_ms: Option<f64>,
    roi: Option<Vec<u32>>,
    output: &Path,
) -> Result<()> {
    let mut camera = open_camera(config).await?;
    let result = snap_with(&mut camera, binning, pixel_type, exposure_ms, roi, output).await;
    camera.shutdown().await.context("shutting down camera")?;
    result
}

async fn snap_with(
    camera: &mut SaperaGigE,
    binning: Option<u32>,
    pixel_type: Option<String>,
    exposure_ms: Option<f64>,
    roi: Option<Vec<u32>>,
    output: &Path,
) -> Result<()> {
    if let Some(binning) = binning {
        camera.set_binning(binning).await.context("setting binning")?;
    }
    if let Some(pixel_type) = pixel_type {
        camera
            .set_property(names::PIXEL_TYPE, PropertyValue::from(pixel_type.as_str()))
            .await
            .context("setting pixel type")?;
    }
    if let Some(exposure_ms) = exposure_ms {
        camera
            .set_exposure(exposure_ms)
            .await
            .context("setting exposure")?;
    }
    if let Some(roi) = roi {
        let [x, y, width, height] = roi[..] else {
            bail!("--roi takes exactly four values");
        };
        camera
            .set_roi(Roi::new(x, y, width, height))
            .context("setting ROI")?;
    }

    let started = Instant::now();
    camera.snap_image().await.context("snapping image")?;
    let pixels = camera.get_image_buffer()?.to_vec();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    tokio::fs::write(output, &pixels)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    let roi = camera.roi();
    let exposure_ms = camera.exposure().await?;
    let metadata = json!({
        "width": camera.image_width(),
        "height": camera.image_height(),
        "bytes_per_pixel": camera.image_bytes_per_pixel(),
        "bit_depth": camera.bit_depth(),
        "binning": camera.binning(),
        "exposure_ms": exposure_ms,
        "roi": { "x": roi.x, "y": roi.y, "width": roi.width, "height": roi.height },
        "snap_ms": elapsed_ms,
        "properties": camera.properties().snapshot(),
    });
    let metadata_path = output.with_extension("json");
    tokio::fs::write(&metadata_path, serde_json::to_vec_pretty(&metadata)?)
        .await
        .with_context(|| format!("writing {}", metadata_path.display()))?;

    println!(
        "Wrote {} bytes ({}x{}, {} bit) to {}",
        pixels.len(),
        camera.image_width(),
        camera.image_height(),
        camera.bit_depth(),
        output.display()
    );
    Ok(())
}

async fn stream(
    config: &AppConfig,
    frames: u64,
    interval_ms: f64,
    stop_on_overflow: bool,
) -> Result<()> {
    let mut camera = open_camera(config).await?;
    let settings = SequenceSettings {
        num_images: Some(frames),
        interval_ms,
        stop_on_overflow,
    };

    let started = Instant::now();
    let mut rx = camera
        .start_sequence_acquisition(settings)
        .await
        .context("starting sequence")?;

    let mut received = 0u64;
    let mut gaps = 0u64;
    let mut mean_sum = 0.0;
    let mut expected = 0u64;
    while let Some(frame) = rx.recv().await {
        if frame.frame_number != expected {
            gaps += 1;
        }
        expected = frame.frame_number + 1;
        mean_sum += frame.mean();
        received += 1;
    }
    let elapsed = started.elapsed().as_secs_f64();

    let stopped = camera.stop_sequence_acquisition().await;
    camera.shutdown().await.context("shutting down camera")?;
    stopped.context("sequence acquisition")?;

    let fps = if elapsed > 0.0 {
        received as f64 / elapsed
    } else {
        0.0
    };
    println!("Frames received: {received}");
    println!("Numbering gaps:  {gaps}");
    println!("Elapsed:         {elapsed:.3} s");
    println!("Frame rate:      {fps:.1} fps");
    if received > 0 {
        println!("Mean intensity:  {:.1}", mean_sum / received as f64);
    }
    Ok(())
}

async fn properties(config: &AppConfig) -> Result<()> {
    let mut camera = open_camera(config).await?;

    let mut table = Vec::new();
    for name in camera.properties().names() {
        let value = camera.get_property(&name).await?;
        let meta = camera.properties().require(&name)?.metadata();
        table.push(json!({
            "name": name,
            "value": value,
            "type": meta.dtype.to_string(),
            "units": meta.units,
            "read_only": meta.read_only,
            "min": meta.min_value,
            "max": meta.max_value,
            "allowed": meta.allowed_values,
        }));
    }
    camera.shutdown().await.context("shutting down camera")?;

    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}
