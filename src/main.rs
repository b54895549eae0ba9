//! CLI Entry Point for transport_daq
//!
//! Provides command-line interface for:
//! - Running the full pipeline against a simulated sweep source
//! - Checking a configuration file
//!
//! # Usage
//!
//! Simulate three cycles across a 1 kΩ resistor and export the results:
//! ```bash
//! transport_daq simulate --cycles 3 --resistance 1000 --csv out/derived.csv
//! ```
//!
//! Validate a configuration file:
//! ```bash
//! transport_daq check-config config/transport.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use transport_daq::core::{DerivedRecord, RawSample};
use transport_daq::data::recorder::SegmentRecorder;
use transport_daq::data::storage::CsvTransportWriter;
use transport_daq::logging;
use transport_daq::sim::{SimulatorConfig, SweepSimulator};
use transport_daq::store::{append_typed, read_all};
use transport_daq::{MemoryStore, PipelineConfig, SampleStore, StreamPaths, StreamingOrchestrator};

#[derive(Parser)]
#[command(name = "transport_daq")]
#[command(about = "Sweep segmentation and transport extraction for cryostat measurements", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run recorder and orchestrator against a simulated sweep source
    Simulate {
        /// Pipeline config file (defaults to config/transport.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of off/up/down/hold cycles
        #[arg(long, default_value_t = 3)]
        cycles: usize,

        /// Simulated device resistance in Ohm
        #[arg(long, default_value_t = 1000.0)]
        resistance: f64,

        /// Peak noise on raw readings
        #[arg(long, default_value_t = 0.0)]
        noise: f64,

        /// Stream key
        #[arg(long, default_value = "sim")]
        stream: String,

        /// Export derived records to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print derived records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Path to the TOML file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            cycles,
            resistance,
            noise,
            stream,
            csv,
            json,
        } => {
            let config = match config {
                Some(path) => PipelineConfig::load_from(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => PipelineConfig::load()?,
            };
            let sim = SimulatorConfig {
                resistance,
                noise,
                voltage_channel: config.extractor.voltage_channel.clone(),
                current_channel: config.extractor.current_channel.clone(),
                ..SimulatorConfig::default()
            };
            simulate(config, sim, cycles, stream, csv, json).await
        }
        Commands::CheckConfig { path } => check_config(path),
    }
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = PipelineConfig::load_from(&path)
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    println!("{} is valid", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn simulate(
    config: PipelineConfig,
    sim_config: SimulatorConfig,
    cycles: usize,
    stream: String,
    csv: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let store = Arc::new(MemoryStore::new());
    let paths = StreamPaths::new(stream);
    let handle =
        StreamingOrchestrator::new(store.clone(), paths.clone(), &config).spawn();

    let mut simulator = SweepSimulator::new(sim_config);
    let mut recorder =
        SegmentRecorder::new(store.clone(), paths.clone(), config.segmenter.clone()).await?;

    for (path, status) in simulator.status_records() {
        append_typed(store.as_ref(), &path, status).await?;
    }
    for _ in 0..cycles {
        publish(store.as_ref(), &paths, simulator.cycle()).await?;
        recorder.drain().await?;
    }
    publish(store.as_ref(), &paths, vec![simulator.closing_sample()]).await?;
    recorder.drain().await?;

    // Wait for the orchestrator to catch up with the recorder
    let segments = store.len(&paths.segments()).await?;
    while store.len(&paths.derived()).await? < segments && !handle.is_finished() {
        tokio::time::sleep(config.orchestrator.poll_interval).await;
    }
    let stats = handle.shutdown().await?;
    tracing::info!(?stats, "Simulation finished");

    let derived: Vec<DerivedRecord> = read_all(store.as_ref(), &paths.derived()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&derived)?);
    } else {
        for record in &derived {
            println!("{}", summary(record));
        }
    }

    if let Some(path) = csv {
        let mut writer = CsvTransportWriter::create(&path, paths.key())?;
        writer.write_all(&derived)?;
        let path = writer.finish()?;
        println!("Wrote {} records to {}", derived.len(), path.display());
    }
    Ok(())
}

async fn publish(store: &dyn SampleStore, paths: &StreamPaths, samples: Vec<RawSample>) -> Result<()> {
    for sample in samples {
        append_typed(store, &paths.raw(), sample).await?;
    }
    Ok(())
}

fn summary(record: &DerivedRecord) -> String {
    match record {
        DerivedRecord::Calibration { segment, offset } => {
            format!("#{segment:<4} calibration      offsets={:?}", offset.offsets)
        }
        DerivedRecord::ConstantVoltage { segment, estimate } => format!(
            "#{segment:<4} constant_voltage R={:.3} ± {:.3} Ohm",
            estimate.r_mean, estimate.u_r
        ),
        DerivedRecord::Sweep {
            segment,
            direction,
            estimate,
        } => format!(
            "#{segment:<4} sweep {:<4}       R_ptp={:.3} R_rms={:.3} R_lin={:.3} I_0={:.3e}",
            direction.as_str(),
            estimate.r_ptp,
            estimate.r_rms,
            estimate.r_lin,
            estimate.i_0
        ),
        DerivedRecord::Skipped { segment, reason } => format!("#{segment:<4} skipped          {reason}"),
    }
}
