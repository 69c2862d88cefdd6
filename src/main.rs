//! RayOS AI Init CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rayos_ai_init::{
    AiInit, AiInitConfig, BootPlan, Decoder, LearningEngine, LogDirectives, LogTelemetry,
    MetricSource, ProcessAdjustments, ProcessManager, RecordingTelemetry, ResourcePolicy, Sampler,
    ScalingBackend, SimulatedMetricSource, StateStore, SysinfoMetricSource, SystemState,
    TelemetrySink,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser)]
#[command(name = "rayos-ai-init")]
#[command(about = "RayOS AI Init - learned boot sequencing and resource policy", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Read metrics from the host instead of simulating them
    #[arg(long)]
    host_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample, boot and keep adjusting until interrupted
    Run {
        /// Seconds between adjustment rounds
        #[arg(short = 'a', long, default_value = "10")]
        adjust_every: u64,

        /// Keep telemetry in memory (telemetry.history events) and summarize it on exit
        #[arg(long)]
        record: bool,
    },

    /// Print the boot plan, resource policy and adjustments for one snapshot
    Plan {
        /// Sampler ticks to run before planning
        #[arg(short = 't', long, default_value = "1")]
        ticks: u32,
    },

    /// Print snapshots as JSON lines
    Sample {
        /// Number of snapshots
        #[arg(short = 'n', long, default_value = "5")]
        count: u32,
    },

    /// Write the default configuration
    InitConfig {
        /// Destination file
        path: PathBuf,
    },
}

#[derive(Serialize)]
struct PlanReport {
    snapshot: SystemState,
    boot_plan: BootPlan,
    resource_policy: ResourcePolicy,
    adjustments: ProcessAdjustments,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        log::info!("Loading config from: {}", config_path.display());
        AiInitConfig::load(config_path)?
    } else {
        AiInitConfig::default()
    };

    let source: Arc<dyn MetricSource> = if cli.host_metrics {
        Arc::new(SysinfoMetricSource::new())
    } else {
        Arc::new(SimulatedMetricSource::new())
    };

    match cli.command {
        Commands::InitConfig { path } => {
            config.save(&path)?;
            println!("✓ Wrote {}", path.display());
        }

        Commands::Sample { count } => {
            let store = Arc::new(StateStore::new(SystemState::initial(chrono::Utc::now())));
            let sampler = Sampler::new(store, source, Arc::new(LogTelemetry));

            for i in 0..count {
                if i > 0 {
                    tokio::time::sleep(config.sampler.interval()).await;
                }
                let state = sampler.tick();
                println!("{}", serde_json::to_string(&state)?);
            }
        }

        Commands::Plan { ticks } => {
            let store = Arc::new(StateStore::new(SystemState::initial(chrono::Utc::now())));
            let sampler = Sampler::new(store.clone(), source, Arc::new(LogTelemetry));
            for _ in 0..ticks {
                sampler.tick();
            }

            let engine = LearningEngine::new(
                Arc::new(ScalingBackend::from_config(&config.models)),
                config.models.clone(),
                Decoder::new(config.catalog(), &config.decoder),
                Arc::new(LogTelemetry),
            )?;
            let snapshot = store.get();

            let report = PlanReport {
                snapshot,
                boot_plan: engine.generate_boot_plan(&snapshot)?,
                resource_policy: engine.generate_resource_policy(&snapshot)?,
                adjustments: engine.process_adjustments(&snapshot)?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Run { adjust_every, record } => {
            let recorder = record.then(|| Arc::new(RecordingTelemetry::from_config(&config.telemetry)));
            let telemetry: Arc<dyn TelemetrySink> = match &recorder {
                Some(recorder) => recorder.clone(),
                None => Arc::new(LogTelemetry),
            };

            let backend = Arc::new(ScalingBackend::from_config(&config.models));
            let mut ai = AiInit::new(config.clone(), source, backend, telemetry)
                .context("AI init failed to start")?;
            ai.start()?;

            // Let the sampler install a live snapshot before planning
            tokio::time::sleep(config.sampler.interval()).await;

            if let Err(e) = ai.boot(&LogDirectives, &LogDirectives) {
                log::error!("Learned boot failed ({}), using static plan", e);
                LogDirectives.launch_plan(ai.fallback_boot_plan());
            }

            let mut ticker = tokio::time::interval(Duration::from_secs(adjust_every.max(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = ai.adjust(&LogDirectives) {
                            log::warn!("Adjustment round failed: {}", e);
                        }
                    }
                }
            }

            log::info!("Shutdown signal received");
            let ticks = ai.shutdown().await?;
            let stats = ai.statistics();

            println!("\n=== AI Init ===");
            println!("Sampler ticks: {}", ticks);
            println!("Inferences: {}", stats.inferences);
            println!("Failures: {}", stats.failures);
            println!("Model refreshes: {}", stats.refreshes);

            if let Some(recorder) = recorder {
                println!("\n=== Telemetry ===");
                println!("State updates: {}", recorder.state_update_count());
                println!("Anomalies: {}", recorder.anomaly_count());
                for kind in recorder.anomalies().iter().rev().take(10) {
                    println!("  {}", kind);
                }
            }
        }
    }

    Ok(())
}
