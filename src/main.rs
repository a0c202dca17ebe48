//! sidekick-daq command-line entry point.
//!
//! ```text
//! sidekick-daq smoke                      # LED + shutter smoke test
//! sidekick-daq sweep --steps 6            # LED brightness sweep 0..255
//! sidekick-daq table led_action_list.csv  # CSV-driven action list
//! sidekick-daq channels                   # list channels and values
//! sidekick-daq                            # interactive menu
//! ```
//!
//! Ctrl-C cancels the active run; the rest state is still applied.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sidekick_daq::config::{HardwareMode, Settings, DEFAULT_CONFIG_PATH};
use sidekick_daq::experiment::{
    ActionPlan, CancelToken, DocumentCollector, LiveTable, LoggingObserver, PlanLoader, Reporter,
    RunEngine, Template,
};
use sidekick_daq::hardware::{CaToolsClient, ChannelRegistry};
use sidekick_daq::metadata::RunMetadataBuilder;

#[derive(Parser, Debug)]
#[command(name = "sidekick-daq", version, about = "Sequenced LED and shutter control for the Sidekick rig")]
struct Cli {
    /// Configuration file (missing file means built-in defaults)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use simulated channels regardless of configuration
    #[arg(long)]
    simulate: bool,

    /// Operator name recorded in the run metadata
    #[arg(long)]
    operator: Option<String>,

    /// Print the run documents as JSON lines when the run ends
    #[arg(long)]
    json: bool,

    /// Do not print the live table
    #[arg(long, short)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// LED + shutter smoke test
    Smoke,
    /// LED brightness sweep from 0 to 255
    Sweep {
        /// Number of evenly spaced points
        #[arg(long)]
        steps: Option<usize>,
        /// Hold at each point, in seconds
        #[arg(long)]
        hold: Option<f64>,
    },
    /// Action list from a CSV file (brightness,duration,shutter)
    Table {
        /// CSV file; defaults to run.action_list from the configuration
        path: Option<PathBuf>,
    },
    /// List channels and their current values
    Channels,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = Arc::new(build_registry(&settings, cli.simulate)?);

    let command = match cli.command.clone() {
        Some(command) => command,
        None => match prompt_menu(&settings)? {
            Some(command) => command,
            None => {
                println!("Invalid choice. Exiting.");
                return Ok(());
            }
        },
    };

    if let Commands::Channels = command {
        return list_channels(&registry).await;
    }

    let (plan, experiment) = build_plan(&command, &settings)?;
    run_plan(&cli, &settings, registry, plan, experiment).await
}

fn build_registry(settings: &Settings, force_simulated: bool) -> Result<ChannelRegistry> {
    let mode = if force_simulated {
        HardwareMode::Simulated
    } else {
        settings.hardware.mode
    };

    let registry = match mode {
        HardwareMode::Simulated => {
            println!("Running in SIMULATION MODE (no EPICS hardware connected).");
            ChannelRegistry::simulated(settings)?
        }
        HardwareMode::Live => {
            let client = CaToolsClient::new(
                &settings.hardware.caput,
                &settings.hardware.caget,
                settings.hardware.timeout(),
            );
            ChannelRegistry::live(settings, Arc::new(client))?
        }
    };
    Ok(registry)
}

fn build_plan(command: &Commands, settings: &Settings) -> Result<(ActionPlan, String)> {
    let experiment = &settings.run.experiment;
    match command {
        Commands::Smoke => Ok((
            PlanLoader::load_fixed(Template::SmokeTest)?,
            format!("{experiment} Shutter Test"),
        )),
        Commands::Sweep { steps, hold } => {
            let hold = match hold {
                Some(secs) => Duration::try_from_secs_f64(*secs)
                    .context("--hold must be a non-negative number of seconds")?,
                None => settings.run.sweep_hold(),
            };
            let template = Template::LinearSweep {
                steps: steps.unwrap_or(settings.run.sweep_steps),
                hold,
            };
            Ok((
                PlanLoader::load_fixed(template)?,
                format!("{experiment} Brightness Sweep"),
            ))
        }
        Commands::Table { path } => {
            let path = path.clone().unwrap_or_else(|| settings.run.action_list.clone());
            let loaded = PlanLoader::load_from_csv(&path)
                .with_context(|| format!("Failed to load action list {}", path.display()))?;
            for skipped in &loaded.skipped {
                println!("Skipping invalid {skipped}");
            }
            Ok((loaded.plan, format!("{experiment} Action Scan")))
        }
        Commands::Channels => bail!("'channels' does not build a plan"),
    }
}

async fn run_plan(
    cli: &Cli,
    settings: &Settings,
    registry: Arc<ChannelRegistry>,
    plan: ActionPlan,
    experiment: String,
) -> Result<()> {
    let operator = cli.operator.as_deref().unwrap_or(&settings.run.operator);
    let metadata = RunMetadataBuilder::new()
        .operator(operator)
        .experiment(&experiment)
        .source(plan.source())
        .build();

    let collector = Arc::new(DocumentCollector::new());
    let mut reporter = Reporter::new().with(Arc::new(LoggingObserver));
    if !cli.quiet {
        reporter.subscribe(Arc::new(LiveTable::stdout()));
    }
    if cli.json {
        reporter.subscribe(collector.clone());
    }

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let engine = RunEngine::new(registry);
    let result = engine
        .run_with_cancel(plan, metadata, &reporter, cancel)
        .await;

    if cli.json {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for doc in collector.documents() {
            serde_json::to_writer(&mut out, &doc)?;
            writeln!(out)?;
        }
    }

    let summary = result.context("Run failed")?;
    if !summary.rest_state_errors.is_empty() {
        bail!(
            "Run {} but the rest state could not be fully applied: {:?}",
            summary.exit_status,
            summary.rest_state_errors
        );
    }
    Ok(())
}

async fn list_channels(registry: &ChannelRegistry) -> Result<()> {
    let snapshot = registry.snapshot().await;
    for name in registry.channel_names() {
        let value = snapshot
            .get(&name)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        let endpoint = registry.describe(&name).unwrap_or_default();
        println!("{name:<22} {value:>10}  {endpoint}");
    }
    Ok(())
}

/// Interactive menu for operators running the tool without arguments.
fn prompt_menu(settings: &Settings) -> Result<Option<Commands>> {
    println!("Options:");
    println!("1. LED + Shutter Test");
    println!("2. LED Brightness Scan (0-255 sweep)");
    println!("3. LED Action Scan (List/Action from CSV)\n");

    let choice = prompt("Select (1, 2, or 3): ")?;
    let command = match choice.as_str() {
        "1" => Some(Commands::Smoke),
        "2" => Some(Commands::Sweep {
            steps: None,
            hold: None,
        }),
        "3" => {
            let default = settings.run.action_list.display().to_string();
            let path = prompt(&format!("Enter CSV filename (default: {default}): "))?;
            let path = if path.is_empty() { default } else { path };
            Some(Commands::Table {
                path: Some(PathBuf::from(path)),
            })
        }
        _ => None,
    };
    Ok(command)
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
