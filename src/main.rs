//! Storage Picker CLI
//!
//! Offline driver for the placement selector: summarize a topology snapshot,
//! simulate a placement against it, or watch a topology file and log every
//! refreshed snapshot.

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_picker::{
    JsonFileSource, PickerConfig, PlacementRequest, PlacementSelector, RawTopology,
    TopologyRefresher, TopologyStore, TopologySummary, TopologyView, ViewOptions,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Picker - choose storage nodes for object replicas
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "PICKER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Override the general utilization cutoff
    #[arg(long, env = "MAX_UTILIZATION_PCT", global = true)]
    max_utilization_pct: Option<f64>,

    /// Override the operator utilization cutoff
    #[arg(long, env = "MAX_OPERATOR_UTILIZATION_PCT", global = true)]
    max_operator_utilization_pct: Option<f64>,

    /// Override the allowed report age in milliseconds
    #[arg(long, env = "LAG_MS", global = true)]
    lag_ms: Option<u64>,

    /// Keep reports of any age
    #[arg(long, global = true, conflicts_with = "lag_ms")]
    no_lag: bool,

    /// Draw replicas from datacenters in order instead of spreading them
    #[arg(long, global = true)]
    single_dc: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct InputArgs {
    /// Topology JSON file, or `-` for standard input
    #[arg(long, short, default_value = "-")]
    input: String,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize a topology snapshot
    Topology {
        #[command(flatten)]
        input: InputArgs,

        /// Summarize the operator view
        #[arg(long)]
        operator: bool,
    },

    /// Simulate a placement against a topology snapshot
    Choose {
        #[command(flatten)]
        input: InputArgs,

        /// Number of replicas
        #[arg(long, short, default_value_t = 2)]
        replicas: usize,

        /// Object size in bytes
        #[arg(long, short)]
        size: u64,

        /// Select from the operator view
        #[arg(long)]
        operator: bool,
    },

    /// Refresh from a topology file on an interval until Ctrl-C
    Watch {
        /// Topology JSON file
        #[arg(long, short)]
        input: PathBuf,

        /// Refresh interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = load_config(&args)?;

    match args.command {
        Command::Topology { input, operator } => {
            let view = load_view(&input.input, &config)?;
            let summary = TopologySummary::for_view(&view, operator);

            if input.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", render_table(&summary));
            }
            for rejected in view.validation_errors.iter() {
                warn!("Rejected record {}", rejected);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Choose {
            input,
            replicas,
            size,
            operator,
        } => {
            let view = Arc::new(load_view(&input.input, &config)?);
            let mut request = PlacementRequest::new(replicas, size);
            request.operator = operator;

            let selector = PlacementSelector::new(&config);
            match selector.choose(&request, &view) {
                Ok(decision) => {
                    if input.json {
                        println!("{}", serde_json::to_string_pretty(&decision)?);
                    } else {
                        for (slot, node) in decision.chosen.iter().enumerate() {
                            println!(
                                "{:>3}  {:<24} {:<12} {:>16}",
                                slot, node.id, node.datacenter, node.available_bytes
                            );
                        }
                        print!(
                            "{}",
                            render_table(&TopologySummary::new(&view, Some(&decision.stats)))
                        );
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => match e.placement() {
                    Some(placement) => {
                        if input.json {
                            println!("{}", serde_json::to_string_pretty(placement)?);
                        } else {
                            println!("{}", placement);
                            print!(
                                "{}",
                                render_table(&TopologySummary::new(&view, Some(&placement.stats)))
                            );
                        }
                        Ok(ExitCode::from(2))
                    }
                    None => Err(e.into()),
                },
            }
        }

        Command::Watch { input, interval_ms } => {
            let mut config = config;
            if let Some(ms) = interval_ms {
                config.refresh_interval_ms = ms;
            }
            config.validate()?;
            watch(input, config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// =============================================================================
// Configuration & Input
// =============================================================================

fn load_config(args: &Args) -> anyhow::Result<PickerConfig> {
    let mut config = match &args.config {
        Some(path) => PickerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PickerConfig::default(),
    };

    if let Some(pct) = args.max_utilization_pct {
        config.max_utilization_pct = pct;
    }
    if let Some(pct) = args.max_operator_utilization_pct {
        config.max_operator_utilization_pct = pct;
    }
    if let Some(ms) = args.lag_ms {
        config.lag_ms = Some(ms);
    }
    if args.no_lag {
        config.lag_ms = None;
    }
    if args.single_dc {
        config.multi_dc = false;
    }

    config.validate()?;
    Ok(config)
}

fn load_view(input: &str, config: &PickerConfig) -> anyhow::Result<TopologyView> {
    let raw = if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading topology from stdin")?;
        RawTopology::from_json_str(&buf)?
    } else {
        let file = std::fs::File::open(Path::new(input))
            .with_context(|| format!("opening topology {}", input))?;
        RawTopology::from_reader(std::io::BufReader::new(file))?
    };

    let options = ViewOptions::from_config(config, chrono::Utc::now());
    Ok(TopologyView::build(&raw, &options))
}

// =============================================================================
// Watch
// =============================================================================

async fn watch(input: PathBuf, config: PickerConfig) -> anyhow::Result<()> {
    let store = TopologyStore::new();
    let source = Arc::new(JsonFileSource::new(input));
    let refresher = Arc::new(TopologyRefresher::new(source, store.clone(), config));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut events = store.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.is_problem() {
                warn!("{}", event);
            } else {
                info!("{}", event);
            }
        }
    });

    let handle = tokio::spawn(refresher.run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    handle.await.context("refresh loop panicked")?;

    Ok(())
}

// =============================================================================
// Rendering
// =============================================================================

fn render_table(summary: &TopologySummary) -> String {
    let mut out = format!(
        "{:<16} {:>8} {:>8} {:>8} {:>16} {:>6} {:>8} {:>6}\n",
        "DATACENTER", "REPORTED", "GENERAL", "OPERATOR", "AVAILABLE", "IN-USE", "CONSUMED", "CHOSEN"
    );
    for dc in &summary.datacenters {
        out.push_str(&format!(
            "{:<16} {:>8} {:>8} {:>8} {:>16} {:>6} {:>8} {:>6}\n",
            dc.name,
            dc.reported,
            dc.general_nodes,
            dc.operator_nodes,
            dc.available_bytes,
            if dc.in_use { "yes" } else { "no" },
            dc.consumed,
            dc.chosen,
        ));
    }
    let t = &summary.totals;
    out.push_str(&format!(
        "{:<16} {:>8} {:>8} {:>8} {:>16} {:>6} {:>8} {:>6}\n",
        "TOTAL",
        t.reported,
        t.general_nodes,
        t.operator_nodes,
        t.available_bytes,
        t.datacenters_in_use,
        t.consumed,
        t.chosen,
    ));
    if t.rejected_records > 0 || t.stale_records > 0 {
        out.push_str(&format!(
            "rejected: {}  stale: {}\n",
            t.rejected_records, t.stale_records
        ));
    }
    out
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
