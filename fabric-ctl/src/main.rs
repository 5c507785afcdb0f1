use anyhow::Context;
use clap::{Parser, Subcommand};
use fabric_ctl::sim::{FabricSim, SimSouthbound};
use fabric_ctl::{Controller, ControllerConfig, runtime};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fabric-ctl")]
#[command(about = "Shortest-path IP/ARP controller for fat-tree fabrics")]
struct Args {
    /// Controller configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller against a simulated fat-tree
    Sim {
        /// Switch port count
        #[arg(short, long, default_value = "4")]
        k: usize,

        /// Number of host pairs to resolve and ping
        #[arg(long, default_value = "4")]
        pairs: usize,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = match &args.log_filter {
        Some(filter) => EnvFilter::try_new(filter)?,
        None => EnvFilter::from_default_env().add_directive("fabric_ctl=info".parse()?),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ControllerConfig::default(),
    };

    match args.command {
        Commands::Sim { k, pairs } => run_sim(config, k, pairs).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_sim(config: ControllerConfig, k: usize, pairs: usize) -> anyhow::Result<()> {
    let sim = FabricSim::new(k)?;
    info!(
        k = sim.tree().k(),
        switches = sim.tree().switch_count(),
        hosts = sim.hosts().len(),
        "Starting simulated fabric"
    );

    let southbound = Arc::new(SimSouthbound::new(sim.clone()));
    let (handle, task) = runtime::spawn(Controller::new(config, Arc::clone(&southbound)));

    for event in sim.bootstrap_events() {
        handle.submit(event)?;
    }

    let hosts = sim.hosts();
    let selected: Vec<_> = (0..pairs.min(hosts.len()))
        .map(|i| (&hosts[i], &hosts[(i + hosts.len() / 2) % hosts.len()]))
        .collect();
    for (a, b) in &selected {
        for event in sim.resolve_and_ping(a, b) {
            handle.submit(event)?;
        }
    }
    drop(handle);

    let controller = task.join().await?;
    info!(
        links = controller.topology().link_count(),
        hosts = controller.hosts().len(),
        rules = southbound.rule_count(),
        "Simulation finished"
    );

    let mut failed = 0;
    for (a, b) in &selected {
        for (from, to) in [(a, b), (b, a)] {
            match southbound.trace(from.dpid, to.ip) {
                Ok(hops) => {
                    let path: Vec<String> = hops.iter().map(|d| d.raw().to_string()).collect();
                    println!("{} -> {}: {}", from.name, to.name, path.join(" -> "));
                }
                Err(e) => {
                    warn!(from = %from.name, to = %to.name, error = %e, "Trace failed");
                    failed += 1;
                }
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} traces failed");
    }
    Ok(())
}
