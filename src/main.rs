use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use syncmesh::bus::Bus;
use syncmesh::config::NodeConfig;
use syncmesh::ids::RandomIds;
use syncmesh::node::{NodeRuntime, NodeStatus};
use syncmesh::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "syncmesh")]
#[command(version)]
#[command(about = "Simulated cluster nodes with leader election and coordination primitives")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a cluster of simulated nodes on one in-process bus
    Launch(LaunchArgs),
}

#[derive(Parser, Debug)]
struct LaunchArgs {
    /// Number of nodes to start
    #[arg(long, default_value = "3")]
    nodes: usize,

    /// How long to let the cluster run before printing its state
    #[arg(long, default_value = "20")]
    duration_secs: u64,

    /// Length of one protocol time unit in milliseconds
    #[arg(long, default_value = "1000")]
    time_unit_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

async fn run_launch(args: LaunchArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.nodes == 0 {
        return Err("--nodes must be at least 1".into());
    }

    let config = NodeConfig::scaled(args.time_unit_ms);
    config.validate()?;
    let ids = RandomIds::new(config.ephemeral_id_min, config.ephemeral_id_max);
    let bus = Bus::new();

    tracing::info!(
        nodes = args.nodes,
        duration_secs = args.duration_secs,
        time_unit_ms = args.time_unit_ms,
        "Launching simulated cluster"
    );

    let mut nodes = Vec::with_capacity(args.nodes);
    for _ in 0..args.nodes {
        nodes.push(NodeRuntime::new(config.clone(), bus.clone(), &ids)?);
    }
    for node in &nodes {
        node.init()?;
    }

    let shutdown = install_shutdown_handler();
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {}
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested, printing current state");
        }
    }

    let mut statuses = Vec::with_capacity(nodes.len());
    for node in &nodes {
        statuses.push(node.status().await);
    }
    print_statuses(&statuses, &args.output, bus.published_count())?;

    for node in &nodes {
        node.stop().await;
    }
    Ok(())
}

fn print_statuses(
    statuses: &[NodeStatus],
    output_format: &OutputFormat,
    published: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(statuses)?);
        }
        OutputFormat::Table => {
            println!("Cluster Status");
            println!("{}", "=".repeat(70));
            println!("Messages published: {}", published);
            println!();
            println!(
                "{:<6} {:<10} {:<10} {:<6} {:<8} {:<6} WORLD",
                "RANK", "EPHEMERAL", "ROLE", "TERM", "LEADER", "TOKEN"
            );
            println!("{}", "-".repeat(70));
            for status in statuses {
                let leader = status
                    .leader_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let token = if status.has_token { "[*]" } else { "" };
                let world = status
                    .world
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                println!(
                    "{:<6} {:<10} {:<10} {:<6} {:<8} {:<6} {{{}}}",
                    status.rank,
                    status.ephemeral_id,
                    status.role.to_string(),
                    status.term,
                    leader,
                    token,
                    world
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("syncmesh=info")),
        )
        .init();

    match args.command {
        Commands::Launch(launch_args) => {
            run_launch(launch_args).await?;
        }
    }

    Ok(())
}
