use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use swarmweave::engine::Simulation;
use swarmweave::factory::{AgentFactory, AgentHandles};
use swarmweave::providers::map::GridMap;
use swarmweave::transport::InMemoryBroadcast;
use swarmweave::types::{AgentId, SwarmContext, TilePos};
use swarmweave::SwarmConfig;

#[derive(Parser)]
#[command(name = "swarmweave")]
#[command(about = "Swarm coordination middleware demo", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Explore a grid with a simulated swarm.
    Run {
        #[arg(long, default_value_t = 4)]
        agents: u32,
        #[arg(long, default_value_t = 60)]
        ticks: u64,
        #[arg(long, default_value_t = 12)]
        width: i32,
        #[arg(long, default_value_t = 8)]
        height: i32,
        #[arg(long, help = "Number of partitions (defaults to one per agent)")]
        partitions: Option<u32>,
        #[arg(long, help = "TOML or YAML config file; SWARM_* env vars otherwise")]
        config: Option<PathBuf>,
        #[arg(long, help = "Agent to take out of the swarm mid-run")]
        fail_agent: Option<AgentId>,
        #[arg(long, default_value_t = 20, help = "Tick at which --fail-agent drops out")]
        fail_at: u64,
    },
}

struct RunArgs {
    agents: u32,
    ticks: u64,
    width: i32,
    height: i32,
    partitions: Option<u32>,
    config: Option<PathBuf>,
    fail_agent: Option<AgentId>,
    fail_at: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            agents,
            ticks,
            width,
            height,
            partitions,
            config,
            fail_agent,
            fail_at,
        } => {
            run_swarm(RunArgs {
                agents,
                ticks,
                width,
                height,
                partitions,
                config,
                fail_agent,
                fail_at,
            })
            .await?
        }
    }

    Ok(())
}

async fn run_swarm(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => SwarmConfig::from_file(path)?,
        None => SwarmConfig::from_env()?,
    };

    if args.agents == 0 {
        bail!("--agents must be at least 1");
    }
    if i64::from(args.agents) > i64::from(args.width) * i64::from(args.height) {
        bail!(
            "{} agents do not fit on a {}x{} grid",
            args.agents,
            args.width,
            args.height
        );
    }

    let partitions = args.partitions.unwrap_or(args.agents);
    let map = GridMap::new(args.width, args.height);
    let swarm = SwarmContext::striped(map.clone(), partitions);
    let factory = AgentFactory::new(config.clone(), map, partitions);
    let mut simulation = Simulation::new(
        swarm,
        Box::new(InMemoryBroadcast::from_config(&config.transport)),
    );

    let mut handles: BTreeMap<AgentId, AgentHandles> = BTreeMap::new();
    for id in 0..args.agents {
        let start = TilePos::new(id as i32 % args.width, id as i32 / args.width);
        let spawned = factory.explorer(id, start)?;
        handles.insert(id, spawned.handles);
        simulation.add_agent(spawned.agent)?;
    }

    println!(
        "Running {} agents over {} partitions for {} ticks",
        args.agents, partitions, args.ticks
    );

    let interval = Duration::from_millis(config.tick_interval_ms);
    match args.fail_agent {
        Some(victim) if args.fail_at < args.ticks => {
            simulation.run_paced(args.fail_at, interval).await;
            if simulation.remove_agent(victim).is_some() {
                println!("Agent {} dropped out at tick {}", victim, simulation.tick());
            }
            simulation
                .run_paced(args.ticks - args.fail_at, interval)
                .await;
        }
        _ => {
            simulation.run_paced(args.ticks, interval).await;
        }
    }

    println!("\nFinished at tick {}", simulation.tick());
    for agent in simulation.agents() {
        let status = if simulation.is_halted(agent.id()) {
            "halted"
        } else {
            "running"
        };
        let visited = handles
            .get(&agent.id())
            .map(|h| h.visited.len())
            .unwrap_or(0);
        println!(
            "  agent {} [{}]: partition {}, at {}, knows {} visited vertices",
            agent.id(),
            status,
            agent.partition(),
            agent.position(),
            visited
        );
        for (component, dump) in agent.scheduler().debug_dump() {
            println!("      {}: {}", component, dump);
        }
    }

    Ok(())
}
