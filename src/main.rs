use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use blockbuilder_scheduler::api::log_admin_router;
use blockbuilder_scheduler::config::{NodeConfig, SchedulerConfig};
use blockbuilder_scheduler::node::SchedulerNode;
use blockbuilder_scheduler::partition::InMemoryLog;
use blockbuilder_scheduler::scheduler::BlockScheduler;
use blockbuilder_scheduler::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "blockbuilder-scheduler")]
#[command(version)]
#[command(about = "Job-lease scheduler for block builders")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the scheduler against an in-process development log
    Server(ServerArgs),
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to serve the worker API on
    #[arg(long, default_value = "127.0.0.1:8080", env = "BLOCKBUILDER_LISTEN_ADDR")]
    listen_addr: SocketAddr,

    /// Log topic to build blocks from
    #[arg(long, default_value = "ingest", env = "BLOCKBUILDER_TOPIC")]
    topic: String,

    /// Consumer group whose commits mark built ranges
    #[arg(long, default_value = "block-builder", env = "BLOCKBUILDER_CONSUMER_GROUP")]
    consumer_group: String,

    /// Number of partitions of the development log
    #[arg(long, default_value = "4")]
    partitions: i32,

    /// Lease duration in seconds
    #[arg(long, default_value = "300")]
    lease_secs: u64,

    /// Seconds between job-generation sweeps
    #[arg(long, default_value = "60")]
    scheduling_interval_secs: u64,

    /// Seconds to observe worker heartbeats after startup
    #[arg(long, default_value = "30")]
    observation_secs: u64,

    /// Lease expiries before a job is escalated (0 disables escalation)
    #[arg(long, default_value = "5")]
    max_lease_failures: u32,
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler_config = SchedulerConfig::new(args.topic, args.consumer_group)
        .with_lease_time(Duration::from_secs(args.lease_secs))
        .with_scheduling_interval(Duration::from_secs(args.scheduling_interval_secs))
        .with_observation_window(Duration::from_secs(args.observation_secs))
        .with_max_lease_failures(Some(args.max_lease_failures).filter(|&n| n > 0));
    scheduler_config.validate()?;

    let config = NodeConfig::new(args.listen_addr, scheduler_config);

    let log = Arc::new(InMemoryLog::new());
    log.create_topic(&config.scheduler.topic, args.partitions)
        .await;

    tracing::info!(
        addr = %config.listen_addr,
        topic = %config.scheduler.topic,
        consumer_group = %config.scheduler.consumer_group,
        partitions = args.partitions,
        lease_secs = args.lease_secs,
        "Starting block-builder scheduler"
    );

    let scheduler = Arc::new(BlockScheduler::new(config.scheduler.clone(), log.clone()));
    let admin = log_admin_router(
        log,
        config.scheduler.topic.clone(),
        config.scheduler.consumer_group.clone(),
    );

    let shutdown = install_shutdown_handler();
    SchedulerNode::new(config, scheduler)
        .with_routes(admin)
        .run(shutdown)
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
    }

    Ok(())
}
