use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use bnb_cluster::config::{LordConfig, VassalConfig};
use bnb_cluster::lord::{JobOutcome, LordServer};
use bnb_cluster::search::tsp::{City, TspNode, TspProblem};
use bnb_cluster::search::TypeRegistry;
use bnb_cluster::vassal::VassalRunner;

#[derive(Parser, Debug)]
#[command(name = "bnb-cluster")]
#[command(version)]
#[command(about = "Distributed branch-and-bound search with work stealing")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the lord, wait for vassals, run one TSP job and print the result
    Lord(LordArgs),

    /// Start a vassal worker and register it with the lord
    Vassal(VassalArgs),
}

#[derive(Parser, Debug)]
struct LordArgs {
    /// Address to listen on for vassal RPCs
    #[arg(long, default_value = "127.0.0.1:50200")]
    listen: SocketAddr,

    /// Number of vassals to wait for before launching the job
    #[arg(long, default_value = "2")]
    vassals: usize,

    /// JSON file holding the city list (fields x, y, id with ids 0..n)
    #[arg(long, conflicts_with_all = ["random_cities", "seed"])]
    instance: Option<PathBuf>,

    /// Generate a random instance with this many cities instead
    #[arg(long, default_value = "12")]
    random_cities: usize,

    /// Seed for the generated instance
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Initial pruning bound; defaults to unbounded
    #[arg(long)]
    initial_bound: Option<f64>,

    /// Extra frontier nodes kept lord-side at launch as the steal reserve
    #[arg(long, default_value = "0")]
    spare_nodes: usize,

    /// Write the final stats report to this file
    #[arg(long)]
    stats_file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct VassalArgs {
    /// Unique id of this vassal
    #[arg(long, default_value = "1")]
    id: u64,

    /// Address to listen on for lord RPCs
    #[arg(long, default_value = "127.0.0.1:50201")]
    listen: SocketAddr,

    /// Host the lord should use to dial back, if it differs from the
    /// listen address
    #[arg(long)]
    advertise_host: Option<String>,

    /// Lord address in host:port form
    #[arg(long, default_value = "127.0.0.1:50200")]
    lord: String,

    /// Parallel evaluation slots
    #[arg(long, default_value = "1")]
    slots: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Lord(lord_args) => run_lord(lord_args).await,
        Commands::Vassal(vassal_args) => run_vassal(vassal_args).await,
    }
}

fn load_problem(args: &LordArgs) -> Result<TspProblem, Box<dyn Error>> {
    let cities = match &args.instance {
        Some(path) => {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str::<Vec<City>>(&data)?
        }
        None => {
            let mut rng = StdRng::seed_from_u64(args.seed);
            (0..args.random_cities)
                .map(|i| City::new(rng.gen_range(0..1000), rng.gen_range(0..1000), i as i32))
                .collect()
        }
    };
    if cities.is_empty() {
        return Err("instance has no cities".into());
    }
    let mut ids: Vec<i32> = cities.iter().map(|c| c.id).collect();
    ids.sort_unstable();
    if ids.iter().enumerate().any(|(i, &id)| id != i as i32) {
        return Err("city ids must be 0..n".into());
    }
    Ok(TspProblem::new(cities))
}

async fn run_lord(args: LordArgs) -> Result<(), Box<dyn Error>> {
    let problem = Arc::new(load_problem(&args)?);
    tracing::info!(
        num_cities = problem.num_cities(),
        vassals = args.vassals,
        "Lord starting"
    );

    let mut config = LordConfig::new(args.listen).with_min_nodes_to_save(args.spare_nodes);
    if let Some(path) = args.stats_file {
        config = config.with_stats_path(path);
    }

    let server = LordServer::new(config, TypeRegistry::with_builtin());
    let serve_task = {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                tracing::error!(error = %e, "Lord server exited");
            }
        })
    };

    let bound = args.initial_bound.unwrap_or(f64::MAX);
    let job_id = server
        .run_job_when_enough_vassals(Box::new(TspNode::root()), problem, bound, args.vassals)
        .await?;

    let outcome = server.wait_for_outcome(job_id).await?;
    serve_task.abort();
    match outcome {
        JobOutcome::Completed { best_cost } => {
            println!("job {} completed, best cost {:.3}", job_id, best_cost);
            Ok(())
        }
        JobOutcome::Failed { reason } => Err(format!("job {} failed: {}", job_id, reason).into()),
    }
}

async fn run_vassal(args: VassalArgs) -> Result<(), Box<dyn Error>> {
    let mut config = VassalConfig::new(args.id, args.listen, args.lord).with_num_slots(args.slots);
    if let Some(host) = args.advertise_host {
        config.advertise_host = host;
    }

    let runner = VassalRunner::new(config, TypeRegistry::with_builtin());
    let serve_task = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.serve().await })
    };

    runner.register_with_lord().await?;

    // serve() only returns on a fatal server error
    serve_task.await??;
    Ok(())
}
