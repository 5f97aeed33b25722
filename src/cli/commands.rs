//! Command implementations for the shardgate CLI.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::{Deployment, GatewayConfig};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::gateway::{AgentFault, MemoryGateway};
use crate::service::LoadBalancer;
use crate::types::{ObjectVector, SearchConfig, SearchRequest};

/// Execute a CLI command.
pub fn execute_command(args: ShardgateArgs) -> Result<()> {
    match &args.command {
        Command::Simulate(simulate_args) => simulate(simulate_args.clone(), &args),
        Command::CheckConfig(check_args) => check_config(check_args.clone(), &args),
    }
}

/// Build an in-memory cluster, load random vectors and run queries through
/// the load balancer.
fn simulate(args: SimulateArgs, cli_args: &ShardgateArgs) -> Result<()> {
    let config = simulation_config(&args)?;
    if args.agents == 0 {
        return Err(GatewayError::invalid_argument("at least one agent is required"));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(run_simulation(&args, config))?;

    output_result("Simulation finished", &report, cli_args)
}

fn simulation_config(args: &SimulateArgs) -> Result<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_json_file(path)?,
        None => GatewayConfig::default(),
    };
    config = config.with_deployment(Deployment::from(args.deployment));
    if let Some(ratio) = args.ratio {
        config = config.with_success_ratio(ratio);
    }
    if config.deployment == Deployment::Replicated {
        config = config.with_replica(args.agents.max(1));
    }
    config.validate()?;
    Ok(config)
}

async fn run_simulation(args: &SimulateArgs, config: GatewayConfig) -> Result<SimulationReport> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let dimension = args.dimension.max(config.min_vector_dimension);

    let gateway = MemoryGateway::new(args.agents).with_write_replica(config.replica);
    let objects = (0..args.objects)
        .map(|i| ObjectVector::new(format!("obj-{i:06}"), random_vector(&mut rng, dimension)));
    match config.deployment {
        Deployment::Sharded => gateway.seed_sharded(objects),
        Deployment::Replicated => gateway.seed_replicated(objects),
    }
    for name in gateway.agent_names().into_iter().take(args.fail_agents) {
        tracing::info!(agent = %name, "injecting unavailable fault");
        gateway.set_fault(&name, AgentFault::error(ErrorCode::Unavailable));
    }

    let deployment = format!("{:?}", config.deployment).to_lowercase();
    let lb = LoadBalancer::new(Arc::new(gateway), config)?;

    let mut summary = SearchSummary::default();
    let mut sample_results = None;
    let mut total_latency = Duration::ZERO;
    let started = Instant::now();
    for _ in 0..args.queries {
        let request = SearchRequest {
            vector: random_vector(&mut rng, dimension),
            config: SearchConfig::new(args.top_k).with_algorithm(args.algorithm()),
        };
        let query_started = Instant::now();
        let result = lb.search(&lb.context(), request).await;
        let latency = query_started.elapsed();
        total_latency += latency;
        summary.max_latency_ms = summary.max_latency_ms.max(latency.as_secs_f64() * 1000.0);
        summary.total += 1;
        match result {
            Ok(response) => {
                summary.succeeded += 1;
                sample_results.get_or_insert(response.results);
            }
            Err(err) => {
                summary.failed += 1;
                summary.errors.push(err.to_string());
            }
        }
    }
    let elapsed = started.elapsed().as_secs_f64();
    if summary.total > 0 {
        summary.average_latency_ms = total_latency.as_secs_f64() * 1000.0 / summary.total as f64;
    }
    if elapsed > 0.0 {
        summary.queries_per_second = summary.total as f64 / elapsed;
    }

    let ctx = lb.context();
    let index_count = lb.index_info(&ctx).await?;
    let statistics = lb.index_statistics(&ctx).await?;

    Ok(SimulationReport {
        agents: args.agents,
        objects: args.objects,
        dimension,
        deployment,
        queries: summary,
        sample_results: sample_results.unwrap_or_default(),
        index_count,
        statistics,
        metrics: lb.metrics(),
    })
}

fn random_vector(rng: &mut StdRng, dimension: usize) -> Vec<f32> {
    (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect()
}

/// Validate a configuration file.
fn check_config(args: CheckConfigArgs, cli_args: &ShardgateArgs) -> Result<()> {
    let path = args.path.to_string_lossy().to_string();
    let loaded = GatewayConfig::from_json_file(&args.path).and_then(|config| {
        config.validate()?;
        Ok(config)
    });

    let result = match loaded {
        Ok(config) => ConfigCheckResult {
            path,
            valid: true,
            error: None,
            config: Some(config),
        },
        Err(err) => ConfigCheckResult {
            path,
            valid: false,
            error: Some(err.to_string()),
            config: None,
        },
    };
    let valid = result.valid;
    output_result("Configuration check", &result, cli_args)?;
    if valid {
        Ok(())
    } else {
        Err(GatewayError::invalid_config(format!(
            "{} is not a valid configuration",
            args.path.display()
        )))
    }
}
