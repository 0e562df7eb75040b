use anyhow::{Context, Result};
use clap::Parser;
use portico_api::{ApiState, CommandReloader, ControlApi};
use portico_config::{load_config, FileConfig};
use portico_core::{CredentialStore, MetricsAggregator, MetricsStore, RouteRegistry, RouteStore};
use portico_crypto::PorticoCrypto;
use portico_fleet::{Fleet, FleetSettings, HttpHealthProbe, HttpProvisioner, ProxyTable};
use portico_memory::Memory;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Portico: control plane for an nginx-fronted reverse proxy fleet")]
struct Args {
    /// Path to config file (yaml/json/toml)
    #[arg(short, long, default_value = "./config.yaml")]
    config: String,
    /// Print a password_hash/salt pair for the config file and exit
    #[arg(long, value_name = "PASSWORD")]
    hash_password: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(plain) = args.hash_password {
        let (hash, salt) = PorticoCrypto::hash_password(&plain, None);
        println!("password_hash: {hash}");
        println!("salt: {salt}");
        return Ok(());
    }

    let file = load_config(&args.config)?;
    let guard = portico_tracing::init(
        file.service_name(),
        Some(&file.tracing.otlp_endpoint),
        &file.server.logging_level,
        &file.server.logging_format,
    )?;
    info!(config = %args.config, "portico starting");

    let result = run(file).await;
    if let Err(e) = &result {
        error!("portico stopped: {e:#}");
    }
    guard.shutdown();
    result
}

fn credential_store(file: &FileConfig) -> CredentialStore {
    let ttl = Duration::from_secs(file.auth.token_ttl_sec);
    if file.auth.password_hash.is_empty() {
        warn!("auth.password is set in plain text; consider auth.password_hash");
        CredentialStore::from_plain(&file.auth.username, &file.auth.password, ttl, file.auth.max_tokens)
    } else {
        CredentialStore::new(
            &file.auth.username,
            &file.auth.password_hash,
            &file.auth.salt,
            ttl,
            file.auth.max_tokens,
        )
    }
}

async fn run(file: FileConfig) -> Result<()> {
    let memory = Arc::new(
        Memory::open(&file.memory.engine, &file.memory.path)
            .with_context(|| format!("open {} store at {}", file.memory.engine, file.memory.path))?,
    );
    if !memory.is_persistent() {
        warn!("memory engine is not persistent; state is lost on restart");
    }

    let routes = Arc::new(RouteRegistry::load(memory.clone())?);
    let metrics = Arc::new(MetricsAggregator::load(memory.clone())?);
    let table = Arc::new(ProxyTable::load(memory.clone())?);

    let provisioner = HttpProvisioner::new(
        &file.fleet.provisioner_url,
        Duration::from_secs(file.fleet.provision_timeout_sec),
    )?;
    if file.fleet.provisioner_url.is_empty() {
        warn!("fleet.provisioner_url is not set; proxy deployments will fail");
    }
    let probe = HttpHealthProbe::new(
        &file.fleet.health_path,
        Duration::from_millis(file.fleet.health_timeout_ms),
    )?;
    let fleet = Fleet::new(
        table,
        Arc::new(provisioner),
        Arc::new(probe),
        FleetSettings {
            provision_timeout: Duration::from_secs(file.fleet.provision_timeout_sec),
            max_misses: file.fleet.max_misses,
        },
    );
    let recovered = fleet.recover_interrupted();
    if recovered > 0 {
        warn!("{recovered} proxies were left deploying by a previous run");
    }

    let reloader = CommandReloader::new(
        &file.dataplane.reload_command,
        Duration::from_secs(file.dataplane.reload_timeout_sec),
    )?;

    let api = Arc::new(ControlApi::new(
        &file.server.name,
        &file.server.cors_origin,
        ApiState {
            routes: routes.clone(),
            metrics: metrics.clone(),
            fleet: fleet.clone(),
            auth: Arc::new(credential_store(&file)),
            reloader: Arc::new(reloader),
        },
    )?);

    let health_task = tokio::spawn(
        fleet.clone().run_health_checks(Duration::from_secs(file.fleet.health_interval_sec)),
    );

    let flush_every = Duration::from_secs(file.memory.flush_interval_sec);
    let (flush_routes, flush_metrics) = (routes.clone(), metrics.clone());
    let flush_task = tokio::spawn(async move {
        loop {
            sleep(flush_every).await;
            flush(flush_routes.as_ref(), flush_metrics.as_ref());
        }
    });

    let addr: SocketAddr = format!("{}:{}", file.server.host, file.server.port)
        .parse()
        .with_context(|| format!("bad listen address {}:{}", file.server.host, file.server.port))?;
    let mut server_task = tokio::spawn(api.serve(addr));

    let served = tokio::select! {
        res = &mut server_task => match res {
            Ok(res) => res,
            Err(e) => Err(e.into()),
        },
        _ = signal::ctrl_c() => {
            info!("shutting down");
            server_task.abort();
            Ok(())
        }
    };

    health_task.abort();
    flush_task.abort();
    flush(routes.as_ref(), metrics.as_ref());
    info!(in_flight = fleet.in_flight(), "state flushed");
    served
}

/// Writes pending cursor and counter changes; failures are retried next tick.
fn flush(routes: &dyn RouteStore, metrics: &dyn MetricsStore) {
    if let Err(e) = routes.flush() {
        error!("route flush failed: {e}");
    }
    if let Err(e) = metrics.flush() {
        error!("metrics flush failed: {e}");
    }
}
