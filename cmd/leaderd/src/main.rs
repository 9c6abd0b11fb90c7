use clap::Parser;
use pkg_constants::election::STORE_CALL_TIMEOUT_MS;
use pkg_constants::network::DEFAULT_STORE_ADDR;
use pkg_constants::paths::DEFAULT_CANDIDATE_CONFIG;
use pkg_election::{
    Coordinator, CoordinatorExit, ElectionContext, ElectionSettings, step_down_channel,
};
use pkg_state::RemoteStore;
use pkg_types::Candidate;
use pkg_types::config::{CandidateConfigFile, load_config_file};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "leaderd", about = "Campaign for leadership through a coordination store")]
struct Cli {
    /// Identity written under the leader key when this process is elected
    candidate: String,

    /// Coordination store endpoint
    #[arg(long)]
    store: Option<String>,

    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CANDIDATE_CONFIG)]
    config: String,

    /// Key whose presence designates the leader
    #[arg(long)]
    leader_key: Option<String>,

    /// Leadership lease TTL in seconds
    #[arg(long)]
    lease_ttl: Option<u64>,

    /// Seconds between lease renewals
    #[arg(long)]
    renew_interval: Option<u64>,

    /// Keep competing after a lost lease instead of exiting
    #[arg(long)]
    rejoin: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Merge CLI flags over the config file over built-in defaults.
fn build_settings(cli: &Cli, file_cfg: &CandidateConfigFile) -> anyhow::Result<ElectionSettings> {
    let candidate = Candidate::new(cli.candidate.clone())?;
    let mut settings = ElectionSettings::new(candidate);

    if let Some(key) = cli.leader_key.clone().or_else(|| file_cfg.leader_key.clone()) {
        settings = settings.with_leader_key(key);
    }
    if let Some(ttl) = cli.lease_ttl.or(file_cfg.lease_ttl_secs) {
        settings = settings.with_lease_ttl(Duration::from_secs(ttl));
    }
    if let Some(interval) = cli.renew_interval.or(file_cfg.renew_interval_secs) {
        settings = settings.with_renew_interval(Duration::from_secs(interval));
    }
    let call_timeout_ms = file_cfg.call_timeout_ms.unwrap_or(STORE_CALL_TIMEOUT_MS);
    settings = settings
        .with_call_timeout(Duration::from_millis(call_timeout_ms))
        .with_rejoin_after_loss(cli.rejoin || file_cfg.rejoin_after_loss.unwrap_or(false));

    settings.validate()?;
    Ok(settings)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: CandidateConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    let store_addr = cli
        .store
        .clone()
        .or_else(|| file_cfg.store.clone())
        .unwrap_or_else(|| DEFAULT_STORE_ADDR.to_string());
    let settings = build_settings(&cli, &file_cfg)?;

    info!("Starting leaderd");
    info!("  Candidate:       {}", settings.candidate);
    info!("  Store:           {}", store_addr);
    info!("  Leader key:      {}", settings.leader_key);
    info!("  Lease TTL:       {:?}", settings.lease_ttl);
    info!("  Renew interval:  {:?}", settings.renew_interval);
    info!("  Rejoin on loss:  {}", settings.rejoin_after_loss);

    let store = RemoteStore::new(&store_addr, settings.call_timeout)?;
    let ctx = ElectionContext::new(Arc::new(store), settings)?;

    let (handle, step_down) = step_down_channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received; stepping down");
        handle.trigger();
    });

    match Coordinator::new(ctx, step_down).run().await? {
        CoordinatorExit::TermEnded(reason) => info!("Leadership term over: {}", reason),
        CoordinatorExit::Withdrawn => info!("Stopped without holding leadership"),
    }

    Ok(())
}
