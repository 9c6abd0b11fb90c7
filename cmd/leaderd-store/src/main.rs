use clap::Parser;
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::network::DEFAULT_STORE_PORT;
use pkg_constants::paths::DEFAULT_STORE_CONFIG;
use pkg_constants::state::WATCH_HISTORY_CAPACITY;
use pkg_types::config::{StoreConfigFile, load_config_file};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "leaderd-store", about = "Coordination store for leaderd candidates")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_STORE_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Number of watch events kept for resuming subscribers
    #[arg(long)]
    watch_history: Option<usize>,
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: StoreConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let port = cli.port.or(file_cfg.port).unwrap_or(DEFAULT_STORE_PORT);
    let watch_history = cli
        .watch_history
        .or(file_cfg.watch_history)
        .unwrap_or(WATCH_HISTORY_CAPACITY);
    if watch_history == 0 {
        anyhow::bail!("watch history must be at least 1");
    }

    info!("Starting leaderd-store");
    info!("  Port:           {}", port);
    info!("  Watch history:  {}", watch_history);

    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port)),
        watch_history,
    };

    start_server(config).await?;

    Ok(())
}
