use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use listing_geocoder::geocode::config::timeout_ms_from_secs;
use listing_geocoder::geocode::{AddressResolver, GeocodeCache, GeocodeError, ResolverConfig};
use listing_geocoder::server::{self, AppState};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Listing geocoder: best-effort coordinates for property listing addresses.
///
/// Tries V-World directly, then any configured relays, then Nominatim, and
/// finally a static fallback (a landmark table unless an explicit fallback
/// point is configured). Configuration comes from the environment
/// (`VWORLD_API_KEY`, `VWORLD_PROXY_URLS`, ... or a `.env` file); the flags
/// below override it.
///
/// Examples:
///   geocoder resolve "서울특별시 강남구 테헤란로 152"
///   geocoder resolve --offline "부산광역시 해운대구"
///   geocoder --proxy https://relay.example/api/vworld serve --port 8000
#[derive(Parser)]
#[command(name = "geocoder", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ConfigOverrides {
    /// Per-stage timeout in seconds.
    #[arg(long, global = true)]
    timeout_secs: Option<f64>,

    /// Relay endpoint for V-World (repeatable, tried in order).
    #[arg(long = "proxy", global = true)]
    proxies: Vec<String>,

    /// Skip the Nominatim stage.
    #[arg(long, global = true)]
    no_public: bool,

    /// Do not read or write the geocode cache.
    #[arg(long, global = true)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve one address and print the result as JSON.
    Resolve {
        /// Free-text address.
        address: String,

        /// Only use the static landmark table.
        #[arg(long)]
        offline: bool,
    },
    /// Serve the HTTP API.
    Serve {
        #[arg(long, env = "HOST", default_value = "0.0.0.0")]
        host: String,

        #[arg(long, env = "PORT", default_value_t = 8000)]
        port: u16,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,listing_geocoder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_config(overrides: &ConfigOverrides) -> Result<ResolverConfig> {
    let mut cfg = ResolverConfig::from_env().context("failed to load configuration")?;
    if let Some(secs) = overrides.timeout_secs {
        cfg.stage_timeout_ms = timeout_ms_from_secs(secs).context("invalid --timeout-secs")?;
    }
    if !overrides.proxies.is_empty() {
        cfg.proxy_endpoints = overrides.proxies.clone();
    }
    if overrides.no_public {
        cfg.secondary_enabled = false;
    }
    Ok(cfg)
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let config = build_config(&cli.overrides)?;

    match cli.command {
        Command::Resolve { address, offline } => {
            let config = if offline { config.offline() } else { config };
            let resolver = AddressResolver::new(config);
            let mut cache = (!cli.overrides.no_cache).then(GeocodeCache::load);

            if let Some(hit) = cache.as_ref().and_then(|c| c.get(&address)) {
                tracing::info!("served from cache");
                println!("{}", serde_json::to_string_pretty(&hit)?);
                return Ok(ExitCode::SUCCESS);
            }

            match resolver.resolve(&address) {
                Ok(result) => {
                    if let Some(ref mut cache) = cache {
                        cache.put(&address, &result);
                    }
                    if result.needs_review() {
                        eprintln!("  warning: approximate location; please confirm manually");
                    }
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(GeocodeError::InvalidInput(msg)) => {
                    eprintln!("Error: {}", msg);
                    Ok(ExitCode::from(2))
                }
            }
        }
        Command::Serve { host, port } => {
            let cache = (!cli.overrides.no_cache).then(GeocodeCache::load);
            let state = Arc::new(AppState::new(AddressResolver::new(config), cache));
            let runtime = tokio::runtime::Runtime::new().context("cannot start tokio runtime")?;
            runtime.block_on(server::start(&host, port, state))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
