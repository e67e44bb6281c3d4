//! fx console
//!
//! Command-line front end for the fx API:
//! 1. Loads configuration and signs in with `FX_USERNAME` / `FX_PASSWORD`
//! 2. Runs one command against the session and data stores
//! 3. Signs out (the session lives in memory only)
//!
//! Recent conversions and favorites persist in `storage.data_dir` between
//! runs.

mod config;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{ChannelNavigator, FileStore, MemoryStore};
use fx_client::{
    AdminApi, ConversionStore, ConvertRequest, CurrencyStore, FavoritePair, FxApi, HistoryFilter,
    LogFilter, LogLevel, PageRequest, Pipeline,
};
use session::{LoginRequest, SessionManager};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::ReqwestExecutor;

use crate::config::{Config, Credentials};

#[derive(Parser, Debug)]
#[command(name = "fx-console")]
#[command(about = "Exchange rates and conversions from the fx API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    metrics: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Show exchange rates
    Rates {
        /// Base currency (defaults to the configured one)
        #[arg(value_parser = currency_code)]
        base: Option<String>,
    },

    /// Convert an amount
    Convert {
        #[arg(value_parser = currency_code)]
        from: String,
        #[arg(value_parser = currency_code)]
        to: String,
        amount: f64,
    },

    /// Toggle a favorite currency pair
    Favorite {
        #[arg(value_parser = currency_code)]
        from: String,
        #[arg(value_parser = currency_code)]
        to: String,
    },

    /// List recent conversions
    Recent,

    /// List server-side conversion history
    History {
        #[arg(default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,
    },

    /// Poll rates until interrupted
    Watch {
        #[arg(value_parser = currency_code)]
        base: Option<String>,
    },

    /// Administrative endpoints (admin role required)
    Admin {
        #[command(subcommand)]
        action: AdminCommand,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum AdminCommand {
    /// API usage statistics
    Usage,

    /// Server health checks
    Health,

    /// Cache statistics
    Cache,

    /// Clear the server cache
    ClearCache {
        /// Only clear keys matching this pattern
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Pull fresh rates from the upstream provider
    SyncRates,

    /// Page through the server log
    Logs {
        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,

        #[arg(short, long, value_parser = log_level)]
        level: Option<LogLevel>,

        /// Free-text search
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Print the server log as CSV
    ExportLogs {
        #[arg(short, long, value_parser = log_level)]
        level: Option<LogLevel>,
    },

    /// Delete the server log
    ClearLogs,
}

fn currency_code(raw: &str) -> std::result::Result<String, String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(format!("expected a three-letter currency code, got {raw:?}"))
    }
}

fn log_level(raw: &str) -> std::result::Result<LogLevel, String> {
    raw.parse().map_err(|e: fx_client::Error| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();

    let prometheus = metrics::install_recorder()?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = if config_path.exists() {
        info!(path = %config_path.display(), "loading configuration");
        Config::load(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        info!(path = %config_path.display(), "no config file, using defaults");
        Config::default()
    };
    let credentials = Credentials::from_env().context("missing login credentials")?;

    info!(
        base_url = %config.api.base_url,
        durable = %config.durable_path().display(),
        "configuration loaded"
    );

    let executor = Arc::new(ReqwestExecutor::new(reqwest::Client::new(), config.timeout()));

    let (navigator, mut navigation) = ChannelNavigator::channel();
    tokio::spawn(async move {
        while let Some(command) = navigation.recv().await {
            info!(path = %command.path, params = ?command.params, "navigation");
        }
    });

    let session = SessionManager::new(
        config.session_config(),
        executor.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(navigator),
    );
    session.initialize().await;
    let user = session
        .login(
            LoginRequest::new(credentials.username, credentials.password),
            None,
        )
        .await
        .context("login failed")?;
    info!(user = %user.username, role = user.role.as_str(), "signed in");

    let api = FxApi::new(Pipeline::new(
        config.api.base_url.clone(),
        executor,
        session.clone(),
    ));
    let admin = AdminApi::new(api.pipeline().clone());
    let currencies = CurrencyStore::new(api.clone(), config.rates_config());
    let conversions = ConversionStore::new(api, Arc::new(FileStore::new(config.durable_path())));
    conversions.initialize().await;

    let outcome = run(cli.command, &currencies, &conversions, &admin).await;

    session.logout().await;

    if cli.metrics {
        println!("{}", prometheus.render());
    }

    outcome
}

async fn run(
    command: Command,
    currencies: &CurrencyStore,
    conversions: &ConversionStore,
    admin: &AdminApi,
) -> Result<()> {
    match command {
        Command::Rates { base } => {
            let snapshot = currencies
                .load_rates(base.as_deref())
                .await
                .context("failed to load rates")?;
            println!("1 {} =", snapshot.base_currency);
            for (code, rate) in &snapshot.rates {
                println!("  {rate:>14.6} {code}");
            }
        }
        Command::Convert { from, to, amount } => {
            let result = conversions
                .convert(ConvertRequest::new(from, to, amount))
                .await
                .context("conversion failed")?;
            println!(
                "{} {} = {} {} (rate {})",
                result.original_amount,
                result.from_currency,
                result.converted_amount,
                result.to_currency,
                result.exchange_rate
            );
        }
        Command::Favorite { from, to } => {
            let pair = FavoritePair::new(from, to);
            if conversions.toggle_favorite(pair.clone()).await {
                println!("added favorite {pair}");
            } else {
                println!("removed favorite {pair}");
            }
        }
        Command::Recent => {
            let recent = conversions.recent_conversions();
            if recent.is_empty() {
                println!("no recent conversions");
            }
            for entry in recent {
                println!(
                    "{} {} -> {} {}",
                    entry.original_amount,
                    entry.from_currency,
                    entry.converted_amount,
                    entry.to_currency
                );
            }
        }
        Command::History { page } => {
            let request = PageRequest {
                page_number: page.max(1),
                ..conversions.current_page()
            };
            let page = conversions
                .load_history(request, &HistoryFilter::default())
                .await
                .context("failed to load history")?;
            println!(
                "page {} of {} ({} conversions)",
                page.page_number, page.total_pages, page.total_count
            );
            for entry in page.items {
                println!(
                    "{} {:?} {} {} -> {} {}",
                    entry.created_at.as_deref().unwrap_or("-"),
                    entry.status,
                    entry.original_amount,
                    entry.from_currency,
                    entry.converted_amount,
                    entry.to_currency
                );
            }
        }
        Command::Watch { base } => {
            if let Some(base) = base {
                currencies.set_base_currency(&base);
            }
            let _subscription = currencies.state().subscribe(|state| {
                if let Some(snapshot) = &state.snapshot {
                    info!(
                        base = %snapshot.base_currency,
                        rates = snapshot.rates.len(),
                        retrieved_at = snapshot.retrieved_at,
                        "rates updated"
                    );
                }
            });
            let poller = currencies.start_polling(currencies.config().poll_interval);
            shutdown_signal().await;
            poller.abort();
            if currencies.is_stale() {
                warn!("last rate snapshot is stale");
            }
        }
        Command::Admin { action } => run_admin(action, admin).await?,
    }
    Ok(())
}

async fn run_admin(action: AdminCommand, admin: &AdminApi) -> Result<()> {
    match action {
        AdminCommand::Usage => {
            let stats = admin.api_usage().await.context("failed to load usage")?;
            println!(
                "{} requests ({} today), {:.1} ms average, cache hit rate {:.1}%, {} active users",
                stats.total_requests,
                stats.requests_today,
                stats.average_response_time,
                stats.cache_hit_rate * 100.0,
                stats.active_users
            );
            for endpoint in stats.top_endpoints {
                println!(
                    "  {:>8} {:<6} {} ({:.1} ms)",
                    endpoint.count, endpoint.method, endpoint.endpoint, endpoint.average_time
                );
            }
        }
        AdminCommand::Health => {
            let report = admin.health().await.context("failed to load health")?;
            println!("{:?} in {}", report.status, report.total_duration);
            for entry in &report.entries {
                println!(
                    "  {:<24} {:?} {}",
                    entry.name,
                    entry.status,
                    entry.description.as_deref().unwrap_or("")
                );
            }
        }
        AdminCommand::Cache => {
            let stats = admin.cache_stats().await.context("failed to load cache stats")?;
            println!(
                "{} items, {}, hit rate {:.1}% ({} hits / {} misses)",
                stats.total_items,
                stats.memory_usage,
                stats.hit_rate * 100.0,
                stats.hit_count,
                stats.miss_count
            );
        }
        AdminCommand::ClearCache { pattern } => {
            admin
                .clear_cache(pattern.as_deref())
                .await
                .context("failed to clear cache")?;
            println!("cache cleared");
        }
        AdminCommand::SyncRates => {
            admin.sync_rates().await.context("rate sync failed")?;
            println!("rate sync requested");
        }
        AdminCommand::Logs { page, level, search } => {
            let filter = LogFilter {
                level,
                search,
                ..LogFilter::default()
            };
            let request = PageRequest {
                page_number: page,
                ..PageRequest::default()
            };
            let page = admin.logs(request, &filter).await.context("failed to load logs")?;
            println!(
                "page {} of {} ({} entries)",
                page.page_number, page.total_pages, page.total_count
            );
            for entry in page.items {
                println!(
                    "{} {:<11} {}",
                    entry.timestamp,
                    entry.level.as_str(),
                    entry.message
                );
            }
        }
        AdminCommand::ExportLogs { level } => {
            let filter = LogFilter {
                level,
                ..LogFilter::default()
            };
            print!("{}", admin.export_logs(&filter).await.context("failed to export logs")?);
        }
        AdminCommand::ClearLogs => {
            admin.clear_logs().await.context("failed to clear logs")?;
            println!("logs cleared");
        }
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, stopping"),
        _ = terminate => info!("received SIGTERM, stopping"),
    }
}
