pub mod cli;
pub mod core;
pub mod funds;
pub mod providers;
pub mod records;
pub mod resource;
pub mod server;
pub mod store;

use crate::core::config::{AppConfig, CurrencyProviderKind, ProvidersConfig};
use crate::core::market::{RateSnapshot, StockSnapshot};
use crate::core::{CacheStore, Clock, FetchDecisionEngine, FixedClock, QuotaTracker, SystemClock};
use crate::funds::FundService;
use crate::providers::{
    AltinkaynakProvider, CollectApiProvider, FinansProvider, FundDetailProvider, ProviderAdapter,
    TefasProvider,
};
use crate::records::{IdentityVerifier, RecordStore, StaticTokenVerifier};
use crate::resource::ScheduledResource;
use crate::store::{DiskStore, KeyLocks, PersistentStore};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Resource a one-shot refresh can target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    Stocks,
    Currencies,
    Fund(String),
}

pub enum AppCommand {
    Serve,
    Status,
    Refresh(RefreshTarget),
}

/// Upstream adapters, one per resource.
pub struct Providers {
    pub stocks: Arc<dyn ProviderAdapter<StockSnapshot>>,
    pub currencies: Arc<dyn ProviderAdapter<RateSnapshot>>,
    pub funds: Arc<dyn FundDetailProvider>,
}

impl Providers {
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let currencies: Arc<dyn ProviderAdapter<RateSnapshot>> = match config.currencies.kind {
            CurrencyProviderKind::Finans => Arc::new(FinansProvider::new(
                &config.currencies.resolved_base_url(),
                config.currencies.timeout_secs,
            )?),
            CurrencyProviderKind::Altinkaynak => {
                Arc::new(AltinkaynakProvider::new(&config.currencies)?)
            }
        };
        Ok(Self {
            stocks: Arc::new(CollectApiProvider::new(&config.stocks)?),
            currencies,
            funds: Arc::new(TefasProvider::new(&config.funds)?),
        })
    }
}

/// Everything a request handler or command needs, built once at startup.
pub struct AppContext {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub stocks: ScheduledResource<StockSnapshot>,
    pub currencies: ScheduledResource<RateSnapshot>,
    pub funds: FundService,
    pub records: RecordStore,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn PersistentStore>,
        providers: Providers,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let window = config.schedule.window()?;
        let engine = FetchDecisionEngine::new(window.clone());
        let locks = Arc::new(KeyLocks::new());
        let cache = CacheStore::new(Arc::clone(&store), Arc::clone(&locks));

        let stocks = ScheduledResource::new(
            "stocks",
            providers.stocks,
            cache.clone(),
            engine.clone(),
            config.providers.stocks.trading_day_required,
        );
        let currencies = ScheduledResource::new(
            "currencies",
            providers.currencies,
            cache.clone(),
            engine,
            config.providers.currencies.trading_day_required,
        );
        let quota = QuotaTracker::new(
            providers.funds.name(),
            config.providers.funds.daily_quota,
            Arc::clone(&store),
            locks,
        );
        let funds = FundService::new(
            providers.funds,
            cache,
            quota,
            window,
            config.fund_catalog_path.as_ref().map(PathBuf::from),
        );
        let verifier = Arc::new(StaticTokenVerifier::new(config.auth.tokens.clone()));

        Ok(Self {
            clock,
            stocks,
            currencies,
            funds,
            records: RecordStore::new(store),
            verifier,
            config,
        })
    }

    /// Context backed by the on-disk store. The wall clock is used unless
    /// `at` pins the local time.
    pub fn open(config: AppConfig, at: Option<NaiveDateTime>) -> Result<Self> {
        let data_path = config.default_data_path()?;
        std::fs::create_dir_all(&data_path)
            .with_context(|| format!("Failed to create data directory: {}", data_path.display()))?;
        let store = Arc::new(DiskStore::open(&data_path)?);
        let providers = Providers::from_config(&config.providers)?;
        let clock: Arc<dyn Clock> = match at {
            Some(at) => {
                info!("Clock pinned to {}", at);
                Arc::new(FixedClock::new(at))
            }
            None => Arc::new(SystemClock::new(config.tz()?)),
        };
        info!("Using data store at {}", data_path.display());
        Self::new(config, store, providers, clock)
    }
}

pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!(
        timezone = %config.timezone,
        bind = %config.server.bind,
        "Loaded config"
    );
    Ok(config)
}

/// Parses the `--at` override, `YYYY-MM-DDTHH:MM` or `YYYY-MM-DD HH:MM`,
/// as local time in the configured timezone.
pub fn parse_at(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .with_context(|| format!("Invalid time '{raw}', expected YYYY-MM-DDTHH:MM"))
}

pub async fn run_command(
    command: AppCommand,
    config_path: Option<&str>,
    at: Option<NaiveDateTime>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let ctx = Arc::new(AppContext::open(config, at)?);

    match command {
        AppCommand::Serve => cli::serve::run(ctx).await,
        AppCommand::Status => cli::status::run(&ctx).await,
        AppCommand::Refresh(target) => cli::refresh::run(&ctx, &target).await,
    }
}
