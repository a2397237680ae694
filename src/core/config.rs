use super::clock::{Checkpoint, ClockWindow};
use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{fs, path::PathBuf};
use tracing::{debug, warn};

pub const COLLECTAPI_KEY_ENV: &str = "COLLECTAPI_KEY";
pub const RAPIDAPI_KEY_ENV: &str = "RAPIDAPI_KEY";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Upper bound on one HTTP request, upstream calls and retries included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_request_timeout() -> u64 {
    150
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_checkpoints")]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default = "default_tolerance")]
    pub tolerance_minutes: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            checkpoints: default_checkpoints(),
            tolerance_minutes: default_tolerance(),
        }
    }
}

fn default_checkpoints() -> Vec<Checkpoint> {
    ClockWindow::default().checkpoints().to_vec()
}

fn default_tolerance() -> i32 {
    ClockWindow::DEFAULT_TOLERANCE_MINUTES
}

impl ScheduleConfig {
    pub fn window(&self) -> Result<ClockWindow> {
        ClockWindow::new(self.checkpoints.clone(), self.tolerance_minutes)
            .context("Invalid refresh schedule")
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StocksProviderConfig {
    #[serde(default = "default_collectapi_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_stocks_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub trading_day_required: bool,
}

impl Default for StocksProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_collectapi_url(),
            api_key: None,
            timeout_secs: default_stocks_timeout(),
            trading_day_required: true,
        }
    }
}

impl StocksProviderConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), COLLECTAPI_KEY_ENV)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyProviderKind {
    #[default]
    Finans,
    Altinkaynak,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CurrenciesProviderConfig {
    #[serde(default)]
    pub kind: CurrencyProviderKind,
    /// Defaults depend on `kind`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_currencies_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub trading_day_required: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for CurrenciesProviderConfig {
    fn default() -> Self {
        Self {
            kind: CurrencyProviderKind::default(),
            base_url: None,
            timeout_secs: default_currencies_timeout(),
            trading_day_required: false,
            username: None,
            password: None,
        }
    }
}

impl CurrenciesProviderConfig {
    pub fn resolved_base_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| match self.kind {
            CurrencyProviderKind::Finans => "https://finans.truncgil.com".to_string(),
            CurrencyProviderKind::Altinkaynak => "https://data.altinkaynak.com".to_string(),
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FundsProviderConfig {
    #[serde(default = "default_tefas_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_tefas_host")]
    pub host: String,
    #[serde(default = "default_stocks_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_daily_quota")]
    pub daily_quota: u32,
}

impl Default for FundsProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_tefas_url(),
            api_key: None,
            host: default_tefas_host(),
            timeout_secs: default_stocks_timeout(),
            daily_quota: default_daily_quota(),
        }
    }
}

impl FundsProviderConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), RAPIDAPI_KEY_ENV)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub stocks: StocksProviderConfig,
    #[serde(default)]
    pub currencies: CurrenciesProviderConfig,
    #[serde(default)]
    pub funds: FundsProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AuthConfig {
    /// Bearer token to user id.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub data_path: Option<String>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub fund_catalog_path: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            timezone: default_timezone(),
            data_path: None,
            schedule: ScheduleConfig::default(),
            providers: ProvidersConfig::default(),
            fund_catalog_path: None,
            auth: AuthConfig::default(),
        }
    }
}

fn default_timezone() -> String {
    "Europe/Istanbul".to_string()
}

fn default_collectapi_url() -> String {
    "https://api.collectapi.com".to_string()
}

fn default_tefas_url() -> String {
    "https://tefas-api.p.rapidapi.com".to_string()
}

fn default_tefas_host() -> String {
    "tefas-api.p.rapidapi.com".to_string()
}

fn default_stocks_timeout() -> u64 {
    30
}

fn default_currencies_timeout() -> u64 {
    60
}

fn default_daily_quota() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn resolve_key(configured: Option<&str>, env_var: &str) -> Option<String> {
    configured
        .filter(|k| !k.trim().is_empty())
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.trim().is_empty()))
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "finpulse", "finpulse")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "finpulse", "finpulse")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.schedule.window()?;
        self.tz()?;
        if self.providers.stocks.resolved_api_key().is_none() {
            warn!(
                "No CollectAPI key configured (set providers.stocks.api_key or {}), stock fetches will fail",
                COLLECTAPI_KEY_ENV
            );
        }
        if self.providers.funds.resolved_api_key().is_none() {
            warn!(
                "No RapidAPI key configured (set providers.funds.api_key or {}), fund fetches will fail",
                RAPIDAPI_KEY_ENV
            );
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Unknown timezone '{}': {}", self.timezone, e))
    }
}
