/// config.rs — Centralised configuration loaded from .env
///
/// All parameters consumed by the alpha engine are defined here.
/// Loading happens once at startup; every module borrows &AppConfig.
use anyhow::Result;
use std::env;

use crate::backtest::BacktestConfig;
use crate::composer::ComposerConfig;

/// Cost model defaults (taker-style fills on a crypto perpetual venue)
pub const DEFAULT_COMMISSION_RATE: f64 = 0.001;
pub const DEFAULT_SLIPPAGE_BPS: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct AppConfig {
    // ── Trading universe ─────────────────────────────────────────────
    pub trading_pairs: Vec<String>,

    // ── Candle aggregation ───────────────────────────────────────────
    /// Candle interval in seconds
    pub candle_interval_secs: u64,
    /// Human-readable timeframe tag carried on emitted signal types ("1m")
    pub timeframe: String,

    // ── Analyzer windows ─────────────────────────────────────────────
    /// Alpha engine tick window (momentum / mean-reversion z)
    pub tick_window: usize,
    /// Alpha engine candle window (Bollinger / RSI / volume ratio)
    pub candle_window: usize,
    /// VPIN volume per bucket V₀
    pub vpin_bucket_size: f64,
    /// Number of buckets in the rolling VPIN window
    pub vpin_window: usize,
    /// (ΔP, signed volume) pairs retained for the price-impact regression
    pub impact_window: usize,
    /// Order-flow engine window (ticks)
    pub flow_window: usize,
    /// Regime detector price/return window (ticks)
    pub regime_window: usize,
    /// Maximum R/S lag for the Hurst estimate
    pub regime_max_lag: usize,
    /// Realized-volatility return window
    pub vol_window: usize,
    /// VWAP mode: 0 = session-cumulative, N > 0 = rolling over last N ticks
    pub vwap_window: usize,
    /// VWAP band width in volume-weighted standard deviations
    pub vwap_band_mult: f64,

    // ── Feed endpoints ───────────────────────────────────────────────
    pub rest_url: String,
    /// Collector poll cadence in seconds
    pub poll_secs: u64,

    // ── Backtest parameters ──────────────────────────────────────────
    pub backtest_symbol: String,
    pub kline_interval: String,
    pub backtest_limit: u64,
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage_bps: f64,
    /// Fraction of cash deployed per entry, ∈ (0, 1]
    pub max_position_size: f64,
    pub enable_short_selling: bool,
    pub enable_margin_trading: bool,
    pub margin_requirement: f64,

    // ── Time-series sink ─────────────────────────────────────────────
    /// None when any of the four sink variables is absent; emission is
    /// disabled in that case.
    pub sink: Option<SinkSettings>,
}

/// Connection settings for the line-protocol sink.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

impl SinkSettings {
    /// Read SINK_URL / SINK_ORG / SINK_BUCKET / SINK_TOKEN.
    /// All four must be present for emission to be enabled.
    pub fn from_env() -> Option<Self> {
        let url = env::var("SINK_URL").ok()?;
        let org = env::var("SINK_ORG").ok()?;
        let bucket = env::var("SINK_BUCKET").ok()?;
        let token = env::var("SINK_TOKEN").ok()?;
        Some(Self { url, org, bucket, token })
    }
}

impl AppConfig {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // ignore missing .env

        let trading_pairs: Vec<String> = env::var("TRADING_PAIRS")
            .unwrap_or_else(|_| "BTCUSDT".into())
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();

        let rest_url = env::var("BINANCE_FUTURES_REST_URL")
            .unwrap_or_else(|_| "https://fapi.binance.com".into());

        Ok(Self {
            trading_pairs,

            candle_interval_secs: parse_env("CANDLE_INTERVAL_SECS", 60u64)?,
            timeframe: env::var("SIGNAL_TIMEFRAME").unwrap_or_else(|_| "1m".into()),

            tick_window: parse_env("TICK_WINDOW", 50usize)?,
            candle_window: parse_env("CANDLE_WINDOW", 20usize)?,
            vpin_bucket_size: parse_env("VPIN_BUCKET_SIZE", 100.0)?,
            vpin_window: parse_env("VPIN_WINDOW", 50usize)?,
            impact_window: parse_env("IMPACT_WINDOW", 100usize)?,
            flow_window: parse_env("FLOW_WINDOW", 100usize)?,
            regime_window: parse_env("REGIME_WINDOW", 200usize)?,
            regime_max_lag: parse_env("REGIME_MAX_LAG", 20usize)?,
            vol_window: parse_env("VOL_WINDOW", 50usize)?,
            vwap_window: parse_env("VWAP_WINDOW", 0usize)?,
            vwap_band_mult: parse_env("VWAP_BAND_MULT", 2.0)?,

            rest_url,
            poll_secs: parse_env("POLL_SECS", 2u64)?,

            backtest_symbol: env::var("BACKTEST_SYMBOL").unwrap_or_else(|_| "BTCUSDT".into()),
            kline_interval: env::var("KLINE_INTERVAL").unwrap_or_else(|_| "1m".into()),
            backtest_limit: parse_env("BACKTEST_LIMIT", 1000u64)?,
            initial_capital: parse_env("INITIAL_CAPITAL", 10_000.0)?,
            commission_rate: parse_env("COMMISSION_RATE", DEFAULT_COMMISSION_RATE)?,
            slippage_bps: parse_env("SLIPPAGE_BPS", DEFAULT_SLIPPAGE_BPS)?,
            max_position_size: parse_env("MAX_POSITION_SIZE", 0.5)?,
            enable_short_selling: parse_env("ENABLE_SHORT_SELLING", false)?,
            enable_margin_trading: parse_env("ENABLE_MARGIN_TRADING", false)?,
            margin_requirement: parse_env("MARGIN_REQUIREMENT", 1.0)?,

            sink: SinkSettings::from_env(),
        })
    }

    /// Per-symbol pipeline parameters derived from this config.
    pub fn composer(&self) -> ComposerConfig {
        ComposerConfig {
            tick_window: self.tick_window,
            candle_window: self.candle_window,
            candle_interval_secs: self.candle_interval_secs,
            vpin_bucket_size: self.vpin_bucket_size,
            vpin_window: self.vpin_window,
            impact_window: self.impact_window,
            flow_window: self.flow_window,
            regime_window: self.regime_window,
            regime_max_lag: self.regime_max_lag,
            vol_window: self.vol_window,
            vwap_window: self.vwap_window,
            vwap_band_mult: self.vwap_band_mult,
        }
    }

    /// Backtest simulator parameters derived from this config.
    pub fn backtest(&self) -> BacktestConfig {
        BacktestConfig {
            initial_capital: self.initial_capital,
            commission_rate: self.commission_rate,
            slippage_bps: self.slippage_bps,
            max_position_size: self.max_position_size,
            enable_short_selling: self.enable_short_selling,
            enable_margin_trading: self.enable_margin_trading,
            margin_requirement: self.margin_requirement,
            periods_per_year: bars_per_year(&self.kline_interval),
        }
    }
}

/// Annualisation factor for the report, keyed by bar interval.
fn bars_per_year(interval: &str) -> f64 {
    match interval {
        "1m" => 525_600.0,
        "3m" => 175_200.0,
        "5m" => 105_120.0,
        "15m" => 35_040.0,
        "30m" => 17_520.0,
        "1h" => 8_760.0,
        "4h" => 2_190.0,
        "1d" => 365.0,
        _ => 525_600.0,
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}
