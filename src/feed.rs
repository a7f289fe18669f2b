/// feed.rs — Tick producers: Binance REST collectors and a synthetic feed
///
/// Producers push validated `MarketTick`s into an unbounded channel whose
/// receiver drives the `PipelineRouter`. Each collector runs on a single
/// spawned background worker and exposes `stop()`; decode and transport
/// failures are logged and skipped without touching pipeline state.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::data::{MarketTick, Symbol};

// ── Kline (OHLCV) types ───────────────────────────────────────────────────

/// Parsed kline bar from the Binance array response.
#[derive(Debug, Clone)]
pub struct Kline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl Kline {
    /// Collapse this bar into a close-stamped tick for replay.
    pub fn to_tick(&self, symbol: &Symbol) -> Option<MarketTick> {
        MarketTick::new(symbol.clone(), self.close, self.volume, self.close_time).ok()
    }
}

/// Raw Binance kline array (12-element JSON array per bar).
/// Index layout: [open_time, open, high, low, close, volume, close_time, ...]
#[derive(Deserialize)]
struct RawKline(
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
);

fn parse_f64(v: &serde_json::Value) -> f64 {
    match v {
        serde_json::Value::String(s) => s.parse().unwrap_or(0.0),
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn parse_i64(v: &serde_json::Value) -> i64 {
    v.as_i64().unwrap_or(0)
}

impl From<RawKline> for Kline {
    fn from(r: RawKline) -> Self {
        Kline {
            open_time: parse_i64(&r.0),
            open: parse_f64(&r.1),
            high: parse_f64(&r.2),
            low: parse_f64(&r.3),
            close: parse_f64(&r.4),
            volume: parse_f64(&r.5),
            close_time: parse_i64(&r.6),
        }
    }
}

// ── Aggregate trade types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct BinanceAggTrade {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    qty: String,
    #[serde(rename = "T")]
    time: i64,
}

// ── REST client ───────────────────────────────────────────────────────────

pub struct BinanceFeedClient {
    client: Client,
    base_url: String,
}

impl BinanceFeedClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, base_url: base_url.to_owned() })
    }

    /// Fetch up to `limit` klines (single request; Binance caps at 1500).
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u64,
    ) -> Result<Vec<Kline>> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval,
            limit.min(1500)
        );
        debug!("Fetching klines: {}", url);
        let raw: Vec<RawKline> = self
            .client
            .get(&url)
            .send()
            .await
            .context("kline request failed")?
            .json()
            .await
            .context("failed to parse kline JSON")?;

        let mut bars: Vec<Kline> = raw.into_iter().map(Kline::from).collect();
        bars.sort_by_key(|k| k.open_time);
        info!("Fetched {} klines for {} {}", bars.len(), symbol, interval);
        Ok(bars)
    }

    /// Fetch recent aggregate trades after `start_time`, as validated ticks
    /// in chronological order. Malformed rows are dropped with a warning.
    pub async fn fetch_agg_trades(
        &self,
        symbol: &Symbol,
        start_time: i64,
    ) -> Result<Vec<MarketTick>> {
        let url = format!(
            "{}/fapi/v1/aggTrades?symbol={}&startTime={}&limit=1000",
            self.base_url, symbol, start_time
        );
        let raw: Vec<BinanceAggTrade> = self
            .client
            .get(&url)
            .send()
            .await
            .context("aggTrades request failed")?
            .json()
            .await
            .context("failed to parse aggTrades JSON")?;

        let mut ticks = Vec::with_capacity(raw.len());
        for t in raw {
            let price: f64 = t.price.parse().unwrap_or(0.0);
            let qty: f64 = t.qty.parse().unwrap_or(0.0);
            match MarketTick::new(symbol.clone(), price, qty, t.time) {
                Ok(tick) => ticks.push(tick),
                Err(e) => warn!(symbol = %symbol, error = %e, "dropping malformed trade"),
            }
        }
        Ok(ticks)
    }
}

// ── Polling trade collector ───────────────────────────────────────────────

/// Polls Binance aggregate trades for one symbol on a dedicated background
/// worker and pushes them into the tick channel.
pub struct BinanceTradeCollector {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl BinanceTradeCollector {
    /// Start the background worker immediately and return its handle.
    pub fn spawn(
        client: Arc<BinanceFeedClient>,
        symbol: Symbol,
        poll_secs: u64,
        tx: mpsc::UnboundedSender<MarketTick>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = tokio::spawn(async move {
            let mut cursor = Utc::now().timestamp_millis();
            info!(symbol = %symbol, poll_secs, "trade collector started");
            while !stop_flag.load(Ordering::Relaxed) {
                match client.fetch_agg_trades(&symbol, cursor).await {
                    Ok(ticks) => {
                        for tick in ticks {
                            cursor = cursor.max(tick.ts_ms + 1);
                            if tx.send(tick).is_err() {
                                info!(symbol = %symbol, "tick channel closed; collector exiting");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!(symbol = %symbol, error = %e, "trade poll failed");
                    }
                }
                tokio::time::sleep(std::time::Duration::from_secs(poll_secs)).await;
            }
            info!(symbol = %symbol, "trade collector stopped");
        });
        Self { stop, handle }
    }

    /// Request shutdown; the worker exits after its current poll cycle.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

// ── Synthetic feed ────────────────────────────────────────────────────────

/// Seeded random-walk tick generator for the offline demo mode. Same push
/// contract as the network collectors, fully deterministic per seed.
pub struct SyntheticFeed {
    symbol: Symbol,
    rng: StdRng,
    price: f64,
    ts_ms: i64,
}

impl SyntheticFeed {
    pub fn new(symbol: Symbol, seed: u64, start_price: f64) -> Self {
        Self {
            symbol,
            rng: StdRng::seed_from_u64(seed),
            price: start_price,
            ts_ms: 0,
        }
    }

    pub fn next_tick(&mut self) -> MarketTick {
        let step: f64 = self.rng.gen_range(-0.001..0.001);
        self.price *= 1.0 + step;
        let volume: f64 = self.rng.gen_range(0.01..5.0);
        self.ts_ms += self.rng.gen_range(50..500);
        MarketTick {
            symbol: self.symbol.clone(),
            price: self.price,
            volume,
            ts_ms: self.ts_ms,
        }
    }
}
