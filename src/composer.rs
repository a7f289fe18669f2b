/// composer.rs — Per-symbol signal pipeline
///
/// One Composer owns all analyzer state for a single symbol and processes
/// its ticks strictly in arrival order:
///
/// ┌──────────────────────────────────────────────────────────────┐
/// │  MarketTick (validated, else dropped + counted)              │
/// │        │                                                     │
/// │   ┌────┴──────────────────────────────────────────┐          │
/// │   │  AlphaEngine.on_tick        → momentum, z     │          │
/// │   │  MicrostructureAnalyzer     → VPIN, λ, spread │          │
/// │   │  OrderFlowEngine (is_buy = price > last)      │          │
/// │   │  RegimeDetector             → regime, weights │          │
/// │   │  VwapCalculator             → vwap, zone      │          │
/// │   │  BollingerOverlay(10, 2)    → bands, squeeze  │          │
/// │   │  CandleAggregator → closed? → Alpha.on_candle │          │
/// │   └────┬──────────────────────────────────────────┘          │
/// │        ▼                                                     │
/// │  SignalRecord { combined score, recommendation }             │
/// │        ▼                                                     │
/// │  sink (optional, non-blocking, at most once per tick)        │
/// └──────────────────────────────────────────────────────────────┘
///
/// combined = w_momentum·momentum + w_meanrev·meanRevZ, with weights from
/// the regime detector. A Composer must not be shared across threads; the
/// `PipelineRouter` gives each symbol its own lane instead.
use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::analytics::indicators;
use crate::analytics::{
    AlphaEngine, AlphaSignal, ImpactMetrics, MicrostructureAnalyzer, OrderFlowEngine,
    OrderFlowSignal, RegimeDetector, RegimeMetrics, SignalWeights, VpinMetrics,
    VwapCalculator, VwapMetrics,
};
use crate::data::{Candle, CandleAggregator, MarketTick, Symbol};
use crate::sink::SignalSink;

/// Bollinger overlay parameters fixed by the pipeline contract.
const OVERLAY_PERIOD: usize = 10;
const OVERLAY_MULT: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct ComposerConfig {
    pub tick_window: usize,
    pub candle_window: usize,
    pub candle_interval_secs: u64,
    pub vpin_bucket_size: f64,
    pub vpin_window: usize,
    pub impact_window: usize,
    pub flow_window: usize,
    pub regime_window: usize,
    pub regime_max_lag: usize,
    pub vol_window: usize,
    pub vwap_window: usize,
    pub vwap_band_mult: f64,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            tick_window: 50,
            candle_window: 20,
            candle_interval_secs: 60,
            vpin_bucket_size: 100.0,
            vpin_window: 50,
            impact_window: 100,
            flow_window: 100,
            regime_window: 200,
            regime_max_lag: 20,
            vol_window: 50,
            vwap_window: 0,
            vwap_band_mult: 2.0,
        }
    }
}

/// Discrete verdict of the tick-level Bollinger overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandVerdict {
    Buy,
    Sell,
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct BandState {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
    pub percent_b: f64,
    pub bandwidth: f64,
    pub squeezing: bool,
    pub verdict: BandVerdict,
}

/// Rolling Bollinger(10, 2) computed directly on tick prices.
#[derive(Debug)]
struct BollingerOverlay {
    closes: VecDeque<f64>,
}

impl BollingerOverlay {
    fn new() -> Self {
        Self { closes: VecDeque::with_capacity(OVERLAY_PERIOD) }
    }

    fn on_tick(&mut self, price: f64) -> BandState {
        self.closes.push_back(price);
        if self.closes.len() > OVERLAY_PERIOD {
            self.closes.pop_front();
        }
        if self.closes.len() < OVERLAY_PERIOD {
            return BandState {
                middle: 0.0,
                upper: 0.0,
                lower: 0.0,
                percent_b: 0.5,
                bandwidth: 0.0,
                squeezing: false,
                verdict: BandVerdict::None,
            };
        }
        let window: Vec<f64> = self.closes.iter().copied().collect();
        let bb = indicators::bollinger(&window, OVERLAY_PERIOD, OVERLAY_MULT);
        let bw = indicators::bandwidth(bb.upper, bb.middle, bb.lower);
        let verdict = if price < bb.lower {
            BandVerdict::Buy
        } else if price > bb.upper {
            BandVerdict::Sell
        } else {
            BandVerdict::None
        };
        BandState {
            middle: bb.middle,
            upper: bb.upper,
            lower: bb.lower,
            percent_b: indicators::percent_b(price, bb.upper, bb.lower),
            bandwidth: bw,
            squeezing: indicators::is_squeeze(bw),
            verdict,
        }
    }

    fn reset(&mut self) {
        self.closes.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    StrongBuy,
    StrongSell,
    Buy,
    Sell,
    WaitToxic,
    WaitSqueeze,
    Neutral,
}

impl Recommendation {
    pub fn label(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "STRONG_BUY",
            Recommendation::StrongSell => "STRONG_SELL",
            Recommendation::Buy => "BUY",
            Recommendation::Sell => "SELL",
            Recommendation::WaitToxic => "WAIT_TOXIC",
            Recommendation::WaitSqueeze => "WAIT_SQUEEZE",
            Recommendation::Neutral => "NEUTRAL",
        }
    }
}

/// Merged per-tick output of the whole pipeline.
#[derive(Debug, Clone)]
pub struct SignalRecord {
    pub symbol: Symbol,
    pub ts_ms: i64,
    pub price: f64,
    pub volume: f64,
    /// Tick-branch alpha signal; None until the tick window fills
    pub alpha: Option<AlphaSignal>,
    /// Candle-branch alpha signal; present only on a candle close
    pub candle_alpha: Option<AlphaSignal>,
    /// The candle closed by this tick, if any
    pub candle: Option<Candle>,
    pub vpin: VpinMetrics,
    pub impact: ImpactMetrics,
    pub spread: f64,
    pub flow: OrderFlowSignal,
    pub regime: RegimeMetrics,
    pub weights: SignalWeights,
    pub vwap: VwapMetrics,
    pub bands: BandState,
    pub combined_score: f64,
    pub recommendation: Recommendation,
}

/// First matching row wins.
fn resolve_recommendation(
    bands: BandVerdict,
    combined: f64,
    toxicity: f64,
    squeezing: bool,
) -> Recommendation {
    if bands == BandVerdict::Buy && combined > 0.01 && toxicity < 0.5 {
        Recommendation::StrongBuy
    } else if bands == BandVerdict::Sell && combined < -0.01 && toxicity < 0.5 {
        Recommendation::StrongSell
    } else if combined > 0.01 && toxicity < 0.5 {
        Recommendation::Buy
    } else if combined < -0.01 && toxicity < 0.5 {
        Recommendation::Sell
    } else if toxicity > 0.7 {
        Recommendation::WaitToxic
    } else if squeezing {
        Recommendation::WaitSqueeze
    } else {
        Recommendation::Neutral
    }
}

pub struct Composer {
    symbol: Symbol,
    cfg: ComposerConfig,
    alpha: AlphaEngine,
    micro: MicrostructureAnalyzer,
    flow: OrderFlowEngine,
    regime: RegimeDetector,
    vwap: VwapCalculator,
    bands: BollingerOverlay,
    aggregator: CandleAggregator,
    sink: Option<Arc<dyn SignalSink>>,
    last_price: f64,
    rejected: u64,
}

impl Composer {
    pub fn new(symbol: Symbol, cfg: ComposerConfig, sink: Option<Arc<dyn SignalSink>>) -> Self {
        Self {
            alpha: AlphaEngine::new(symbol.clone(), cfg.tick_window, cfg.candle_window),
            micro: MicrostructureAnalyzer::new(
                cfg.vpin_bucket_size,
                cfg.vpin_window,
                cfg.impact_window,
            ),
            flow: OrderFlowEngine::new(cfg.flow_window),
            regime: RegimeDetector::new(cfg.regime_window, cfg.regime_max_lag, cfg.vol_window),
            vwap: VwapCalculator::new(cfg.vwap_window, cfg.vwap_band_mult),
            bands: BollingerOverlay::new(),
            aggregator: CandleAggregator::new(cfg.candle_interval_secs),
            symbol,
            cfg,
            sink,
            last_price: 0.0,
            rejected: 0,
        }
    }

    /// Process one tick in arrival order. Invalid ticks are dropped with a
    /// counter bump and leave every analyzer untouched.
    pub fn on_tick(&mut self, tick: &MarketTick) -> Option<SignalRecord> {
        if !tick.price.is_finite()
            || tick.price <= 0.0
            || !tick.volume.is_finite()
            || tick.volume < 0.0
            || tick.ts_ms < 0
        {
            self.rejected += 1;
            warn!(
                symbol = %self.symbol,
                price = tick.price,
                volume = tick.volume,
                "dropping invalid tick"
            );
            return None;
        }

        let is_buy = tick.price > self.last_price;

        let alpha = self.alpha.on_tick(tick.price, tick.ts_ms);
        self.micro.on_trade(tick.price, tick.volume, tick.ts_ms);
        let flow = self.flow.on_trade(tick.volume, is_buy);
        let regime = self.regime.on_tick(tick.price);
        let weights = regime.regime.signal_weights();
        let vwap = self.vwap.on_tick(tick.price, tick.volume);
        let bands = self.bands.on_tick(tick.price);

        let candle = self.aggregator.on_tick(tick.price, tick.volume, tick.ts_ms);
        let candle_alpha = candle.as_ref().and_then(|c| self.alpha.on_candle(c));

        self.last_price = tick.price;

        let (momentum, mean_rev_z) = alpha
            .as_ref()
            .map(|a| (a.momentum, a.mean_rev_z))
            .unwrap_or((0.0, 0.0));
        let combined_score = weights.momentum * momentum + weights.mean_reversion * mean_rev_z;
        let recommendation =
            resolve_recommendation(bands.verdict, combined_score, flow.toxicity, bands.squeezing);

        let record = SignalRecord {
            symbol: self.symbol.clone(),
            ts_ms: tick.ts_ms,
            price: tick.price,
            volume: tick.volume,
            alpha,
            candle_alpha,
            candle,
            vpin: self.micro.vpin_metrics(),
            impact: self.micro.price_impact(),
            spread: self.micro.roll_spread(),
            flow,
            regime,
            weights,
            vwap,
            bands,
            combined_score,
            recommendation,
        };

        if let Some(sink) = &self.sink {
            emit(sink.as_ref(), tick, &record);
        }
        Some(record)
    }

    /// Ticks rejected by validation since construction (or the last reset).
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Discard all analyzer state. Replaying the same tick sequence after a
    /// reset yields an identical record stream.
    pub fn reset(&mut self) {
        *self = Self::new(self.symbol.clone(), self.cfg.clone(), self.sink.clone());
    }
}

/// Non-blocking, at-most-once-per-tick emission of every measurement.
fn emit(sink: &dyn SignalSink, tick: &MarketTick, record: &SignalRecord) {
    sink.tick(tick);
    if let Some(alpha) = &record.alpha {
        sink.alpha_signal(alpha);
    }
    if let Some(candle_alpha) = &record.candle_alpha {
        sink.alpha_signal(candle_alpha);
    }
    sink.microstructure(
        &record.symbol,
        record.ts_ms,
        &record.vpin,
        &record.impact,
        record.spread,
    );
    sink.orderflow(&record.symbol, record.ts_ms, &record.flow);
    sink.regime(&record.symbol, record.ts_ms, &record.regime);
    sink.vwap(&record.symbol, record.ts_ms, &record.vwap);
    if let Some(candle) = &record.candle {
        sink.candle(&record.symbol, candle);
    }
}

// ── Symbol-keyed routing ─────────────────────────────────────────────────

/// Routes ticks to per-symbol pipeline lanes. Each lane is a dedicated task
/// owning one Composer, so ticks for a symbol are processed serially while
/// distinct symbols proceed in parallel.
pub struct PipelineRouter {
    cfg: ComposerConfig,
    sink: Option<Arc<dyn SignalSink>>,
    lanes: AHashMap<Symbol, mpsc::UnboundedSender<MarketTick>>,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineRouter {
    pub fn new(cfg: ComposerConfig, sink: Option<Arc<dyn SignalSink>>) -> Self {
        Self { cfg, sink, lanes: AHashMap::new(), tasks: Vec::new() }
    }

    /// Dispatch a tick to its symbol's lane, creating the lane on first
    /// sight of the symbol.
    pub fn route(&mut self, tick: MarketTick) {
        let cfg = &self.cfg;
        let sink = &self.sink;
        let tasks = &mut self.tasks;
        let lane = self.lanes.entry(tick.symbol.clone()).or_insert_with(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<MarketTick>();
            let mut composer = Composer::new(tick.symbol.clone(), cfg.clone(), sink.clone());
            tasks.push(tokio::spawn(async move {
                while let Some(t) = rx.recv().await {
                    composer.on_tick(&t);
                }
            }));
            tx
        });
        let _ = lane.send(tick);
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Close all lanes and wait for them to drain.
    pub async fn shutdown(mut self) {
        self.lanes.clear();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tick(price: f64, volume: f64, ts_ms: i64) -> MarketTick {
        MarketTick { symbol: Arc::from("BTCUSDT"), price, volume, ts_ms }
    }

    fn small_cfg() -> ComposerConfig {
        ComposerConfig {
            tick_window: 5,
            candle_window: 20,
            candle_interval_secs: 1,
            vpin_bucket_size: 10.0,
            vpin_window: 5,
            impact_window: 30,
            flow_window: 20,
            regime_window: 60,
            regime_max_lag: 10,
            vol_window: 20,
            ..ComposerConfig::default()
        }
    }

    fn walk(i: usize) -> MarketTick {
        let price = 100.0 * (1.0 + ((i % 17) as f64 - 8.0) * 0.001).powi(1 + (i % 3) as i32);
        tick(price, 0.5 + (i % 7) as f64, i as i64 * 250)
    }

    #[test]
    fn invalid_ticks_are_dropped_and_counted() {
        let mut composer = Composer::new(Arc::from("BTCUSDT"), small_cfg(), None);
        assert!(composer.on_tick(&tick(0.0, 1.0, 0)).is_none());
        assert!(composer.on_tick(&tick(f64::NAN, 1.0, 1)).is_none());
        assert!(composer.on_tick(&tick(100.0, -1.0, 2)).is_none());
        assert_eq!(composer.rejected(), 3);
        // State untouched: the next valid tick is the first one seen.
        let record = composer.on_tick(&tick(100.0, 1.0, 3)).unwrap();
        assert!(record.alpha.is_none());
    }

    #[test]
    fn replay_after_reset_is_deterministic() {
        let mut composer = Composer::new(Arc::from("BTCUSDT"), small_cfg(), None);
        let ticks: Vec<MarketTick> = (0..400).map(walk).collect();

        let first: Vec<SignalRecord> =
            ticks.iter().filter_map(|t| composer.on_tick(t)).collect();
        composer.reset();
        let second: Vec<SignalRecord> =
            ticks.iter().filter_map(|t| composer.on_tick(t)).collect();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.ts_ms, b.ts_ms);
            assert_eq!(a.combined_score, b.combined_score);
            assert_eq!(a.recommendation, b.recommendation);
            assert_eq!(a.vpin.vpin, b.vpin.vpin);
            assert_eq!(a.flow.toxicity, b.flow.toxicity);
            assert_eq!(a.regime.regime, b.regime.regime);
            assert_eq!(a.vwap.vwap, b.vwap.vwap);
            assert_eq!(a.candle.is_some(), b.candle.is_some());
        }
    }

    #[test]
    fn candles_emitted_in_order_through_pipeline() {
        let mut composer = Composer::new(Arc::from("BTCUSDT"), small_cfg(), None);
        let mut closes = Vec::new();
        for i in 0..200 {
            if let Some(r) = composer.on_tick(&walk(i)) {
                if let Some(c) = r.candle {
                    closes.push(c);
                }
            }
        }
        assert!(!closes.is_empty());
        for pair in closes.windows(2) {
            assert!(pair[0].start_ms < pair[1].start_ms);
        }
    }

    #[test]
    fn recommendation_table_first_match_wins() {
        use Recommendation::*;
        assert_eq!(resolve_recommendation(BandVerdict::Buy, 0.02, 0.1, false), StrongBuy);
        assert_eq!(resolve_recommendation(BandVerdict::Sell, -0.02, 0.1, false), StrongSell);
        // Band verdict disagrees with the score → plain directional call.
        assert_eq!(resolve_recommendation(BandVerdict::Sell, 0.02, 0.1, false), Buy);
        assert_eq!(resolve_recommendation(BandVerdict::None, -0.02, 0.1, false), Sell);
        // Toxic flow suppresses directional calls.
        assert_eq!(resolve_recommendation(BandVerdict::Buy, 0.02, 0.8, false), WaitToxic);
        assert_eq!(resolve_recommendation(BandVerdict::None, 0.0, 0.75, true), WaitToxic);
        assert_eq!(resolve_recommendation(BandVerdict::None, 0.0, 0.6, true), WaitSqueeze);
        assert_eq!(resolve_recommendation(BandVerdict::None, 0.0, 0.6, false), Neutral);
    }

    struct CaptureSink(std::sync::Mutex<Vec<(String, i64)>>);

    impl SignalSink for CaptureSink {
        fn alpha_signal(&self, _signal: &AlphaSignal) {}
        fn microstructure(
            &self,
            _symbol: &str,
            _ts_ms: i64,
            _vpin: &VpinMetrics,
            _impact: &ImpactMetrics,
            _spread: f64,
        ) {
        }
        fn orderflow(&self, _symbol: &str, _ts_ms: i64, _flow: &OrderFlowSignal) {}
        fn regime(&self, _symbol: &str, _ts_ms: i64, _metrics: &RegimeMetrics) {}
        fn vwap(&self, _symbol: &str, _ts_ms: i64, _metrics: &VwapMetrics) {}
        fn candle(&self, _symbol: &str, _candle: &Candle) {}
        fn tick(&self, tick: &MarketTick) {
            self.0
                .lock()
                .unwrap()
                .push((tick.symbol.to_string(), tick.ts_ms));
        }
    }

    #[tokio::test]
    async fn router_gives_each_symbol_its_own_ordered_lane() {
        let sink = Arc::new(CaptureSink(std::sync::Mutex::new(Vec::new())));
        let mut router =
            PipelineRouter::new(small_cfg(), Some(sink.clone() as Arc<dyn SignalSink>));
        for i in 0..50i64 {
            let symbol: Symbol = Arc::from(if i % 2 == 0 { "BTCUSDT" } else { "ETHUSDT" });
            router.route(MarketTick { symbol, price: 100.0 + i as f64, volume: 1.0, ts_ms: i });
        }
        assert_eq!(router.lane_count(), 2);
        router.shutdown().await;

        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 50);
        let mut last_btc = -1i64;
        let mut last_eth = -1i64;
        for (symbol, ts) in seen.iter() {
            let last = if symbol == "BTCUSDT" { &mut last_btc } else { &mut last_eth };
            assert!(*ts > *last, "out-of-order tick for {symbol}");
            *last = *ts;
        }
    }

    #[test]
    fn combined_score_uses_regime_weights() {
        let mut composer = Composer::new(Arc::from("BTCUSDT"), small_cfg(), None);
        for i in 0..300 {
            if let Some(r) = composer.on_tick(&walk(i)) {
                if let Some(a) = &r.alpha {
                    let expected = r.weights.momentum * a.momentum
                        + r.weights.mean_reversion * a.mean_rev_z;
                    assert!((r.combined_score - expected).abs() < 1e-12);
                }
            }
        }
    }
}
