/// analytics/microstructure.rs — Trade classification, VPIN, price impact
///
/// ```text
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// TRADE CLASSIFICATION (Lee–Ready style)
///   With a live quote (bid > 0 ∧ ask > 0):
///     price > mid → BUY,  price < mid → SELL,  price = mid → tick rule
///   Tick rule:
///     price > last → BUY, price < last → SELL,
///     price = last → inherit previous side, no history → UNKNOWN
///
/// VPIN — Easley, López de Prado, O'Hara (2012)
///   Volume buckets of size V₀: each classified trade adds |signed volume|
///   to the running bucket and its buy side when buyer-initiated. A bucket
///   closing at ≥ V₀ records imbalance |2·V_buy − V_total| into a rolling
///   window of W buckets.
///
///       VPIN = clamp(mean(imbalances) / V₀, 0, 1)
///
///   Defined only with ≥ 2 completed buckets (0 before that).
///
/// PRICE IMPACT (Kyle-lambda proxy)
///   OLS over the last `impact_window` (ΔP, signed volume) pairs, n ≥ 10:
///
///       λ = cov(ΔP, Q) / var(Q)
///
///   permanent = 0.8·λ, transient = 0.2·λ, adverse selection = |λ|.
///
/// ROLL SPREAD — serial covariance of the same ΔP series (see indicators).
/// ─────────────────────────────────────────────────────────────────────────
/// ```
use std::collections::VecDeque;

use serde::Serialize;

use crate::analytics::indicators;

/// Classified trades and raw trades retained for rolling readouts.
const HISTORY_CAP: usize = 1000;
/// Minimum pairs before the impact regression is meaningful.
const MIN_IMPACT_SAMPLES: usize = 10;
/// Minimum completed buckets before VPIN is meaningful.
const MIN_VPIN_BUCKETS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
    Unknown,
}

/// One classified trade: side plus signed volume (0 when UNKNOWN).
#[derive(Debug, Clone, Copy)]
pub struct TradeClassification {
    pub side: TradeSide,
    pub signed_volume: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VpinMetrics {
    pub vpin: f64,
    pub toxicity: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub imbalance: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ImpactMetrics {
    /// Price change per unit of signed volume
    pub lambda: f64,
    pub permanent_impact: f64,
    pub transient_impact: f64,
    pub adverse_selection: f64,
}

/// Per-symbol microstructure state. Single-owner, bounded memory.
#[derive(Debug)]
pub struct MicrostructureAnalyzer {
    bucket_size: f64,
    vpin_window: usize,
    impact_window: usize,

    last_price: Option<f64>,
    last_side: TradeSide,

    // Running VPIN bucket
    bucket_volume: f64,
    bucket_buy_volume: f64,
    bucket_imbalances: VecDeque<f64>,

    // (ΔP, signed volume) pairs, chronological
    impact_pairs: VecDeque<(f64, f64)>,

    trades: VecDeque<(f64, f64, i64)>,
    classified: VecDeque<TradeClassification>,
}

impl MicrostructureAnalyzer {
    pub fn new(bucket_size: f64, vpin_window: usize, impact_window: usize) -> Self {
        assert!(bucket_size > 0.0, "VPIN bucket size must be positive");
        assert!(vpin_window >= MIN_VPIN_BUCKETS, "VPIN window too small");
        Self {
            bucket_size,
            vpin_window,
            impact_window,
            last_price: None,
            last_side: TradeSide::Unknown,
            bucket_volume: 0.0,
            bucket_buy_volume: 0.0,
            bucket_imbalances: VecDeque::with_capacity(vpin_window),
            impact_pairs: VecDeque::with_capacity(impact_window),
            trades: VecDeque::with_capacity(HISTORY_CAP),
            classified: VecDeque::with_capacity(HISTORY_CAP),
        }
    }

    /// Classify and ingest a trade with no quote context (tick rule only).
    pub fn on_trade(&mut self, price: f64, volume: f64, ts_ms: i64) -> TradeClassification {
        self.on_trade_with_quote(price, volume, ts_ms, 0.0, 0.0)
    }

    /// Classify and ingest a trade against the prevailing quote.
    pub fn on_trade_with_quote(
        &mut self,
        price: f64,
        volume: f64,
        ts_ms: i64,
        bid: f64,
        ask: f64,
    ) -> TradeClassification {
        let side = if bid > 0.0 && ask > 0.0 {
            let mid = 0.5 * (bid + ask);
            if price > mid {
                TradeSide::Buy
            } else if price < mid {
                TradeSide::Sell
            } else {
                self.tick_rule(price)
            }
        } else {
            self.tick_rule(price)
        };

        let signed_volume = match side {
            TradeSide::Buy => volume,
            TradeSide::Sell => -volume,
            TradeSide::Unknown => 0.0,
        };
        let classification = TradeClassification { side, signed_volume };

        // Impact regression input
        if let Some(last) = self.last_price {
            let dp = price - last;
            self.impact_pairs.push_back((dp, signed_volume));
            if self.impact_pairs.len() > self.impact_window {
                self.impact_pairs.pop_front();
            }
        }

        // VPIN bucket fill
        self.bucket_volume += signed_volume.abs();
        if side == TradeSide::Buy {
            self.bucket_buy_volume += volume;
        }
        if self.bucket_volume >= self.bucket_size {
            let imbalance = (2.0 * self.bucket_buy_volume - self.bucket_volume).abs();
            self.bucket_imbalances.push_back(imbalance);
            if self.bucket_imbalances.len() > self.vpin_window {
                self.bucket_imbalances.pop_front();
            }
            self.bucket_volume = 0.0;
            self.bucket_buy_volume = 0.0;
        }

        self.trades.push_back((price, volume, ts_ms));
        if self.trades.len() > HISTORY_CAP {
            self.trades.pop_front();
        }
        self.classified.push_back(classification);
        if self.classified.len() > HISTORY_CAP {
            self.classified.pop_front();
        }

        self.last_price = Some(price);
        self.last_side = side;
        classification
    }

    fn tick_rule(&self, price: f64) -> TradeSide {
        match self.last_price {
            None => TradeSide::Unknown,
            Some(last) if price > last => TradeSide::Buy,
            Some(last) if price < last => TradeSide::Sell,
            Some(_) => self.last_side,
        }
    }

    /// VPIN over the completed bucket window; 0 before two buckets exist.
    pub fn vpin(&self) -> f64 {
        if self.bucket_imbalances.len() < MIN_VPIN_BUCKETS {
            return 0.0;
        }
        let mean = self.bucket_imbalances.iter().sum::<f64>()
            / self.bucket_imbalances.len() as f64;
        (mean / self.bucket_size).clamp(0.0, 1.0)
    }

    /// VPIN plus flow totals over the classified-trade history.
    pub fn vpin_metrics(&self) -> VpinMetrics {
        let vpin = self.vpin();
        let mut buy_volume = 0.0;
        let mut sell_volume = 0.0;
        for c in &self.classified {
            if c.signed_volume > 0.0 {
                buy_volume += c.signed_volume;
            } else {
                sell_volume += -c.signed_volume;
            }
        }
        let total = buy_volume + sell_volume;
        let imbalance = if total > 1e-12 {
            (buy_volume - sell_volume).abs() / total
        } else {
            0.0
        };
        let toxicity = (0.7 * vpin + 0.3 * imbalance).clamp(0.0, 1.0);
        VpinMetrics { vpin, toxicity, buy_volume, sell_volume, imbalance }
    }

    /// Kyle-lambda price-impact regression over the retained pairs.
    pub fn price_impact(&self) -> ImpactMetrics {
        let n = self.impact_pairs.len();
        if n < MIN_IMPACT_SAMPLES {
            return ImpactMetrics::default();
        }
        let nf = n as f64;
        let dp_mean = self.impact_pairs.iter().map(|(dp, _)| dp).sum::<f64>() / nf;
        let q_mean = self.impact_pairs.iter().map(|(_, q)| q).sum::<f64>() / nf;
        let mut cov = 0.0;
        let mut var = 0.0;
        for (dp, q) in &self.impact_pairs {
            cov += (dp - dp_mean) * (q - q_mean);
            var += (q - q_mean).powi(2);
        }
        if var < 1e-12 {
            return ImpactMetrics::default();
        }
        let lambda = cov / var;
        ImpactMetrics {
            lambda,
            permanent_impact: 0.8 * lambda,
            transient_impact: 0.2 * lambda,
            adverse_selection: lambda.abs(),
        }
    }

    /// Roll effective spread over the retained price-change series.
    pub fn roll_spread(&self) -> f64 {
        let changes: Vec<f64> = self.impact_pairs.iter().map(|(dp, _)| *dp).collect();
        indicators::roll_spread(&changes)
    }

    pub fn reset(&mut self) {
        self.last_price = None;
        self.last_side = TradeSide::Unknown;
        self.bucket_volume = 0.0;
        self.bucket_buy_volume = 0.0;
        self.bucket_imbalances.clear();
        self.impact_pairs.clear();
        self.trades.clear();
        self.classified.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> MicrostructureAnalyzer {
        MicrostructureAnalyzer::new(100.0, 10, 100)
    }

    #[test]
    fn tick_rule_classification() {
        let mut m = analyzer();
        assert_eq!(m.on_trade(100.0, 1.0, 0).side, TradeSide::Unknown);
        assert_eq!(m.on_trade(101.0, 1.0, 1).side, TradeSide::Buy);
        assert_eq!(m.on_trade(100.5, 1.0, 2).side, TradeSide::Sell);
        // Unchanged price inherits the previous side.
        assert_eq!(m.on_trade(100.5, 1.0, 3).side, TradeSide::Sell);
    }

    #[test]
    fn quote_classification_overrides_tick_rule() {
        let mut m = analyzer();
        let c = m.on_trade_with_quote(100.75, 1.0, 0, 100.0, 101.0);
        assert_eq!(c.side, TradeSide::Buy);
        let c = m.on_trade_with_quote(100.25, 1.0, 1, 100.0, 101.0);
        assert_eq!(c.side, TradeSide::Sell);
        // At the mid, fall back to the tick rule (price rose off 100.25).
        let c = m.on_trade_with_quote(100.5, 1.0, 2, 100.0, 101.0);
        assert_eq!(c.side, TradeSide::Buy);
    }

    #[test]
    fn unknown_trades_carry_zero_signed_volume() {
        let mut m = analyzer();
        let c = m.on_trade(100.0, 5.0, 0);
        assert_eq!(c.side, TradeSide::Unknown);
        assert_eq!(c.signed_volume, 0.0);
    }

    #[test]
    fn vpin_pure_buy_buckets() {
        let mut m = analyzer();
        // Prime the tick rule so every subsequent ascending trade is a BUY.
        m.on_trade(99.0, 0.0, 0);
        let mut ts = 1;
        let mut price = 100.0;
        // First bucket: 100 buys of volume 1 → imbalance |2·100 − 100| = 100,
        // but a single bucket is below the readiness floor.
        for _ in 0..100 {
            price += 0.01;
            m.on_trade(price, 1.0, ts);
            ts += 1;
        }
        assert_eq!(m.vpin(), 0.0);
        // Second identical bucket → VPIN = (100 + 100)/2/100 = 1.0.
        for _ in 0..100 {
            price += 0.01;
            m.on_trade(price, 1.0, ts);
            ts += 1;
        }
        assert!((m.vpin() - 1.0).abs() < 1e-9, "vpin = {}", m.vpin());
    }

    #[test]
    fn vpin_and_toxicity_bounded_for_any_stream() {
        let mut m = MicrostructureAnalyzer::new(10.0, 5, 50);
        let mut price = 100.0;
        for i in 0..500i64 {
            price += ((i % 7) as f64 - 3.0) * 0.05;
            let vol = 0.5 + (i % 11) as f64;
            m.on_trade(price, vol, i);
            let v = m.vpin_metrics();
            assert!((0.0..=1.0).contains(&v.vpin), "vpin = {}", v.vpin);
            assert!((0.0..=1.0).contains(&v.toxicity), "tox = {}", v.toxicity);
            assert!((0.0..=1.0).contains(&v.imbalance));
            assert!(v.buy_volume >= 0.0 && v.sell_volume >= 0.0);
        }
    }

    #[test]
    fn impact_requires_minimum_samples() {
        let mut m = analyzer();
        for i in 0..8i64 {
            m.on_trade(100.0 + i as f64 * 0.1, 1.0, i);
        }
        assert_eq!(m.price_impact().lambda, 0.0);
    }

    #[test]
    fn lambda_positive_when_buys_move_price_up() {
        let mut m = analyzer();
        let mut price = 100.0;
        // Alternate heavy buys (price up a lot) and light sells (down a
        // little): ΔP correlates positively with signed volume.
        for i in 0..60i64 {
            if i % 2 == 0 {
                price += 0.5;
                m.on_trade(price, 10.0, i);
            } else {
                price -= 0.1;
                m.on_trade(price, 2.0, i);
            }
        }
        let impact = m.price_impact();
        assert!(impact.lambda > 0.0, "lambda = {}", impact.lambda);
        assert!((impact.permanent_impact - 0.8 * impact.lambda).abs() < 1e-12);
        assert!((impact.transient_impact - 0.2 * impact.lambda).abs() < 1e-12);
        assert!((impact.adverse_selection - impact.lambda.abs()).abs() < 1e-12);
    }

    #[test]
    fn histories_are_bounded() {
        let mut m = analyzer();
        for i in 0..2500i64 {
            m.on_trade(100.0 + (i % 5) as f64 * 0.1, 1.0, i);
        }
        assert!(m.trades.len() <= HISTORY_CAP);
        assert!(m.classified.len() <= HISTORY_CAP);
    }

    #[test]
    fn roll_spread_positive_on_bouncing_prices() {
        let mut m = analyzer();
        // Bid-ask bounce: price alternates ±0.5 around 100.
        for i in 0..50i64 {
            let p = if i % 2 == 0 { 100.5 } else { 99.5 };
            m.on_trade(p, 1.0, i);
        }
        assert!(m.roll_spread() > 0.0);
    }
}
