/// analytics/orderflow.rs — Order-flow imbalance, pressure, aggression
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// ORDER FLOW IMBALANCE (rolling window W)
///   OFI = (Σ buy vol − Σ sell vol) / (Σ buy vol + Σ sell vol) ∈ [−1, +1]
///
/// BID/ASK PRESSURE
///   bid = B/(B+A), ask = A/(B+A); both 0.5 with no volume.
///   ratio = (B−A)/(B+A); dominant side fires beyond ±0.1.
///
/// TRADE AGGRESSION
///   per-trade score = sign · (volume / avg volume − 1), rolling mean.
///
/// TOXICITY
///   toxicity = 0.4·ofiₙ + 0.3·pressureₙ + 0.3·min(1, |aggr|)
///   with xₙ = (|x|+1)/2; toxic flow above 0.7.
///
/// FLOW DIRECTION
///   (OFI + pressure ratio)/2: > 0.2 buy-dominant, < −0.2 sell-dominant.
/// ─────────────────────────────────────────────────────────────────────────
use std::collections::VecDeque;

use serde::Serialize;

/// Recent signed-volume window for the delta readout.
const RECENT_DELTA_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowDirection {
    BuyDominant,
    SellDominant,
    Neutral,
}

impl FlowDirection {
    pub fn label(&self) -> &'static str {
        match self {
            FlowDirection::BuyDominant => "BUY_DOMINANT",
            FlowDirection::SellDominant => "SELL_DOMINANT",
            FlowDirection::Neutral => "NEUTRAL",
        }
    }
}

/// Merged per-tick order-flow readout.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OrderFlowSignal {
    /// OFI ∈ [−1, 1]
    pub imbalance: f64,
    pub bid_pressure: f64,
    pub ask_pressure: f64,
    /// (B−A)/(B+A) ∈ [−1, 1]
    pub pressure_ratio: f64,
    /// +1 / −1 beyond the ±0.1 ratio threshold, else 0
    pub dominant_side: i8,
    /// Fraction of window volumes above 1.5× the median ∈ [0, 1]
    pub aggression: f64,
    /// Rolling mean of signed size-vs-average scores
    pub aggression_score: f64,
    /// Recent-half OFI minus old-half OFI
    pub flow_momentum: f64,
    pub cumulative_delta: f64,
    pub recent_delta: f64,
    pub toxicity: f64,
    pub is_toxic: bool,
    pub direction: FlowDirection,
}

// ── OFI ──────────────────────────────────────────────────────────────────

/// Rolling order-flow imbalance.
///
/// Window upkeep evicts the buy deque first while the combined size is over
/// the cap, so sustained one-sided flow shortens the other side's effective
/// history. A parallel chronological deque of signed volumes (same cap)
/// backs the momentum and aggression readouts, which need arrival order.
#[derive(Debug)]
struct OfiCalculator {
    window: usize,
    buys: VecDeque<f64>,
    sells: VecDeque<f64>,
    flows: VecDeque<f64>,
}

impl OfiCalculator {
    fn new(window: usize) -> Self {
        Self {
            window,
            buys: VecDeque::with_capacity(window),
            sells: VecDeque::with_capacity(window),
            flows: VecDeque::with_capacity(window),
        }
    }

    fn push(&mut self, volume: f64, is_buy: bool) {
        if is_buy {
            self.buys.push_back(volume);
        } else {
            self.sells.push_back(volume);
        }
        while self.buys.len() + self.sells.len() > self.window {
            if !self.buys.is_empty() {
                self.buys.pop_front();
            } else {
                self.sells.pop_front();
            }
        }
        self.flows.push_back(if is_buy { volume } else { -volume });
        if self.flows.len() > self.window {
            self.flows.pop_front();
        }
    }

    fn imbalance(&self) -> f64 {
        let buy: f64 = self.buys.iter().sum();
        let sell: f64 = self.sells.iter().sum();
        let total = buy + sell;
        if total < 1e-12 {
            return 0.0;
        }
        (buy - sell) / total
    }

    /// Fraction of window volumes exceeding 1.5× the median volume.
    fn aggression(&self) -> f64 {
        if self.flows.is_empty() {
            return 0.0;
        }
        let mut vols: Vec<f64> = self.flows.iter().map(|f| f.abs()).collect();
        vols.sort_by(|a, b| a.total_cmp(b));
        let median = vols[vols.len() / 2];
        if median < 1e-12 {
            return 0.0;
        }
        let above = vols.iter().filter(|&&v| v > 1.5 * median).count();
        above as f64 / vols.len() as f64
    }

    /// Imbalance of the recent half minus imbalance of the old half.
    fn momentum(&self) -> f64 {
        let n = self.flows.len();
        if n < 2 {
            return 0.0;
        }
        let half = n / 2;
        let old = flow_imbalance(self.flows.iter().take(half));
        let recent = flow_imbalance(self.flows.iter().skip(half));
        recent - old
    }
}

fn flow_imbalance<'a>(flows: impl Iterator<Item = &'a f64>) -> f64 {
    let mut signed = 0.0;
    let mut total = 0.0;
    for f in flows {
        signed += f;
        total += f.abs();
    }
    if total < 1e-12 {
        0.0
    } else {
        signed / total
    }
}

// ── Bid/ask pressure ─────────────────────────────────────────────────────

#[derive(Debug)]
struct PressureGauge {
    window: usize,
    buys: VecDeque<f64>,
    sells: VecDeque<f64>,
}

impl PressureGauge {
    fn new(window: usize) -> Self {
        Self {
            window,
            buys: VecDeque::with_capacity(window),
            sells: VecDeque::with_capacity(window),
        }
    }

    fn push(&mut self, volume: f64, is_buy: bool) {
        let side = if is_buy { &mut self.buys } else { &mut self.sells };
        side.push_back(volume);
        if side.len() > self.window {
            side.pop_front();
        }
    }

    fn totals(&self) -> (f64, f64) {
        (self.buys.iter().sum(), self.sells.iter().sum())
    }

    /// (bid share, ask share); both 0.5 with no volume.
    fn pressures(&self) -> (f64, f64) {
        let (b, a) = self.totals();
        let total = b + a;
        if total < 1e-12 {
            return (0.5, 0.5);
        }
        (b / total, a / total)
    }

    fn ratio(&self) -> f64 {
        let (b, a) = self.totals();
        let total = b + a;
        if total < 1e-12 {
            return 0.0;
        }
        (b - a) / total
    }

    fn dominant_side(&self) -> i8 {
        let r = self.ratio();
        if r > 0.1 {
            1
        } else if r < -0.1 {
            -1
        } else {
            0
        }
    }
}

// ── Trade aggression ─────────────────────────────────────────────────────

#[derive(Debug)]
struct AggressionTracker {
    window: usize,
    volumes: VecDeque<f64>,
    scores: VecDeque<f64>,
}

impl AggressionTracker {
    fn new(window: usize) -> Self {
        Self {
            window,
            volumes: VecDeque::with_capacity(window),
            scores: VecDeque::with_capacity(window),
        }
    }

    fn push(&mut self, volume: f64, is_buy: bool) {
        self.volumes.push_back(volume);
        if self.volumes.len() > self.window {
            self.volumes.pop_front();
        }
        let avg = self.volumes.iter().sum::<f64>() / self.volumes.len() as f64;
        let score = if avg < 1e-12 {
            0.0
        } else {
            let sign = if is_buy { 1.0 } else { -1.0 };
            sign * (volume / avg - 1.0)
        };
        self.scores.push_back(score);
        if self.scores.len() > self.window {
            self.scores.pop_front();
        }
    }

    fn score(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().sum::<f64>() / self.scores.len() as f64
    }
}

// ── Volume delta ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct VolumeDelta {
    cumulative: f64,
    recent: VecDeque<f64>,
}

impl VolumeDelta {
    fn push(&mut self, signed: f64) {
        self.cumulative += signed;
        self.recent.push_back(signed);
        if self.recent.len() > RECENT_DELTA_CAP {
            self.recent.pop_front();
        }
    }

    fn recent_sum(&self) -> f64 {
        self.recent.iter().sum()
    }
}

// ── Combined engine ──────────────────────────────────────────────────────

/// Per-symbol order-flow engine. The caller derives `is_buy` from the tick
/// stream (price above the previous trade).
#[derive(Debug)]
pub struct OrderFlowEngine {
    ofi: OfiCalculator,
    pressure: PressureGauge,
    aggression: AggressionTracker,
    delta: VolumeDelta,
}

impl OrderFlowEngine {
    pub fn new(window: usize) -> Self {
        assert!(window >= 2, "order-flow window must hold at least 2 trades");
        Self {
            ofi: OfiCalculator::new(window),
            pressure: PressureGauge::new(window),
            aggression: AggressionTracker::new(window),
            delta: VolumeDelta::default(),
        }
    }

    pub fn on_trade(&mut self, volume: f64, is_buy: bool) -> OrderFlowSignal {
        self.ofi.push(volume, is_buy);
        self.pressure.push(volume, is_buy);
        self.aggression.push(volume, is_buy);
        self.delta.push(if is_buy { volume } else { -volume });
        self.signal()
    }

    /// Current merged readout without ingesting a trade.
    pub fn signal(&self) -> OrderFlowSignal {
        let ofi = self.ofi.imbalance();
        let (bid_pressure, ask_pressure) = self.pressure.pressures();
        let pressure_ratio = self.pressure.ratio();
        let aggression_score = self.aggression.score();

        let ofi_norm = (ofi.abs() + 1.0) / 2.0;
        let pressure_norm = (pressure_ratio.abs() + 1.0) / 2.0;
        let toxicity =
            0.4 * ofi_norm + 0.3 * pressure_norm + 0.3 * aggression_score.abs().min(1.0);

        let combined = (ofi + pressure_ratio) / 2.0;
        let direction = if combined > 0.2 {
            FlowDirection::BuyDominant
        } else if combined < -0.2 {
            FlowDirection::SellDominant
        } else {
            FlowDirection::Neutral
        };

        OrderFlowSignal {
            imbalance: ofi,
            bid_pressure,
            ask_pressure,
            pressure_ratio,
            dominant_side: self.pressure.dominant_side(),
            aggression: self.ofi.aggression(),
            aggression_score,
            flow_momentum: self.ofi.momentum(),
            cumulative_delta: self.delta.cumulative,
            recent_delta: self.delta.recent_sum(),
            toxicity,
            is_toxic: toxicity > 0.7,
            direction,
        }
    }

    pub fn reset(&mut self) {
        let window = self.ofi.window;
        *self = Self::new(window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressures_sum_to_one_with_volume() {
        let mut eng = OrderFlowEngine::new(20);
        for i in 0..30 {
            let sig = eng.on_trade(1.0 + (i % 4) as f64, i % 3 == 0);
            assert!((sig.bid_pressure + sig.ask_pressure - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn pressures_are_half_each_before_any_volume() {
        let eng = OrderFlowEngine::new(20);
        let sig = eng.signal();
        assert_eq!(sig.bid_pressure, 0.5);
        assert_eq!(sig.ask_pressure, 0.5);
    }

    #[test]
    fn ofi_saturates_on_one_sided_flow() {
        let mut eng = OrderFlowEngine::new(10);
        let mut sig = eng.signal();
        for _ in 0..10 {
            sig = eng.on_trade(2.0, true);
        }
        assert!((sig.imbalance - 1.0).abs() < 1e-12);
        assert_eq!(sig.direction, FlowDirection::BuyDominant);
        assert_eq!(sig.dominant_side, 1);
    }

    #[test]
    fn ofi_eviction_prefers_buy_side() {
        let mut ofi = OfiCalculator::new(4);
        for _ in 0..4 {
            ofi.push(1.0, true);
        }
        // Two sells push the combined size over the cap twice; both
        // evictions land on the buy deque.
        ofi.push(1.0, false);
        ofi.push(1.0, false);
        assert_eq!(ofi.buys.len(), 2);
        assert_eq!(ofi.sells.len(), 2);
        assert!(ofi.imbalance().abs() < 1e-12);
    }

    #[test]
    fn toxicity_bounded_and_fires_on_one_sided_bursts() {
        let mut eng = OrderFlowEngine::new(20);
        let mut last = eng.signal();
        for i in 0..40 {
            // Heavy buy bursts against token sells.
            let (vol, is_buy) = if i % 5 == 0 { (0.1, false) } else { (8.0, true) };
            last = eng.on_trade(vol, is_buy);
            assert!((0.0..=1.0).contains(&last.toxicity), "tox = {}", last.toxicity);
        }
        assert!(last.toxicity > 0.7, "tox = {}", last.toxicity);
        assert!(last.is_toxic);
    }

    #[test]
    fn flow_momentum_flips_with_regime_change() {
        let mut eng = OrderFlowEngine::new(20);
        for _ in 0..10 {
            eng.on_trade(1.0, false);
        }
        let mut sig = eng.signal();
        for _ in 0..10 {
            sig = eng.on_trade(1.0, true);
        }
        // Old half sold, recent half bought.
        assert!(sig.flow_momentum > 1.5, "momentum = {}", sig.flow_momentum);
    }

    #[test]
    fn cumulative_delta_tracks_signed_volume() {
        let mut eng = OrderFlowEngine::new(10);
        eng.on_trade(5.0, true);
        eng.on_trade(2.0, false);
        let sig = eng.on_trade(1.0, true);
        assert!((sig.cumulative_delta - 4.0).abs() < 1e-12);
        assert!((sig.recent_delta - 4.0).abs() < 1e-12);
    }

    #[test]
    fn aggression_fraction_counts_outsized_trades() {
        let mut eng = OrderFlowEngine::new(10);
        for _ in 0..9 {
            eng.on_trade(1.0, true);
        }
        let sig = eng.on_trade(10.0, true);
        // Median 1.0 → exactly one volume above 1.5.
        assert!((sig.aggression - 0.1).abs() < 1e-12, "aggr = {}", sig.aggression);
    }
}
