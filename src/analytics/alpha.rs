/// analytics/alpha.rs — Tick- and candle-timeframe alpha signals
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// TICK BRANCH (rolling window of N ticks)
///   momentum  = P_t / P_{t−N+1} − 1
///   meanRevZ  = (P_t − SMA_N) / σ_N        (0 when σ_N ≤ 1e−8)
///
///   σ_N is the population deviation of the window. The classic
///   Σp² − (Σp/N)² form cancels catastrophically at large price levels, so
///   the window is re-centred each emit instead; same output contract.
///
/// CANDLE BRANCH (window of M closed candles)
///   Bollinger(20, 2) + RSI(14) + volume ratio partitioned by close
///   direction, fused into a discrete verdict:
///     BUY  when close < lower ∧ RSI < 30 ∧ vol-ratio < 0.7
///     SELL when close > upper ∧ RSI > 70 ∧ vol-ratio > 1.3
/// ─────────────────────────────────────────────────────────────────────────
use std::collections::VecDeque;

use crate::analytics::indicators::{self, Macd, Stochastic};
use crate::data::{Candle, Symbol};

const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_MULT: f64 = 2.0;
const RSI_PERIOD: usize = 14;

/// Which branch produced a signal. String form is rendered only at the
/// sink boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaKind {
    Tick,
    Candle,
}

/// Discrete candle-branch verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleVerdict {
    Buy,
    Sell,
    None,
}

#[derive(Debug, Clone)]
pub struct AlphaSignal {
    pub symbol: Symbol,
    pub ts_ms: i64,
    pub momentum: f64,
    pub mean_rev_z: f64,
    pub rsi: f64,
    pub volume_ratio: f64,
    pub kind: AlphaKind,
    pub verdict: CandleVerdict,
}

/// Incremental per-symbol alpha engine. Single-owner: mutated only by the
/// composer that created it.
#[derive(Debug)]
pub struct AlphaEngine {
    symbol: Symbol,
    tick_window: usize,
    candle_window: usize,
    prices: VecDeque<f64>,
    closes: Vec<f64>,
    highs: Vec<f64>,
    lows: Vec<f64>,
    volumes: Vec<f64>,
}

impl AlphaEngine {
    pub fn new(symbol: Symbol, tick_window: usize, candle_window: usize) -> Self {
        assert!(tick_window >= 2, "tick window must hold at least 2 ticks");
        assert!(
            candle_window >= BOLLINGER_PERIOD,
            "candle window must cover the Bollinger period"
        );
        Self {
            symbol,
            tick_window,
            candle_window,
            prices: VecDeque::with_capacity(tick_window + 1),
            closes: Vec::new(),
            highs: Vec::new(),
            lows: Vec::new(),
            volumes: Vec::new(),
        }
    }

    /// Feed one tick. Emits a tick-timeframe signal once the window is full.
    pub fn on_tick(&mut self, price: f64, ts_ms: i64) -> Option<AlphaSignal> {
        self.prices.push_back(price);
        if self.prices.len() > self.tick_window {
            self.prices.pop_front();
        }
        if self.prices.len() < self.tick_window {
            return None;
        }

        let n = self.prices.len() as f64;
        let mean = self.prices.iter().sum::<f64>() / n;
        let var = self.prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        let vol = var.max(0.0).sqrt();

        let oldest = self.prices.front().copied().unwrap_or(price);
        let momentum = if oldest.abs() > 1e-12 { price / oldest - 1.0 } else { 0.0 };
        let mean_rev_z = if vol > 1e-8 { (price - mean) / vol } else { 0.0 };

        Some(AlphaSignal {
            symbol: self.symbol.clone(),
            ts_ms,
            momentum,
            mean_rev_z,
            rsi: 0.0,
            volume_ratio: 0.0,
            kind: AlphaKind::Tick,
            verdict: CandleVerdict::None,
        })
    }

    /// Feed one closed candle. Emits a candle-timeframe signal once the
    /// candle window is full.
    pub fn on_candle(&mut self, candle: &Candle) -> Option<AlphaSignal> {
        self.closes.push(candle.close);
        self.highs.push(candle.high);
        self.lows.push(candle.low);
        self.volumes.push(candle.volume);
        if self.closes.len() > self.candle_window {
            let excess = self.closes.len() - self.candle_window;
            self.closes.drain(..excess);
            self.highs.drain(..excess);
            self.lows.drain(..excess);
            self.volumes.drain(..excess);
        }
        if self.closes.len() < self.candle_window {
            return None;
        }

        let bb = indicators::bollinger(&self.closes, BOLLINGER_PERIOD, BOLLINGER_MULT);
        let rsi = indicators::rsi(&self.closes, RSI_PERIOD);
        let vr = indicators::volume_ratio(&self.closes, &self.volumes);
        let price = candle.close;

        let verdict = if price < bb.lower && rsi < 30.0 && vr < 0.7 {
            CandleVerdict::Buy
        } else if price > bb.upper && rsi > 70.0 && vr > 1.3 {
            CandleVerdict::Sell
        } else {
            CandleVerdict::None
        };

        Some(AlphaSignal {
            symbol: self.symbol.clone(),
            ts_ms: candle.end_ms,
            momentum: 0.0,
            mean_rev_z: 0.0,
            rsi,
            volume_ratio: vr,
            kind: AlphaKind::Candle,
            verdict,
        })
    }

    /// ATR over the retained candle history.
    pub fn atr(&self, period: usize) -> f64 {
        indicators::atr(&self.highs, &self.lows, &self.closes, period)
    }

    /// Stochastic oscillator over the retained candle history.
    pub fn stochastic(&self, period: usize) -> Stochastic {
        indicators::stochastic(&self.highs, &self.lows, &self.closes, period)
    }

    /// MACD over the retained candle closes.
    pub fn macd(&self, fast: usize, slow: usize) -> Macd {
        indicators::macd(&self.closes, fast, slow)
    }

    pub fn reset(&mut self) {
        self.prices.clear();
        self.closes.clear();
        self.highs.clear();
        self.lows.clear();
        self.volumes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn engine(tick_window: usize) -> AlphaEngine {
        AlphaEngine::new(Arc::from("BTCUSDT"), tick_window, 20)
    }

    fn candle(close: f64, volume: f64, ts: i64) -> Candle {
        Candle {
            open: close,
            high: close * 1.001,
            low: close * 0.999,
            close,
            volume,
            start_ms: ts,
            end_ms: ts + 59_000,
        }
    }

    #[test]
    fn no_signal_until_window_full() {
        let mut eng = engine(5);
        for i in 0..4 {
            assert!(eng.on_tick(100.0 + i as f64, i).is_none());
        }
        assert!(eng.on_tick(104.0, 4).is_some());
    }

    #[test]
    fn momentum_is_return_over_window() {
        let mut eng = engine(4);
        let mut last = None;
        for (i, p) in [100.0, 101.0, 102.0, 110.0].iter().enumerate() {
            last = eng.on_tick(*p, i as i64);
        }
        let sig = last.unwrap();
        assert!((sig.momentum - (110.0 / 100.0 - 1.0)).abs() < 1e-12);
        assert_eq!(sig.kind, AlphaKind::Tick);
        assert_eq!(sig.rsi, 0.0);
    }

    #[test]
    fn zero_vol_window_gives_zero_z() {
        let mut eng = engine(5);
        let mut last = None;
        for i in 0..5 {
            last = eng.on_tick(250.0, i);
        }
        let sig = last.unwrap();
        assert_eq!(sig.mean_rev_z, 0.0);
        assert_eq!(sig.momentum, 0.0);
    }

    #[test]
    fn mean_rev_z_sign_tracks_displacement() {
        let mut eng = engine(10);
        for i in 0..9 {
            eng.on_tick(100.0 + ((i % 3) as f64 - 1.0) * 0.5, i);
        }
        let sig = eng.on_tick(120.0, 9).unwrap();
        assert!(sig.mean_rev_z > 1.0, "z = {}", sig.mean_rev_z);
    }

    #[test]
    fn candle_branch_waits_for_window() {
        let mut eng = engine(5);
        for i in 0..19 {
            assert!(eng.on_candle(&candle(100.0, 10.0, i * 60_000)).is_none());
        }
        let sig = eng.on_candle(&candle(100.0, 10.0, 19 * 60_000)).unwrap();
        assert_eq!(sig.kind, AlphaKind::Candle);
        // Flat closes → zero-loss RSI path, neutral verdict.
        assert_eq!(sig.rsi, 100.0);
        assert_eq!(sig.verdict, CandleVerdict::None);
    }

    #[test]
    fn candle_history_is_bounded() {
        let mut eng = engine(5);
        for i in 0..200 {
            eng.on_candle(&candle(100.0 + i as f64 * 0.1, 10.0, i * 60_000));
        }
        assert!(eng.closes.len() <= 20);
        assert!(eng.highs.len() <= 20);
    }

    #[test]
    fn candle_sell_verdict_on_overbought_breakout() {
        let mut eng = engine(5);
        // 19 quiet candles with modest volume, then a surge above the upper
        // band on heavy volume and a long run-up for RSI > 70.
        for i in 0..12 {
            eng.on_candle(&candle(100.0 + ((i % 2) as f64) * 0.2, 10.0, i * 60_000));
        }
        for i in 12..19 {
            eng.on_candle(&candle(100.0 + (i - 11) as f64 * 0.8, 30.0, i * 60_000));
        }
        let sig = eng.on_candle(&candle(115.0, 50.0, 19 * 60_000)).unwrap();
        assert!(sig.rsi > 70.0, "rsi = {}", sig.rsi);
        assert!(sig.volume_ratio > 1.3, "vr = {}", sig.volume_ratio);
        assert_eq!(sig.verdict, CandleVerdict::Sell);
    }
}
