/// data.rs — Canonical stream units: ticks, candles, interval aggregation.
///
/// Every analyzer downstream consumes `MarketTick` in arrival order; the
/// `CandleAggregator` buckets the same stream into fixed-interval OHLCV
/// candles for the candle-timeframe branch of the alpha engine.
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// Interned symbol handle, cloned freely across the pipeline.
pub type Symbol = Arc<str>;

/// Rejection reasons for inbound trade events.
#[derive(Debug, Error, PartialEq)]
pub enum TickError {
    #[error("price {0} is not strictly positive")]
    NonPositivePrice(f64),
    #[error("price or volume is not finite")]
    NonFinite,
    #[error("volume {0} is negative")]
    NegativeVolume(f64),
    #[error("timestamp {0} is negative")]
    NegativeTimestamp(i64),
}

/// A single trade event from a feed. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct MarketTick {
    pub symbol: Symbol,
    /// Trade price, strictly positive
    pub price: f64,
    /// Trade volume (base asset), non-negative
    pub volume: f64,
    /// Milliseconds since the Unix epoch; monotone per symbol
    pub ts_ms: i64,
}

impl MarketTick {
    /// Validating constructor. Feeds should route anything rejected here
    /// to a drop counter rather than into the pipeline.
    pub fn new(symbol: Symbol, price: f64, volume: f64, ts_ms: i64) -> Result<Self, TickError> {
        if !price.is_finite() || !volume.is_finite() {
            return Err(TickError::NonFinite);
        }
        if price <= 0.0 {
            return Err(TickError::NonPositivePrice(price));
        }
        if volume < 0.0 {
            return Err(TickError::NegativeVolume(volume));
        }
        if ts_ms < 0 {
            return Err(TickError::NegativeTimestamp(ts_ms));
        }
        Ok(Self { symbol, price, volume, ts_ms })
    }
}

/// Time-bucketed OHLCV summary. Invariant: low ≤ open, close ≤ high.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Buckets a tick stream into fixed-interval candles.
///
/// A tick whose age from the current candle's start reaches the interval
/// closes that candle. The emitted candle does NOT include the triggering
/// tick: the new interval opens at the triggering tick's price with its
/// volume reset to zero.
#[derive(Debug)]
pub struct CandleAggregator {
    interval_ms: i64,
    current: Option<Candle>,
}

impl CandleAggregator {
    pub fn new(interval_secs: u64) -> Self {
        assert!(interval_secs > 0, "candle interval must be positive");
        Self { interval_ms: (interval_secs * 1000) as i64, current: None }
    }

    /// Feed one tick. Returns the candle closed by this tick, if any.
    pub fn on_tick(&mut self, price: f64, volume: f64, ts_ms: i64) -> Option<Candle> {
        match self.current.as_mut() {
            None => {
                self.current = Some(Candle {
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume,
                    start_ms: ts_ms,
                    end_ms: ts_ms,
                });
                None
            }
            Some(c) if ts_ms - c.start_ms >= self.interval_ms => {
                let closed = *c;
                self.current = Some(Candle {
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: 0.0,
                    start_ms: ts_ms,
                    end_ms: ts_ms,
                });
                Some(closed)
            }
            Some(c) => {
                c.high = c.high.max(price);
                c.low = c.low.min(price);
                c.close = price;
                c.volume += volume;
                c.end_ms = ts_ms;
                None
            }
        }
    }

    /// The candle currently being built, if any.
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym() -> Symbol {
        Arc::from("BTCUSDT")
    }

    #[test]
    fn tick_validation() {
        assert!(MarketTick::new(sym(), 100.0, 1.0, 0).is_ok());
        assert_eq!(
            MarketTick::new(sym(), 0.0, 1.0, 0).unwrap_err(),
            TickError::NonPositivePrice(0.0)
        );
        assert_eq!(
            MarketTick::new(sym(), f64::NAN, 1.0, 0).unwrap_err(),
            TickError::NonFinite
        );
        assert_eq!(
            MarketTick::new(sym(), 100.0, -1.0, 0).unwrap_err(),
            TickError::NegativeVolume(-1.0)
        );
        assert_eq!(
            MarketTick::new(sym(), 100.0, 1.0, -5).unwrap_err(),
            TickError::NegativeTimestamp(-5)
        );
    }

    #[test]
    fn aggregator_builds_ohlcv_within_interval() {
        let mut agg = CandleAggregator::new(60);
        assert!(agg.on_tick(100.0, 1.0, 0).is_none());
        assert!(agg.on_tick(103.0, 2.0, 10_000).is_none());
        assert!(agg.on_tick(99.0, 1.5, 20_000).is_none());
        let c = agg.current().unwrap();
        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 103.0);
        assert_eq!(c.low, 99.0);
        assert_eq!(c.close, 99.0);
        assert!((c.volume - 4.5).abs() < 1e-12);
        assert_eq!(c.start_ms, 0);
        assert_eq!(c.end_ms, 20_000);
    }

    #[test]
    fn triggering_tick_excluded_from_emitted_candle() {
        let mut agg = CandleAggregator::new(60);
        agg.on_tick(100.0, 1.0, 0);
        agg.on_tick(105.0, 2.0, 30_000);
        let closed = agg.on_tick(200.0, 9.0, 60_000).expect("candle should close");
        // The 200.0 tick belongs to the next interval.
        assert_eq!(closed.high, 105.0);
        assert!((closed.volume - 3.0).abs() < 1e-12);
        let fresh = agg.current().unwrap();
        assert_eq!(fresh.open, 200.0);
        assert_eq!(fresh.volume, 0.0);
        assert_eq!(fresh.start_ms, 60_000);
    }

    #[test]
    fn emission_order_and_candle_invariants() {
        let mut agg = CandleAggregator::new(1);
        let mut emitted = Vec::new();
        let prices = [100.0, 101.5, 99.2, 100.8, 103.0, 97.5, 98.1, 102.2];
        for (i, &p) in prices.iter().enumerate() {
            if let Some(c) = agg.on_tick(p, 1.0, i as i64 * 700) {
                emitted.push(c);
            }
        }
        assert!(!emitted.is_empty());
        for pair in emitted.windows(2) {
            assert!(pair[0].start_ms < pair[1].start_ms);
        }
        for c in &emitted {
            assert!(c.low <= c.open && c.open <= c.high);
            assert!(c.low <= c.close && c.close <= c.high);
            assert!(c.volume >= 0.0);
            assert!(c.start_ms <= c.end_ms);
        }
    }
}
