/// analytics/regime.rs — Market-regime classification and signal weighting
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// HURST EXPONENT (rescaled-range)
///   For each lag n up to min(max_lag, ⌊N/2⌋):
///     split returns into ⌊N/n⌋ disjoint segments; per segment,
///     Y_k = Σ_{i≤k}(r_i − r̄),  R = max(Y) − min(Y),  S = √(Σ(r−r̄)²/n)
///     record (ln n, ln avg(R/S)).
///   H = OLS slope of the log-log points, clamped to [0, 1].
///   Fewer than 3 valid lags → 0.5 (random-walk prior).
///
///   H < 0.5 anti-persistent, H ≈ 0.5 random, H > 0.5 trending.
///
/// AUTOCORRELATION   Pearson autocorrelation of returns at a fixed lag;
///   requires lag + 10 samples, else 0.
///
/// REALIZED VOLATILITY   σ = √(mean(r²) · 252) over the vol window.
///
/// TREND STRENGTH   OLS slope of the last min(50, N) prices against the
///   index, expressed as the total percent move across that window
///   (slope·n/mean·100) and mapped through min(pct/5, 1): a 5% window
///   move saturates the score.
///
/// CLASSIFICATION
///   trending = H > 0.55 ∨ trend > 0.6;  high-vol = min(σ, 1) > 0.6
///   → four base regimes; ambiguous persistence AND slope → TRANSITIONING;
///   too little history → UNKNOWN.
///
/// CONFIDENCE   Fraction of the last 5 classified regimes equal to the
///   current one; 0.3 until 5 classifications exist.
/// ─────────────────────────────────────────────────────────────────────────
use std::collections::VecDeque;

use serde::Serialize;

/// Classified regimes retained for the confidence readout.
const HISTORY_CAP: usize = 50;
/// Returns needed before classification leaves UNKNOWN.
const MIN_RETURNS: usize = 20;
/// Prices regressed for the trend-strength readout.
const TREND_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarketRegime {
    TrendingHighVol,
    TrendingLowVol,
    MeanRevHighVol,
    MeanRevLowVol,
    Transitioning,
    Unknown,
}

impl MarketRegime {
    pub fn label(&self) -> &'static str {
        match self {
            MarketRegime::TrendingHighVol => "TRENDING_HIGH_VOL",
            MarketRegime::TrendingLowVol => "TRENDING_LOW_VOL",
            MarketRegime::MeanRevHighVol => "MEAN_REV_HIGH_VOL",
            MarketRegime::MeanRevLowVol => "MEAN_REV_LOW_VOL",
            MarketRegime::Transitioning => "TRANSITIONING",
            MarketRegime::Unknown => "UNKNOWN",
        }
    }

    /// Per-regime signal weights for the composite score.
    pub fn signal_weights(self) -> SignalWeights {
        match self {
            MarketRegime::TrendingHighVol => SignalWeights {
                momentum: 0.7,
                mean_reversion: 0.2,
                breakout: 0.5,
                volatility_adjust: 1.5,
            },
            MarketRegime::TrendingLowVol => SignalWeights {
                momentum: 0.8,
                mean_reversion: 0.1,
                breakout: 0.6,
                volatility_adjust: 1.0,
            },
            MarketRegime::MeanRevHighVol => SignalWeights {
                momentum: 0.2,
                mean_reversion: 0.7,
                breakout: 0.3,
                volatility_adjust: 1.2,
            },
            MarketRegime::MeanRevLowVol => SignalWeights {
                momentum: 0.3,
                mean_reversion: 0.8,
                breakout: 0.4,
                volatility_adjust: 0.8,
            },
            MarketRegime::Transitioning | MarketRegime::Unknown => SignalWeights {
                momentum: 0.5,
                mean_reversion: 0.5,
                breakout: 0.5,
                volatility_adjust: 1.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SignalWeights {
    pub momentum: f64,
    pub mean_reversion: f64,
    pub breakout: f64,
    pub volatility_adjust: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegimeMetrics {
    pub regime: MarketRegime,
    /// ∈ [0, 1]
    pub hurst: f64,
    /// ∈ [−1, 1]
    pub autocorrelation: f64,
    /// Annualized, ≥ 0
    pub volatility: f64,
    /// ∈ [0, 1]
    pub trend_strength: f64,
    /// ∈ [0, 1]
    pub confidence: f64,
}

/// Per-symbol regime detector over bounded price/return history.
#[derive(Debug)]
pub struct RegimeDetector {
    window: usize,
    max_lag: usize,
    vol_window: usize,
    prices: VecDeque<f64>,
    returns: VecDeque<f64>,
    history: VecDeque<MarketRegime>,
}

impl RegimeDetector {
    pub fn new(window: usize, max_lag: usize, vol_window: usize) -> Self {
        assert!(window >= MIN_RETURNS, "regime window too small to classify");
        assert!(max_lag >= 2, "Hurst needs lags of at least 2");
        Self {
            window,
            max_lag,
            vol_window,
            prices: VecDeque::with_capacity(window),
            returns: VecDeque::with_capacity(window),
            history: VecDeque::with_capacity(HISTORY_CAP),
        }
    }

    /// Feed one price observation and re-classify.
    pub fn on_tick(&mut self, price: f64) -> RegimeMetrics {
        if let Some(&last) = self.prices.back() {
            if last > 0.0 && price > 0.0 {
                self.returns.push_back((price / last).ln());
                if self.returns.len() > self.window {
                    self.returns.pop_front();
                }
            }
        }
        self.prices.push_back(price);
        if self.prices.len() > self.window {
            self.prices.pop_front();
        }

        let hurst = self.hurst();
        let autocorrelation = self.autocorrelation(1);
        let volatility = self.realized_volatility();
        let trend_strength = self.trend_strength();
        let regime = self.classify(hurst, volatility, trend_strength);

        self.history.push_back(regime);
        if self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
        let confidence = self.confidence(regime);

        RegimeMetrics { regime, hurst, autocorrelation, volatility, trend_strength, confidence }
    }

    fn classify(&self, hurst: f64, volatility: f64, trend_strength: f64) -> MarketRegime {
        if self.returns.len() < MIN_RETURNS {
            return MarketRegime::Unknown;
        }
        let ambiguous_persistence = hurst > 0.45 && hurst < 0.55;
        let ambiguous_slope = trend_strength > 0.4 && trend_strength < 0.6;
        if ambiguous_persistence && ambiguous_slope {
            return MarketRegime::Transitioning;
        }
        let trending = hurst > 0.55 || trend_strength > 0.6;
        let high_vol = volatility.min(1.0) > 0.6;
        match (trending, high_vol) {
            (true, true) => MarketRegime::TrendingHighVol,
            (true, false) => MarketRegime::TrendingLowVol,
            (false, true) => MarketRegime::MeanRevHighVol,
            (false, false) => MarketRegime::MeanRevLowVol,
        }
    }

    fn confidence(&self, current: MarketRegime) -> f64 {
        if self.history.len() < 5 {
            return 0.3;
        }
        let matching = self
            .history
            .iter()
            .rev()
            .take(5)
            .filter(|&&r| r == current)
            .count();
        matching as f64 / 5.0
    }

    /// Rescaled-range Hurst estimate over the retained returns.
    pub fn hurst(&self) -> f64 {
        let returns: Vec<f64> = self.returns.iter().copied().collect();
        let n = returns.len();
        let max_lag = (n / 2).min(self.max_lag);
        if max_lag < 2 {
            return 0.5;
        }

        let mut points: Vec<(f64, f64)> = Vec::with_capacity(max_lag - 1);
        for lag in 2..=max_lag {
            let segments = n / lag;
            let mut rs_sum = 0.0;
            let mut valid = 0usize;
            for s in 0..segments {
                let seg = &returns[s * lag..(s + 1) * lag];
                let mean = seg.iter().sum::<f64>() / lag as f64;
                let mut cum = 0.0;
                let mut max = f64::NEG_INFINITY;
                let mut min = f64::INFINITY;
                for &r in seg {
                    cum += r - mean;
                    max = max.max(cum);
                    min = min.min(cum);
                }
                let range = max - min;
                let var = seg.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / lag as f64;
                let s_dev = var.sqrt();
                if s_dev > 1e-12 {
                    rs_sum += range / s_dev;
                    valid += 1;
                }
            }
            if valid > 0 {
                let avg_rs = rs_sum / valid as f64;
                if avg_rs > 0.0 {
                    points.push(((lag as f64).ln(), avg_rs.ln()));
                }
            }
        }

        if points.len() < 3 {
            return 0.5;
        }
        ols_slope(&points).clamp(0.0, 1.0)
    }

    /// Pearson autocorrelation of returns at `lag`; 0 with short history.
    pub fn autocorrelation(&self, lag: usize) -> f64 {
        let r: Vec<f64> = self.returns.iter().copied().collect();
        let n = r.len();
        if lag == 0 || n < lag + 10 {
            return 0.0;
        }
        let mean = r.iter().sum::<f64>() / n as f64;
        let mut num = 0.0;
        for t in lag..n {
            num += (r[t] - mean) * (r[t - lag] - mean);
        }
        let den: f64 = r.iter().map(|x| (x - mean).powi(2)).sum();
        if den < 1e-12 {
            return 0.0;
        }
        (num / den).clamp(-1.0, 1.0)
    }

    /// Annualized realized volatility over the vol window.
    pub fn realized_volatility(&self) -> f64 {
        let n = self.returns.len().min(self.vol_window);
        if n == 0 {
            return 0.0;
        }
        let sq: f64 = self.returns.iter().rev().take(n).map(|r| r * r).sum();
        (sq / n as f64 * 252.0).sqrt()
    }

    /// Regression-slope trend score ∈ [0, 1].
    pub fn trend_strength(&self) -> f64 {
        let n = self.prices.len().min(TREND_WINDOW);
        if n < 2 {
            return 0.0;
        }
        let window: Vec<f64> = self
            .prices
            .iter()
            .rev()
            .take(n)
            .rev()
            .copied()
            .collect();
        let points: Vec<(f64, f64)> = window
            .iter()
            .enumerate()
            .map(|(i, &p)| (i as f64, p))
            .collect();
        let slope = ols_slope(&points);
        let mean = window.iter().sum::<f64>() / n as f64;
        if mean.abs() < 1e-12 {
            return 0.0;
        }
        let pct = (slope * n as f64 / mean).abs() * 100.0;
        (pct / 5.0).min(1.0)
    }

    pub fn reset(&mut self) {
        self.prices.clear();
        self.returns.clear();
        self.history.clear();
    }
}

fn ols_slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    let x_mean = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let y_mean = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in points {
        num += (x - x_mean) * (y - y_mean);
        den += (x - x_mean).powi(2);
    }
    if den.abs() < 1e-12 {
        return 0.0;
    }
    num / den
}
