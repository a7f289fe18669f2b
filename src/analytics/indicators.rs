/// analytics/indicators.rs — Stateless indicator math over price sequences.
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// BOLLINGER BANDS
///   middle = SMA(close, period)
///   upper  = middle + mult·σ      lower = middle − mult·σ
///   σ = sample standard deviation (divide by n−1)
///
///   %B        = (price − lower) / (upper − lower)
///   bandwidth = (upper − lower) / middle
///   squeeze when bandwidth < 0.05
///
/// RSI (Wilder-style, summed over the window)
///   RS  = Σ gains / Σ losses over the last `period` close-to-close moves
///   RSI = 100 − 100/(1 + RS)
///   Insufficient data → 50 (neutral); zero losses → 100.
///
/// ROLL EFFECTIVE SPREAD
///   Roll (1984): s = 2·√(−cov(ΔP_t, ΔP_{t−1}))
///   cov here is the uncentered serial moment mean(ΔP_t·ΔP_{t−1});
///   non-negative covariance (no bid-ask bounce) → 0.
///
/// Every function returns a defined neutral value rather than erroring when
/// the input is too short or a denominator degenerates.
/// ─────────────────────────────────────────────────────────────────────────

/// Bandwidth below this is a volatility squeeze.
pub const SQUEEZE_BANDWIDTH: f64 = 0.05;

/// Arithmetic mean; 0 for an empty slice.
pub fn sma(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n−1 divisor); 0 with fewer than 2 samples.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = sma(values);
    let var = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BollingerBands {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
}

/// Bollinger bands over the last `period` closes; all-zero with fewer.
pub fn bollinger(closes: &[f64], period: usize, mult: f64) -> BollingerBands {
    if closes.len() < period || period == 0 {
        return BollingerBands::default();
    }
    let window = &closes[closes.len() - period..];
    let middle = sma(window);
    let sd = std_dev(window);
    BollingerBands { middle, upper: middle + mult * sd, lower: middle - mult * sd }
}

/// %B — where price sits inside the bands. 0.5 when the bands collapse.
pub fn percent_b(price: f64, upper: f64, lower: f64) -> f64 {
    let width = upper - lower;
    if width.abs() < 1e-12 {
        return 0.5;
    }
    (price - lower) / width
}

/// Band width relative to the middle band; 0 when the middle is 0.
pub fn bandwidth(upper: f64, middle: f64, lower: f64) -> f64 {
    if middle.abs() < 1e-12 {
        return 0.0;
    }
    (upper - lower) / middle
}

pub fn is_squeeze(bandwidth: f64) -> bool {
    bandwidth < SQUEEZE_BANDWIDTH
}

/// RSI over the last `period` successive closes.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return 50.0;
    }
    let window = &closes[closes.len() - (period + 1)..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let d = pair[1] - pair[0];
        if d > 0.0 {
            gains += d;
        } else {
            losses += -d;
        }
    }
    if losses < 1e-12 {
        return 100.0;
    }
    let rs = gains / losses;
    100.0 - 100.0 / (1.0 + rs)
}

/// Up-volume over down-volume, partitioned by close direction; 1 when no
/// down-volume was seen.
pub fn volume_ratio(closes: &[f64], volumes: &[f64]) -> f64 {
    let n = closes.len().min(volumes.len());
    if n < 2 {
        return 1.0;
    }
    let mut up = 0.0;
    let mut down = 0.0;
    for i in 1..n {
        if closes[i] > closes[i - 1] {
            up += volumes[i];
        } else if closes[i] < closes[i - 1] {
            down += volumes[i];
        }
    }
    if down < 1e-12 {
        return 1.0;
    }
    up / down
}

/// Exponential moving average, α = 2/(period+1), seeded with the first
/// sample; 0 for an empty slice.
pub fn ema(values: &[f64], period: usize) -> f64 {
    let Some(&first) = values.first() else {
        return 0.0;
    };
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut acc = first;
    for &v in &values[1..] {
        acc = alpha * v + (1.0 - alpha) * acc;
    }
    acc
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line with the published 0.9-factor signal approximation (NOT the
/// standard 9-period EMA of the MACD line).
pub fn macd(closes: &[f64], fast: usize, slow: usize) -> Macd {
    let line = ema(closes, fast) - ema(closes, slow);
    let signal = 0.9 * line;
    Macd { macd: line, signal, histogram: line - signal }
}

/// Average true range over the last `period` true ranges; 0 with fewer.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    let n = highs.len().min(lows.len()).min(closes.len());
    if period == 0 || n < period + 1 {
        return 0.0;
    }
    let mut trs = Vec::with_capacity(n - 1);
    for i in 1..n {
        let hl = highs[i] - lows[i];
        let hc = (highs[i] - closes[i - 1]).abs();
        let lc = (lows[i] - closes[i - 1]).abs();
        trs.push(hl.max(hc).max(lc));
    }
    sma(&trs[trs.len() - period..])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stochastic {
    pub k: f64,
    pub d: f64,
}

/// Stochastic oscillator with the published 0.9-factor %D approximation
/// (NOT the standard 3-period SMA of %K). Degenerate range → %K = 50.
pub fn stochastic(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Stochastic {
    let n = highs.len().min(lows.len()).min(closes.len());
    if period == 0 || n < period {
        return Stochastic { k: 50.0, d: 45.0 };
    }
    let hi = highs[n - period..].iter().cloned().fold(f64::MIN, f64::max);
    let lo = lows[n - period..].iter().cloned().fold(f64::MAX, f64::min);
    let k = if (hi - lo).abs() < 1e-12 {
        50.0
    } else {
        100.0 * (closes[n - 1] - lo) / (hi - lo)
    };
    Stochastic { k, d: 0.9 * k }
}

/// Roll effective spread from serial covariance of price changes.
pub fn roll_spread(price_changes: &[f64]) -> f64 {
    if price_changes.len() < 2 {
        return 0.0;
    }
    let products: f64 = price_changes
        .windows(2)
        .map(|pair| pair[0] * pair[1])
        .sum();
    let cov = products / (price_changes.len() - 1) as f64;
    if cov < 0.0 {
        2.0 * (-cov).sqrt()
    } else {
        0.0
    }
}
