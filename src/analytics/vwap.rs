/// analytics/vwap.rs — Volume-weighted average price with deviation bands
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// SESSION MODE (window = 0): cumulative sums over the whole stream
///   VWAP = ΣPV / ΣV
///   volume-weighted variance = ΣP²V/ΣV − VWAP²
///   bands = VWAP ± mult·√var
///
/// ROLLING MODE (window = N): same sums over the last N ticks only.
///
/// DEVIATION ZONES (deviation% = (P − VWAP)/VWAP·100)
///   > 2 STRONG_ABOVE, > 0.5 ABOVE, [−0.5, 0.5] NEUTRAL,
///   < −0.5 BELOW, < −2 STRONG_BELOW
///
/// MEAN-REVERSION FLAG
///   Over a recent buffer of |P − VWAP| samples (5 or more):
///   reverting when the newest deviation < 0.8 × the oldest.
/// ─────────────────────────────────────────────────────────────────────────
use std::collections::VecDeque;

use serde::Serialize;

/// Absolute-deviation samples retained for the mean-reversion flag.
const DEVIATION_BUFFER_CAP: usize = 20;
const DEVIATION_BUFFER_MIN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VwapZone {
    StrongAbove,
    Above,
    Neutral,
    Below,
    StrongBelow,
}

impl VwapZone {
    pub fn label(&self) -> &'static str {
        match self {
            VwapZone::StrongAbove => "STRONG_ABOVE",
            VwapZone::Above => "ABOVE",
            VwapZone::Neutral => "NEUTRAL",
            VwapZone::Below => "BELOW",
            VwapZone::StrongBelow => "STRONG_BELOW",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VwapMetrics {
    pub vwap: f64,
    pub upper_band: f64,
    pub lower_band: f64,
    pub deviation_pct: f64,
    pub zone: VwapZone,
    pub mean_reverting: bool,
}

/// Session or rolling VWAP, selected at construction.
#[derive(Debug)]
pub struct VwapCalculator {
    /// 0 = session-cumulative, N > 0 = rolling over the last N ticks
    rolling_window: usize,
    band_mult: f64,

    sum_pv: f64,
    sum_v: f64,
    sum_p2v: f64,
    ticks: VecDeque<(f64, f64)>,

    cumulative_volume: f64,
    deviations: VecDeque<f64>,
}

impl VwapCalculator {
    pub fn new(rolling_window: usize, band_mult: f64) -> Self {
        Self {
            rolling_window,
            band_mult,
            sum_pv: 0.0,
            sum_v: 0.0,
            sum_p2v: 0.0,
            ticks: VecDeque::with_capacity(rolling_window),
            cumulative_volume: 0.0,
            deviations: VecDeque::with_capacity(DEVIATION_BUFFER_CAP),
        }
    }

    pub fn on_tick(&mut self, price: f64, volume: f64) -> VwapMetrics {
        self.cumulative_volume += volume;
        if self.rolling_window == 0 {
            self.sum_pv += price * volume;
            self.sum_v += volume;
            self.sum_p2v += price * price * volume;
        } else {
            self.ticks.push_back((price, volume));
            if self.ticks.len() > self.rolling_window {
                self.ticks.pop_front();
            }
        }

        let (vwap, variance) = self.vwap_and_variance();
        let sd = variance.max(0.0).sqrt();

        let deviation_pct = if vwap > 1e-12 {
            (price - vwap) / vwap * 100.0
        } else {
            0.0
        };

        self.deviations.push_back((price - vwap).abs());
        if self.deviations.len() > DEVIATION_BUFFER_CAP {
            self.deviations.pop_front();
        }
        let mean_reverting = self.deviations.len() >= DEVIATION_BUFFER_MIN
            && match (self.deviations.back(), self.deviations.front()) {
                (Some(&last), Some(&first)) => last < 0.8 * first,
                _ => false,
            };

        VwapMetrics {
            vwap,
            upper_band: vwap + self.band_mult * sd,
            lower_band: vwap - self.band_mult * sd,
            deviation_pct,
            zone: zone_for(deviation_pct),
            mean_reverting,
        }
    }

    fn vwap_and_variance(&self) -> (f64, f64) {
        let (pv, v, p2v) = if self.rolling_window == 0 {
            (self.sum_pv, self.sum_v, self.sum_p2v)
        } else {
            let mut pv = 0.0;
            let mut v = 0.0;
            let mut p2v = 0.0;
            for &(p, vol) in &self.ticks {
                pv += p * vol;
                v += vol;
                p2v += p * p * vol;
            }
            (pv, v, p2v)
        };
        if v < 1e-12 {
            return (0.0, 0.0);
        }
        let vwap = pv / v;
        (vwap, p2v / v - vwap * vwap)
    }

    /// Total volume ever fed, across both modes.
    pub fn cumulative_volume(&self) -> f64 {
        self.cumulative_volume
    }

    pub fn reset(&mut self) {
        let window = self.rolling_window;
        let mult = self.band_mult;
        *self = Self::new(window, mult);
    }
}

fn zone_for(deviation_pct: f64) -> VwapZone {
    if deviation_pct > 2.0 {
        VwapZone::StrongAbove
    } else if deviation_pct > 0.5 {
        VwapZone::Above
    } else if deviation_pct >= -0.5 {
        VwapZone::Neutral
    } else if deviation_pct >= -2.0 {
        VwapZone::Below
    } else {
        VwapZone::StrongBelow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_vwap_weights_by_volume() {
        let mut calc = VwapCalculator::new(0, 2.0);
        calc.on_tick(100.0, 1.0);
        let m = calc.on_tick(110.0, 3.0);
        // (100·1 + 110·3)/4 = 107.5
        assert!((m.vwap - 107.5).abs() < 1e-12);
        assert!(m.upper_band >= m.vwap && m.lower_band <= m.vwap);
    }

    #[test]
    fn rolling_vwap_forgets_old_ticks() {
        let mut calc = VwapCalculator::new(2, 2.0);
        calc.on_tick(100.0, 1.0);
        calc.on_tick(200.0, 1.0);
        let m = calc.on_tick(200.0, 1.0);
        // Window holds the two 200s only.
        assert!((m.vwap - 200.0).abs() < 1e-12);
    }

    #[test]
    fn volume_is_conserved() {
        let mut calc = VwapCalculator::new(3, 2.0);
        let volumes = [1.0, 2.5, 0.0, 4.0, 3.25];
        for (i, &v) in volumes.iter().enumerate() {
            calc.on_tick(100.0 + i as f64, v);
        }
        let total: f64 = volumes.iter().sum();
        assert!((calc.cumulative_volume() - total).abs() < 1e-12);
    }

    #[test]
    fn deviation_zones() {
        assert_eq!(zone_for(3.0), VwapZone::StrongAbove);
        assert_eq!(zone_for(1.0), VwapZone::Above);
        assert_eq!(zone_for(0.5), VwapZone::Neutral);
        assert_eq!(zone_for(0.0), VwapZone::Neutral);
        assert_eq!(zone_for(-0.5), VwapZone::Neutral);
        assert_eq!(zone_for(-1.0), VwapZone::Below);
        assert_eq!(zone_for(-2.0), VwapZone::Below);
        assert_eq!(zone_for(-2.5), VwapZone::StrongBelow);
    }

    #[test]
    fn zero_volume_stream_degrades_to_neutral() {
        let mut calc = VwapCalculator::new(0, 2.0);
        let m = calc.on_tick(100.0, 0.0);
        assert_eq!(m.vwap, 0.0);
        assert_eq!(m.deviation_pct, 0.0);
        assert_eq!(m.zone, VwapZone::Neutral);
    }

    #[test]
    fn mean_reversion_flag_on_converging_prices() {
        let mut calc = VwapCalculator::new(0, 2.0);
        // Anchor VWAP near 100, then decay the displacement geometrically.
        // Enough ticks to roll the zero-deviation anchor out of the buffer.
        calc.on_tick(100.0, 100.0);
        let mut m = calc.on_tick(112.0, 0.1);
        for i in 0..24 {
            let p = 100.0 + 12.0 * 0.9f64.powi(i);
            m = calc.on_tick(p, 0.1);
        }
        assert!(m.mean_reverting);
    }

    #[test]
    fn variance_never_negative_under_float_noise() {
        let mut calc = VwapCalculator::new(0, 2.0);
        let mut m = calc.on_tick(1e9, 1.0);
        for _ in 0..100 {
            m = calc.on_tick(1e9 + 0.5, 1.0);
        }
        assert!(m.upper_band >= m.lower_band);
    }
}
