/// metrics.rs — Performance metrics over returns and equity curves
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// SHARPE (annualised)
///   SR = (r̄ − r_f/N) / σ_r · √N        σ_r < 1e−10 → 0
///
/// SORTINO (annualised)
///   σ_d = √(mean(r² | r < 0))           same numerator / σ_d · √N
///
/// CALMAR
///   Calmar = (r̄ · 252) / maxDD_frac    maxDD < 1e−10 → 0
///
/// DRAWDOWN
///   absolute maxDD  = max_t (peak_t − E_t) ≥ 0
///   maxDD%          = 100 · max_t ((peak_t − E_t)/peak_t) ∈ [0, 100]
///
/// TAIL RISK (historical, ascending sort)
///   VaR@c  = −r_sorted[⌊(1−c)·n⌋]       (index clamped)
///   CVaR@c = −mean(r_sorted[0..=idx])
///
/// Win rate = #(r > 0)/n.  Profit factor = Σ wins / Σ |losses|.
/// ─────────────────────────────────────────────────────────────────────────

/// Complete backtest performance report.
#[derive(Debug, Clone)]
pub struct PerfReport {
    pub n_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_return: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub var_95: f64,
    pub cvar_95: f64,
    pub initial_equity: f64,
    pub final_equity: f64,
}

impl std::fmt::Display for PerfReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  ALPHA ENGINE — BACKTEST PERFORMANCE REPORT")?;
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  Trades         : {}", self.n_trades)?;
        writeln!(f, "  Win Rate       : {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "  Profit Factor  : {:.3}", self.profit_factor)?;
        writeln!(f, "  Total Return   : {:.2}%", self.total_return * 100.0)?;
        writeln!(f, "  Sharpe Ratio   : {:.3}", self.sharpe)?;
        writeln!(f, "  Sortino Ratio  : {:.3}", self.sortino)?;
        writeln!(f, "  Calmar Ratio   : {:.3}", self.calmar)?;
        writeln!(f, "  Max Drawdown   : ${:.2} ({:.2}%)", self.max_drawdown, self.max_drawdown_pct)?;
        writeln!(f, "  VaR 95%        : {:.4}", self.var_95)?;
        writeln!(f, "  CVaR 95%       : {:.4}", self.cvar_95)?;
        writeln!(f, "  Initial Equity : ${:.2}", self.initial_equity)?;
        writeln!(f, "  Final Equity   : ${:.2}", self.final_equity)?;
        writeln!(f, "════════════════════════════════════════════")
    }
}

/// Annualised Sharpe ratio over period returns.
pub fn sharpe_ratio(returns: &[f64], risk_free: f64, periods_per_year: f64) -> f64 {
    let sd = std_dev(returns);
    if sd < 1e-10 {
        return 0.0;
    }
    let excess = mean(returns) - risk_free / periods_per_year;
    excess / sd * periods_per_year.sqrt()
}

/// Annualised Sortino ratio; penalises downside deviation only.
pub fn sortino_ratio(returns: &[f64], risk_free: f64, periods_per_year: f64) -> f64 {
    let negatives: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
    if negatives.is_empty() {
        return 0.0;
    }
    let downside = (negatives.iter().map(|r| r * r).sum::<f64>() / negatives.len() as f64).sqrt();
    if downside < 1e-10 {
        return 0.0;
    }
    let excess = mean(returns) - risk_free / periods_per_year;
    excess / downside * periods_per_year.sqrt()
}

/// Calmar ratio from mean return and fractional max drawdown.
pub fn calmar_ratio(returns: &[f64], max_dd_frac: f64) -> f64 {
    if max_dd_frac < 1e-10 || returns.is_empty() {
        return 0.0;
    }
    mean(returns) * 252.0 / max_dd_frac
}

/// Absolute maximum drawdown of an equity curve (currency units, ≥ 0).
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0f64;
    for &e in equity {
        peak = peak.max(e);
        max_dd = max_dd.max(peak - e);
    }
    max_dd
}

/// Maximum drawdown as a percent of the running peak, ∈ [0, 100].
pub fn max_drawdown_pct(equity: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0f64;
    for &e in equity {
        peak = peak.max(e);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - e) / peak);
        }
    }
    max_dd * 100.0
}

/// Historical value-at-risk at the given confidence (e.g. 0.95).
pub fn value_at_risk(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = (((1.0 - confidence) * sorted.len() as f64) as usize).min(sorted.len() - 1);
    -sorted[idx]
}

/// Expected shortfall beyond the VaR cut, at the given confidence.
pub fn conditional_var(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = (((1.0 - confidence) * sorted.len() as f64) as usize).min(sorted.len() - 1);
    let tail = &sorted[..=idx];
    -(tail.iter().sum::<f64>() / tail.len() as f64)
}

pub fn win_rate(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    returns.iter().filter(|&&r| r > 0.0).count() as f64 / returns.len() as f64
}

pub fn profit_factor(returns: &[f64]) -> f64 {
    let wins: f64 = returns.iter().filter(|&&r| r > 0.0).sum();
    let losses: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| -r).sum();
    if losses < 1e-10 {
        if wins > 0.0 {
            return f64::INFINITY;
        }
        return 0.0;
    }
    wins / losses
}

/// Compute the full report from per-trade returns and the equity curve.
/// Zero trades → a neutral report rather than an error.
pub fn compute_report(
    trade_returns: &[f64],
    equity: &[f64],
    initial_equity: f64,
    final_equity: f64,
    periods_per_year: f64,
) -> PerfReport {
    if trade_returns.is_empty() {
        return PerfReport {
            n_trades: 0,
            win_rate: 0.0,
            profit_factor: 0.0,
            total_return: 0.0,
            sharpe: 0.0,
            sortino: 0.0,
            calmar: 0.0,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
            var_95: 0.0,
            cvar_95: 0.0,
            initial_equity,
            final_equity,
        };
    }

    let dd_pct = max_drawdown_pct(equity);
    PerfReport {
        n_trades: trade_returns.len(),
        win_rate: win_rate(trade_returns),
        profit_factor: profit_factor(trade_returns),
        total_return: if initial_equity.abs() > 1e-12 {
            (final_equity - initial_equity) / initial_equity
        } else {
            0.0
        },
        sharpe: sharpe_ratio(trade_returns, 0.0, periods_per_year),
        sortino: sortino_ratio(trade_returns, 0.0, periods_per_year),
        calmar: calmar_ratio(trade_returns, dd_pct / 100.0),
        max_drawdown: max_drawdown(equity),
        max_drawdown_pct: dd_pct,
        var_95: value_at_risk(trade_returns, 0.95),
        cvar_95: conditional_var(trade_returns, 0.95),
        initial_equity,
        final_equity,
    }
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let var = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_drawdown_flat_curve() {
        let curve = vec![100.0, 100.0, 100.0];
        assert_eq!(max_drawdown(&curve), 0.0);
        assert_eq!(max_drawdown_pct(&curve), 0.0);
    }

    #[test]
    fn max_drawdown_peak_to_trough() {
        let curve = vec![100.0, 120.0, 60.0, 80.0];
        assert!((max_drawdown(&curve) - 60.0).abs() < 1e-9);
        assert!((max_drawdown_pct(&curve) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_bounds_hold_for_any_curve() {
        let curve: Vec<f64> = (0..200)
            .map(|i| 1000.0 + ((i * 37) % 97) as f64 - 48.0)
            .collect();
        let dd = max_drawdown(&curve);
        let pct = max_drawdown_pct(&curve);
        assert!(dd >= 0.0);
        assert!((0.0..=100.0).contains(&pct));
    }

    #[test]
    fn sharpe_zero_on_constant_returns() {
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 0.0, 252.0), 0.0);
    }

    #[test]
    fn sharpe_positive_for_positive_drift() {
        let returns = [0.01, -0.005, 0.012, 0.003, -0.002, 0.008];
        assert!(sharpe_ratio(&returns, 0.0, 252.0) > 0.0);
    }

    #[test]
    fn sortino_ignores_upside_noise() {
        let steady = [0.01, -0.01, 0.01, -0.01];
        let upside = [0.05, -0.01, 0.05, -0.01];
        assert!(sortino_ratio(&upside, 0.0, 252.0) > sortino_ratio(&steady, 0.0, 252.0));
    }

    #[test]
    fn sortino_zero_without_losses() {
        assert_eq!(sortino_ratio(&[0.01, 0.02], 0.0, 252.0), 0.0);
    }

    #[test]
    fn var_and_cvar_tail_ordering() {
        let returns: Vec<f64> = (0..100).map(|i| (i as f64 - 50.0) / 1000.0).collect();
        let var = value_at_risk(&returns, 0.95);
        let cvar = conditional_var(&returns, 0.95);
        // Worst 5%: −0.050..−0.046 → VaR 0.045, CVaR deeper in the tail.
        assert!(var > 0.0);
        assert!(cvar >= var);
    }

    #[test]
    fn win_rate_and_profit_factor() {
        let returns = [0.02, -0.01, 0.03, -0.02, 0.01];
        assert!((win_rate(&returns) - 0.6).abs() < 1e-12);
        assert!((profit_factor(&returns) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn profit_factor_no_losses_is_infinite() {
        assert!(profit_factor(&[0.01, 0.02]).is_infinite());
        assert_eq!(profit_factor(&[]), 0.0);
    }

    #[test]
    fn empty_report_is_neutral() {
        let report = compute_report(&[], &[], 10_000.0, 10_000.0, 252.0);
        assert_eq!(report.n_trades, 0);
        assert_eq!(report.sharpe, 0.0);
        assert_eq!(report.max_drawdown, 0.0);
        assert_eq!(report.win_rate, 0.0);
    }
}
