/// backtest.rs — Deterministic tick-replay simulator
///
/// Processes ticks in chronological order, passing each through a
/// caller-supplied signal generator. Records the equity curve and closed
/// trades for metrics computation.
///
/// ┌─────────────────────────────────────────────────────┐
/// │  Tick feed (Vec<MarketTick>)                        │
/// │        │                                            │
/// │        ▼                                            │
/// │  signal_fn(tick) ∈ {−1, 0, +1}                      │
/// │        │                                            │
/// │   +1 ∧ pos ≤ 0 → cover short, open long             │
/// │   −1 ∧ pos ≥ 0 → exit long, open short (if enabled) │
/// │        │                                            │
/// │   fills at price ± slippage_bps through the         │
/// │   Portfolio; commission on entry and exit notional  │
/// │        │                                            │
/// │   equity_curve[t] = portfolio value at mark         │
/// │   end of data → force-close, PerfReport             │
/// └─────────────────────────────────────────────────────┘
///
/// walk-forward slides a train/test window over the stream; Monte Carlo
/// replays seeded reshuffles of the stream in parallel.
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::info;

use crate::data::{MarketTick, Symbol};
use crate::metrics::{compute_report, PerfReport};
use crate::portfolio::Portfolio;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Commission as a fraction of traded notional, charged per side
    pub commission_rate: f64,
    /// Adverse fill displacement in basis points
    pub slippage_bps: f64,
    /// Fraction of cash deployed per entry, ∈ (0, 1]
    pub max_position_size: f64,
    pub enable_short_selling: bool,
    pub enable_margin_trading: bool,
    /// Cash fraction of notional required when margin trading is enabled
    pub margin_requirement: f64,
    /// Annualisation factor for the report
    pub periods_per_year: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            commission_rate: 0.001,
            slippage_bps: 2.0,
            max_position_size: 0.5,
            enable_short_selling: false,
            enable_margin_trading: false,
            margin_requirement: 1.0,
            periods_per_year: 252.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Signal,
    EndOfBacktest,
}

/// One closed round trip.
#[derive(Debug, Clone)]
pub struct Trade {
    pub symbol: Symbol,
    /// +1 long, −1 short
    pub direction: i8,
    pub quantity: f64,
    /// Fill prices, slippage included
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_ts: i64,
    pub exit_ts: i64,
    /// Gross of commission: quantity · (exit − entry) · direction
    pub pnl: f64,
    /// pnl / entry notional
    pub return_frac: f64,
    pub reason: ExitReason,
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<f64>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub report: PerfReport,
}

/// The open round trip being tracked between entry and exit.
#[derive(Debug, Clone)]
struct OpenTrade {
    symbol: Symbol,
    /// Signed: positive long, negative short
    quantity: f64,
    entry_price: f64,
    entry_ts: i64,
}

pub struct Backtester {
    cfg: BacktestConfig,
    portfolio: Portfolio,
    open_trade: Option<OpenTrade>,
    trades: Vec<Trade>,
    equity_curve: Vec<f64>,
}

impl Backtester {
    pub fn new(cfg: BacktestConfig) -> Self {
        assert!(
            cfg.max_position_size > 0.0 && cfg.max_position_size <= 1.0,
            "max_position_size must be in (0, 1]"
        );
        let portfolio = Portfolio::new(cfg.initial_capital);
        Self {
            cfg,
            portfolio,
            open_trade: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    /// Replay a tick stream through `signal_fn`. Empty data or a signal
    /// that never fires yields a zero-trade result, not an error.
    pub fn run(
        &mut self,
        ticks: &[MarketTick],
        mut signal_fn: impl FnMut(&MarketTick) -> i32,
    ) -> BacktestResult {
        self.reset();

        for tick in ticks {
            let signal = signal_fn(tick);
            let position = self.portfolio.net_quantity(&tick.symbol);
            if signal > 0 && position <= 0.0 {
                if position < 0.0 {
                    self.close_position(tick, ExitReason::Signal);
                }
                self.open_position(tick, 1);
            } else if signal < 0 && position >= 0.0 {
                if position > 0.0 {
                    self.close_position(tick, ExitReason::Signal);
                }
                if self.cfg.enable_short_selling {
                    self.open_position(tick, -1);
                }
            }
            self.portfolio.mark(&tick.symbol, tick.price);
            self.equity_curve.push(self.portfolio.total_value());
        }

        if self.open_trade.is_some() {
            if let Some(last) = ticks.last() {
                self.close_position(last, ExitReason::EndOfBacktest);
            }
        }

        let trade_returns: Vec<f64> = self.trades.iter().map(|t| t.return_frac).collect();
        let final_equity = self.portfolio.total_value();
        let report = compute_report(
            &trade_returns,
            &self.equity_curve,
            self.cfg.initial_capital,
            final_equity,
            self.cfg.periods_per_year,
        );

        BacktestResult {
            trades: std::mem::take(&mut self.trades),
            equity_curve: std::mem::take(&mut self.equity_curve),
            initial_capital: self.cfg.initial_capital,
            final_equity,
            report,
        }
    }

    /// Walk-forward evaluation: each step replays the test slice that
    /// follows a training span, then advances by the test length.
    pub fn walk_forward<S, F>(
        &self,
        ticks: &[MarketTick],
        train: usize,
        test: usize,
        mut make_signal: F,
    ) -> Vec<BacktestResult>
    where
        F: FnMut() -> S,
        S: FnMut(&MarketTick) -> i32,
    {
        assert!(test > 0, "test span must be positive");
        let mut results = Vec::new();
        let mut start = 0usize;
        while start + train + test <= ticks.len() {
            let slice = &ticks[start + train..start + train + test];
            let mut bt = Backtester::new(self.cfg.clone());
            results.push(bt.run(slice, make_signal()));
            start += test;
        }
        info!(windows = results.len(), train, test, "walk-forward complete");
        results
    }

    /// Monte-Carlo robustness check: `n` seeded reshuffles of the tick
    /// stream, each replayed with a fresh signal generator.
    pub fn monte_carlo<S, F>(
        &self,
        ticks: &[MarketTick],
        n: usize,
        seed: u64,
        make_signal: F,
    ) -> Vec<BacktestResult>
    where
        F: Fn() -> S + Sync,
        S: FnMut(&MarketTick) -> i32,
    {
        (0..n)
            .into_par_iter()
            .map(|i| {
                let mut shuffled = ticks.to_vec();
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                shuffled.shuffle(&mut rng);
                let mut bt = Backtester::new(self.cfg.clone());
                bt.run(&shuffled, make_signal())
            })
            .collect()
    }

    fn reset(&mut self) {
        self.portfolio = Portfolio::new(self.cfg.initial_capital);
        self.open_trade = None;
        self.trades.clear();
        self.equity_curve.clear();
    }

    /// Fill price after adverse slippage.
    fn apply_slippage(&self, price: f64, is_buy: bool) -> f64 {
        let sign = if is_buy { 1.0 } else { -1.0 };
        price * (1.0 + sign * self.cfg.slippage_bps / 1e4)
    }

    fn can_enter(&self, notional: f64, commission: f64) -> bool {
        let required = if self.cfg.enable_margin_trading {
            notional * self.cfg.margin_requirement
        } else {
            notional
        };
        notional > 0.0 && required + commission <= self.portfolio.cash
    }

    fn open_position(&mut self, tick: &MarketTick, direction: i8) {
        let is_buy = direction > 0;
        let fill = self.apply_slippage(tick.price, is_buy);
        let quantity = (self.portfolio.cash * self.cfg.max_position_size) / fill;
        let notional = quantity * fill;
        let commission = notional * self.cfg.commission_rate;
        if quantity <= 0.0 || !self.can_enter(notional, commission) {
            return;
        }
        let signed = quantity * direction as f64;
        self.portfolio.apply_fill(&tick.symbol, signed, fill, commission);
        self.open_trade = Some(OpenTrade {
            symbol: tick.symbol.clone(),
            quantity: signed,
            entry_price: fill,
            entry_ts: tick.ts_ms,
        });
    }

    fn close_position(&mut self, tick: &MarketTick, reason: ExitReason) {
        let Some(open) = self.open_trade.take() else {
            return;
        };
        let covering = open.quantity < 0.0;
        let fill = self.apply_slippage(tick.price, covering);
        let quantity = open.quantity.abs();
        let commission = quantity * fill * self.cfg.commission_rate;
        self.portfolio.apply_fill(&open.symbol, -open.quantity, fill, commission);

        let direction: i8 = if covering { -1 } else { 1 };
        let pnl = quantity * (fill - open.entry_price) * direction as f64;
        let entry_notional = quantity * open.entry_price;
        self.trades.push(Trade {
            symbol: open.symbol,
            direction,
            quantity,
            entry_price: open.entry_price,
            exit_price: fill,
            entry_ts: open.entry_ts,
            exit_ts: tick.ts_ms,
            pnl,
            return_frac: if entry_notional > 1e-12 { pnl / entry_notional } else { 0.0 },
            reason,
        });
    }
}
