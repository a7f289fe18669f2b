/// portfolio.rs — Position and portfolio accounting
///
/// Signed-quantity positions with average-entry bookkeeping. Fills move
/// cash immediately (notional plus commission); realized PnL accrues when
/// a fill reduces or crosses the open quantity. Positions whose remaining
/// quantity falls under the dust threshold are removed.
use ahash::AHashMap;

use crate::data::Symbol;

/// Positions below this absolute quantity are removed.
pub const DUST_QUANTITY: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: Symbol,
    /// Signed: positive long, negative short
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub realized_pnl: f64,
    /// Gross notional traded plus commissions
    pub total_cost: f64,
}

impl Position {
    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.avg_entry_price) * self.quantity
    }

    pub fn notional(&self) -> f64 {
        self.quantity * self.current_price
    }
}

#[derive(Debug)]
pub struct Portfolio {
    pub cash: f64,
    positions: AHashMap<Symbol, Position>,
    /// Realized PnL carried over from closed-out positions
    realized_pnl: f64,
}

impl Portfolio {
    pub fn new(cash: f64) -> Self {
        Self { cash, positions: AHashMap::new(), realized_pnl: 0.0 }
    }

    /// Apply a fill: positive quantity buys, negative sells. Commission is
    /// always a cash debit.
    pub fn apply_fill(&mut self, symbol: &Symbol, quantity: f64, price: f64, commission: f64) {
        self.cash -= quantity * price + commission;

        let pos = self.positions.entry(symbol.clone()).or_insert_with(|| Position {
            symbol: symbol.clone(),
            quantity: 0.0,
            avg_entry_price: 0.0,
            current_price: price,
            realized_pnl: 0.0,
            total_cost: 0.0,
        });

        let old_qty = pos.quantity;
        let new_qty = old_qty + quantity;

        if old_qty == 0.0 || old_qty.signum() == quantity.signum() {
            // Opening or extending: blend the entry price.
            let notional = pos.avg_entry_price * old_qty.abs() + price * quantity.abs();
            if new_qty.abs() > DUST_QUANTITY {
                pos.avg_entry_price = notional / new_qty.abs();
            }
        } else {
            // Reducing or crossing: realize PnL on the closed portion.
            let closed = old_qty.abs().min(quantity.abs());
            pos.realized_pnl += (price - pos.avg_entry_price) * closed * old_qty.signum();
            if old_qty.signum() != new_qty.signum() && new_qty.abs() > DUST_QUANTITY {
                // The crossing remainder opens at the fill price.
                pos.avg_entry_price = price;
            }
        }

        pos.quantity = new_qty;
        pos.current_price = price;
        pos.total_cost += quantity.abs() * price + commission;

        if pos.quantity.abs() < DUST_QUANTITY {
            let closed = self.positions.remove(symbol);
            if let Some(p) = closed {
                self.realized_pnl += p.realized_pnl;
            }
        }
    }

    /// Refresh a position's mark price.
    pub fn mark(&mut self, symbol: &Symbol, price: f64) {
        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.current_price = price;
        }
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn net_quantity(&self, symbol: &Symbol) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.quantity)
    }

    /// Realized PnL across open and closed positions.
    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl + self.positions.values().map(|p| p.realized_pnl).sum::<f64>()
    }

    /// cash + Σ quantity · mark price
    pub fn total_value(&self) -> f64 {
        self.cash + self.positions.values().map(Position::notional).sum::<f64>()
    }

    /// Σ |quantity · mark price|
    pub fn exposure(&self) -> f64 {
        self.positions.values().map(|p| p.notional().abs()).sum()
    }

    /// exposure / total value, 0 when total value is not positive.
    pub fn leverage(&self) -> f64 {
        let total = self.total_value();
        if total > 0.0 {
            self.exposure() / total
        } else {
            0.0
        }
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sym() -> Symbol {
        Arc::from("BTCUSDT")
    }

    #[test]
    fn value_identity_open_close_same_price() {
        let mut pf = Portfolio::new(10_000.0);
        let s = sym();
        pf.apply_fill(&s, 10.0, 100.0, 0.0);
        assert!((pf.total_value() - 10_000.0).abs() < 1e-9);
        pf.apply_fill(&s, -10.0, 100.0, 0.0);
        assert!((pf.total_value() - 10_000.0).abs() < 1e-9);
        assert_eq!(pf.position_count(), 0);
    }

    #[test]
    fn average_entry_blends_on_extension() {
        let mut pf = Portfolio::new(100_000.0);
        let s = sym();
        pf.apply_fill(&s, 10.0, 100.0, 0.0);
        pf.apply_fill(&s, 10.0, 110.0, 0.0);
        let pos = pf.position(&s).unwrap();
        assert!((pos.avg_entry_price - 105.0).abs() < 1e-9);
        assert!((pos.quantity - 20.0).abs() < 1e-12);
    }

    #[test]
    fn reducing_fill_realizes_pnl() {
        let mut pf = Portfolio::new(100_000.0);
        let s = sym();
        pf.apply_fill(&s, 10.0, 100.0, 0.0);
        pf.apply_fill(&s, -4.0, 110.0, 0.0);
        let pos = pf.position(&s).unwrap();
        assert!((pos.realized_pnl - 40.0).abs() < 1e-9);
        assert!((pos.quantity - 6.0).abs() < 1e-12);
        // Entry price unchanged by a partial reduce.
        assert!((pos.avg_entry_price - 100.0).abs() < 1e-12);
    }

    #[test]
    fn crossing_fill_reopens_at_fill_price() {
        let mut pf = Portfolio::new(100_000.0);
        let s = sym();
        pf.apply_fill(&s, 10.0, 100.0, 0.0);
        pf.apply_fill(&s, -15.0, 120.0, 0.0);
        let pos = pf.position(&s).unwrap();
        assert!((pos.quantity + 5.0).abs() < 1e-12);
        assert!((pos.avg_entry_price - 120.0).abs() < 1e-12);
        assert!((pos.realized_pnl - 200.0).abs() < 1e-9);
    }

    #[test]
    fn dust_positions_are_removed() {
        let mut pf = Portfolio::new(10_000.0);
        let s = sym();
        pf.apply_fill(&s, 1.0, 100.0, 0.0);
        pf.apply_fill(&s, -1.0 + 1e-12, 100.0, 0.0);
        assert_eq!(pf.position_count(), 0);
        assert!(pf.position(&s).is_none());
    }

    #[test]
    fn short_position_accounting() {
        let mut pf = Portfolio::new(10_000.0);
        let s = sym();
        pf.apply_fill(&s, -10.0, 100.0, 0.0);
        assert!((pf.cash - 11_000.0).abs() < 1e-9);
        pf.mark(&s, 90.0);
        let pos = pf.position(&s).unwrap();
        assert!((pos.unrealized_pnl() - 100.0).abs() < 1e-9);
        // Cover at 90: realized 10 · (100 − 90) = 100.
        pf.apply_fill(&s, 10.0, 90.0, 0.0);
        assert!((pf.realized_pnl() - 100.0).abs() < 1e-9);
        assert!((pf.total_value() - 10_100.0).abs() < 1e-9);
    }

    #[test]
    fn exposure_and_leverage() {
        let mut pf = Portfolio::new(10_000.0);
        let s = sym();
        let e: Symbol = Arc::from("ETHUSDT");
        pf.apply_fill(&s, 10.0, 100.0, 0.0);
        pf.apply_fill(&e, -100.0, 10.0, 0.0);
        assert!((pf.exposure() - 2_000.0).abs() < 1e-9);
        assert!((pf.total_value() - 10_000.0).abs() < 1e-9);
        assert!((pf.leverage() - 0.2).abs() < 1e-12);
    }
}
