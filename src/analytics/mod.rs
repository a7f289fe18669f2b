pub mod alpha;
pub mod indicators;
pub mod microstructure;
pub mod orderflow;
pub mod regime;
pub mod vwap;

pub use alpha::{AlphaEngine, AlphaKind, AlphaSignal, CandleVerdict};
pub use microstructure::{ImpactMetrics, MicrostructureAnalyzer, TradeSide, VpinMetrics};
pub use orderflow::{FlowDirection, OrderFlowEngine, OrderFlowSignal};
pub use regime::{MarketRegime, RegimeDetector, RegimeMetrics, SignalWeights};
pub use vwap::{VwapCalculator, VwapMetrics, VwapZone};
