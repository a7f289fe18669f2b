/// sink.rs — Asynchronous time-series sink (line protocol over HTTP)
///
/// Producers hand fully formatted line-protocol records into an unbounded
/// channel; a single background worker drains it and performs the network
/// writes. Enqueueing is one channel send and never blocks on I/O. Per
/// symbol, records are written in the order they were produced. A failed
/// write is logged and the batch dropped; there is no retry queue.
///
/// Emission is injected explicitly: analyzers observe a sink only through
/// the narrow `SignalSink` interface handed to their composer.
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::analytics::{
    AlphaKind, AlphaSignal, ImpactMetrics, OrderFlowSignal, RegimeMetrics, VpinMetrics,
    VwapMetrics,
};
use crate::config::SinkSettings;
use crate::data::{Candle, MarketTick};

/// One method per measurement; implementations must not block.
pub trait SignalSink: Send + Sync {
    fn alpha_signal(&self, signal: &AlphaSignal);
    fn microstructure(
        &self,
        symbol: &str,
        ts_ms: i64,
        vpin: &VpinMetrics,
        impact: &ImpactMetrics,
        spread: f64,
    );
    fn orderflow(&self, symbol: &str, ts_ms: i64, flow: &OrderFlowSignal);
    fn regime(&self, symbol: &str, ts_ms: i64, metrics: &RegimeMetrics);
    fn vwap(&self, symbol: &str, ts_ms: i64, metrics: &VwapMetrics);
    fn candle(&self, symbol: &str, candle: &Candle);
    fn tick(&self, tick: &MarketTick);
}

/// Sink that discards everything. Emission disabled.
pub struct NullSink;

impl SignalSink for NullSink {
    fn alpha_signal(&self, _signal: &AlphaSignal) {}
    fn microstructure(
        &self,
        _symbol: &str,
        _ts_ms: i64,
        _vpin: &VpinMetrics,
        _impact: &ImpactMetrics,
        _spread: f64,
    ) {
    }
    fn orderflow(&self, _symbol: &str, _ts_ms: i64, _flow: &OrderFlowSignal) {}
    fn regime(&self, _symbol: &str, _ts_ms: i64, _metrics: &RegimeMetrics) {}
    fn vwap(&self, _symbol: &str, _ts_ms: i64, _metrics: &VwapMetrics) {}
    fn candle(&self, _symbol: &str, _candle: &Candle) {}
    fn tick(&self, _tick: &MarketTick) {}
}

enum SinkMessage {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Line-protocol sink backed by a single background write worker.
///
/// Dropping the last handle closes the channel; the worker drains what is
/// queued, then exits.
pub struct LineSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
    timeframe: String,
}

impl LineSink {
    /// Spawn the write worker on the current tokio runtime.
    pub fn new(settings: SinkSettings, timeframe: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_worker(settings, rx));
        Self { tx, timeframe }
    }

    fn enqueue(&self, line: String) {
        let _ = self.tx.send(SinkMessage::Line(line));
    }

    /// Resolves once every record enqueued before the call has been handed
    /// to the network (or dropped on write failure).
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(SinkMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn write_worker(settings: SinkSettings, mut rx: mpsc::UnboundedReceiver<SinkMessage>) {
    let client = reqwest::Client::new();
    let endpoint = format!(
        "{}/api/v2/write?org={}&bucket={}&precision=ns",
        settings.url, settings.org, settings.bucket
    );
    let auth = format!("Token {}", settings.token);

    while let Some(msg) = rx.recv().await {
        let mut batch: Vec<String> = Vec::new();
        let mut acks: Vec<oneshot::Sender<()>> = Vec::new();
        match msg {
            SinkMessage::Line(line) => batch.push(line),
            SinkMessage::Flush(ack) => acks.push(ack),
        }
        while let Ok(more) = rx.try_recv() {
            match more {
                SinkMessage::Line(line) => batch.push(line),
                SinkMessage::Flush(ack) => acks.push(ack),
            }
        }

        if !batch.is_empty() {
            let body = batch.join("\n");
            let count = batch.len();
            match client
                .post(&endpoint)
                .header("Authorization", &auth)
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    debug!(records = count, "sink batch written");
                }
                Ok(resp) => {
                    error!(status = %resp.status(), records = count, "sink write rejected; batch dropped");
                }
                Err(e) => {
                    error!(error = %e, records = count, "sink write failed; batch dropped");
                }
            }
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }
}

fn ns(ts_ms: i64) -> i64 {
    ts_ms * 1_000_000
}

fn alpha_line(signal: &AlphaSignal, timeframe: &str) -> String {
    let kind = match signal.kind {
        AlphaKind::Tick => "TICK",
        AlphaKind::Candle => "CANDLE",
    };
    format!(
        "alpha_signal,symbol={} momentum={},meanRevZ={},rsi={},vbr={},signal_type=\"{}_{}\"",
        signal.symbol, signal.momentum, signal.mean_rev_z, signal.rsi, signal.volume_ratio,
        kind, timeframe
    )
}

fn microstructure_line(
    symbol: &str,
    ts_ms: i64,
    vpin: &VpinMetrics,
    impact: &ImpactMetrics,
    spread: f64,
) -> String {
    format!(
        "microstructure,symbol={} vpin={},toxicity={},lambda={},spread={} {}",
        symbol, vpin.vpin, vpin.toxicity, impact.lambda, spread, ns(ts_ms)
    )
}

fn orderflow_line(symbol: &str, ts_ms: i64, flow: &OrderFlowSignal) -> String {
    format!(
        "orderflow,symbol={} ofi={},bid_pressure={},ask_pressure={},volume_delta={} {}",
        symbol, flow.imbalance, flow.bid_pressure, flow.ask_pressure, flow.cumulative_delta,
        ns(ts_ms)
    )
}

fn regime_line(symbol: &str, ts_ms: i64, metrics: &RegimeMetrics) -> String {
    format!(
        "regime,symbol={},regime={} hurst={},volatility={},trend_strength={} {}",
        symbol,
        metrics.regime.label(),
        metrics.hurst,
        metrics.volatility,
        metrics.trend_strength,
        ns(ts_ms)
    )
}

fn vwap_line(symbol: &str, ts_ms: i64, metrics: &VwapMetrics) -> String {
    format!(
        "vwap,symbol={} vwap={},deviation={} {}",
        symbol, metrics.vwap, metrics.deviation_pct, ns(ts_ms)
    )
}

fn candle_line(symbol: &str, candle: &Candle) -> String {
    format!(
        "candles,symbol={} open={},high={},low={},close={},volume={} {}",
        symbol, candle.open, candle.high, candle.low, candle.close, candle.volume,
        ns(candle.end_ms)
    )
}

fn tick_line(tick: &MarketTick) -> String {
    format!(
        "ticks,symbol={} price={},volume={} {}",
        tick.symbol, tick.price, tick.volume, ns(tick.ts_ms)
    )
}

impl SignalSink for LineSink {
    fn alpha_signal(&self, signal: &AlphaSignal) {
        self.enqueue(alpha_line(signal, &self.timeframe));
    }

    fn microstructure(
        &self,
        symbol: &str,
        ts_ms: i64,
        vpin: &VpinMetrics,
        impact: &ImpactMetrics,
        spread: f64,
    ) {
        self.enqueue(microstructure_line(symbol, ts_ms, vpin, impact, spread));
    }

    fn orderflow(&self, symbol: &str, ts_ms: i64, flow: &OrderFlowSignal) {
        self.enqueue(orderflow_line(symbol, ts_ms, flow));
    }

    fn regime(&self, symbol: &str, ts_ms: i64, metrics: &RegimeMetrics) {
        self.enqueue(regime_line(symbol, ts_ms, metrics));
    }

    fn vwap(&self, symbol: &str, ts_ms: i64, metrics: &VwapMetrics) {
        self.enqueue(vwap_line(symbol, ts_ms, metrics));
    }

    fn candle(&self, symbol: &str, candle: &Candle) {
        self.enqueue(candle_line(symbol, candle));
    }

    fn tick(&self, tick: &MarketTick) {
        self.enqueue(tick_line(tick));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{CandleVerdict, MarketRegime};
    use std::sync::Arc;

    #[test]
    fn alpha_line_carries_kind_and_timeframe_tag() {
        let sig = AlphaSignal {
            symbol: Arc::from("BTCUSDT"),
            ts_ms: 1_000,
            momentum: 0.05,
            mean_rev_z: -1.25,
            rsi: 0.0,
            volume_ratio: 0.0,
            kind: AlphaKind::Tick,
            verdict: CandleVerdict::None,
        };
        let line = alpha_line(&sig, "1m");
        assert_eq!(
            line,
            "alpha_signal,symbol=BTCUSDT momentum=0.05,meanRevZ=-1.25,rsi=0,vbr=0,signal_type=\"TICK_1m\""
        );
    }

    #[test]
    fn microstructure_line_schema() {
        let vpin = VpinMetrics { vpin: 0.25, toxicity: 0.4, ..Default::default() };
        let impact = ImpactMetrics { lambda: 0.001, ..Default::default() };
        let line = microstructure_line("ETHUSDT", 2_000, &vpin, &impact, 0.5);
        assert_eq!(
            line,
            "microstructure,symbol=ETHUSDT vpin=0.25,toxicity=0.4,lambda=0.001,spread=0.5 2000000000"
        );
    }

    #[test]
    fn regime_line_uses_wire_label() {
        let metrics = RegimeMetrics {
            regime: MarketRegime::MeanRevHighVol,
            hurst: 0.4,
            autocorrelation: -0.1,
            volatility: 0.9,
            trend_strength: 0.2,
            confidence: 0.6,
        };
        let line = regime_line("BTCUSDT", 3_000, &metrics);
        assert!(line.starts_with("regime,symbol=BTCUSDT,regime=MEAN_REV_HIGH_VOL "));
        assert!(line.ends_with(" 3000000000"));
        assert!(line.contains("hurst=0.4"));
    }

    #[test]
    fn candle_line_stamps_close_time() {
        let candle = Candle {
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
            start_ms: 0,
            end_ms: 59_000,
        };
        let line = candle_line("BTCUSDT", &candle);
        assert_eq!(
            line,
            "candles,symbol=BTCUSDT open=1,high=2,low=0.5,close=1.5,volume=10 59000000000"
        );
    }

    #[test]
    fn tick_line_schema() {
        let tick = MarketTick {
            symbol: Arc::from("SOLUSDT"),
            price: 150.25,
            volume: 2.0,
            ts_ms: 5,
        };
        assert_eq!(
            tick_line(&tick),
            "ticks,symbol=SOLUSDT price=150.25,volume=2 5000000"
        );
    }
}
