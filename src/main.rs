/// main.rs — Host process entry point
///
/// Modes:
///   live      — seeded synthetic feeds through the full pipeline (default)
///   binance   — Binance aggregate-trade collectors through the pipeline
///   backtest  — fetch klines, replay as ticks through the simulator
///
/// Exit code 0 on success, 1 on an unhandled error.
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alpha_engine::backtest::Backtester;
use alpha_engine::composer::{Composer, PipelineRouter, Recommendation};
use alpha_engine::config::AppConfig;
use alpha_engine::data::{MarketTick, Symbol};
use alpha_engine::feed::{BinanceFeedClient, BinanceTradeCollector, SyntheticFeed};
use alpha_engine::sink::{LineSink, SignalSink};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mode = std::env::args().nth(1).unwrap_or_else(|| "live".into());

    info!("╔══════════════════════════════════════════════╗");
    info!("║   ALPHA ENGINE — STREAMING SIGNAL CORE       ║");
    info!("║   VPIN · Kyle λ · OFI · Regime · VWAP        ║");
    info!("╚══════════════════════════════════════════════╝");

    let cfg = AppConfig::from_env()?;
    info!(
        "Config: pairs={:?} candle={}s tick_window={} flow_window={} regime_window={}",
        cfg.trading_pairs,
        cfg.candle_interval_secs,
        cfg.tick_window,
        cfg.flow_window,
        cfg.regime_window
    );
    info!(
        "Sink:   {}",
        if cfg.sink.is_some() { "enabled" } else { "disabled (set SINK_URL/ORG/BUCKET/TOKEN)" }
    );

    match mode.as_str() {
        "live" => run_live(cfg).await,
        "binance" => run_binance(cfg).await,
        "backtest" => run_backtest(cfg).await,
        other => anyhow::bail!("unknown mode '{other}' (expected live | binance | backtest)"),
    }
}

fn build_sink(cfg: &AppConfig) -> Option<Arc<LineSink>> {
    cfg.sink
        .clone()
        .map(|settings| Arc::new(LineSink::new(settings, cfg.timeframe.clone())))
}

fn as_signal_sink(sink: &Option<Arc<LineSink>>) -> Option<Arc<dyn SignalSink>> {
    sink.clone().map(|s| s as Arc<dyn SignalSink>)
}

/// Synthetic random-walk feeds, one per configured pair.
async fn run_live(cfg: AppConfig) -> Result<()> {
    let sink = build_sink(&cfg);
    let mut router = PipelineRouter::new(cfg.composer(), as_signal_sink(&sink));
    let (tx, mut rx) = mpsc::unbounded_channel::<MarketTick>();

    for (i, pair) in cfg.trading_pairs.iter().enumerate() {
        let symbol: Symbol = Arc::from(pair.as_str());
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut feed = SyntheticFeed::new(symbol, 7 + i as u64, 100.0 * (i + 1) as f64);
            loop {
                if tx.send(feed.next_tick()).is_err() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        });
    }
    drop(tx);

    info!("live mode running; ctrl-c to stop");
    pump_until_interrupt(&mut router, &mut rx).await;

    info!(lanes = router.lane_count(), "draining pipeline lanes");
    router.shutdown().await;
    if let Some(s) = &sink {
        s.flush().await;
    }
    Ok(())
}

/// Binance aggregate-trade collectors, one per configured pair.
async fn run_binance(cfg: AppConfig) -> Result<()> {
    let sink = build_sink(&cfg);
    let mut router = PipelineRouter::new(cfg.composer(), as_signal_sink(&sink));
    let client = Arc::new(BinanceFeedClient::new(&cfg.rest_url)?);
    let (tx, mut rx) = mpsc::unbounded_channel::<MarketTick>();

    let collectors: Vec<BinanceTradeCollector> = cfg
        .trading_pairs
        .iter()
        .map(|pair| {
            BinanceTradeCollector::spawn(
                client.clone(),
                Arc::from(pair.as_str()),
                cfg.poll_secs,
                tx.clone(),
            )
        })
        .collect();
    drop(tx);

    info!("binance mode running; ctrl-c to stop");
    pump_until_interrupt(&mut router, &mut rx).await;

    for c in &collectors {
        c.stop();
    }
    for c in collectors {
        c.join().await;
    }
    router.shutdown().await;
    if let Some(s) = &sink {
        s.flush().await;
    }
    Ok(())
}

async fn pump_until_interrupt(
    router: &mut PipelineRouter,
    rx: &mut mpsc::UnboundedReceiver<MarketTick>,
) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                break;
            }
            maybe_tick = rx.recv() => {
                match maybe_tick {
                    Some(tick) => router.route(tick),
                    None => break,
                }
            }
        }
    }
}

/// Fetch klines, replay them as ticks, and let the pipeline's own
/// recommendations drive the simulator.
async fn run_backtest(cfg: AppConfig) -> Result<()> {
    let client = BinanceFeedClient::new(&cfg.rest_url)?;
    let symbol: Symbol = Arc::from(cfg.backtest_symbol.as_str());

    info!(
        "Fetching {} {} klines for {}...",
        cfg.backtest_limit, cfg.kline_interval, cfg.backtest_symbol
    );
    let klines = client
        .fetch_klines(&cfg.backtest_symbol, &cfg.kline_interval, cfg.backtest_limit)
        .await?;
    if klines.is_empty() {
        anyhow::bail!("no kline data received; check symbol, interval, and connectivity");
    }

    let ticks: Vec<MarketTick> = klines.iter().filter_map(|k| k.to_tick(&symbol)).collect();
    info!("Replaying {} ticks", ticks.len());

    let mut composer = Composer::new(symbol, cfg.composer(), None);
    let signal = |tick: &MarketTick| -> i32 {
        match composer.on_tick(tick).map(|r| r.recommendation) {
            Some(Recommendation::StrongBuy) | Some(Recommendation::Buy) => 1,
            Some(Recommendation::StrongSell) | Some(Recommendation::Sell) => -1,
            _ => 0,
        }
    };

    let mut backtester = Backtester::new(cfg.backtest());
    let result = backtester.run(&ticks, signal);

    println!("\n{}", result.report);
    info!(
        trades = result.trades.len(),
        final_equity = result.final_equity,
        "backtest complete"
    );
    Ok(())
}
