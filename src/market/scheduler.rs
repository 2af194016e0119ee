use crate::market::aggregator::SharedMarketState;
use crate::market::chart::{ChartAdapter, ChartSink, PushOutcome};
use crate::market::feed::FeedStatus;
use crate::market::types::{
    now_unix_ms, ChartMode, ChartPoint, ConnectionState, SeriesData, TickerSummary,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Up,
    Down,
    Neutral,
}

/// Read-only view state, refreshed at slow-tick cadence.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub symbol: String,
    pub latest_price: Option<f64>,
    pub previous_price: Option<f64>,
    pub session_high: Option<f64>,
    pub session_low: Option<f64>,
    pub trade_count: u64,
    pub total_volume: f64,
    pub connection: ConnectionState,
    pub connected: bool,
    pub offline: bool,
    pub reconnect_attempt: u32,
    pub point_count: usize,
    pub capacity: usize,
    pub ticker: Option<TickerSummary>,
    pub series: SeriesData,
    pub updated_at: i64,
}

impl DashboardSnapshot {
    pub fn disconnected(symbol: &str, mode: ChartMode, capacity: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            latest_price: None,
            previous_price: None,
            session_high: None,
            session_low: None,
            trade_count: 0,
            total_volume: 0.0,
            connection: ConnectionState::Disconnected,
            connected: false,
            offline: false,
            reconnect_attempt: 0,
            point_count: 0,
            capacity,
            ticker: None,
            series: SeriesData::empty(mode),
            updated_at: now_unix_ms(),
        }
    }

    pub fn direction(&self) -> PriceDirection {
        match (self.latest_price, self.previous_price) {
            (Some(latest), Some(previous)) if latest > previous => PriceDirection::Up,
            (Some(latest), Some(previous)) if latest < previous => PriceDirection::Down,
            _ => PriceDirection::Neutral,
        }
    }

    pub fn change(&self) -> f64 {
        match (self.latest_price, self.previous_price) {
            (Some(latest), Some(previous)) => latest - previous,
            _ => 0.0,
        }
    }

    pub fn change_pct(&self) -> f64 {
        match self.previous_price {
            Some(previous) if previous != 0.0 => self.change() / previous * 100.0,
            _ => 0.0,
        }
    }
}

/// Price observed by the previous slow tick. Each slow tick shifts it into
/// `previous_price`, so direction compares two consecutive UI refreshes.
#[derive(Debug, Default)]
pub struct PriceTrail {
    last_published: Option<f64>,
}

impl PriceTrail {
    fn advance(&mut self, latest: Option<f64>) -> (Option<f64>, Option<f64>) {
        match latest {
            Some(price) => {
                let previous = self.last_published.replace(price);
                (Some(price), previous)
            }
            None => {
                self.last_published = None;
                (None, None)
            }
        }
    }
}

/// High-frequency chart path. A null latest price is a no-op in line mode,
/// an empty candle set is a no-op in candle mode.
pub fn fast_tick<S: ChartSink>(
    shared: &SharedMarketState,
    mode: ChartMode,
    chart: &Mutex<ChartAdapter<S>>,
    now_ms: i64,
) -> Option<PushOutcome> {
    let series = match mode {
        ChartMode::Line => {
            let price = shared.latest_price.load()?;
            let mut writable = shared.accumulator.lock();
            let x = writable
                .points
                .last()
                .map(|point| point.x.max(now_ms))
                .unwrap_or(now_ms);
            writable.points.append(ChartPoint { x, y: price });
            SeriesData::Line(writable.points.snapshot())
        }
        ChartMode::Candle => {
            let readable = shared.accumulator.lock();
            let candles = readable.aggregator.candles()?.combined();
            if candles.is_empty() {
                return None;
            }
            SeriesData::Candles(candles)
        }
    };

    Some(chart.lock().push(&series))
}

pub fn slow_tick(
    shared: &SharedMarketState,
    status: &FeedStatus,
    trail: &mut PriceTrail,
    symbol: &str,
    mode: ChartMode,
) -> DashboardSnapshot {
    let (latest_price, previous_price) = trail.advance(shared.latest_price.load());
    let connection = status.state();

    let readable = shared.accumulator.lock();
    let stats = readable.aggregator.stats();
    let series = match mode {
        ChartMode::Line => SeriesData::Line(readable.points.snapshot()),
        ChartMode::Candle => SeriesData::Candles(
            readable
                .aggregator
                .candles()
                .map(|builder| builder.combined())
                .unwrap_or_default(),
        ),
    };

    DashboardSnapshot {
        symbol: symbol.to_string(),
        latest_price,
        previous_price,
        session_high: stats.high(),
        session_low: stats.low(),
        trade_count: stats.trade_count,
        total_volume: stats.total_volume,
        connection,
        connected: connection == ConnectionState::Connected,
        offline: status.is_exhausted(),
        reconnect_attempt: status.reconnect_attempt(),
        point_count: series.len(),
        capacity: readable.points.capacity(),
        ticker: readable.aggregator.ticker().cloned(),
        series,
        updated_at: now_unix_ms(),
    }
}

pub fn spawn_fast_ticker<S: ChartSink>(
    period: Duration,
    shared: Arc<SharedMarketState>,
    mode: ChartMode,
    chart: Arc<Mutex<ChartAdapter<S>>>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    fast_tick(&shared, mode, &chart, now_unix_ms());
                }
            }
        }
    })
}

pub fn spawn_slow_ticker(
    period: Duration,
    shared: Arc<SharedMarketState>,
    status: Arc<FeedStatus>,
    symbol: String,
    mode: ChartMode,
    publisher: watch::Sender<DashboardSnapshot>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut trail = PriceTrail::default();

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = slow_tick(&shared, &status, &mut trail, &symbol, mode);
                    publisher.send_replace(snapshot);
                }
            }
        }
    })
}
