use crate::market::types::{
    Candle, ChartMode, ChartPoint, FeedEvent, MarketTimeframe, SessionStats, Tick, TickerSummary,
};
use crate::market::window::SlidingWindow;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

const EMPTY_PRICE_BITS: u64 = u64::MAX;

/// Single-writer "latest price" slot. Stores the f64 bit pattern so reads and
/// writes are one atomic word; `u64::MAX` (a NaN payload) means no price yet.
#[derive(Debug)]
pub struct LatestPriceCell {
    bits: AtomicU64,
}

impl Default for LatestPriceCell {
    fn default() -> Self {
        Self {
            bits: AtomicU64::new(EMPTY_PRICE_BITS),
        }
    }
}

impl LatestPriceCell {
    pub fn store(&self, price: f64) {
        self.bits.store(price.to_bits(), Ordering::Release);
    }

    pub fn load(&self) -> Option<f64> {
        match self.bits.load(Ordering::Acquire) {
            EMPTY_PRICE_BITS => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    pub fn clear(&self) {
        self.bits.store(EMPTY_PRICE_BITS, Ordering::Release);
    }
}

pub fn candle_bucket_open_time(timestamp_ms: i64, bucket_ms: i64) -> i64 {
    if bucket_ms <= 0 {
        return timestamp_ms;
    }
    timestamp_ms - timestamp_ms.rem_euclid(bucket_ms)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CandleUpdate {
    Opened,
    Updated,
    Sealed { sealed: Candle },
    Stale,
}

/// Builds one in-progress candle at a time and seals finished ones into a
/// bounded window. Buckets without trades produce no candle.
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    bucket_ms: i64,
    open: Option<Candle>,
    sealed: SlidingWindow<Candle>,
}

impl CandleBuilder {
    pub fn new(timeframe: MarketTimeframe, capacity: usize) -> Self {
        Self::with_bucket_ms(timeframe.duration_ms(), capacity)
    }

    pub fn with_bucket_ms(bucket_ms: i64, capacity: usize) -> Self {
        Self {
            bucket_ms,
            open: None,
            sealed: SlidingWindow::new(capacity),
        }
    }

    pub fn apply(&mut self, timestamp_ms: i64, price: f64) -> CandleUpdate {
        let bucket_start = candle_bucket_open_time(timestamp_ms, self.bucket_ms);

        match self.open.as_mut() {
            Some(current) if bucket_start < current.start_time => return CandleUpdate::Stale,
            Some(current) if bucket_start == current.start_time => {
                current.apply_trade(price);
                return CandleUpdate::Updated;
            }
            _ => {}
        }

        let next = Candle::from_trade(bucket_start, price);
        match self.open.replace(next) {
            Some(sealed) => {
                self.sealed.append(sealed);
                CandleUpdate::Sealed { sealed }
            }
            None => CandleUpdate::Opened,
        }
    }

    pub fn open_candle(&self) -> Option<&Candle> {
        self.open.as_ref()
    }

    pub fn sealed(&self) -> &SlidingWindow<Candle> {
        &self.sealed
    }

    /// Sealed candles followed by the in-progress one, trimmed to capacity.
    pub fn combined(&self) -> Vec<Candle> {
        let capacity = self.sealed.capacity();
        let mut candles = Vec::with_capacity(self.sealed.len() + 1);
        candles.extend(self.sealed.iter().copied());
        if let Some(open) = self.open {
            candles.push(open);
        }
        if candles.len() > capacity {
            let overflow = candles.len() - capacity;
            candles.drain(..overflow);
        }
        candles
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.sealed.set_capacity(capacity);
    }

    pub fn clear(&mut self) {
        self.open = None;
        self.sealed.clear();
    }
}

/// Mutable accumulation layer. Touched by the feed callback on every message
/// and read by the timers; never exposed to the view directly.
#[derive(Debug, Clone)]
pub struct TickAggregator {
    stats: SessionStats,
    candles: Option<CandleBuilder>,
    ticker: Option<TickerSummary>,
}

impl TickAggregator {
    pub fn new(mode: ChartMode, timeframe: MarketTimeframe, capacity: usize) -> Self {
        let candles = match mode {
            ChartMode::Candle => Some(CandleBuilder::new(timeframe, capacity)),
            ChartMode::Line => None,
        };
        Self {
            stats: SessionStats::default(),
            candles,
            ticker: None,
        }
    }

    pub fn on_tick(&mut self, latest_price: &LatestPriceCell, tick: &Tick) -> Option<CandleUpdate> {
        latest_price.store(tick.price);
        self.stats.apply(tick.price, tick.quantity);
        self.candles
            .as_mut()
            .map(|builder| builder.apply(tick.timestamp, tick.price))
    }

    pub fn on_ticker(&mut self, latest_price: &LatestPriceCell, summary: TickerSummary) {
        latest_price.store(summary.last_price);
        self.ticker = Some(summary);
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn ticker(&self) -> Option<&TickerSummary> {
        self.ticker.as_ref()
    }

    pub fn candles(&self) -> Option<&CandleBuilder> {
        self.candles.as_ref()
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        if let Some(builder) = self.candles.as_mut() {
            builder.set_capacity(capacity);
        }
    }

    pub fn reset(&mut self) {
        self.stats = SessionStats::default();
        self.ticker = None;
        if let Some(builder) = self.candles.as_mut() {
            builder.clear();
        }
    }
}

#[derive(Debug)]
pub struct MarketAccumulator {
    pub aggregator: TickAggregator,
    pub points: SlidingWindow<ChartPoint>,
}

/// State shared by one pipeline's feed callback and its two timers.
#[derive(Debug)]
pub struct SharedMarketState {
    pub latest_price: LatestPriceCell,
    pub accumulator: Mutex<MarketAccumulator>,
}

impl SharedMarketState {
    pub fn new(mode: ChartMode, timeframe: MarketTimeframe, capacity: usize) -> Self {
        Self {
            latest_price: LatestPriceCell::default(),
            accumulator: Mutex::new(MarketAccumulator {
                aggregator: TickAggregator::new(mode, timeframe, capacity),
                points: SlidingWindow::new(capacity),
            }),
        }
    }

    pub fn ingest(&self, event: FeedEvent) {
        let mut writable = self.accumulator.lock();
        match event {
            FeedEvent::Trade(tick) => {
                match writable.aggregator.on_tick(&self.latest_price, &tick) {
                    Some(CandleUpdate::Sealed { sealed }) => log::debug!(
                        "candle sealed at {}: o={} h={} l={} c={}",
                        sealed.start_time,
                        sealed.open,
                        sealed.high,
                        sealed.low,
                        sealed.close
                    ),
                    Some(CandleUpdate::Stale) => {
                        log::debug!("trade at {} is older than the open candle", tick.timestamp)
                    }
                    _ => {}
                }
            }
            FeedEvent::Ticker(summary) => {
                writable.aggregator.on_ticker(&self.latest_price, summary);
            }
        }
    }

    pub fn set_capacity(&self, capacity: usize) {
        let mut writable = self.accumulator.lock();
        writable.points.set_capacity(capacity);
        writable.aggregator.set_capacity(capacity);
    }

    pub fn reset(&self) {
        self.latest_price.clear();
        let mut writable = self.accumulator.lock();
        writable.aggregator.reset();
        writable.points.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(timestamp: i64, price: f64, quantity: f64) -> Tick {
        Tick {
            timestamp,
            price,
            quantity,
        }
    }

    #[test]
    fn latest_price_cell_starts_empty() {
        let cell = LatestPriceCell::default();
        assert_eq!(cell.load(), None);
        cell.store(97_245.5);
        assert_eq!(cell.load(), Some(97_245.5));
        cell.clear();
        assert_eq!(cell.load(), None);
    }

    #[test]
    fn aligns_bucket_start_with_floor() {
        assert_eq!(candle_bucket_open_time(0, 1_000), 0);
        assert_eq!(candle_bucket_open_time(999, 1_000), 0);
        assert_eq!(candle_bucket_open_time(1_000, 1_000), 1_000);
        assert_eq!(candle_bucket_open_time(-1, 1_000), -1_000);
    }

    #[test]
    fn seals_candle_when_bucket_changes() {
        let mut builder = CandleBuilder::with_bucket_ms(1_000, 10);

        assert_eq!(builder.apply(0, 100.0), CandleUpdate::Opened);
        assert_eq!(builder.apply(900, 105.0), CandleUpdate::Updated);
        let update = builder.apply(1_100, 102.0);

        let expected_sealed = Candle {
            start_time: 0,
            open: 100.0,
            high: 105.0,
            low: 100.0,
            close: 105.0,
        };
        assert_eq!(
            update,
            CandleUpdate::Sealed {
                sealed: expected_sealed
            }
        );
        assert_eq!(builder.sealed().snapshot(), vec![expected_sealed]);
        assert_eq!(
            builder.open_candle().copied(),
            Some(Candle {
                start_time: 1_000,
                open: 102.0,
                high: 102.0,
                low: 102.0,
                close: 102.0,
            })
        );
    }

    #[test]
    fn long_gap_seals_exactly_one_candle() {
        let mut builder = CandleBuilder::with_bucket_ms(1_000, 10);
        builder.apply(100, 10.0);
        builder.apply(9_500, 11.0);

        assert_eq!(builder.sealed().len(), 1);
        assert_eq!(builder.open_candle().map(|c| c.start_time), Some(9_000));
        let combined = builder.combined();
        assert_eq!(
            combined.iter().map(|c| c.start_time).collect::<Vec<_>>(),
            vec![0, 9_000]
        );
    }

    #[test]
    fn stale_bucket_does_not_reopen_history() {
        let mut builder = CandleBuilder::with_bucket_ms(1_000, 10);
        builder.apply(5_000, 10.0);
        assert_eq!(builder.apply(3_000, 1.0), CandleUpdate::Stale);
        assert_eq!(builder.open_candle().map(|c| c.low), Some(10.0));
    }

    #[test]
    fn combined_candles_respect_capacity() {
        let mut builder = CandleBuilder::with_bucket_ms(1_000, 3);
        for second in 0..6 {
            builder.apply(second * 1_000, 100.0 + second as f64);
        }
        let combined = builder.combined();
        assert_eq!(combined.len(), 3);
        assert_eq!(
            combined.iter().map(|c| c.start_time).collect::<Vec<_>>(),
            vec![3_000, 4_000, 5_000]
        );
    }

    #[test]
    fn session_high_and_low_are_monotonic() {
        let cell = LatestPriceCell::default();
        let mut aggregator = TickAggregator::new(ChartMode::Line, MarketTimeframe::S1, 10);
        let prices = [100.0, 99.5, 101.25, 100.0, 98.75, 102.0, 101.0];
        let mut last_high = f64::NEG_INFINITY;
        let mut last_low = f64::INFINITY;

        for (index, price) in prices.iter().enumerate() {
            aggregator.on_tick(&cell, &tick(index as i64 * 10, *price, 0.1));
            let stats = aggregator.stats();
            assert!(stats.session_high >= last_high);
            assert!(stats.session_low <= last_low);
            last_high = stats.session_high;
            last_low = stats.session_low;
        }

        assert_eq!(last_high, 102.0);
        assert_eq!(last_low, 98.75);
        assert_eq!(aggregator.stats().trade_count, prices.len() as u64);
        assert_eq!(cell.load(), Some(101.0));
    }

    #[test]
    fn line_mode_skips_candle_building() {
        let cell = LatestPriceCell::default();
        let mut aggregator = TickAggregator::new(ChartMode::Line, MarketTimeframe::S1, 10);
        assert_eq!(aggregator.on_tick(&cell, &tick(0, 1.0, 1.0)), None);
        assert!(aggregator.candles().is_none());
    }

    #[test]
    fn ticker_summary_moves_price_but_not_stats() {
        let state = SharedMarketState::new(ChartMode::Candle, MarketTimeframe::S1, 10);
        state.ingest(FeedEvent::Ticker(TickerSummary {
            symbol: "BTCUSDT".to_string(),
            last_price: 97_000.0,
            price_change_percent: 2.45,
            high: 98_000.0,
            low: 95_000.0,
            volume: 10.0,
            quote_volume: 970_000.0,
            trade_count: 5,
            event_time: 1,
        }));

        assert_eq!(state.latest_price.load(), Some(97_000.0));
        let readable = state.accumulator.lock();
        assert_eq!(readable.aggregator.stats().trade_count, 0);
        assert!(readable
            .aggregator
            .candles()
            .and_then(CandleBuilder::open_candle)
            .is_none());
    }

    #[test]
    fn ingest_seals_candles_and_ignores_stale_trades_for_history() {
        let state = SharedMarketState::new(ChartMode::Candle, MarketTimeframe::S1, 10);
        state.ingest(FeedEvent::Trade(tick(0, 100.0, 1.0)));
        state.ingest(FeedEvent::Trade(tick(1_500, 101.0, 1.0)));
        state.ingest(FeedEvent::Trade(tick(200, 99.0, 1.0)));

        let readable = state.accumulator.lock();
        let builder = readable.aggregator.candles().expect("candle mode builds candles");
        assert_eq!(builder.sealed().snapshot(), vec![Candle::from_trade(0, 100.0)]);
        assert_eq!(builder.open_candle().map(|candle| candle.close), Some(101.0));
        assert_eq!(readable.aggregator.stats().trade_count, 3);
        assert_eq!(state.latest_price.load(), Some(99.0));
    }

    #[test]
    fn reset_discards_session_state() {
        let state = SharedMarketState::new(ChartMode::Candle, MarketTimeframe::S1, 10);
        state.ingest(FeedEvent::Trade(tick(0, 100.0, 1.0)));
        state.ingest(FeedEvent::Trade(tick(1_500, 101.0, 1.0)));
        state.reset();

        assert_eq!(state.latest_price.load(), None);
        let readable = state.accumulator.lock();
        assert_eq!(readable.aggregator.stats(), SessionStats::default());
        assert!(readable.aggregator.candles().is_some_and(|b| b.combined().is_empty()));
        assert!(readable.points.is_empty());
    }
}
