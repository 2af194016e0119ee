use crate::error::AppError;
use crate::market::feed::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SYMBOL: &str = "BTCUSDT";
pub const DEFAULT_MODE: ChartMode = ChartMode::Line;
pub const DEFAULT_CAPACITY: usize = 300;
pub const DEFAULT_FAST_INTERVAL_MS: u64 = 100;
pub const DEFAULT_SLOW_INTERVAL_MS: u64 = 300;
pub const DEFAULT_TIMEFRAME: MarketTimeframe = MarketTimeframe::S1;
pub const DEFAULT_INCLUDE_TICKER: bool = false;
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 3_000;
pub const DEFAULT_RECONNECT_GROWTH_FACTOR: f64 = 1.5;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_STREAM_BASE_URL: &str = "wss://stream.binance.com:9443";
pub const STREAM_BASE_URL_ENV: &str = "CRYPTOFLOW_STREAM_URL";
pub const MIN_CAPACITY: usize = 10;
pub const MAX_CAPACITY: usize = 5_000;
pub const MIN_FAST_INTERVAL_MS: u64 = 16;
pub const MAX_FAST_INTERVAL_MS: u64 = 1_000;
pub const MIN_SLOW_INTERVAL_MS: u64 = 50;
pub const MAX_SLOW_INTERVAL_MS: u64 = 5_000;
pub const MIN_RECONNECT_BASE_DELAY_MS: u64 = 10;
pub const MAX_RECONNECT_BASE_DELAY_MS: u64 = 60_000;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 100;
pub const MAX_BOARD_SYMBOLS: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MarketTimeframe {
    #[serde(rename = "1s")]
    S1,
    #[serde(rename = "5s")]
    S5,
    #[serde(rename = "15s")]
    S15,
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
}

impl MarketTimeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S1 => "1s",
            Self::S5 => "5s",
            Self::S15 => "15s",
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
        }
    }

    pub fn duration_ms(self) -> i64 {
        match self {
            Self::S1 => 1_000,
            Self::S5 => 5_000,
            Self::S15 => 15_000,
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::H1 => 3_600_000,
        }
    }

    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value.trim() {
            "1s" => Ok(Self::S1),
            "5s" => Ok(Self::S5),
            "15s" => Ok(Self::S15),
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "1h" => Ok(Self::H1),
            other => Err(AppError::InvalidArgument(format!(
                "unsupported timeframe '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartMode {
    Line,
    Candle,
}

impl ChartMode {
    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(Self::Line),
            "candle" | "candles" => Ok(Self::Candle),
            other => Err(AppError::InvalidArgument(format!(
                "unsupported chart mode '{other}'"
            ))),
        }
    }
}

/// One trade print decoded from the feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub timestamp: i64,
    pub price: f64,
    pub quantity: f64,
}

/// Rolling 24h summary for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TickerSummary {
    pub symbol: String,
    pub last_price: f64,
    pub price_change_percent: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
    pub event_time: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Trade(Tick),
    Ticker(TickerSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Trade,
    Ticker,
}

impl StreamKind {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Trade => "@trade",
            Self::Ticker => "@ticker",
        }
    }

    pub fn from_stream_name(stream: &str) -> Option<Self> {
        if stream.ends_with("@trade") || stream.ends_with("@aggTrade") {
            Some(Self::Trade)
        } else if stream.ends_with("@ticker") {
            Some(Self::Ticker)
        } else {
            None
        }
    }
}

/// Session statistics. High and low start at the infinity sentinels so the
/// first trade always replaces them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStats {
    pub trade_count: u64,
    pub session_high: f64,
    pub session_low: f64,
    pub total_volume: f64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            trade_count: 0,
            session_high: f64::NEG_INFINITY,
            session_low: f64::INFINITY,
            total_volume: 0.0,
        }
    }
}

impl SessionStats {
    pub fn apply(&mut self, price: f64, quantity: f64) {
        self.trade_count = self.trade_count.saturating_add(1);
        self.total_volume += quantity;
        self.session_high = self.session_high.max(price);
        self.session_low = self.session_low.min(price);
    }

    pub fn high(&self) -> Option<f64> {
        self.session_high.is_finite().then_some(self.session_high)
    }

    pub fn low(&self) -> Option<f64> {
        self.session_low.is_finite().then_some(self.session_low)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChartPoint {
    pub x: i64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub start_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn from_trade(bucket_start: i64, price: f64) -> Self {
        Self {
            start_time: bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    pub fn apply_trade(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SeriesData {
    Line(Vec<ChartPoint>),
    Candles(Vec<Candle>),
}

impl SeriesData {
    pub fn empty(mode: ChartMode) -> Self {
        match mode {
            ChartMode::Line => Self::Line(Vec::new()),
            ChartMode::Candle => Self::Candles(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Line(points) => points.len(),
            Self::Candles(candles) => candles.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flat wire shape covering raw trade frames, raw 24h ticker frames and the
/// combined-stream envelope `{stream, data}`. Binance reuses `q` for trade
/// quantity and ticker quote volume, so interpretation depends on the kind.
#[derive(Debug, Deserialize)]
pub struct MarketFrameWire {
    pub stream: Option<String>,
    pub data: Option<Box<MarketFrameWire>>,
    #[serde(rename = "e")]
    pub event_type: Option<String>,
    #[serde(rename = "E")]
    pub event_time: Option<i64>,
    #[serde(rename = "s")]
    pub symbol: Option<String>,
    #[serde(rename = "p")]
    pub price: Option<String>,
    #[serde(rename = "q")]
    pub quantity: Option<String>,
    #[serde(rename = "T")]
    pub trade_time: Option<i64>,
    #[serde(rename = "c")]
    pub last_price: Option<String>,
    #[serde(rename = "P")]
    pub price_change_percent: Option<String>,
    #[serde(rename = "h")]
    pub high: Option<String>,
    #[serde(rename = "l")]
    pub low: Option<String>,
    #[serde(rename = "v")]
    pub volume: Option<String>,
    #[serde(rename = "n")]
    pub trade_count: Option<u64>,
}

impl MarketFrameWire {
    fn into_event(self) -> Result<FeedEvent, AppError> {
        if let Some(stream) = self.stream {
            let data = self.data.ok_or_else(|| {
                AppError::InvalidArgument(format!("stream '{stream}' frame without data"))
            })?;
            return match StreamKind::from_stream_name(&stream) {
                Some(StreamKind::Trade) => data.into_tick().map(FeedEvent::Trade),
                Some(StreamKind::Ticker) => data.into_ticker().map(FeedEvent::Ticker),
                None => Err(AppError::UnknownStream(stream)),
            };
        }

        match self.event_type.as_deref() {
            Some("trade") | Some("aggTrade") => self.into_tick().map(FeedEvent::Trade),
            Some("24hrTicker") => self.into_ticker().map(FeedEvent::Ticker),
            Some(other) => Err(AppError::UnknownStream(other.to_string())),
            None => Err(AppError::InvalidArgument(
                "frame carries neither stream nor event type".to_string(),
            )),
        }
    }

    fn into_tick(self) -> Result<Tick, AppError> {
        let price = required_f64(self.price, "p")?;
        let quantity = required_f64(self.quantity, "q")?;
        if price <= 0.0 || quantity < 0.0 {
            return Err(AppError::InvalidArgument(
                "trade price must be positive and quantity non-negative".to_string(),
            ));
        }
        let timestamp = self.trade_time.or(self.event_time).ok_or_else(|| {
            AppError::InvalidArgument("trade frame without timestamp".to_string())
        })?;

        Ok(Tick {
            timestamp,
            price,
            quantity,
        })
    }

    fn into_ticker(self) -> Result<TickerSummary, AppError> {
        let symbol = self
            .symbol
            .ok_or_else(|| AppError::InvalidArgument("ticker frame without symbol".to_string()))?;
        let last_price = required_f64(self.last_price, "c")?;
        if last_price <= 0.0 {
            return Err(AppError::InvalidArgument(
                "ticker last price must be positive".to_string(),
            ));
        }

        Ok(TickerSummary {
            symbol,
            last_price,
            price_change_percent: required_f64(self.price_change_percent, "P")?,
            high: required_f64(self.high, "h")?,
            low: required_f64(self.low, "l")?,
            volume: required_f64(self.volume, "v")?,
            quote_volume: required_f64(self.quantity, "q")?,
            trade_count: self.trade_count.unwrap_or_default(),
            event_time: self.event_time.unwrap_or_default(),
        })
    }
}

fn required_f64(value: Option<String>, field: &str) -> Result<f64, AppError> {
    let raw = value
        .ok_or_else(|| AppError::InvalidArgument(format!("missing field '{field}'")))?;
    let parsed = raw.parse::<f64>()?;
    if !parsed.is_finite() {
        return Err(AppError::InvalidArgument(format!(
            "field '{field}' must be finite"
        )));
    }
    Ok(parsed)
}

pub fn parse_feed_payload(payload: &mut [u8]) -> Result<FeedEvent, AppError> {
    let wire: MarketFrameWire = simd_json::serde::from_slice(payload)?;
    wire.into_event()
}

/// REST `/api/v3/ticker/24hr` entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hWire {
    pub symbol: String,
    pub last_price: String,
    pub price_change_percent: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    pub quote_volume: String,
    pub count: u64,
    pub close_time: i64,
}

impl TryFrom<Ticker24hWire> for TickerSummary {
    type Error = AppError;

    fn try_from(value: Ticker24hWire) -> Result<Self, Self::Error> {
        Ok(Self {
            symbol: value.symbol,
            last_price: required_f64(Some(value.last_price), "lastPrice")?,
            price_change_percent: required_f64(
                Some(value.price_change_percent),
                "priceChangePercent",
            )?,
            high: required_f64(Some(value.high_price), "highPrice")?,
            low: required_f64(Some(value.low_price), "lowPrice")?,
            volume: required_f64(Some(value.volume), "volume")?,
            quote_volume: required_f64(Some(value.quote_volume), "quoteVolume")?,
            trade_count: value.count,
            event_time: value.close_time,
        })
    }
}

pub fn resolve_stream_base_url() -> String {
    std::env::var(STREAM_BASE_URL_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_STREAM_BASE_URL.to_string())
}

fn normalize_symbol(raw: &str) -> Result<String, AppError> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(AppError::InvalidArgument(
            "symbol must be non-empty alphanumeric ASCII".to_string(),
        ));
    }
    Ok(symbol)
}

fn normalize_stream_base_url(raw: Option<String>) -> Result<String, AppError> {
    let base = raw
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(resolve_stream_base_url);
    if !(base.starts_with("ws://") || base.starts_with("wss://")) {
        return Err(AppError::InvalidArgument(
            "streamBaseUrl must use ws:// or wss://".to_string(),
        ));
    }
    Ok(base.trim_end_matches('/').to_string())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectArgs {
    pub reconnect_base_delay_ms: Option<u64>,
    pub reconnect_growth_factor: Option<f64>,
    pub max_reconnect_attempts: Option<u32>,
}

impl ReconnectArgs {
    pub fn normalize(self) -> Result<ReconnectPolicy, AppError> {
        let base_delay_ms = self
            .reconnect_base_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_BASE_DELAY_MS);
        if !(MIN_RECONNECT_BASE_DELAY_MS..=MAX_RECONNECT_BASE_DELAY_MS).contains(&base_delay_ms) {
            return Err(AppError::InvalidArgument(format!(
                "reconnectBaseDelayMs must be between {MIN_RECONNECT_BASE_DELAY_MS} and {MAX_RECONNECT_BASE_DELAY_MS}"
            )));
        }

        let growth_factor = self
            .reconnect_growth_factor
            .unwrap_or(DEFAULT_RECONNECT_GROWTH_FACTOR);
        if !growth_factor.is_finite() || growth_factor < 1.0 {
            return Err(AppError::InvalidArgument(
                "reconnectGrowthFactor must be a finite number >= 1.0".to_string(),
            ));
        }

        let max_attempts = self
            .max_reconnect_attempts
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);
        if max_attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(AppError::InvalidArgument(format!(
                "maxReconnectAttempts must be at most {MAX_RECONNECT_ATTEMPTS}"
            )));
        }

        Ok(ReconnectPolicy {
            base_delay: Duration::from_millis(base_delay_ms),
            growth_factor,
            max_attempts,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineArgs {
    pub symbol: Option<String>,
    pub mode: Option<ChartMode>,
    pub capacity: Option<usize>,
    pub fast_interval_ms: Option<u64>,
    pub slow_interval_ms: Option<u64>,
    pub timeframe: Option<MarketTimeframe>,
    pub include_ticker: Option<bool>,
    #[serde(flatten)]
    pub reconnect: ReconnectArgs,
    pub stream_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub symbol: String,
    pub mode: ChartMode,
    pub capacity: usize,
    pub fast_interval_ms: u64,
    pub slow_interval_ms: u64,
    pub timeframe: MarketTimeframe,
    pub include_ticker: bool,
    pub reconnect: ReconnectPolicy,
    pub stream_base_url: String,
}

impl PipelineArgs {
    pub fn normalize(self) -> Result<PipelineConfig, AppError> {
        let symbol = normalize_symbol(self.symbol.as_deref().unwrap_or(DEFAULT_SYMBOL))?;
        let mode = self.mode.unwrap_or(DEFAULT_MODE);

        let capacity = self.capacity.unwrap_or(DEFAULT_CAPACITY);
        validate_capacity(capacity)?;

        let fast_interval_ms = self.fast_interval_ms.unwrap_or(DEFAULT_FAST_INTERVAL_MS);
        if !(MIN_FAST_INTERVAL_MS..=MAX_FAST_INTERVAL_MS).contains(&fast_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "fastIntervalMs must be between {MIN_FAST_INTERVAL_MS} and {MAX_FAST_INTERVAL_MS}"
            )));
        }

        let slow_interval_ms = self.slow_interval_ms.unwrap_or(DEFAULT_SLOW_INTERVAL_MS);
        if !(MIN_SLOW_INTERVAL_MS..=MAX_SLOW_INTERVAL_MS).contains(&slow_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "slowIntervalMs must be between {MIN_SLOW_INTERVAL_MS} and {MAX_SLOW_INTERVAL_MS}"
            )));
        }
        if slow_interval_ms < fast_interval_ms {
            return Err(AppError::InvalidArgument(
                "slowIntervalMs must not be shorter than fastIntervalMs".to_string(),
            ));
        }

        Ok(PipelineConfig {
            symbol,
            mode,
            capacity,
            fast_interval_ms,
            slow_interval_ms,
            timeframe: self.timeframe.unwrap_or(DEFAULT_TIMEFRAME),
            include_ticker: self.include_ticker.unwrap_or(DEFAULT_INCLUDE_TICKER),
            reconnect: self.reconnect.normalize()?,
            stream_base_url: normalize_stream_base_url(self.stream_base_url)?,
        })
    }
}

pub fn validate_capacity(capacity: usize) -> Result<(), AppError> {
    if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
        return Err(AppError::InvalidArgument(format!(
            "capacity must be between {MIN_CAPACITY} and {MAX_CAPACITY}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardArgs {
    pub symbols: Vec<String>,
    pub slow_interval_ms: Option<u64>,
    pub seed_from_rest: Option<bool>,
    #[serde(flatten)]
    pub reconnect: ReconnectArgs,
    pub stream_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub symbols: Vec<String>,
    pub slow_interval_ms: u64,
    pub seed_from_rest: bool,
    pub reconnect: ReconnectPolicy,
    pub stream_base_url: String,
}

impl BoardArgs {
    pub fn normalize(self) -> Result<BoardConfig, AppError> {
        let mut symbols = Vec::with_capacity(self.symbols.len());
        for raw in &self.symbols {
            let symbol = normalize_symbol(raw)?;
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        if symbols.is_empty() {
            symbols.push(DEFAULT_SYMBOL.to_string());
        }
        if symbols.len() > MAX_BOARD_SYMBOLS {
            return Err(AppError::InvalidArgument(format!(
                "board supports at most {MAX_BOARD_SYMBOLS} symbols"
            )));
        }

        let slow_interval_ms = self.slow_interval_ms.unwrap_or(DEFAULT_SLOW_INTERVAL_MS);
        if !(MIN_SLOW_INTERVAL_MS..=MAX_SLOW_INTERVAL_MS).contains(&slow_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "slowIntervalMs must be between {MIN_SLOW_INTERVAL_MS} and {MAX_SLOW_INTERVAL_MS}"
            )));
        }

        Ok(BoardConfig {
            symbols,
            slow_interval_ms,
            seed_from_rest: self.seed_from_rest.unwrap_or(true),
            reconnect: self.reconnect.normalize()?,
            stream_base_url: normalize_stream_base_url(self.stream_base_url)?,
        })
    }
}

pub fn now_unix_ms() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
