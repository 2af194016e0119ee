use crate::error::AppError;
use crate::market::feed::{FeedFrame, FeedStream, FeedTransport};
use crate::market::types::{StreamKind, Ticker24hWire, TickerSummary};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

const BINANCE_REST_BASE_URL: &str = "https://api.binance.com";

pub fn stream_name(symbol: &str, kind: StreamKind) -> String {
    format!("{}{}", symbol.to_ascii_lowercase(), kind.suffix())
}

/// Raw single-stream endpoint, e.g. `<base>/ws/btcusdt@trade`.
pub fn raw_stream_endpoint(base_url: &str, symbol: &str, kind: StreamKind) -> String {
    format!("{base_url}/ws/{}", stream_name(symbol, kind))
}

/// Combined endpoint; every frame arrives wrapped as `{stream, data}`.
pub fn combined_stream_endpoint(base_url: &str, streams: &[String]) -> String {
    format!("{base_url}/stream?streams={}", streams.join("/"))
}

/// Endpoint for one live view: a raw trade stream, or trade plus ticker
/// multiplexed over one connection.
pub fn live_view_endpoint(base_url: &str, symbol: &str, include_ticker: bool) -> String {
    if include_ticker {
        let streams = [
            stream_name(symbol, StreamKind::Trade),
            stream_name(symbol, StreamKind::Ticker),
        ];
        combined_stream_endpoint(base_url, &streams)
    } else {
        raw_stream_endpoint(base_url, symbol, StreamKind::Trade)
    }
}

pub fn board_endpoint(base_url: &str, symbols: &[String]) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|symbol| stream_name(symbol, StreamKind::Ticker))
        .collect();
    combined_stream_endpoint(base_url, &streams)
}

fn ticker_24h_endpoint(symbols: &[String]) -> String {
    let quoted: Vec<String> = symbols
        .iter()
        .map(|symbol| format!("%22{}%22", symbol.to_ascii_uppercase()))
        .collect();
    format!("{BINANCE_REST_BASE_URL}/api/v3/ticker/24hr")
        + &format!("?symbols=%5B{}%5D", quoted.join(","))
}

impl From<Message> for FeedFrame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Self::Text(text),
            Message::Binary(bytes) => Self::Binary(bytes),
            Message::Close(_) => Self::Close,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Self::Control,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BinanceTransport;

#[async_trait]
impl FeedTransport for BinanceTransport {
    async fn connect(&self, url: &str) -> Result<FeedStream, AppError> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(16 << 20),
            max_frame_size: Some(4 << 20),
            ..Default::default()
        };

        let (stream, _) = connect_async_with_config(url, Some(ws_config), true).await?;
        Ok(stream
            .map(|frame| frame.map(FeedFrame::from).map_err(AppError::from))
            .boxed())
    }
}

pub async fn fetch_24h_tickers(
    client: &Client,
    symbols: &[String],
) -> Result<Vec<TickerSummary>, AppError> {
    if symbols.is_empty() {
        return Ok(Vec::new());
    }

    let endpoint = ticker_24h_endpoint(symbols);
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let mut payload = response.bytes().await?.to_vec();
    decode_24h_tickers(&mut payload)
}

pub fn decode_24h_tickers(payload: &mut [u8]) -> Result<Vec<TickerSummary>, AppError> {
    let entries: Vec<Ticker24hWire> = simd_json::serde::from_slice(payload)?;
    let mut tickers = Vec::with_capacity(entries.len());
    for entry in entries {
        tickers.push(entry.try_into()?);
    }
    Ok(tickers)
}
