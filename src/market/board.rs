use crate::market::binance::{board_endpoint, fetch_24h_tickers};
use crate::market::feed::{FeedConnection, FeedStatus, FeedTransport};
use crate::market::types::{now_unix_ms, BoardConfig, ConnectionState, FeedEvent, TickerSummary};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Latest 24h summary per subscribed symbol.
#[derive(Debug, Clone, Default)]
pub struct TickerBoard {
    symbols: Vec<String>,
    entries: HashMap<String, TickerSummary>,
}

impl TickerBoard {
    pub fn new(symbols: &[String]) -> Self {
        Self {
            symbols: symbols.to_vec(),
            entries: HashMap::with_capacity(symbols.len()),
        }
    }

    /// Keeps the newest summary per symbol. Unknown symbols and summaries
    /// older than the stored one are ignored.
    pub fn apply(&mut self, summary: TickerSummary) -> bool {
        if !self.symbols.iter().any(|symbol| symbol == &summary.symbol) {
            return false;
        }
        if let Some(existing) = self.entries.get(&summary.symbol) {
            if summary.event_time < existing.event_time {
                return false;
            }
        }
        self.entries.insert(summary.symbol.clone(), summary);
        true
    }

    pub fn seed<I>(&mut self, summaries: I) -> usize
    where
        I: IntoIterator<Item = TickerSummary>,
    {
        let mut applied = 0;
        for summary in summaries {
            if self.apply(summary) {
                applied += 1;
            }
        }
        applied
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Rows by quote volume, highest first; ties fall back to symbol order.
    pub fn rows(&self) -> Vec<TickerSummary> {
        let mut rows: Vec<TickerSummary> = self.entries.values().cloned().collect();
        rows.sort_by(|lhs, rhs| {
            rhs.quote_volume
                .total_cmp(&lhs.quote_volume)
                .then_with(|| lhs.symbol.cmp(&rhs.symbol))
        });
        rows
    }

    /// Case-insensitive substring match on the symbol.
    pub fn rows_matching(&self, query: &str) -> Vec<TickerSummary> {
        let needle = query.trim().to_ascii_uppercase();
        self.rows()
            .into_iter()
            .filter(|row| row.symbol.contains(&needle))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub rows: Vec<TickerSummary>,
    pub connection: ConnectionState,
    pub offline: bool,
    pub updated_at: i64,
}

impl BoardSnapshot {
    pub fn disconnected() -> Self {
        Self {
            rows: Vec::new(),
            connection: ConnectionState::Disconnected,
            offline: false,
            updated_at: now_unix_ms(),
        }
    }
}

struct BoardRun {
    cancel_token: CancellationToken,
    feed: FeedConnection,
    publisher_handle: JoinHandle<()>,
    seed_handle: Option<JoinHandle<()>>,
}

/// Several symbols over one combined `@ticker` connection, published at the
/// slow cadence.
pub struct MarketBoard {
    config: BoardConfig,
    transport: Arc<dyn FeedTransport>,
    http_client: Client,
    board: Arc<Mutex<TickerBoard>>,
    snapshot_tx: watch::Sender<BoardSnapshot>,
    run: Option<BoardRun>,
}

impl MarketBoard {
    pub fn new(config: BoardConfig, transport: Arc<dyn FeedTransport>, http_client: Client) -> Self {
        let board = TickerBoard::new(&config.symbols);
        let (snapshot_tx, _) = watch::channel(BoardSnapshot::disconnected());
        Self {
            config,
            transport,
            http_client,
            board: Arc::new(Mutex::new(board)),
            snapshot_tx,
            run: None,
        }
    }

    pub fn start(&mut self) {
        if self.run.is_some() {
            return;
        }

        self.board.lock().clear();
        let cancel_token = CancellationToken::new();
        let url = board_endpoint(&self.config.stream_base_url, &self.config.symbols);
        log::info!(
            "starting market board for {} symbols ({url})",
            self.config.symbols.len()
        );

        let seed_handle = self.config.seed_from_rest.then(|| {
            let seed_cancel = cancel_token.clone();
            let seed_board = Arc::clone(&self.board);
            let client = self.http_client.clone();
            let symbols = self.config.symbols.clone();
            tokio::spawn(async move {
                let fetched = tokio::select! {
                    _ = seed_cancel.cancelled() => return,
                    fetched = fetch_24h_tickers(&client, &symbols) => fetched,
                };
                match fetched {
                    Ok(tickers) => {
                        let seeded = seed_board.lock().seed(tickers);
                        log::info!("market board seeded {seeded} symbols from REST");
                    }
                    Err(error) => log::warn!("market board REST seed failed: {error}"),
                }
            })
        });

        let feed_board = Arc::clone(&self.board);
        let feed = FeedConnection::connect(
            Arc::clone(&self.transport),
            url,
            self.config.reconnect.clone(),
            cancel_token.child_token(),
            move |event| match event {
                FeedEvent::Ticker(summary) => {
                    feed_board.lock().apply(summary);
                }
                FeedEvent::Trade(_) => {}
            },
            |state| log::info!("market board feed {state:?}"),
        );

        let publisher_handle = spawn_board_publisher(
            Duration::from_millis(self.config.slow_interval_ms),
            Arc::clone(&self.board),
            feed.status(),
            self.snapshot_tx.clone(),
            cancel_token.clone(),
        );

        self.run = Some(BoardRun {
            cancel_token,
            feed,
            publisher_handle,
            seed_handle,
        });
    }

    pub async fn stop(&mut self) -> bool {
        let Some(mut run) = self.run.take() else {
            return false;
        };

        run.cancel_token.cancel();
        run.feed.close().await;
        let _ = run.publisher_handle.await;
        if let Some(handle) = run.seed_handle {
            let _ = handle.await;
        }

        self.board.lock().clear();
        self.snapshot_tx.send_replace(BoardSnapshot::disconnected());
        log::info!("market board stopped");
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<BoardSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn rows_matching(&self, query: &str) -> Vec<TickerSummary> {
        self.board.lock().rows_matching(query)
    }
}

impl Drop for MarketBoard {
    fn drop(&mut self) {
        if let Some(run) = self.run.as_ref() {
            run.cancel_token.cancel();
        }
    }
}

fn spawn_board_publisher(
    period: Duration,
    board: Arc<Mutex<TickerBoard>>,
    status: Arc<FeedStatus>,
    publisher: watch::Sender<BoardSnapshot>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let rows = board.lock().rows();
                    publisher.send_replace(BoardSnapshot {
                        rows,
                        connection: status.state(),
                        offline: status.is_exhausted(),
                        updated_at: now_unix_ms(),
                    });
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::feed::testing::{trade_frame, ScriptedSession, ScriptedTransport};
    use crate::market::feed::FeedFrame;
    use crate::market::types::BoardArgs;

    fn summary(symbol: &str, last_price: f64, quote_volume: f64, event_time: i64) -> TickerSummary {
        TickerSummary {
            symbol: symbol.to_string(),
            last_price,
            price_change_percent: 0.0,
            high: last_price,
            low: last_price,
            volume: 1.0,
            quote_volume,
            trade_count: 1,
            event_time,
        }
    }

    fn ticker_frame(symbol: &str, last_price: f64, quote_volume: f64, event_time: i64) -> FeedFrame {
        FeedFrame::Text(format!(
            r#"{{"stream":"{}@ticker","data":{{"e":"24hrTicker","E":{event_time},"s":"{symbol}","P":"1.5","c":"{last_price}","h":"{last_price}","l":"{last_price}","v":"10","q":"{quote_volume}","n":7}}}}"#,
            symbol.to_ascii_lowercase()
        ))
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|symbol| symbol.to_string()).collect()
    }

    #[test]
    fn ignores_unsubscribed_and_stale_summaries() {
        let mut board = TickerBoard::new(&symbols(&["BTCUSDT", "ETHUSDT"]));

        assert!(board.apply(summary("BTCUSDT", 97_000.0, 10.0, 20)));
        assert!(!board.apply(summary("DOGEUSDT", 0.3, 10.0, 20)));
        assert!(!board.apply(summary("BTCUSDT", 90_000.0, 10.0, 10)));
        assert_eq!(board.rows().len(), 1);
        assert_eq!(board.rows()[0].last_price, 97_000.0);
    }

    #[test]
    fn rows_sort_by_quote_volume_then_symbol() {
        let mut board = TickerBoard::new(&symbols(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]));
        board.seed([
            summary("SOLUSDT", 198.0, 5.0, 1),
            summary("ETHUSDT", 3_400.0, 50.0, 1),
            summary("BTCUSDT", 97_000.0, 50.0, 1),
        ]);

        let order: Vec<String> = board.rows().into_iter().map(|row| row.symbol).collect();
        assert_eq!(order, symbols(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]));
        let matching: Vec<String> = board
            .rows_matching("eth")
            .into_iter()
            .map(|row| row.symbol)
            .collect();
        assert_eq!(matching, symbols(&["ETHUSDT"]));
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_rows_from_combined_ticker_stream() {
        let transport = ScriptedTransport::new(vec![ScriptedSession::Hold(vec![
            ticker_frame("BTCUSDT", 97_245.32, 1_200.0, 1),
            trade_frame(2, 97_250.0, 0.1),
            ticker_frame("ETHUSDT", 3_412.18, 890.0, 2),
            ticker_frame("BTCUSDT", 97_300.0, 1_250.0, 3),
        ])]);
        let config = BoardArgs {
            symbols: symbols(&["btcusdt", "ethusdt"]),
            seed_from_rest: Some(false),
            ..BoardArgs::default()
        }
        .normalize()
        .expect("valid board config");

        let mut board = MarketBoard::new(config, transport.clone(), Client::new());
        let mut snapshots = board.subscribe();
        board.start();
        tokio::time::sleep(Duration::from_millis(350)).await;

        snapshots.changed().await.expect("board publishes");
        let snapshot = snapshots.borrow_and_update().clone();
        assert_eq!(snapshot.connection, ConnectionState::Connected);
        assert_eq!(snapshot.rows.len(), 2);
        assert_eq!(snapshot.rows[0].symbol, "BTCUSDT");
        assert_eq!(snapshot.rows[0].last_price, 97_300.0);
        assert_eq!(snapshot.rows[1].trade_count, 7);

        assert!(board.stop().await);
        assert!(!board.stop().await);
        assert!(board.snapshot().rows.is_empty());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connects(), 1);
    }
}
