//! One live view: the feed connection, the fast and slow timers, and all the
//! mutable state they share, started and stopped as a single unit.

use crate::error::AppError;
use crate::market::aggregator::SharedMarketState;
use crate::market::binance::live_view_endpoint;
use crate::market::chart::{ChartAdapter, ChartConfig, ChartCounters, ChartSink};
use crate::market::feed::{FeedConnection, FeedStatus, FeedTransport};
use crate::market::scheduler::{spawn_fast_ticker, spawn_slow_ticker, DashboardSnapshot};
use crate::market::types::{validate_capacity, PipelineConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct PipelineRun {
    cancel_token: CancellationToken,
    feed: FeedConnection,
    fast_handle: JoinHandle<()>,
    slow_handle: JoinHandle<()>,
}

pub struct LivePipeline<S: ChartSink> {
    config: PipelineConfig,
    transport: Arc<dyn FeedTransport>,
    shared: Arc<SharedMarketState>,
    chart: Arc<Mutex<ChartAdapter<S>>>,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
    run: Option<PipelineRun>,
}

impl<S: ChartSink> LivePipeline<S> {
    /// Mounts the chart once. The mount survives stop/start cycles; only the
    /// data behind it is reset.
    pub fn new(
        config: PipelineConfig,
        transport: Arc<dyn FeedTransport>,
        sink: S,
    ) -> Result<Self, AppError> {
        let chart = ChartAdapter::mount(sink, ChartConfig::for_pipeline(&config))?;
        let shared = SharedMarketState::new(config.mode, config.timeframe, config.capacity);
        let (snapshot_tx, _) = watch::channel(DashboardSnapshot::disconnected(
            &config.symbol,
            config.mode,
            config.capacity,
        ));

        Ok(Self {
            config,
            transport,
            shared: Arc::new(shared),
            chart: Arc::new(Mutex::new(chart)),
            snapshot_tx,
            run: None,
        })
    }

    /// Spawns the feed and both timers. No-op when already running. Must be
    /// called from inside a tokio runtime.
    pub fn start(&mut self) {
        if self.run.is_some() {
            return;
        }

        self.shared.reset();
        let cancel_token = CancellationToken::new();
        let symbol = self.config.symbol.clone();
        let url = live_view_endpoint(
            &self.config.stream_base_url,
            &symbol,
            self.config.include_ticker,
        );
        log::info!("starting live pipeline for {symbol} ({url})");

        let ingest_state = Arc::clone(&self.shared);
        let state_symbol = symbol.clone();
        let feed = FeedConnection::connect(
            Arc::clone(&self.transport),
            url,
            self.config.reconnect.clone(),
            cancel_token.child_token(),
            move |event| ingest_state.ingest(event),
            move |state| log::info!("{state_symbol} feed {state:?}"),
        );

        let fast_handle = spawn_fast_ticker(
            Duration::from_millis(self.config.fast_interval_ms),
            Arc::clone(&self.shared),
            self.config.mode,
            Arc::clone(&self.chart),
            cancel_token.clone(),
        );
        let slow_handle = spawn_slow_ticker(
            Duration::from_millis(self.config.slow_interval_ms),
            Arc::clone(&self.shared),
            feed.status(),
            symbol,
            self.config.mode,
            self.snapshot_tx.clone(),
            cancel_token.clone(),
        );

        self.run = Some(PipelineRun {
            cancel_token,
            feed,
            fast_handle,
            slow_handle,
        });
    }

    /// Tears everything down: cancel first so no reconnect can be scheduled,
    /// then close the feed, join both timers and discard accumulated state.
    /// Returns `false` when nothing was running.
    pub async fn stop(&mut self) -> bool {
        let Some(mut run) = self.run.take() else {
            return false;
        };

        run.cancel_token.cancel();
        let exit = run.feed.close().await;
        let _ = run.fast_handle.await;
        let _ = run.slow_handle.await;

        self.shared.reset();
        self.snapshot_tx.send_replace(DashboardSnapshot::disconnected(
            &self.config.symbol,
            self.config.mode,
            self.config.capacity,
        ));
        log::info!(
            "live pipeline for {} stopped ({exit:?})",
            self.config.symbol
        );
        true
    }

    /// Stop plus start. Gives the feed a fresh reconnect budget.
    pub async fn restart(&mut self) {
        self.stop().await;
        self.start();
    }

    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), AppError> {
        validate_capacity(capacity)?;
        self.shared.set_capacity(capacity);
        self.config.capacity = capacity;
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn feed_status(&self) -> Option<Arc<FeedStatus>> {
        self.run.as_ref().map(|run| run.feed.status())
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn chart_id(&self) -> String {
        self.chart.lock().handle().chart_id().to_string()
    }

    pub fn chart_counters(&self) -> ChartCounters {
        self.chart.lock().counters()
    }
}

impl<S: ChartSink> Drop for LivePipeline<S> {
    fn drop(&mut self) {
        if let Some(run) = self.run.as_ref() {
            run.cancel_token.cancel();
        }
    }
}
