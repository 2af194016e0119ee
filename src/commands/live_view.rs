use crate::error::AppError;
use crate::market::chart::ChartCounters;
use crate::market::pipeline::LivePipeline;
use crate::market::scheduler::DashboardSnapshot;
use crate::market::types::{ChartMode, MarketTimeframe, PipelineArgs, PipelineConfig};
use crate::state::AppState;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveViewSession {
    pub symbol: String,
    pub chart_id: String,
    pub mode: ChartMode,
    pub timeframe: MarketTimeframe,
    pub capacity: usize,
    pub fast_interval_ms: u64,
    pub slow_interval_ms: u64,
    pub include_ticker: bool,
}

impl LiveViewSession {
    fn from_config(config: &PipelineConfig, chart_id: String) -> Self {
        Self {
            symbol: config.symbol.clone(),
            chart_id,
            mode: config.mode,
            timeframe: config.timeframe,
            capacity: config.capacity,
            fast_interval_ms: config.fast_interval_ms,
            slow_interval_ms: config.slow_interval_ms,
            include_ticker: config.include_ticker,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveViewStopResult {
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveViewStatus {
    pub running: bool,
    pub uptime_ms: u128,
    pub connect_count: u64,
    pub dropped_frames: u64,
    pub chart: ChartCounters,
    pub snapshot: Option<DashboardSnapshot>,
}

/// Replaces whatever view is mounted. The replacement is built first, so a
/// failure leaves the current view running. The old pipeline is fully
/// stopped before the new one connects.
pub async fn open_live_view(
    state: &AppState,
    args: Option<PipelineArgs>,
) -> Result<LiveViewSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;

    let mut slot = state.live_view.lock().await;
    let sink = (state.sink_factory)(&config)?;
    let mut pipeline = LivePipeline::new(config, state.transport.clone(), sink)?;

    if let Some(mut existing) = slot.take() {
        existing.stop().await;
    }
    pipeline.start();

    let session = LiveViewSession::from_config(pipeline.config(), pipeline.chart_id());
    *slot = Some(pipeline);
    Ok(session)
}

pub async fn close_live_view(state: &AppState) -> Result<LiveViewStopResult, AppError> {
    let existing = state.live_view.lock().await.take();
    let stopped = match existing {
        Some(mut pipeline) => pipeline.stop().await,
        None => false,
    };
    Ok(LiveViewStopResult { stopped })
}

pub async fn restart_live_view(state: &AppState) -> Result<LiveViewStopResult, AppError> {
    let mut slot = state.live_view.lock().await;
    let pipeline = slot
        .as_mut()
        .ok_or_else(|| AppError::InvalidArgument("no live view is open".to_string()))?;
    let stopped = pipeline.stop().await;
    pipeline.start();
    Ok(LiveViewStopResult { stopped })
}

pub async fn resize_live_view(state: &AppState, capacity: usize) -> Result<(), AppError> {
    let mut slot = state.live_view.lock().await;
    let pipeline = slot
        .as_mut()
        .ok_or_else(|| AppError::InvalidArgument("no live view is open".to_string()))?;
    pipeline.set_capacity(capacity)
}

pub async fn live_view_status(state: &AppState) -> Result<LiveViewStatus, AppError> {
    let slot = state.live_view.lock().await;
    let uptime_ms = state.started_at.elapsed().as_millis();

    let Some(pipeline) = slot.as_ref() else {
        return Ok(LiveViewStatus {
            running: false,
            uptime_ms,
            connect_count: 0,
            dropped_frames: 0,
            chart: ChartCounters::default(),
            snapshot: None,
        });
    };

    let feed_status = pipeline.feed_status();
    Ok(LiveViewStatus {
        running: pipeline.is_running(),
        uptime_ms,
        connect_count: feed_status.as_ref().map_or(0, |status| status.connect_count()),
        dropped_frames: feed_status.as_ref().map_or(0, |status| status.dropped_frames()),
        chart: pipeline.chart_counters(),
        snapshot: Some(pipeline.snapshot()),
    })
}

pub async fn subscribe_live_view(state: &AppState) -> Option<watch::Receiver<DashboardSnapshot>> {
    state.live_view.lock().await.as_ref().map(LivePipeline::subscribe)
}

/// One line of operator input for a running view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    Symbol(String),
    Capacity(usize),
    Restart,
    Status,
    Quit,
}

impl ViewCommand {
    pub fn parse(line: &str) -> Result<Self, AppError> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| AppError::InvalidArgument("empty command".to_string()))?;
        let argument = parts.next();
        if parts.next().is_some() {
            return Err(AppError::InvalidArgument(format!(
                "too many arguments for '{verb}'"
            )));
        }

        match (verb.to_ascii_lowercase().as_str(), argument) {
            ("symbol", Some(symbol)) => Ok(Self::Symbol(symbol.to_string())),
            ("capacity", Some(raw)) => raw.parse().map(Self::Capacity).map_err(|_| {
                AppError::InvalidArgument(format!("capacity '{raw}' is not a number"))
            }),
            ("restart", None) => Ok(Self::Restart),
            ("status", None) => Ok(Self::Status),
            ("quit" | "exit", None) => Ok(Self::Quit),
            _ => Err(AppError::InvalidArgument(format!(
                "unsupported command '{}'",
                line.trim()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::chart::testing::RecordingSink;
    use crate::market::chart::ChartSink;
    use crate::market::feed::testing::{trade_frame, ScriptedSession, ScriptedTransport};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn app_state(transport: Arc<ScriptedTransport>, sink: RecordingSink) -> AppState {
        AppState::new(
            transport,
            Box::new(move |_config: &PipelineConfig| {
                Ok(Box::new(sink.clone()) as Box<dyn ChartSink>)
            }),
        )
    }

    fn symbol_args(symbol: &str) -> Option<PipelineArgs> {
        Some(PipelineArgs {
            symbol: Some(symbol.to_string()),
            ..PipelineArgs::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn switching_symbol_tears_down_previous_view() {
        let transport = ScriptedTransport::new(vec![
            ScriptedSession::Hold(vec![trade_frame(1, 97_000.0, 0.1)]),
            ScriptedSession::Hold(vec![trade_frame(1, 3_400.0, 1.0)]),
        ]);
        let state = app_state(transport.clone(), RecordingSink::default());

        let first = open_live_view(&state, symbol_args("btcusdt"))
            .await
            .expect("first view opens");
        assert_eq!(first.chart_id, "live-btcusdt-chart");
        tokio::time::sleep(Duration::from_millis(400)).await;

        let second = open_live_view(&state, symbol_args("ETHUSDT"))
            .await
            .expect("second view opens");
        assert_eq!(second.chart_id, "live-ethusdt-chart");
        tokio::time::sleep(Duration::from_millis(400)).await;

        let status = live_view_status(&state).await.expect("status");
        let snapshot = status.snapshot.expect("open view has a snapshot");
        assert!(status.running);
        assert_eq!(snapshot.symbol, "ETHUSDT");
        assert_eq!(snapshot.latest_price, Some(3_400.0));
        assert_eq!(snapshot.trade_count, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connects(), 2);
        close_live_view(&state).await.expect("close");
    }

    #[tokio::test(start_paused = true)]
    async fn close_reports_whether_anything_was_running() {
        let transport = ScriptedTransport::new(vec![ScriptedSession::Hold(Vec::new())]);
        let state = app_state(transport.clone(), RecordingSink::default());

        assert!(!close_live_view(&state).await.expect("close").stopped);
        open_live_view(&state, None).await.expect("view opens");
        assert!(close_live_view(&state).await.expect("close").stopped);
        assert!(!close_live_view(&state).await.expect("close").stopped);
        assert!(!live_view_status(&state).await.expect("status").running);
        assert!(restart_live_view(&state).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_invalid_arguments_without_touching_current_view() {
        let transport = ScriptedTransport::new(vec![ScriptedSession::Hold(Vec::new())]);
        let state = app_state(transport.clone(), RecordingSink::default());
        open_live_view(&state, None).await.expect("view opens");

        let invalid = PipelineArgs {
            capacity: Some(1),
            ..PipelineArgs::default()
        };
        assert!(open_live_view(&state, Some(invalid)).await.is_err());
        assert!(resize_live_view(&state, 100_000).await.is_err());
        assert!(live_view_status(&state).await.expect("status").running);
        resize_live_view(&state, 50).await.expect("resize within range");
        close_live_view(&state).await.expect("close");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_switch_keeps_current_view_running() {
        let transport = ScriptedTransport::new(vec![
            ScriptedSession::Hold(vec![trade_frame(1, 97_000.0, 0.1)]),
            ScriptedSession::Hold(Vec::new()),
        ]);
        let sink = RecordingSink::default();
        let sink_available = Arc::new(AtomicBool::new(true));
        let factory_gate = Arc::clone(&sink_available);
        let state = AppState::new(
            transport.clone(),
            Box::new(move |config: &PipelineConfig| {
                if !factory_gate.load(Ordering::SeqCst) {
                    return Err(AppError::ChartSink(format!(
                        "no renderer for {}",
                        config.symbol
                    )));
                }
                Ok(Box::new(sink.clone()) as Box<dyn ChartSink>)
            }),
        );

        open_live_view(&state, symbol_args("BTCUSDT"))
            .await
            .expect("first view opens");
        tokio::time::sleep(Duration::from_millis(400)).await;

        sink_available.store(false, Ordering::SeqCst);
        assert!(open_live_view(&state, symbol_args("ETHUSDT")).await.is_err());
        tokio::time::sleep(Duration::from_millis(400)).await;

        let status = live_view_status(&state).await.expect("status");
        assert!(status.running);
        let snapshot = status.snapshot.expect("old view is still mounted");
        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.latest_price, Some(97_000.0));
        assert!(subscribe_live_view(&state).await.is_some());
        assert_eq!(transport.connects(), 1);

        assert!(close_live_view(&state).await.expect("close").stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_follows_the_mounted_view() {
        let transport = ScriptedTransport::new(vec![ScriptedSession::Hold(vec![
            trade_frame(1, 198.0, 2.0),
        ])]);
        let state = app_state(transport, RecordingSink::default());
        assert!(subscribe_live_view(&state).await.is_none());

        open_live_view(&state, symbol_args("SOLUSDT"))
            .await
            .expect("view opens");
        let mut snapshots = subscribe_live_view(&state)
            .await
            .expect("open view can be observed");
        snapshots.changed().await.expect("slow tick publishes");
        tokio::time::sleep(Duration::from_millis(400)).await;
        snapshots.changed().await.expect("slow tick publishes");
        let snapshot = snapshots.borrow_and_update().clone();
        assert_eq!(snapshot.symbol, "SOLUSDT");
        assert_eq!(snapshot.trade_count, 1);

        close_live_view(&state).await.expect("close");
    }

    #[test]
    fn parses_operator_commands() {
        assert_eq!(
            ViewCommand::parse("symbol solusdt").expect("symbol"),
            ViewCommand::Symbol("solusdt".to_string())
        );
        assert_eq!(
            ViewCommand::parse("  capacity 600 ").expect("capacity"),
            ViewCommand::Capacity(600)
        );
        assert_eq!(ViewCommand::parse("RESTART").expect("restart"), ViewCommand::Restart);
        assert_eq!(ViewCommand::parse("status").expect("status"), ViewCommand::Status);
        assert_eq!(ViewCommand::parse("exit").expect("quit"), ViewCommand::Quit);
        assert!(ViewCommand::parse("").is_err());
        assert!(ViewCommand::parse("capacity lots").is_err());
        assert!(ViewCommand::parse("symbol").is_err());
        assert!(ViewCommand::parse("restart now").is_err());
    }
}
