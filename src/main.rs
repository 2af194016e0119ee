use clap::{Args, Parser, Subcommand};
use cryptoflow_lib::commands::live_view::{
    close_live_view, live_view_status, open_live_view, resize_live_view, restart_live_view,
    subscribe_live_view, ViewCommand,
};
use cryptoflow_lib::market::output::{FrameWriter, HostFrame};
use cryptoflow_lib::market::types::{
    BoardArgs, ChartMode, MarketTimeframe, PipelineArgs, PipelineConfig, ReconnectArgs,
    DEFAULT_SYMBOL,
};
use cryptoflow_lib::{
    AppError, AppState, BinanceTransport, ChartSink, JsonLinesChartSink, MarketBoard,
};
use reqwest::Client;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(about, version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream one symbol and write chart and metrics frames to stdout as JSON lines.
    Live(LiveArgs),
    /// Follow 24h tickers for several symbols.
    Board(BoardCliArgs),
}

#[derive(Args, Debug, Clone)]
struct ReconnectCliArgs {
    #[arg(long)]
    reconnect_base_delay_ms: Option<u64>,
    #[arg(long)]
    reconnect_growth_factor: Option<f64>,
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,
    #[arg(long)]
    stream_base_url: Option<String>,
}

impl ReconnectCliArgs {
    fn reconnect_args(&self) -> ReconnectArgs {
        ReconnectArgs {
            reconnect_base_delay_ms: self.reconnect_base_delay_ms,
            reconnect_growth_factor: self.reconnect_growth_factor,
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct LiveArgs {
    #[arg(long, default_value = DEFAULT_SYMBOL)]
    symbol: String,
    #[arg(long, value_parser = parse_mode)]
    mode: Option<ChartMode>,
    #[arg(long)]
    capacity: Option<usize>,
    #[arg(long)]
    fast_interval_ms: Option<u64>,
    #[arg(long)]
    slow_interval_ms: Option<u64>,
    #[arg(long, value_parser = parse_timeframe)]
    timeframe: Option<MarketTimeframe>,
    #[arg(long)]
    include_ticker: bool,
    #[command(flatten)]
    connection: ReconnectCliArgs,
}

impl LiveArgs {
    fn pipeline_args(&self) -> PipelineArgs {
        PipelineArgs {
            symbol: Some(self.symbol.clone()),
            mode: self.mode,
            capacity: self.capacity,
            fast_interval_ms: self.fast_interval_ms,
            slow_interval_ms: self.slow_interval_ms,
            timeframe: self.timeframe,
            include_ticker: Some(self.include_ticker),
            reconnect: self.connection.reconnect_args(),
            stream_base_url: self.connection.stream_base_url.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
struct BoardCliArgs {
    /// Symbols to follow, e.g. BTCUSDT ETHUSDT.
    symbols: Vec<String>,
    #[arg(long)]
    slow_interval_ms: Option<u64>,
    /// Skip the initial REST snapshot.
    #[arg(long)]
    no_seed: bool,
    /// Only print rows whose symbol contains this text.
    #[arg(long)]
    filter: Option<String>,
    #[command(flatten)]
    connection: ReconnectCliArgs,
}

fn parse_mode(value: &str) -> Result<ChartMode, String> {
    ChartMode::parse_str(value).map_err(|error| error.to_string())
}

fn parse_timeframe(value: &str) -> Result<MarketTimeframe, String> {
    MarketTimeframe::parse_str(value).map_err(|error| error.to_string())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Live(args) => run_live(args).await,
        Commands::Board(args) => run_board(args).await,
    };

    if let Err(error) = result {
        log::error!("{error}");
        std::process::exit(1);
    }
}

async fn run_live(args: LiveArgs) -> Result<(), AppError> {
    let (frames, writer_thread) = FrameWriter::spawn(std::io::stdout());
    let sink_frames = frames.clone();
    let state = AppState::new(
        Arc::new(BinanceTransport),
        Box::new(move |_config: &PipelineConfig| {
            Ok(Box::new(JsonLinesChartSink::new(sink_frames.clone())) as Box<dyn ChartSink>)
        }),
    );

    let mut base_args = args.pipeline_args();
    let session = open_live_view(&state, Some(base_args.clone())).await?;
    log::info!(
        "live view {} mounted ({:?}, capacity {})",
        session.chart_id,
        session.mode,
        session.capacity
    );

    let mut snapshots = subscribe_live_view(&state)
        .await
        .ok_or_else(|| AppError::InvalidArgument("live view closed while opening".to_string()))?;
    let mut snapshots_open = true;
    let mut lines = spawn_stdin_reader();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed(), if snapshots_open => {
                if changed.is_err() {
                    snapshots_open = false;
                    continue;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Err(error) = frames.send(&HostFrame::metrics(&snapshot)) {
                    log::warn!("metrics frame dropped: {error}");
                }
            }
            line = lines.recv(), if stdin_open => {
                let Some(line) = line else {
                    stdin_open = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let command = match ViewCommand::parse(&line) {
                    Ok(command) => command,
                    Err(error) => {
                        log::warn!("{error}");
                        continue;
                    }
                };

                let outcome = match command {
                    ViewCommand::Quit => break,
                    ViewCommand::Symbol(symbol) => {
                        let mut next_args = base_args.clone();
                        next_args.symbol = Some(symbol);
                        match open_live_view(&state, Some(next_args.clone())).await {
                            Ok(session) => {
                                base_args = next_args;
                                if let Some(receiver) = subscribe_live_view(&state).await {
                                    snapshots = receiver;
                                    snapshots_open = true;
                                }
                                log::info!("switched to {}", session.symbol);
                                Ok(())
                            }
                            Err(error) => Err(error),
                        }
                    }
                    ViewCommand::Capacity(capacity) => {
                        resize_live_view(&state, capacity).await.map(|()| {
                            base_args.capacity = Some(capacity);
                            log::info!("capacity set to {capacity}");
                        })
                    }
                    ViewCommand::Restart => restart_live_view(&state).await.map(|_| {
                        log::info!("live view restarted");
                    }),
                    ViewCommand::Status => live_view_status(&state).await.and_then(|status| {
                        let rendered = simd_json::to_string(&status)?;
                        log::info!("status {rendered}");
                        Ok(())
                    }),
                };

                if let Err(error) = outcome {
                    log::warn!("command failed: {error}");
                }
            }
        }
    }

    close_live_view(&state).await?;
    drop(state);
    drop(frames);
    flush_frames(writer_thread).await;
    Ok(())
}

/// Waits for the writer thread to drain every queued frame.
async fn flush_frames(writer_thread: std::thread::JoinHandle<()>) {
    match tokio::task::spawn_blocking(move || writer_thread.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => log::warn!("frame writer thread panicked"),
        Err(error) => log::warn!("frame writer join failed: {error}"),
    }
}

/// Blocking stdin lives on its own thread so it never holds up runtime
/// shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });
    line_rx
}

async fn run_board(args: BoardCliArgs) -> Result<(), AppError> {
    let config = BoardArgs {
        symbols: args.symbols.clone(),
        slow_interval_ms: args.slow_interval_ms,
        seed_from_rest: Some(!args.no_seed),
        reconnect: args.connection.reconnect_args(),
        stream_base_url: args.connection.stream_base_url.clone(),
    }
    .normalize()?;

    let (frames, writer_thread) = FrameWriter::spawn(std::io::stdout());
    let mut board = MarketBoard::new(config, Arc::new(BinanceTransport), Client::new());
    let mut snapshots = board.subscribe();
    board.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let mut snapshot = snapshots.borrow_and_update().clone();
                if let Some(query) = args.filter.as_deref() {
                    snapshot.rows = board.rows_matching(query);
                }
                frames.send(&snapshot)?;
            }
        }
    }

    board.stop().await;
    drop(frames);
    flush_frames(writer_thread).await;
    Ok(())
}
