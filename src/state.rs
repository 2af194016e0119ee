use crate::error::AppError;
use crate::market::chart::ChartSink;
use crate::market::feed::FeedTransport;
use crate::market::pipeline::LivePipeline;
use crate::market::types::PipelineConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

pub type LivePipelineHandle = LivePipeline<Box<dyn ChartSink>>;

/// Builds the renderer for a newly opened view.
pub type ChartSinkFactory =
    Box<dyn Fn(&PipelineConfig) -> Result<Box<dyn ChartSink>, AppError> + Send + Sync>;

pub struct AppState {
    pub started_at: Instant,
    pub transport: Arc<dyn FeedTransport>,
    pub sink_factory: ChartSinkFactory,
    pub live_view: Mutex<Option<LivePipelineHandle>>,
}

impl AppState {
    pub fn new(transport: Arc<dyn FeedTransport>, sink_factory: ChartSinkFactory) -> Self {
        Self {
            started_at: Instant::now(),
            transport,
            sink_factory,
            live_view: Mutex::new(None),
        }
    }
}
