pub mod commands;
pub mod error;
pub mod market;
pub mod state;

pub use error::AppError;
pub use market::binance::BinanceTransport;
pub use market::board::{BoardSnapshot, MarketBoard};
pub use market::chart::{ChartSink, JsonLinesChartSink};
pub use market::pipeline::LivePipeline;
pub use market::scheduler::DashboardSnapshot;
pub use state::AppState;
