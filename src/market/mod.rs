pub mod aggregator;
pub mod binance;
pub mod board;
pub mod chart;
pub mod feed;
pub mod output;
pub mod pipeline;
pub mod scheduler;
pub mod types;
pub mod window;
