//! Line-oriented host output.
//!
//! Tick tasks serialize a frame and hand the line to a channel. A plain
//! thread owns the real writer, so a slow consumer only grows the queue.

use crate::error::AppError;
use crate::market::scheduler::{DashboardSnapshot, PriceDirection};
use serde::Serialize;
use std::io::Write;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct FrameWriter {
    lines: mpsc::UnboundedSender<String>,
}

impl FrameWriter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (lines, line_rx) = mpsc::unbounded_channel();
        (Self { lines }, line_rx)
    }

    /// Drains frames into `writer` on a dedicated thread. The thread exits
    /// once every `FrameWriter` clone is dropped and the queue is flushed.
    pub fn spawn<W: Write + Send + 'static>(mut writer: W) -> (Self, JoinHandle<()>) {
        let (frames, mut line_rx) = Self::channel();
        let handle = std::thread::spawn(move || {
            while let Some(line) = line_rx.blocking_recv() {
                if let Err(error) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
                    log::warn!("frame writer stopped: {error}");
                    break;
                }
            }
        });
        (frames, handle)
    }

    pub fn send<T: Serialize + ?Sized>(&self, frame: &T) -> Result<(), AppError> {
        let line = simd_json::to_string(frame)?;
        self.lines
            .send(line)
            .map_err(|_| AppError::ChartSink("frame writer is closed".to_string()))
    }
}

/// Non-chart frames the host writes next to chart frames.
#[derive(Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum HostFrame<'a> {
    #[serde(rename_all = "camelCase")]
    Metrics {
        direction: PriceDirection,
        change: f64,
        change_pct: f64,
        snapshot: &'a DashboardSnapshot,
    },
}

impl<'a> HostFrame<'a> {
    pub fn metrics(snapshot: &'a DashboardSnapshot) -> Self {
        Self::Metrics {
            direction: snapshot.direction(),
            change: snapshot.change(),
            change_pct: snapshot.change_pct(),
            snapshot,
        }
    }
}
