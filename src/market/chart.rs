//! Chart adapter.
//!
//! A chart is mounted once with a stable identity and an empty series. Every
//! later update goes through `update_series` on that identity. Updates that
//! arrive before the renderer confirms the mount are dropped; the next tick
//! carries the whole window anyway.

use crate::error::AppError;
use crate::market::output::FrameWriter;
use crate::market::types::{ChartMode, PipelineConfig, SeriesData};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    pub chart_id: String,
    pub series_name: String,
    pub mode: ChartMode,
    pub color: String,
    pub x_range_ms: u64,
    pub animation_ms: u64,
    pub animate_updates: bool,
}

impl ChartConfig {
    /// Animation speed tracks the fast-tick interval so consecutive updates
    /// interpolate instead of snapping.
    pub fn for_pipeline(config: &PipelineConfig) -> Self {
        Self {
            chart_id: format!("live-{}-chart", config.symbol.to_ascii_lowercase()),
            series_name: config.symbol.clone(),
            mode: config.mode,
            color: "#10b981".to_string(),
            x_range_ms: (config.capacity as u64).saturating_mul(config.fast_interval_ms),
            animation_ms: config.fast_interval_ms,
            animate_updates: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartHandle {
    chart_id: Arc<str>,
}

impl ChartHandle {
    pub fn new(chart_id: &str) -> Self {
        Self {
            chart_id: Arc::from(chart_id),
        }
    }

    pub fn chart_id(&self) -> &str {
        &self.chart_id
    }
}

/// Shared "mounted" flag. The renderer flips it from its own callback.
#[derive(Debug, Clone, Default)]
pub struct ReadySignal(Arc<AtomicBool>);

impl ReadySignal {
    pub fn confirm(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub trait ChartSink: Send + 'static {
    /// Registers the chart. Readiness is reported later through `ready`.
    fn mount(
        &mut self,
        config: &ChartConfig,
        initial: &SeriesData,
        ready: ReadySignal,
    ) -> Result<ChartHandle, AppError>;

    /// Mutates the mounted chart in place.
    fn update_series(
        &mut self,
        handle: &ChartHandle,
        data: &SeriesData,
        animate: bool,
    ) -> Result<(), AppError>;
}

impl ChartSink for Box<dyn ChartSink> {
    fn mount(
        &mut self,
        config: &ChartConfig,
        initial: &SeriesData,
        ready: ReadySignal,
    ) -> Result<ChartHandle, AppError> {
        (**self).mount(config, initial, ready)
    }

    fn update_series(
        &mut self,
        handle: &ChartHandle,
        data: &SeriesData,
        animate: bool,
    ) -> Result<(), AppError> {
        (**self).update_series(handle, data, animate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    NotReady,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartCounters {
    pub pushed: u64,
    pub dropped_not_ready: u64,
    pub failed: u64,
}

pub struct ChartAdapter<S: ChartSink> {
    sink: S,
    config: ChartConfig,
    handle: ChartHandle,
    ready: ReadySignal,
    counters: ChartCounters,
}

impl<S: ChartSink> ChartAdapter<S> {
    pub fn mount(mut sink: S, config: ChartConfig) -> Result<Self, AppError> {
        let ready = ReadySignal::default();
        let initial = SeriesData::empty(config.mode);
        let handle = sink.mount(&config, &initial, ready.clone())?;
        log::info!("chart mounted: {}", handle.chart_id());

        Ok(Self {
            sink,
            config,
            handle,
            ready,
            counters: ChartCounters::default(),
        })
    }

    pub fn push(&mut self, data: &SeriesData) -> PushOutcome {
        if !self.ready.is_ready() {
            self.counters.dropped_not_ready = self.counters.dropped_not_ready.saturating_add(1);
            log::debug!("chart {} not ready; update dropped", self.handle.chart_id());
            return PushOutcome::NotReady;
        }

        match self
            .sink
            .update_series(&self.handle, data, self.config.animate_updates)
        {
            Ok(()) => {
                self.counters.pushed = self.counters.pushed.saturating_add(1);
                PushOutcome::Pushed
            }
            Err(error) => {
                self.counters.failed = self.counters.failed.saturating_add(1);
                log::warn!("chart {} update failed: {error}", self.handle.chart_id());
                PushOutcome::Failed
            }
        }
    }

    pub fn config(&self) -> &ChartConfig {
        &self.config
    }

    pub fn handle(&self) -> &ChartHandle {
        &self.handle
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    pub fn counters(&self) -> ChartCounters {
        self.counters
    }
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum ChartFrame<'a> {
    #[serde(rename_all = "camelCase")]
    Mount {
        chart_id: &'a str,
        config: &'a ChartConfig,
        series: &'a SeriesData,
    },
    #[serde(rename_all = "camelCase")]
    UpdateSeries {
        chart_id: &'a str,
        animate: bool,
        series: &'a SeriesData,
    },
}

/// Writes one JSON object per line: a `mount` frame, then `updateSeries`
/// frames. Ready is confirmed as soon as the mount frame is queued.
pub struct JsonLinesChartSink {
    frames: FrameWriter,
}

impl JsonLinesChartSink {
    pub fn new(frames: FrameWriter) -> Self {
        Self { frames }
    }
}

impl ChartSink for JsonLinesChartSink {
    fn mount(
        &mut self,
        config: &ChartConfig,
        initial: &SeriesData,
        ready: ReadySignal,
    ) -> Result<ChartHandle, AppError> {
        let handle = ChartHandle::new(&config.chart_id);
        self.frames.send(&ChartFrame::Mount {
            chart_id: handle.chart_id(),
            config,
            series: initial,
        })?;
        ready.confirm();
        Ok(handle)
    }

    fn update_series(
        &mut self,
        handle: &ChartHandle,
        data: &SeriesData,
        animate: bool,
    ) -> Result<(), AppError> {
        self.frames.send(&ChartFrame::UpdateSeries {
            chart_id: handle.chart_id(),
            animate,
            series: data,
        })
    }
}
