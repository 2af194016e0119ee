//! Feed connection manager.
//!
//! Owns one persistent streaming connection, decodes every inbound frame and
//! hands the result to the caller's callback in arrival order. Reconnects with
//! exponential backoff until the attempt budget runs out, then stays
//! disconnected until the owner restarts it.

use crate::error::AppError;
use crate::market::types::{parse_feed_payload, ConnectionState, FeedEvent};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub growth_factor: f64,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// `base_delay * growth_factor^attempt`, or `None` once `attempt` has
    /// reached the budget.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.base_delay.as_millis() as f64 * self.growth_factor.powi(exponent);
        Some(Duration::from_millis(millis.min(u64::MAX as f64) as u64))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
    Control,
}

pub type FeedStream = BoxStream<'static, Result<FeedFrame, AppError>>;

#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<FeedStream, AppError>;
}

/// Lock-free mirror of the connection lifecycle, readable from any task.
#[derive(Debug, Default)]
pub struct FeedStatus {
    state: AtomicU8,
    reconnect_attempt: AtomicU32,
    exhausted: AtomicBool,
    connect_count: AtomicU64,
    dropped_frames: AtomicU64,
}

impl FeedStatus {
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt.load(Ordering::Relaxed)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Relaxed)
    }

    pub fn connect_count(&self) -> u64 {
        self.connect_count.load(Ordering::Relaxed)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedExit {
    Cancelled,
    Exhausted,
}

enum SessionEnd {
    Cancelled,
    Dropped,
}

pub struct FeedConnection {
    cancel_token: CancellationToken,
    status: Arc<FeedStatus>,
    join_handle: Option<JoinHandle<FeedExit>>,
}

impl FeedConnection {
    /// Spawns the connection task. `on_event` runs synchronously for every
    /// decoded frame; `on_state` runs on every lifecycle transition.
    pub fn connect<E, S>(
        transport: Arc<dyn FeedTransport>,
        url: String,
        policy: ReconnectPolicy,
        cancel_token: CancellationToken,
        on_event: E,
        on_state: S,
    ) -> Self
    where
        E: FnMut(FeedEvent) + Send + 'static,
        S: FnMut(ConnectionState) + Send + 'static,
    {
        let status = Arc::new(FeedStatus::default());
        let task_status = Arc::clone(&status);
        let task_token = cancel_token.clone();

        let join_handle = tokio::spawn(async move {
            run_feed(
                transport,
                url,
                policy,
                task_token,
                task_status,
                on_event,
                on_state,
            )
            .await
        });

        Self {
            cancel_token,
            status,
            join_handle: Some(join_handle),
        }
    }

    pub fn status(&self) -> Arc<FeedStatus> {
        Arc::clone(&self.status)
    }

    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Detaches the reconnect path, then closes the socket. Safe to call more
    /// than once.
    pub async fn close(&mut self) -> Option<FeedExit> {
        self.cancel_token.cancel();
        let handle = self.join_handle.take()?;
        let exit = handle.await.ok();
        self.status.set_state(ConnectionState::Disconnected);
        exit
    }
}

impl Drop for FeedConnection {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn run_feed<E, S>(
    transport: Arc<dyn FeedTransport>,
    url: String,
    policy: ReconnectPolicy,
    cancel_token: CancellationToken,
    status: Arc<FeedStatus>,
    mut on_event: E,
    mut on_state: S,
) -> FeedExit
where
    E: FnMut(FeedEvent) + Send + 'static,
    S: FnMut(ConnectionState) + Send + 'static,
{
    let mut reconnect_attempt = 0_u32;

    loop {
        if cancel_token.is_cancelled() {
            return FeedExit::Cancelled;
        }

        status.set_state(ConnectionState::Connecting);
        on_state(ConnectionState::Connecting);
        status.connect_count.fetch_add(1, Ordering::Relaxed);

        let connected = tokio::select! {
            _ = cancel_token.cancelled() => return FeedExit::Cancelled,
            result = transport.connect(&url) => result,
        };

        match connected {
            Ok(stream) => {
                reconnect_attempt = 0;
                status.reconnect_attempt.store(0, Ordering::Relaxed);
                status.set_state(ConnectionState::Connected);
                on_state(ConnectionState::Connected);
                log::info!("feed connected: {url}");

                match read_session(stream, &cancel_token, &status, &mut on_event).await {
                    SessionEnd::Cancelled => return FeedExit::Cancelled,
                    SessionEnd::Dropped => {}
                }
            }
            Err(error) => {
                log::warn!("feed connect error ({url}): {error}");
            }
        }

        if cancel_token.is_cancelled() {
            return FeedExit::Cancelled;
        }

        status.set_state(ConnectionState::Disconnected);
        on_state(ConnectionState::Disconnected);

        let Some(delay) = policy.delay_for(reconnect_attempt) else {
            status.exhausted.store(true, Ordering::Relaxed);
            log::error!(
                "feed reconnect budget exhausted after {reconnect_attempt} attempts; staying offline"
            );
            return FeedExit::Exhausted;
        };
        reconnect_attempt = reconnect_attempt.saturating_add(1);
        status
            .reconnect_attempt
            .store(reconnect_attempt, Ordering::Relaxed);
        log::info!(
            "feed reconnect attempt {reconnect_attempt} in {}ms",
            delay.as_millis()
        );

        tokio::select! {
            _ = cancel_token.cancelled() => return FeedExit::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn read_session<E>(
    mut stream: FeedStream,
    cancel_token: &CancellationToken,
    status: &FeedStatus,
    on_event: &mut E,
) -> SessionEnd
where
    E: FnMut(FeedEvent),
{
    loop {
        let next = tokio::select! {
            _ = cancel_token.cancelled() => return SessionEnd::Cancelled,
            next = stream.next() => next,
        };

        let frame = match next {
            None => {
                log::info!("feed stream ended");
                return SessionEnd::Dropped;
            }
            Some(Err(error)) => {
                log::warn!("feed frame error: {error}");
                return SessionEnd::Dropped;
            }
            Some(Ok(frame)) => frame,
        };

        let mut payload = match frame {
            FeedFrame::Text(text) => text.into_bytes(),
            FeedFrame::Binary(bytes) => bytes,
            FeedFrame::Close => {
                log::info!("feed closed by peer");
                return SessionEnd::Dropped;
            }
            FeedFrame::Control => continue,
        };

        match parse_feed_payload(payload.as_mut_slice()) {
            Ok(event) => on_event(event),
            Err(error) => {
                status.dropped_frames.fetch_add(1, Ordering::Relaxed);
                log::debug!("dropping malformed feed frame: {error}");
            }
        }
    }
}
