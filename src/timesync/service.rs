//! Per-connection clock drift streaming

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{ClockProvider, ClockSnapshot};
use crate::util::time::unix_millis;

/// Cadence used when the configured interval is zero
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Peer identifier used when the request does not carry one
pub const DEFAULT_CLIENT_ID: &str = "anonymous-client";

/// Drift log channel for WebSocket sessions
pub const DEFAULT_CHANNEL: &str = "ws";

/// Session request sent by the peer
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeSyncRequest {
    pub client_id: Option<String>,
}

impl TimeSyncRequest {
    pub fn for_client(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
        }
    }

    fn resolved_client_id(&self) -> String {
        self.client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_CLIENT_ID)
            .to_string()
    }
}

/// One clock baseline pushed to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSyncUpdate {
    pub server_timestamp_ms: i64,
    pub simulated_timestamp_ms: i64,
    pub recommended_offset_ms: i64,
}

impl From<ClockSnapshot> for TimeSyncUpdate {
    fn from(snapshot: ClockSnapshot) -> Self {
        Self {
            server_timestamp_ms: snapshot.server_ms,
            simulated_timestamp_ms: snapshot.simulated_ms,
            recommended_offset_ms: snapshot.offset_ms,
        }
    }
}

/// Terminal outcome of a time sync session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeSyncError {
    #[error("time sync service unavailable")]
    Unavailable,

    #[error("time sync session cancelled")]
    Cancelled,

    #[error("transport rejected time sync sample: {0}")]
    Transport(String),
}

/// Outbound half of a streaming transport
pub trait SampleSink: Send {
    fn send(&mut self, update: TimeSyncUpdate) -> impl Future<Output = Result<(), String>> + Send;
}

/// Lifecycle of a single session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Streaming,
    Closed,
}

/// Registry entry for a live session
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSession {
    pub client_id: String,
    pub state: SessionState,
    pub started_at_ms: u64,
    pub samples_sent: u64,
}

/// Deregisters a session when dropped, so an abandoned `stream` future still cleans up
struct SessionGuard<'a> {
    sessions: &'a DashMap<Uuid, ActiveSession>,
    session_id: Uuid,
    client_id: &'a str,
    /// Unset when the session future was dropped before finishing
    reason: Option<String>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let samples_sent = self
            .sessions
            .remove(&self.session_id)
            .map(|(_, session)| session.samples_sent)
            .unwrap_or(0);
        let reason = self.reason.take().unwrap_or_else(|| "dropped".to_string());
        info!(
            session_id = %self.session_id,
            client_id = %self.client_id,
            samples_sent,
            state = ?SessionState::Closed,
            reason = %reason,
            "Time sync session closed"
        );
    }
}

/// Streams clock samples to connected peers, one loop per connection
pub struct TimeSyncService {
    clock: Option<Arc<dyn ClockProvider>>,
    interval: Duration,
    channel: &'static str,
    sessions: DashMap<Uuid, ActiveSession>,
}

impl TimeSyncService {
    pub fn new(clock: Option<Arc<dyn ClockProvider>>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        Self {
            clock,
            interval,
            channel: DEFAULT_CHANNEL,
            sessions: DashMap::new(),
        }
    }

    /// Build from a millisecond setting; non-positive values fall back to one second
    pub fn with_interval_ms(clock: Option<Arc<dyn ClockProvider>>, interval_ms: i64) -> Self {
        let interval = u64::try_from(interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);
        Self::new(clock, interval)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn active_sessions(&self) -> Vec<ActiveSession> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Run one session until `cancel` resolves or the transport fails.
    ///
    /// The first sample goes out before the interval timer is armed. The
    /// returned error is the condition that ended the session; a session
    /// never ends successfully.
    pub async fn stream<S, C>(
        &self,
        request: TimeSyncRequest,
        sink: &mut S,
        cancel: C,
    ) -> Result<(), TimeSyncError>
    where
        S: SampleSink,
        C: Future<Output = ()> + Send,
    {
        if self.clock.is_none() {
            return Err(TimeSyncError::Unavailable);
        }

        let client_id = request.resolved_client_id();
        let session_id = Uuid::new_v4();
        self.sessions.insert(
            session_id,
            ActiveSession {
                client_id: client_id.clone(),
                state: SessionState::Init,
                started_at_ms: unix_millis(),
                samples_sent: 0,
            },
        );
        info!(session_id = %session_id, client_id = %client_id, "Time sync session started");

        let mut guard = SessionGuard {
            sessions: &self.sessions,
            session_id,
            client_id: &client_id,
            reason: None,
        };
        let outcome = self.run_session(session_id, &client_id, sink, cancel).await;
        guard.reason = Some(
            outcome
                .as_ref()
                .err()
                .map(ToString::to_string)
                .unwrap_or_default(),
        );

        outcome
    }

    async fn run_session<S, C>(
        &self,
        session_id: Uuid,
        client_id: &str,
        sink: &mut S,
        cancel: C,
    ) -> Result<(), TimeSyncError>
    where
        S: SampleSink,
        C: Future<Output = ()> + Send,
    {
        tokio::pin!(cancel);

        // Initial sample goes out immediately to minimise startup skew
        tokio::select! {
            biased;
            _ = &mut cancel => return Err(TimeSyncError::Cancelled),
            sent = self.send_sample(sink, client_id) => sent?,
        }
        self.mark_sent(session_id, SessionState::Streaming);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => return Err(TimeSyncError::Cancelled),
                _ = ticker.tick() => {
                    self.send_sample(sink, client_id).await?;
                    self.mark_sent(session_id, SessionState::Streaming);
                }
            }
        }
    }

    async fn send_sample<S: SampleSink>(
        &self,
        sink: &mut S,
        client_id: &str,
    ) -> Result<(), TimeSyncError> {
        let Some(clock) = self.clock.as_ref() else {
            return Err(TimeSyncError::Unavailable);
        };

        let update = TimeSyncUpdate::from(clock.snapshot());
        sink.send(update).await.map_err(TimeSyncError::Transport)?;
        clock.log_drift(self.channel, client_id, update.recommended_offset_ms);

        debug!(
            client_id = %client_id,
            offset_ms = update.recommended_offset_ms,
            "Time sync sample sent"
        );
        Ok(())
    }

    fn mark_sent(&self, session_id: Uuid, state: SessionState) {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            session.state = state;
            session.samples_sent += 1;
        }
    }
}

/// Entry point for callers holding an optional service handle
pub async fn stream_time_sync<S, C>(
    service: Option<&TimeSyncService>,
    request: TimeSyncRequest,
    sink: &mut S,
    cancel: C,
) -> Result<(), TimeSyncError>
where
    S: SampleSink,
    C: Future<Output = ()> + Send,
{
    match service {
        Some(service) => service.stream(request, sink, cancel).await,
        None => Err(TimeSyncError::Unavailable),
    }
}
