//! Session Channel
//!
//! The long-lived, one-way event stream back to the caller. Owns the
//! keep-alive heartbeat and notices when the client goes away: the heartbeat
//! task watches the receiver side and cancels the session token once it is
//! dropped. Writes wait for buffer space, so a slow client applies
//! backpressure to the pipeline.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::agent::{RunState, StageTiming};
use crate::error::OrchestrationError;
use crate::experts::{ExpertKind, ExpertObserver};
use crate::models::ExpertResult;
use crate::Result;

/// One event on the wire. Serialized as `data: {"type": ..., ...}`;
/// `KeepAlive` becomes an SSE comment line instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Status {
        stage: RunState,
        message: String,
    },
    ExpertStart {
        agent: ExpertKind,
        message: String,
    },
    ExpertComplete {
        agent: ExpertKind,
        message: String,
        confidence: String,
        degraded: bool,
    },
    Delta {
        delta: String,
    },
    Complete {
        done: bool,
        run_id: Uuid,
        answer: String,
        timings: Vec<StageTiming>,
    },
    Error {
        error: String,
    },
    #[serde(skip)]
    KeepAlive,
}

impl SessionEvent {
    pub fn status(stage: RunState, message: impl Into<String>) -> Self {
        SessionEvent::Status {
            stage,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Complete { .. } | SessionEvent::Error { .. })
    }
}

pub struct SessionChannel {
    tx: Option<mpsc::Sender<SessionEvent>>,
    cancel: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
}

impl SessionChannel {
    /// Open the channel and start the heartbeat.
    pub fn open(
        tx: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
        heartbeat_interval: Duration,
    ) -> Self {
        let heartbeat = tokio::spawn(heartbeat_loop(tx.clone(), cancel.clone(), heartbeat_interval));

        Self {
            tx: Some(tx),
            cancel,
            heartbeat: Some(heartbeat),
        }
    }

    /// Convenience constructor returning the receiving half as well.
    pub fn pair(
        capacity: usize,
        heartbeat_interval: Duration,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self::open(tx, CancellationToken::new(), heartbeat_interval),
            rx,
        )
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once the client disconnected or the session was cancelled.
    pub fn is_client_gone(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Send one event, waiting for buffer space if the client is slow.
    pub async fn emit(&self, event: SessionEvent) -> Result<()> {
        if self.is_client_gone() {
            return Err(OrchestrationError::ClientGone);
        }

        let tx = self.tx.as_ref().ok_or(OrchestrationError::ClientGone)?;
        tx.send(event).await.map_err(|_| {
            self.cancel.cancel();
            OrchestrationError::ClientGone
        })
    }

    /// Stop the heartbeat and drop the sender. Consumes the channel, so it
    /// can only happen once.
    pub fn close(mut self) {
        self.release();
    }

    /// Cancel the keep-alive. Called on entry to a terminal state, before
    /// the terminal event goes out.
    pub fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }

    fn release(&mut self) {
        self.stop_heartbeat();
        if self.tx.take().is_some() {
            debug!("Session channel closed");
        }
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.release();
    }
}

async fn heartbeat_loop(
    tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("Client disconnected");
                cancel.cancel();
                break;
            }
            _ = ticker.tick() => {
                if tx.send(SessionEvent::KeepAlive).await.is_err() {
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ExpertObserver for SessionChannel {
    async fn expert_started(&self, kind: ExpertKind) {
        let _ = self
            .emit(SessionEvent::ExpertStart {
                agent: kind,
                message: format!("{} is reviewing your numbers", kind.spec().display_name),
            })
            .await;
    }

    async fn expert_finished(&self, result: &ExpertResult) {
        let display_name = result.expert_id.spec().display_name;
        let message = if result.degraded {
            format!("{} could not complete its review", display_name)
        } else {
            format!("{} finished", display_name)
        };

        let _ = self
            .emit(SessionEvent::ExpertComplete {
                agent: result.expert_id,
                message,
                confidence: result.confidence().to_string(),
                degraded: result.degraded,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = SessionEvent::ExpertStart {
            agent: ExpertKind::DebtStrategist,
            message: "go".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "expert_start");
        assert_eq!(json["agent"], "debt_strategist");

        let delta = serde_json::to_value(SessionEvent::Delta { delta: "Hi".into() }).unwrap();
        assert_eq!(delta, serde_json::json!({"type": "delta", "delta": "Hi"}));

        assert!(SessionEvent::Error { error: "x".into() }.is_terminal());
        assert!(!SessionEvent::status(RunState::Classify, "x").is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ticks_until_closed() {
        let (channel, mut rx) = SessionChannel::pair(8, Duration::from_secs(15));
        assert!(channel.heartbeat_active());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(rx.recv().await, Some(SessionEvent::KeepAlive));
        assert_eq!(rx.recv().await, Some(SessionEvent::KeepAlive));

        channel.close();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_receiver_drop_is_detected() {
        let (channel, rx) = SessionChannel::pair(8, Duration::from_secs(60));
        assert!(!channel.is_client_gone());

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), channel.cancellation().cancelled())
            .await
            .unwrap();

        assert!(channel.is_client_gone());
        let err = channel.emit(SessionEvent::Delta { delta: "x".into() }).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::ClientGone));
    }

    #[tokio::test]
    async fn test_emit_preserves_order() {
        let (channel, mut rx) = SessionChannel::pair(4, Duration::from_secs(60));

        channel.emit(SessionEvent::status(RunState::Snapshot, "a")).await.unwrap();
        channel.emit(SessionEvent::Delta { delta: "b".into() }).await.unwrap();
        channel.close();

        assert!(matches!(rx.recv().await, Some(SessionEvent::Status { .. })));
        assert!(matches!(rx.recv().await, Some(SessionEvent::Delta { .. })));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_emit_waits_for_buffer_space() {
        let (channel, mut rx) = SessionChannel::pair(1, Duration::from_secs(60));
        channel.emit(SessionEvent::Delta { delta: "a".into() }).await.unwrap();

        let second = channel.emit(SessionEvent::Delta { delta: "b".into() });
        tokio::pin!(second);
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut second)
            .await
            .is_err());

        assert_eq!(rx.recv().await, Some(SessionEvent::Delta { delta: "a".into() }));
        tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.recv().await, Some(SessionEvent::Delta { delta: "b".into() }));
    }
}
