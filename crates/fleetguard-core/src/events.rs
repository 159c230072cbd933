//! The event bus (spec §6): structured records emitted to an external
//! broker — a flat enum per event type, plus an `EventSink` trait workers
//! publish through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::canary::CanaryPhase;
use crate::decision::DecisionOutcome;
use crate::plan::{PlanStatus, Violation};

/// Mandatory envelope fields on every event (§6: `{event_type,
/// timestamp_utc, worker_id, sequence, correlation_id?}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp_utc: DateTime<Utc>,
    pub worker_id: String,
    /// Incrementing per-worker sequence number (§5 ordering guarantees).
    pub sequence: u64,
    pub correlation_id: Option<String>,
}

/// All event kinds listed in §6, carrying just enough payload for an
/// external consumer to act without re-querying the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    PlanSubmitted {
        plan_id: ResourceId,
    },
    PlanApproved {
        plan_id: ResourceId,
    },
    PlanRejected {
        plan_id: ResourceId,
        violations: Vec<Violation>,
    },
    PlanShadowExecuted {
        plan_id: ResourceId,
    },
    PlanCompleted {
        plan_id: ResourceId,
        status: PlanStatus,
    },
    PlanFailed {
        plan_id: ResourceId,
        message: String,
    },
    PlanCancelled {
        plan_id: ResourceId,
    },
    DecisionStarted {
        plan_id: ResourceId,
        decision_id: ResourceId,
    },
    DecisionCompleted {
        plan_id: ResourceId,
        decision_id: ResourceId,
    },
    DecisionFailed {
        plan_id: ResourceId,
        decision_id: ResourceId,
        message: String,
    },
    DecisionSkipped {
        plan_id: ResourceId,
        decision_id: ResourceId,
        outcome: DecisionOutcome,
    },
    CanaryStarted {
        canary_id: ResourceId,
        deployment_id: ResourceId,
    },
    CanaryStepPromoted {
        canary_id: ResourceId,
        step: u32,
        canary_weight: u8,
    },
    CanaryHealthSampled {
        canary_id: ResourceId,
        score: f64,
    },
    CanaryPromoted {
        canary_id: ResourceId,
    },
    CanaryFailed {
        canary_id: ResourceId,
        phase: CanaryPhase,
        last_score: f64,
        cause: String,
    },
    DeploymentCreated {
        deployment_id: ResourceId,
    },
    DeploymentScaled {
        deployment_id: ResourceId,
        replicas: u32,
    },
    DeploymentUpdated {
        deployment_id: ResourceId,
    },
    DeploymentDeleted {
        deployment_id: ResourceId,
    },
    DeploymentRollbackTriggered {
        deployment_id: ResourceId,
        reason: crate::rollback::RollbackReason,
    },
    DeploymentRolledBack {
        deployment_id: ResourceId,
        to_revision: u64,
    },
    PolicyViolation {
        plan_id: ResourceId,
        violation: Violation,
    },
}

/// A fully assembled event ready for publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub envelope: EventEnvelope,
    pub kind: EventKind,
}

/// Sink workers publish events through (§5: "events emitted from a single
/// worker are totally ordered"). Implementations must preserve publish
/// order per caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: Event);
}

/// Emits every event through `tracing`, at `info` for terminal/major
/// transitions and `debug` for sampling-style events. Useful as a sink on
/// its own and as the tail of a fan-out sink.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: Event) {
        match &event.kind {
            EventKind::CanaryHealthSampled { .. } | EventKind::DecisionStarted { .. } => {
                tracing::debug!(?event.kind, sequence = event.envelope.sequence, "event");
            }
            _ => {
                tracing::info!(?event.kind, sequence = event.envelope.sequence, "event");
            }
        }
    }
}

/// Broadcasts events over a `tokio::sync::broadcast` channel for in-process
/// subscribers (tests, the CLI demo, a future bridge adapter).
pub struct ChannelEventSink {
    tx: tokio::sync::broadcast::Sender<Event>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn publish(&self, event: Event) {
        // No subscribers is a normal, not an error, state.
        let _ = self.tx.send(event);
    }
}

/// Monotonic per-worker sequence generator backing the `sequence` field
/// (§5 ordering guarantees).
pub struct SequenceCounter {
    next: std::sync::atomic::AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            next: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_to_subscriber() {
        let sink = ChannelEventSink::new(16);
        let mut rx = sink.subscribe();
        let seq = SequenceCounter::new();
        sink.publish(Event {
            envelope: EventEnvelope {
                timestamp_utc: Utc::now(),
                worker_id: "test".into(),
                sequence: seq.next(),
                correlation_id: None,
            },
            kind: EventKind::PlanSubmitted {
                plan_id: ResourceId::new(),
            },
        })
        .await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.envelope.sequence, 0);
    }

    #[test]
    fn sequence_counter_is_monotonic() {
        let seq = SequenceCounter::new();
        assert_eq!(seq.next(), 0);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
    }
}
