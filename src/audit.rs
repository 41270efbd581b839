//! Outbound audit hooks. Every mutating lifecycle operation reports who acted, what kind of
//! event occurred, and before/after snapshots of the affected entity.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of whoever performed an action, as supplied by the host's identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub actor: ActorId,
    /// Identifier of the affected entity (rule code, record id, log id, ...).
    pub subject: String,
    pub before: Value,
    pub after: Value,
    pub recorded_at: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Transport(String),
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        (**self).record(event)
    }
}

/// Sink that writes audit events to the tracing pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        tracing::info!(
            target: "audit",
            event_type = %event.event_type,
            actor = %event.actor,
            subject = %event.subject,
            before = %event.before,
            after = %event.after,
            "audit event"
        );
        Ok(())
    }
}

/// Collects events in memory so callers can assert on them.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|event| event.event_type)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError::Transport("audit buffer poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

/// Deliver an event after its unit of work committed. Delivery failures cannot undo the
/// committed writes, so they are logged instead of returned.
pub(crate) fn emit<A: AuditSink + ?Sized>(
    sink: &A,
    event_type: &str,
    actor: &ActorId,
    subject: impl Into<String>,
    before: Value,
    after: Value,
    recorded_at: DateTime<Utc>,
) {
    let event = AuditEvent {
        event_type: event_type.to_string(),
        actor: actor.clone(),
        subject: subject.into(),
        before,
        after,
        recorded_at,
    };

    if let Err(err) = sink.record(event) {
        tracing::warn!(event_type, error = %err, "failed to deliver audit event");
    }
}

/// Serialize a snapshot for an audit payload.
pub(crate) fn snapshot<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
