//! Monitor/log sink: a single delegate accepting a structured
//! event record (owner, event kind, remote endpoint, text).

use std::net::SocketAddr;

/// The event kinds the Dialogue Manager emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueEventKind {
    DialogueCreated,
    DialogueRemoved,
    DialPlanError,
}

#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub owner: String,
    pub kind: DialogueEventKind,
    pub remote_ep: Option<SocketAddr>,
    pub text: String,
}

impl MonitorEvent {
    pub fn dialogue_created(owner: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            kind: DialogueEventKind::DialogueCreated,
            remote_ep: None,
            text: text.into(),
        }
    }

    pub fn dialogue_removed(owner: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            kind: DialogueEventKind::DialogueRemoved,
            remote_ep: None,
            text: text.into(),
        }
    }

    pub fn dial_plan_error(
        owner: impl Into<String>,
        remote_ep: Option<SocketAddr>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            kind: DialogueEventKind::DialPlanError,
            remote_ep,
            text: text.into(),
        }
    }
}

/// A single observer for dialogue lifecycle events, rather than a set of
/// per-event-type callback fields.
pub trait MonitorSink: Send + Sync {
    fn record(&self, event: MonitorEvent);
}

/// Default [`MonitorSink`] that turns each event into a `tracing` record.
#[derive(Default)]
pub struct TracingMonitorSink;

impl MonitorSink for TracingMonitorSink {
    fn record(&self, event: MonitorEvent) {
        match event.kind {
            DialogueEventKind::DialogueCreated => {
                tracing::info!(owner = %event.owner, text = %event.text, "dialogue created")
            }
            DialogueEventKind::DialogueRemoved => {
                tracing::info!(owner = %event.owner, text = %event.text, "dialogue removed")
            }
            DialogueEventKind::DialPlanError => {
                tracing::warn!(
                    owner = %event.owner,
                    remote_ep = ?event.remote_ep,
                    text = %event.text,
                    "dial-plan error"
                )
            }
        }
    }
}
