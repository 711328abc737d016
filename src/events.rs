use crate::error::EventBusError;
use crate::infrastructure::{AuditEntry, AuditEventKind};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Async fan-out of audit entries to live observers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AuditEntry>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.sender.subscribe()
    }

    /// Publish an entry to all subscribers
    pub async fn publish(&self, entry: AuditEntry) -> Result<usize, EventBusError> {
        match entry.event_kind {
            AuditEventKind::SessionFatal => {
                error!("Session {} ended fatally: {}", entry.session_id, entry.detail);
            }
            AuditEventKind::CaptureStartFailed | AuditEventKind::CaptureStopAnomaly => {
                warn!("Session {}: {} ({})", entry.session_id, entry.event_kind, entry.detail);
            }
            AuditEventKind::SessionStarted | AuditEventKind::SessionStopped => {
                info!("Session {}: {}", entry.session_id, entry.event_kind);
            }
            _ => debug!("Event: {}", entry.description()),
        }

        self.sender
            .send(entry)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}
