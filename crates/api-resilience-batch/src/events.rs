use api_resilience_core::events::ResilienceEvent;
use std::time::Instant;

/// Why a batch group was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// The group reached `max_batch_size` distinct entries.
    Size,
    /// `batch_timeout_ms` elapsed since the group's first entry.
    Timeout,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Timeout => "timeout",
        }
    }
}

/// Events emitted by the batch manager.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// A new distinct entry joined a pending group.
    Enqueued {
        name: String,
        timestamp: Instant,
        pattern: String,
        dedup_key: String,
    },
    /// A request shared an already pending entry.
    Deduplicated {
        name: String,
        timestamp: Instant,
        pattern: String,
        dedup_key: String,
        /// Callers now waiting on the entry, including the first.
        waiters: usize,
    },
    /// A group was dispatched to the executor.
    Flushed {
        name: String,
        timestamp: Instant,
        pattern: String,
        size: usize,
        reason: FlushReason,
    },
    /// `clear()` rejected every pending request.
    Cleared {
        name: String,
        timestamp: Instant,
        rejected_entries: usize,
    },
}

impl ResilienceEvent for BatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BatchEvent::Enqueued { .. } => "enqueued",
            BatchEvent::Deduplicated { .. } => "deduplicated",
            BatchEvent::Flushed { .. } => "flushed",
            BatchEvent::Cleared { .. } => "cleared",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            BatchEvent::Enqueued { timestamp, .. }
            | BatchEvent::Deduplicated { timestamp, .. }
            | BatchEvent::Flushed { timestamp, .. }
            | BatchEvent::Cleared { timestamp, .. } => *timestamp,
        }
    }

    fn source_name(&self) -> &str {
        match self {
            BatchEvent::Enqueued { name, .. }
            | BatchEvent::Deduplicated { name, .. }
            | BatchEvent::Flushed { name, .. }
            | BatchEvent::Cleared { name, .. } => name,
        }
    }
}
