use api_resilience_core::events::ResilienceEvent;
use std::time::{Duration, Instant};

/// Events emitted by the cache manager.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A live entry was found.
    Hit {
        name: String,
        timestamp: Instant,
        key: String,
    },
    /// The key was absent, expired or unreadable.
    Miss {
        name: String,
        timestamp: Instant,
        key: String,
    },
    /// An entry was written.
    Set {
        name: String,
        timestamp: Instant,
        key: String,
        ttl: Duration,
    },
    /// The backend dropped an entry to make room.
    Eviction {
        name: String,
        timestamp: Instant,
        key: String,
    },
    /// An invalidation helper or `cleanup` removed entries.
    Invalidated {
        name: String,
        timestamp: Instant,
        /// `"pattern"`, `"prefix"`, `"tags"` or `"expired"`.
        reason: &'static str,
        count: usize,
    },
}

impl ResilienceEvent for CacheEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "hit",
            CacheEvent::Miss { .. } => "miss",
            CacheEvent::Set { .. } => "set",
            CacheEvent::Eviction { .. } => "eviction",
            CacheEvent::Invalidated { .. } => "invalidated",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CacheEvent::Hit { timestamp, .. }
            | CacheEvent::Miss { timestamp, .. }
            | CacheEvent::Set { timestamp, .. }
            | CacheEvent::Eviction { timestamp, .. }
            | CacheEvent::Invalidated { timestamp, .. } => *timestamp,
        }
    }

    fn source_name(&self) -> &str {
        match self {
            CacheEvent::Hit { name, .. }
            | CacheEvent::Miss { name, .. }
            | CacheEvent::Set { name, .. }
            | CacheEvent::Eviction { name, .. }
            | CacheEvent::Invalidated { name, .. } => name,
        }
    }
}
