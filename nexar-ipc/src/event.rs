//! Structured lifecycle events for external loggers and metrics collectors.
//!
//! The exchange works identically with or without a sink attached.

use crate::oracle::Verdict;
use crate::participant::Role;
use crate::session::Outcome;
use crate::types::DeviceIndex;

/// A milestone in one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// The producer wrote its handle into the channel.
    HandlePublished {
        device: DeviceIndex,
        size_bytes: u64,
    },
    /// The producer set the readiness latch.
    ReadySignaled,
    /// The authorization oracle was consulted.
    VerdictComputed { verdict: Verdict },
    /// A participant or the session reached its final result.
    Outcome { role: Option<Role>, outcome: Outcome },
}

/// Receives exchange events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ExchangeEvent);
}

/// Forwards every event to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &ExchangeEvent) {
        match event {
            ExchangeEvent::HandlePublished { device, size_bytes } => {
                tracing::info!(device, size_bytes, "event: handle published");
            }
            ExchangeEvent::ReadySignaled => tracing::info!("event: ready signaled"),
            ExchangeEvent::VerdictComputed { verdict } => {
                tracing::info!(%verdict, "event: verdict computed");
            }
            ExchangeEvent::Outcome { role, outcome } => match role {
                Some(role) => tracing::info!(%role, %outcome, "event: outcome"),
                None => tracing::info!(%outcome, "event: session outcome"),
            },
        }
    }
}

/// Optional sink handle carried by participants and sessions.
#[derive(Clone, Default)]
pub(crate) struct Events(Option<std::sync::Arc<dyn EventSink>>);

impl Events {
    pub(crate) fn new(sink: Option<std::sync::Arc<dyn EventSink>>) -> Self {
        Self(sink)
    }

    pub(crate) fn emit(&self, event: ExchangeEvent) {
        if let Some(sink) = &self.0 {
            sink.emit(&event);
        }
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0.is_some() { "Events(sink)" } else { "Events(none)" })
    }
}
