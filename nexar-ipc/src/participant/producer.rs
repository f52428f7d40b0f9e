use super::{
    CHUNK_BYTES, ParticipantState, Role, StateMachine, Terminal, TestPattern, cancelled,
};
use crate::channel::ExchangeChannel;
use crate::config::IpcConfig;
use crate::device::{GpuIpcProvider, OwnedAllocation};
use crate::error::{IpcError, Result};
use crate::event::{EventSink, Events, ExchangeEvent};
use crate::session::Outcome;
use crate::types::DeviceIndex;
use std::sync::Arc;
use tokio::sync::watch;

/// Owns the device allocation and keeps it alive until the consumer reports.
///
/// The allocation is freed only after `await_report` resolves or the run is
/// cancelled, so the consumer never maps memory that has already been
/// released.
pub struct Producer {
    provider: Arc<dyn GpuIpcProvider>,
    channel: Arc<dyn ExchangeChannel>,
    pattern: TestPattern,
    device: DeviceIndex,
    events: Events,
    machine: StateMachine,
}

impl Producer {
    pub fn new(
        provider: Arc<dyn GpuIpcProvider>,
        channel: Arc<dyn ExchangeChannel>,
        config: &IpcConfig,
    ) -> Self {
        Self {
            provider,
            channel,
            pattern: TestPattern::new(config.pattern_len, config.pattern_value),
            device: config.device,
            events: Events::default(),
            machine: StateMachine::new(Role::Producer),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Events::new(Some(sink));
        self
    }

    pub(crate) fn with_events(mut self, events: Events) -> Self {
        self.events = events;
        self
    }

    pub fn state(&self) -> ParticipantState {
        self.machine.state()
    }

    /// Drive the producer to a terminal state. Setting `cancel` to `true`
    /// ends the keep-alive early with `Failed(Cancelled)`.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Terminal {
        let terminal = match self.drive(&mut cancel).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, state = %self.machine.state(), "producer failed");
                Terminal::Failed(e.failure_reason())
            }
        };
        if let Err(e) = self.machine.advance(ParticipantState::Terminal) {
            tracing::warn!(error = %e, "producer terminal transition rejected");
        }
        self.events.emit(ExchangeEvent::Outcome {
            role: Some(Role::Producer),
            outcome: Outcome::from(terminal),
        });
        terminal
    }

    async fn drive(&mut self, cancel: &mut watch::Receiver<bool>) -> Result<Terminal> {
        if *cancel.borrow() {
            return Err(IpcError::Cancelled);
        }

        let size = self.pattern.validate()?;
        let alloc = OwnedAllocation::allocate(Arc::clone(&self.provider), size, self.device)?;
        let chunk = self.pattern.prefix(CHUNK_BYTES);
        let mut offset = 0;
        while offset < size {
            let n = chunk.len().min(size - offset);
            alloc.write(offset, &chunk[..n])?;
            offset += n;
        }
        self.machine.advance(ParticipantState::Allocated)?;

        let handle = alloc.export()?;
        self.channel.publish(&handle)?;
        self.machine.advance(ParticipantState::HandlePublished)?;
        self.events.emit(ExchangeEvent::HandlePublished {
            device: handle.device(),
            size_bytes: handle.size_bytes(),
        });
        tracing::info!(%handle, "producer published handle");

        self.channel.signal_ready()?;
        self.events.emit(ExchangeEvent::ReadySignaled);
        self.machine.advance(ParticipantState::Verifying)?;

        let report = tokio::select! {
            report = self.channel.await_report() => report?,
            _ = cancelled(cancel) => return Err(IpcError::Cancelled),
        };
        tracing::info!(?report, "producer received consumer report");
        drop(alloc);

        Ok(report.into())
    }
}
