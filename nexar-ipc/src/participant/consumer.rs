use super::{
    CHUNK_BYTES, ParticipantState, Role, StateMachine, Terminal, TestPattern, cancelled,
};
use crate::capability::CapabilitySet;
use crate::channel::ExchangeChannel;
use crate::config::IpcConfig;
use crate::device::{GpuIpcProvider, Mapping};
use crate::error::{IpcError, ProtocolViolation, Result};
use crate::event::{EventSink, Events, ExchangeEvent};
use crate::oracle::{self, Verdict};
use crate::protocol::ConsumerReport;
use crate::session::Outcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Maps the producer's allocation and verifies the test pattern.
///
/// The authorization verdict is checked before the handle is ever read: a
/// denied consumer goes straight to `Terminal` without touching the channel's
/// handle slot. Whatever the outcome, the consumer writes exactly one report
/// so the producer's keep-alive can end. The one exception is a channel that
/// only ever showed a finished exchange: its report slot belongs to that
/// exchange, so nothing is written.
pub struct Consumer {
    provider: Arc<dyn GpuIpcProvider>,
    channel: Arc<dyn ExchangeChannel>,
    verdict: Verdict,
    emit_verdict: bool,
    pattern: TestPattern,
    ready_timeout: Duration,
    events: Events,
    machine: StateMachine,
}

impl Consumer {
    /// Create a consumer whose authorization is derived from `caps`.
    pub fn new(
        provider: Arc<dyn GpuIpcProvider>,
        channel: Arc<dyn ExchangeChannel>,
        caps: &CapabilitySet,
        config: &IpcConfig,
    ) -> Self {
        let mut consumer = Self::with_verdict(provider, channel, oracle::evaluate(caps), config);
        consumer.emit_verdict = true;
        consumer
    }

    /// Create a consumer with a verdict already computed by the caller.
    pub fn with_verdict(
        provider: Arc<dyn GpuIpcProvider>,
        channel: Arc<dyn ExchangeChannel>,
        verdict: Verdict,
        config: &IpcConfig,
    ) -> Self {
        Self {
            provider,
            channel,
            verdict,
            emit_verdict: false,
            pattern: TestPattern::new(config.pattern_len, config.pattern_value),
            ready_timeout: config.ready_timeout,
            events: Events::default(),
            machine: StateMachine::new(Role::Consumer),
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

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn state(&self) -> ParticipantState {
        self.machine.state()
    }

    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Terminal {
        if self.emit_verdict {
            self.events.emit(ExchangeEvent::VerdictComputed {
                verdict: self.verdict,
            });
        }

        let terminal = match self.drive(&mut cancel).await {
            Ok(t) => t,
            Err(e) => {
                let reason = e.failure_reason();
                tracing::warn!(error = %e, state = %self.machine.state(), "consumer failed");
                if matches!(e, IpcError::Protocol(ProtocolViolation::StaleExchange)) {
                    tracing::debug!("channel holds a finished exchange, not reporting");
                } else if let Err(report_err) = self.channel.report(&reason.into()) {
                    tracing::debug!(error = %report_err, "could not write failure report");
                }
                Terminal::Failed(reason)
            }
        };
        if let Err(e) = self.machine.advance(ParticipantState::Terminal) {
            tracing::warn!(error = %e, "consumer terminal transition rejected");
        }
        self.events.emit(ExchangeEvent::Outcome {
            role: Some(Role::Consumer),
            outcome: Outcome::from(terminal),
        });
        terminal
    }

    async fn drive(&mut self, cancel: &mut watch::Receiver<bool>) -> Result<Terminal> {
        if let Verdict::Deny(reason) = self.verdict {
            return Err(IpcError::AuthorizationDenied { reason });
        }
        self.pattern.validate()?;
        self.machine.advance(ParticipantState::Allocated)?;

        tokio::select! {
            ready = self.channel.await_ready(self.ready_timeout) => ready?,
            _ = cancelled(cancel) => return Err(IpcError::Cancelled),
        }

        let handle = self.channel.read_handle()?;
        tracing::info!(%handle, "consumer read handle");
        let mapping = Mapping::import(Arc::clone(&self.provider), &handle)?;
        self.machine.advance(ParticipantState::HandleConsumed)?;

        self.machine.advance(ParticipantState::Verifying)?;
        let size = mapping.size_bytes();
        let mut actual = 0u64;
        let mut offset = 0;
        while offset < size {
            let n = CHUNK_BYTES.min(size - offset);
            actual = actual.wrapping_add(TestPattern::checksum(&mapping.read(offset, n)?));
            offset += n;
        }
        drop(mapping);

        let expected = self.pattern.expected_checksum();
        let report = if actual == expected {
            ConsumerReport::Verified { checksum: actual }
        } else {
            ConsumerReport::DataMismatch { expected, actual }
        };
        self.channel.report(&report)?;

        Ok(report.into())
    }
}
