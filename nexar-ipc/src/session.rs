//! One producer, one consumer, one channel: the exchange session.
//!
//! The session evaluates the authorization oracle once, hands the verdict to
//! the consumer and runs both participants as independent tasks. The tasks
//! share nothing but the channel. The session itself only waits on their
//! terminal states and folds them into a single [`Outcome`].

use crate::capability::CapabilitySet;
use crate::channel::ExchangeChannel;
use crate::config::IpcConfig;
use crate::device::GpuIpcProvider;
use crate::event::{EventSink, Events, ExchangeEvent};
use crate::oracle::{self, DenyReason};
use crate::participant::{Consumer, FailureReason, Producer, Role, Terminal, cancelled};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long a timed-out or cancelled session waits for its participants to
/// unwind before aborting them.
const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// Final result of an exchange session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The consumer read back the producer's pattern intact.
    Verified { checksum: u64 },
    /// The handshake completed but the data differed.
    DataMismatch { expected: u64, actual: u64 },
    /// The oracle refused cross-process access for this topology.
    AuthorizationDenied(DenyReason),
    /// Readiness or the whole session exceeded its deadline.
    Timeout,
    /// Torn down by an external cancel.
    Cancelled,
    /// Device or protocol failure.
    Failed(FailureReason),
}

impl Outcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Outcome::Verified { .. })
    }

    /// Fold both participants' terminal states into one outcome.
    ///
    /// The consumer's result dominates. A consumer that merely timed out
    /// while the producer failed for its own reason reports the producer's
    /// failure, since that is why readiness never arrived.
    pub fn from_terminals(producer: Terminal, consumer: Terminal) -> Outcome {
        match (consumer, producer) {
            (Terminal::Verified { checksum }, Terminal::Verified { .. }) => {
                Outcome::Verified { checksum }
            }
            (Terminal::Verified { .. }, Terminal::Failed(reason)) => Outcome::from(reason),
            (Terminal::Verified { checksum }, Terminal::DataMismatch { expected, actual }) => {
                tracing::warn!(checksum, expected, actual, "participants disagree on checksum");
                Outcome::DataMismatch { expected, actual }
            }
            (Terminal::Failed(FailureReason::Timeout), Terminal::Failed(reason))
                if !matches!(reason, FailureReason::Timeout | FailureReason::Cancelled) =>
            {
                Outcome::from(reason)
            }
            (consumer, _) => Outcome::from(consumer),
        }
    }
}

impl From<FailureReason> for Outcome {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::AuthorizationDenied(r) => Outcome::AuthorizationDenied(r),
            FailureReason::Timeout => Outcome::Timeout,
            FailureReason::Cancelled => Outcome::Cancelled,
            other => Outcome::Failed(other),
        }
    }
}

impl From<Terminal> for Outcome {
    fn from(terminal: Terminal) -> Self {
        match terminal {
            Terminal::Verified { checksum } => Outcome::Verified { checksum },
            Terminal::DataMismatch { expected, actual } => {
                Outcome::DataMismatch { expected, actual }
            }
            Terminal::Failed(reason) => Outcome::from(reason),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Verified { checksum } => write!(f, "verified (checksum {checksum})"),
            Outcome::DataMismatch { expected, actual } => {
                write!(f, "data mismatch (expected {expected}, got {actual})")
            }
            Outcome::AuthorizationDenied(r) => write!(f, "authorization denied: {r}"),
            Outcome::Timeout => f.write_str("timed out"),
            Outcome::Cancelled => f.write_str("cancelled"),
            Outcome::Failed(r) => write!(f, "failed: {r}"),
        }
    }
}

/// Cancels a running session from outside. Cloneable; any clone cancels.
#[derive(Clone)]
pub struct SessionCanceller {
    tx: Arc<watch::Sender<bool>>,
}

impl SessionCanceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A spawned participant. The task is aborted if the handle is dropped
/// before it finishes, which releases any allocation or mapping it holds.
struct ParticipantHandle {
    role: Role,
    inner: Option<JoinHandle<Terminal>>,
    result: Option<Terminal>,
}

impl ParticipantHandle {
    fn spawn(role: Role, fut: impl Future<Output = Terminal> + Send + 'static) -> Self {
        Self {
            role,
            inner: Some(tokio::spawn(fut)),
            result: None,
        }
    }

    /// Wait for the participant's terminal state. Safe to call again after
    /// an interrupted wait.
    async fn join(&mut self) -> Terminal {
        if let Some(t) = self.result {
            return t;
        }
        let terminal = match self.inner.as_mut() {
            Some(handle) => match handle.await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(role = %self.role, "participant task ended abnormally: {e}");
                    Terminal::Failed(if e.is_cancelled() {
                        FailureReason::Cancelled
                    } else {
                        FailureReason::Internal
                    })
                }
            },
            None => Terminal::Failed(FailureReason::Internal),
        };
        self.inner = None;
        self.result = Some(terminal);
        terminal
    }
}

impl Drop for ParticipantHandle {
    fn drop(&mut self) {
        if let Some(handle) = &self.inner {
            handle.abort();
        }
    }
}

/// Coordinates one handle exchange between a producer and a consumer.
pub struct ExchangeSession {
    caps: CapabilitySet,
    channel: Arc<dyn ExchangeChannel>,
    producer_provider: Arc<dyn GpuIpcProvider>,
    consumer_provider: Arc<dyn GpuIpcProvider>,
    config: IpcConfig,
    timeout: Duration,
    events: Events,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl ExchangeSession {
    /// Both participants use `provider`; see [`with_consumer_provider`] to
    /// give the consumer its own.
    ///
    /// [`with_consumer_provider`]: ExchangeSession::with_consumer_provider
    pub fn new(
        caps: CapabilitySet,
        channel: Arc<dyn ExchangeChannel>,
        provider: Arc<dyn GpuIpcProvider>,
        config: IpcConfig,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            caps,
            channel,
            consumer_provider: Arc::clone(&provider),
            producer_provider: provider,
            timeout: config.session_timeout,
            config,
            events: Events::default(),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    pub fn with_consumer_provider(mut self, provider: Arc<dyn GpuIpcProvider>) -> Self {
        self.consumer_provider = provider;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Events::new(Some(sink));
        self
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    pub fn canceller(&self) -> SessionCanceller {
        SessionCanceller {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Run both participants to completion and return the session outcome.
    pub async fn run(self) -> Outcome {
        let verdict = oracle::evaluate(&self.caps);
        tracing::info!(caps = %self.caps, %verdict, "exchange session starting");
        self.events.emit(ExchangeEvent::VerdictComputed { verdict });

        let (teardown_tx, teardown_rx) = watch::channel(false);
        let producer = Producer::new(
            Arc::clone(&self.producer_provider),
            Arc::clone(&self.channel),
            &self.config,
        )
        .with_events(self.events.clone());
        let consumer = Consumer::with_verdict(
            Arc::clone(&self.consumer_provider),
            Arc::clone(&self.channel),
            verdict,
            &self.config,
        )
        .with_events(self.events.clone());

        let mut producer =
            ParticipantHandle::spawn(Role::Producer, producer.run(teardown_rx.clone()));
        let mut consumer = ParticipantHandle::spawn(Role::Consumer, consumer.run(teardown_rx));
        let mut cancel_rx = self.cancel_rx.clone();

        let finished = tokio::select! {
            res = tokio::time::timeout(self.timeout, async {
                let c = consumer.join().await;
                let p = producer.join().await;
                (p, c)
            }) => match res {
                Ok((p, c)) => Some(Outcome::from_terminals(p, c)),
                Err(_) => {
                    let timeout_ms = self.timeout.as_millis() as u64;
                    tracing::warn!(timeout_ms, "session timed out");
                    None
                }
            },
            _ = cancelled(&mut cancel_rx) => {
                tracing::info!("session cancelled");
                Some(Outcome::Cancelled)
            }
        };

        let outcome = match finished {
            Some(Outcome::Cancelled) | None => {
                let _ = teardown_tx.send(true);
                let unwind = tokio::time::timeout(TEARDOWN_GRACE, async {
                    consumer.join().await;
                    producer.join().await;
                })
                .await;
                if unwind.is_err() {
                    tracing::warn!("participants did not unwind in time, aborting");
                }
                finished.unwrap_or(Outcome::Timeout)
            }
            Some(outcome) => outcome,
        };

        tracing::info!(%outcome, "exchange session finished");
        self.events.emit(ExchangeEvent::Outcome {
            role: None,
            outcome,
        });
        outcome
    }
}
