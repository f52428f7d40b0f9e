use crate::channel::latch::ReadinessLatch;
use crate::channel::{ChannelState, ExchangeChannel};
use crate::error::{IpcError, ProtocolViolation, Result};
use crate::protocol::{ChannelRecord, ConsumerReport, decode_record, encode_record};
use crate::types::MemoryHandle;
use futures::future::BoxFuture;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const HANDLE_FILE: &str = "handle.rec";
const READY_FILE: &str = "ready";
const REPORT_FILE: &str = "report.rec";

static NEXT_EXCHANGE: AtomicU64 = AtomicU64::new(0);

/// Id unique to one `publish`: pid, wall clock and a process-local counter.
fn new_exchange_id() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let seq = NEXT_EXCHANGE.fetch_add(1, Ordering::Relaxed);
    (u64::from(std::process::id()) << 32) ^ nanos ^ seq.rotate_left(17)
}

/// How the readiness marker relates to the exchange this instance follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Unset,
    /// Signaled, but the report slot is already filled by someone else.
    Stale,
    Current,
}

/// Exchange channel over a directory both participants can see: a volume
/// mounted into two pods, a host path, or a tmpfs segment under `/dev/shm`.
///
/// Records are written to a private temp file and then hard-linked into
/// place. The link either creates the final name atomically or fails because
/// it exists, which gives write-once semantics across processes and means a
/// reader never sees a half-written record.
///
/// Each `publish` tags the handle with a fresh exchange id, and
/// `signal_ready` writes the same id into the readiness marker. An instance
/// that opens a directory still holding a finished exchange (marker set and
/// report written) treats it as stale: `await_ready` keeps waiting for a new
/// producer and `read_handle` refuses the old handle with `StaleExchange`.
#[derive(Debug)]
pub struct FileChannel {
    dir: PathBuf,
    latch: ReadinessLatch,
    poll_interval: Duration,
}

impl FileChannel {
    /// Open (creating if needed) a channel rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let latch = ReadinessLatch::new(dir.join(READY_FILE));
        Ok(Self {
            dir,
            latch,
            poll_interval,
        })
    }

    /// Open a channel in the host's POSIX shared-memory tmpfs.
    pub fn shm(name: &str, poll_interval: Duration) -> Result<Self> {
        Self::open(Path::new("/dev/shm").join(name), poll_interval)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Remove every record so the directory can host a fresh exchange.
    ///
    /// Only the party that owns the directory's lifecycle should call this,
    /// before any producer starts. The marker goes first, so a waiting
    /// consumer never sees a set marker without the report that makes it
    /// stale.
    pub fn clear(&mut self) -> Result<()> {
        self.latch.reset()?;
        for name in [HANDLE_FILE, REPORT_FILE] {
            match std::fs::remove_file(self.dir.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn write_once(
        &self,
        name: &str,
        record: &ChannelRecord,
        taken: ProtocolViolation,
    ) -> Result<()> {
        let bytes = encode_record(record)?;
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let tmp = self
            .dir
            .join(format!(".{name}.{}.{nonce}.tmp", std::process::id()));

        let result = (|| -> Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            match std::fs::hard_link(&tmp, self.dir.join(name)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(IpcError::Protocol(taken)),
                Err(e) => Err(e.into()),
            }
        })();

        if let Err(e) = std::fs::remove_file(&tmp) {
            tracing::debug!(path = %tmp.display(), "failed to remove temp record: {e}");
        }
        result
    }

    fn read_record(&self, name: &str) -> Result<Option<ChannelRecord>> {
        match std::fs::read(self.dir.join(name)) {
            Ok(bytes) => decode_record(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn handle_exists(&self) -> bool {
        self.dir.join(HANDLE_FILE).exists()
    }

    fn report_exists(&self) -> bool {
        self.dir.join(REPORT_FILE).exists()
    }

    fn read_published(&self) -> Result<Option<(u64, MemoryHandle)>> {
        match self.read_record(HANDLE_FILE)? {
            Some(ChannelRecord::Handle { exchange, handle }) => Ok(Some((exchange, handle))),
            Some(other) => Err(IpcError::DecodeFailed(format!(
                "expected handle record, found {other:?}"
            ))),
            None => Ok(None),
        }
    }

    /// Classify the marker, pinning it on first sight of a current exchange.
    fn readiness(&self) -> Result<Readiness> {
        let Some(exchange) = self.latch.exchange()? else {
            return Ok(Readiness::Unset);
        };
        if self.latch.is_confirmed() {
            return Ok(Readiness::Current);
        }
        if self.report_exists() {
            return Ok(Readiness::Stale);
        }
        // `clear` may have run between the two reads.
        if self.latch.exchange()? != Some(exchange) {
            return Ok(Readiness::Unset);
        }
        self.latch.confirm(exchange);
        Ok(Readiness::Current)
    }
}

impl ExchangeChannel for FileChannel {
    fn publish(&self, handle: &MemoryHandle) -> Result<()> {
        let exchange = new_exchange_id();
        self.write_once(
            HANDLE_FILE,
            &ChannelRecord::Handle {
                exchange,
                handle: handle.clone(),
            },
            ProtocolViolation::AlreadyPublished,
        )?;
        tracing::debug!(dir = %self.dir.display(), exchange, %handle, "handle published");
        Ok(())
    }

    fn signal_ready(&self) -> Result<()> {
        let Some((exchange, _)) = self.read_published()? else {
            return Err(IpcError::Protocol(ProtocolViolation::NotPublished));
        };
        self.latch.set(exchange)?;
        tracing::debug!(dir = %self.dir.display(), exchange, "readiness signaled");
        Ok(())
    }

    fn await_ready<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let readiness = self.readiness()?;
                if readiness == Readiness::Current {
                    return Ok(());
                }
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    return Err(if readiness == Readiness::Stale {
                        IpcError::Protocol(ProtocolViolation::StaleExchange)
                    } else {
                        IpcError::ReadyTimeout {
                            timeout_ms: timeout.as_millis() as u64,
                        }
                    });
                }
                tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            }
        })
    }

    fn read_handle(&self) -> Result<MemoryHandle> {
        let Some((exchange, handle)) = self.read_published()? else {
            return Err(IpcError::Protocol(ProtocolViolation::NotPublished));
        };
        // The consumer reads before it reports, so a filled report slot means
        // this handle's exchange is already over.
        let signaled = self.latch.exchange()?;
        let mismatched = signaled.is_some_and(|ready| ready != exchange);
        if mismatched || self.report_exists() {
            tracing::debug!(
                dir = %self.dir.display(),
                exchange,
                ?signaled,
                "refusing handle of a finished exchange"
            );
            return Err(IpcError::Protocol(ProtocolViolation::StaleExchange));
        }
        Ok(handle)
    }

    fn report(&self, report: &ConsumerReport) -> Result<()> {
        self.write_once(
            REPORT_FILE,
            &ChannelRecord::Report(*report),
            ProtocolViolation::AlreadyReported,
        )?;
        tracing::debug!(dir = %self.dir.display(), ?report, "consumer report written");
        Ok(())
    }

    fn read_report(&self) -> Result<Option<ConsumerReport>> {
        match self.read_record(REPORT_FILE)? {
            Some(ChannelRecord::Report(report)) => Ok(Some(report)),
            Some(other) => Err(IpcError::DecodeFailed(format!(
                "expected report record, found {other:?}"
            ))),
            None => Ok(None),
        }
    }

    fn await_report<'a>(&'a self) -> BoxFuture<'a, Result<ConsumerReport>> {
        Box::pin(async move {
            loop {
                if let Some(report) = self.read_report()? {
                    return Ok(report);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        })
    }

    fn state(&self) -> Result<ChannelState> {
        match self.readiness()? {
            Readiness::Current => Ok(ChannelState::Ready),
            Readiness::Stale => Ok(ChannelState::Stale),
            Readiness::Unset if self.handle_exists() => Ok(ChannelState::Published),
            Readiness::Unset => Ok(ChannelState::Empty),
        }
    }
}
