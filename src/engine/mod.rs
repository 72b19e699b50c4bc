mod availability;
mod conflict;
mod error;
mod ledger;
mod mutations;
mod queries;
mod schedule;
mod store;

pub use availability::{booked_slots, operating_slots, run_is_free, slot_availability};
pub use error::{EngineError, ErrorKind};
pub use schedule::{expand, expand_on, expand_rolling, in_window, rolling_window};
pub use store::{SharedAccount, SharedCalendar, SharedSkill, SkillRow, Store};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::directory::UserDirectory;
use crate::journal::Journal;
use crate::model::*;
use crate::notify::NotifyHub;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type QueuedAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the journal and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. One flush_sync for the whole batch, then answer every sender.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut journal, batch);
                if let Some(other) = deferred {
                    handle_control(&mut journal, other);
                }
            }
            other => handle_control(&mut journal, other),
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: Vec<QueuedAppend>) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(journal, &batch);
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(journal: &mut Journal, batch: &[QueuedAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| journal.append_buffered(event));
    // Flush even after a failed append so a half-written batch is not carried
    // into the next one.
    let flushed = journal.flush_sync();
    appended.and(flushed)
}

fn handle_control(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_compact_file(journal.path(), &events)
                .and_then(|()| journal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { event, response } => commit_batch(journal, vec![(event, response)]),
    }
}

/// Runtime knobs that do not come from the journal.
pub struct EngineOptions {
    pub lock_timeout: Duration,
    pub clock: Arc<dyn Clock>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }
}

/// The booking engine: schedules, skills, calendars and credit accounts.
///
/// Lock order for any mutation is commit gate (shared), skill lease, mentor
/// calendar, credit account. Compaction takes the gate exclusively so its
/// snapshot never interleaves with a commit.
pub struct Engine {
    pub(super) store: Store,
    pub(super) journal_tx: mpsc::Sender<JournalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) users: Arc<dyn UserDirectory>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) lock_timeout: Duration,
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    pub fn new(
        journal_path: PathBuf,
        notify: Arc<NotifyHub>,
        users: Arc<dyn UserDirectory>,
    ) -> io::Result<Self> {
        Self::with_options(journal_path, notify, users, EngineOptions::default())
    }

    pub fn with_options(
        journal_path: PathBuf,
        notify: Arc<NotifyHub>,
        users: Arc<dyn UserDirectory>,
        options: EngineOptions,
    ) -> io::Result<Self> {
        let events = Journal::recover(&journal_path)?;
        let journal = Journal::open(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let store = Store::replay(&events);
        tracing::info!(
            "replayed {} journal records from {}",
            events.len(),
            journal_path.display()
        );

        Ok(Self {
            store,
            journal_tx,
            notify,
            users,
            clock: options.clock,
            lock_timeout: options.lock_timeout,
            commit_gate: RwLock::new(()),
        })
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Write an event through the background group-commit writer.
    pub(super) async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    /// Journal-append then index. For events with no guarded state.
    pub(super) async fn persist_shared(&self, event: &Event) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        self.store.apply_shared(event);
        Ok(())
    }
}
