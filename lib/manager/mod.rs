//! Lifecycle of one write handle and the read snapshots derived from it.
//!
//! Snapshot visibility follows one of two policies. In near-real-time mode every snapshot
//! request re-derives the snapshot when writes happened since the last one. In periodic mode
//! a background task re-derives it on a fixed delay and requests return whatever the last
//! run produced. A second background task commits the writer on its own delay.

mod scheduler;

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

pub use scheduler::{ScheduledTask, Scheduler};

/// The engine's write side as seen by the coordinator.
pub trait IndexWriter: Send + Sync + 'static {
    type Snapshot: Send + Sync + 'static;

    /// make everything written so far durable
    fn commit(&self) -> Result<()>;

    fn open_snapshot(&self) -> Result<Self::Snapshot>;

    /// a newer snapshot than `current`, `None` when nothing changed
    fn reopen_if_changed(&self, _current: &Self::Snapshot) -> Result<Option<Self::Snapshot>> {
        self.open_snapshot().map(Some)
    }

    fn close(&self) -> Result<()>;
}

/// Operations that change what a snapshot would show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    AddDocuments,
    AddIndexes,
    DeleteDocuments,
    DeleteAll,
    UpdateDocuments,
    UpdateDocValues,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationKind::AddDocuments => "add_documents",
            MutationKind::AddIndexes => "add_indexes",
            MutationKind::DeleteDocuments => "delete_documents",
            MutationKind::DeleteAll => "delete_all",
            MutationKind::UpdateDocuments => "update_documents",
            MutationKind::UpdateDocValues => "update_doc_values",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Initialized,
    Destroyed,
}

struct Shared<W: IndexWriter> {
    writer: ArcSwapOption<W>,
    snapshot: ArcSwapOption<W::Snapshot>,
    changes: AtomicU64,
    nrt: AtomicBool,
    refresh_lock: Mutex<()>,
}

impl<W: IndexWriter> Shared<W> {
    fn mark_changed(&self) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }

    /// Re-derive the snapshot from the writer. Calls are serialized, each one does its own
    /// work. Changes that land while this runs stay counted for the next call.
    fn refresh(&self) -> Result<Arc<W::Snapshot>> {
        let _guard = self.refresh_lock.lock().unwrap();
        let token = self.changes.load(Ordering::SeqCst);
        let writer = self
            .writer
            .load_full()
            .ok_or_else(|| Error::Closed("index writer".to_string()))?;
        let next = match self.snapshot.load_full() {
            Some(cur) => match writer.reopen_if_changed(&cur)? {
                Some(s) => Arc::new(s),
                None => cur,
            },
            None => Arc::new(writer.open_snapshot()?),
        };
        self.snapshot.store(Some(next.clone()));
        let _ = self
            .changes
            .compare_exchange(token, 0, Ordering::SeqCst, Ordering::SeqCst);
        log::trace!("snapshot refreshed at change token {}", token);
        Ok(next)
    }

    fn commit(&self) -> Result<()> {
        match self.writer.load_full() {
            Some(w) => w.commit(),
            None => Err(Error::Closed("index writer".to_string())),
        }
    }
}

struct Control {
    state: State,
    refresh_period_ms: i64,
    commit_period_ms: i64,
    workers: usize,
    scheduler: Option<Arc<Scheduler>>,
    owns_scheduler: bool,
    refresh_task: Option<ScheduledTask>,
    commit_task: Option<ScheduledTask>,
}

type Opener<W> = Box<dyn Fn() -> Result<W> + Send + Sync>;

/// Owns the write handle, the current snapshot and the background tasks that keep them
/// fresh.
pub struct IndexManager<W: IndexWriter> {
    shared: Arc<Shared<W>>,
    control: Mutex<Control>,
    opener: Opener<W>,
}

/// Write access to the managed writer. Mutations go through `mutate` so the coordinator
/// learns about them.
pub struct WriteHandle<W: IndexWriter> {
    writer: Arc<W>,
    shared: Arc<Shared<W>>,
}

impl<W: IndexWriter> Clone for WriteHandle<W> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<W: IndexWriter> WriteHandle<W> {
    /// run a mutating operation, the change is recorded whether or not it succeeds
    pub fn mutate<R>(&self, kind: MutationKind, f: impl FnOnce(&W) -> R) -> R {
        let r = f(&self.writer);
        self.shared.mark_changed();
        log::trace!("writer mutated by {}", kind);
        r
    }

    /// The writer itself, for reads and calls that don't change the index.
    ///
    /// A mutation made through this reference is not counted, near-real-time snapshots miss
    /// it until `mutate` or `IndexManager::mark_index_changed` records a change.
    pub fn get(&self) -> &W {
        &self.writer
    }

    pub fn commit(&self) -> Result<()> {
        self.writer.commit()
    }
}

const HAZARD: &str = "snapshot refresh is off and near-real-time mode is off, snapshots stay stale until refresh() is called";

impl<W: IndexWriter> IndexManager<W> {
    /// `opener` creates the writer during `init`
    pub fn new<F>(cfg: &ManagerConfig, opener: F) -> Self
    where
        F: Fn() -> Result<W> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                writer: ArcSwapOption::empty(),
                snapshot: ArcSwapOption::empty(),
                changes: AtomicU64::new(0),
                nrt: AtomicBool::new(cfg.nrt),
                refresh_lock: Mutex::new(()),
            }),
            control: Mutex::new(Control {
                state: State::Uninitialized,
                refresh_period_ms: cfg.refresh_period_ms,
                commit_period_ms: cfg.commit_period_ms,
                workers: cfg.scheduler_workers,
                scheduler: None,
                owns_scheduler: false,
                refresh_task: None,
                commit_task: None,
            }),
            opener: Box::new(opener),
        }
    }

    /// Run background tasks on `scheduler` instead of a private one. It is never shut down
    /// by the manager. Ignored after `init`.
    pub fn with_scheduler(self, scheduler: Arc<Scheduler>) -> Self {
        {
            let mut c = self.control.lock().unwrap();
            if c.state != State::Uninitialized {
                log::warn!("index manager already initialized, keep its scheduler");
            } else {
                c.scheduler = Some(scheduler);
                c.owns_scheduler = false;
            }
        }
        self
    }

    pub fn state(&self) -> State {
        self.control.lock().unwrap().state
    }

    /// open the writer and the first snapshot, then start background tasks
    pub fn init(&self) -> Result<()> {
        let mut c = self.control.lock().unwrap();
        match c.state {
            State::Initialized => return Ok(()),
            State::Destroyed => return Err(Error::Closed("index manager".to_string())),
            State::Uninitialized => {}
        }

        let writer = Arc::new((self.opener)()?);
        let snapshot = match writer.open_snapshot() {
            Ok(s) => Arc::new(s),
            Err(e) => {
                if let Err(ce) = writer.close() {
                    log::warn!("can't close writer error {}", ce);
                }
                return Err(e);
            }
        };
        if c.scheduler.is_none() {
            c.scheduler = Some(Arc::new(Scheduler::new(c.workers)?));
            c.owns_scheduler = true;
        }
        self.shared.writer.store(Some(writer));
        self.shared.snapshot.store(Some(snapshot));
        self.shared.changes.store(0, Ordering::SeqCst);
        c.state = State::Initialized;

        self.schedule_refresh(&mut c)?;
        self.schedule_commit(&mut c)?;
        log::info!(
            "index manager initialized, nrt {} refresh {}ms commit {}ms",
            self.is_nrt(),
            c.refresh_period_ms,
            c.commit_period_ms
        );
        Ok(())
    }

    fn schedule_refresh(&self, c: &mut Control) -> Result<()> {
        if let Some(t) = c.refresh_task.take() {
            t.cancel();
        }
        let scheduler = match c.scheduler.as_ref() {
            Some(s) => s,
            None => return Ok(()),
        };
        match crate::config::period(c.refresh_period_ms) {
            Some(p) => {
                let weak = Arc::downgrade(&self.shared);
                let task = scheduler.schedule_with_fixed_delay("refresh snapshot", p, p, move || {
                    if let Some(shared) = Weak::upgrade(&weak) {
                        if let Err(e) = shared.refresh() {
                            log::error!("can't refresh snapshot error {}", e);
                        }
                    }
                })?;
                c.refresh_task = Some(task);
            }
            None => {
                if !self.is_nrt() {
                    log::warn!("{}", HAZARD);
                }
            }
        }
        Ok(())
    }

    fn schedule_commit(&self, c: &mut Control) -> Result<()> {
        if let Some(t) = c.commit_task.take() {
            t.cancel();
        }
        let scheduler = match c.scheduler.as_ref() {
            Some(s) => s,
            None => return Ok(()),
        };
        if let Some(p) = crate::config::period(c.commit_period_ms) {
            let weak = Arc::downgrade(&self.shared);
            let task = scheduler.schedule_with_fixed_delay("commit", p, p, move || {
                if let Some(shared) = Weak::upgrade(&weak) {
                    if let Err(e) = shared.commit() {
                        log::error!("can't commit error {}", e);
                    }
                }
            })?;
            c.commit_task = Some(task);
        }
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        match self.state() {
            State::Initialized => Ok(()),
            State::Uninitialized => Err(Error::Closed("index manager not initialized".to_string())),
            State::Destroyed => Err(Error::Closed("index manager destroyed".to_string())),
        }
    }

    pub fn writer(&self) -> Result<WriteHandle<W>> {
        self.ensure_initialized()?;
        let writer = self
            .shared
            .writer
            .load_full()
            .ok_or_else(|| Error::Closed("index writer".to_string()))?;
        Ok(WriteHandle {
            writer,
            shared: self.shared.clone(),
        })
    }

    /// the snapshot to query, re-derived first in near-real-time mode when writes are pending
    pub fn snapshot(&self) -> Result<Arc<W::Snapshot>> {
        self.ensure_initialized()?;
        if self.is_nrt() && self.is_index_changed() {
            return self.shared.refresh();
        }
        self.shared
            .snapshot
            .load_full()
            .ok_or_else(|| Error::Closed("index snapshot".to_string()))
    }

    /// re-derive the snapshot now, regardless of mode
    pub fn refresh(&self) -> Result<Arc<W::Snapshot>> {
        self.ensure_initialized()?;
        self.shared.refresh()
    }

    pub fn commit(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.shared.commit()
    }

    /// record a change made outside `WriteHandle::mutate`
    pub fn mark_index_changed(&self) {
        self.shared.mark_changed();
    }

    /// whether writes happened that the current snapshot may not show
    pub fn is_index_changed(&self) -> bool {
        self.shared.changes.load(Ordering::SeqCst) > 0
    }

    pub fn is_nrt(&self) -> bool {
        self.shared.nrt.load(Ordering::SeqCst)
    }

    pub fn set_nrt(&self, nrt: bool) {
        let c = self.control.lock().unwrap();
        self.shared.nrt.store(nrt, Ordering::SeqCst);
        if c.state == State::Initialized && c.refresh_task.is_none() && !nrt {
            log::warn!("{}", HAZARD);
        }
    }

    pub fn refresh_period(&self) -> Option<Duration> {
        crate::config::period(self.control.lock().unwrap().refresh_period_ms)
    }

    pub fn commit_period(&self) -> Option<Duration> {
        crate::config::period(self.control.lock().unwrap().commit_period_ms)
    }

    /// change the refresh delay, a running manager reschedules the task, `ms <= 0` stops it
    pub fn set_refresh_period(&self, ms: i64) -> Result<()> {
        let mut c = self.control.lock().unwrap();
        let old = std::mem::replace(&mut c.refresh_period_ms, ms);
        if old != ms && c.state == State::Initialized {
            self.schedule_refresh(&mut c)?;
        }
        Ok(())
    }

    /// change the commit delay, a running manager reschedules the task, `ms <= 0` stops it
    pub fn set_commit_period(&self, ms: i64) -> Result<()> {
        let mut c = self.control.lock().unwrap();
        let old = std::mem::replace(&mut c.commit_period_ms, ms);
        if old != ms && c.state == State::Initialized {
            self.schedule_commit(&mut c)?;
        }
        Ok(())
    }

    /// Stop background work, then close the snapshot and the writer. Safe to call twice.
    pub fn destroy(&self) {
        let mut c = self.control.lock().unwrap();
        if c.state == State::Destroyed {
            return;
        }
        c.state = State::Destroyed;
        if let Some(t) = c.refresh_task.take() {
            t.cancel();
        }
        if let Some(t) = c.commit_task.take() {
            t.cancel();
        }
        if let Some(s) = c.scheduler.take() {
            if c.owns_scheduler {
                s.shutdown();
            }
        }

        // wait out a refresh in flight
        let guard = self.shared.refresh_lock.lock().unwrap();
        self.shared.snapshot.store(None);
        if let Some(w) = self.shared.writer.swap(None) {
            if let Err(e) = w.close() {
                log::warn!("can't close writer error {}", e);
            }
        }
        drop(guard);
        log::info!("index manager destroyed");
    }
}

impl<W: IndexWriter> Drop for IndexManager<W> {
    fn drop(&mut self) {
        self.destroy();
    }
}
