use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::git::{FetchSpec, GitClient};
use crate::parser::Parser;
use crate::store::Store;
use crate::types::{JobStatus, SyncJob};

/// Delay before the next cycle after a storage failure. There is no
/// exponential growth and no retry cap: a broken catalog keeps retrying
/// at this fixed rate until the condition is fixed or it is deleted.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Background scheduler that drains the sync job queue.
///
/// One worker thread processes one job at a time: concurrent clones
/// would race on the shared workspace directory, and concurrent
/// reconciliations would contend on the same catalog rows. The wake
/// signal is a bounded single-slot queue; a wake arriving while one is
/// already pending is dropped, which preserves the "exactly one cycle
/// runs, pending work is never lost" contract.
pub struct Syncer {
    inner: Arc<Inner>,
    wake_rx: Mutex<Option<Receiver<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    store: Arc<dyn Store>,
    git: Arc<dyn GitClient>,
    clone_root: PathBuf,
    retry_delay: Duration,
    wake_tx: SyncSender<()>,
    stopping: AtomicBool,
}

impl Syncer {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, git: Arc<dyn GitClient>, clone_root: PathBuf) -> Self {
        Self::with_retry_delay(store, git, clone_root, DEFAULT_RETRY_DELAY)
    }

    #[must_use]
    pub fn with_retry_delay(
        store: Arc<dyn Store>,
        git: Arc<dyn GitClient>,
        clone_root: PathBuf,
        retry_delay: Duration,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::sync_channel(1);

        Self {
            inner: Arc::new(Inner {
                store,
                git,
                clone_root,
                retry_delay,
                wake_tx,
                stopping: AtomicBool::new(false),
            }),
            wake_rx: Mutex::new(Some(wake_rx)),
            worker: Mutex::new(None),
        }
    }

    /// Idempotently ensures a live job exists for the catalog and wakes
    /// the worker. Returns the (possibly pre-existing) job row; fails
    /// only on storage errors.
    pub fn enqueue(&self, user_id: Option<&str>, catalog_id: &str) -> Result<SyncJob> {
        let job = self.inner.store.enqueue_sync_job(catalog_id, user_id)?;
        debug!(job = %job.id, catalog = %job.catalog_id, "sync job enqueued");
        self.inner.wake();
        Ok(job)
    }

    /// Starts the worker thread. No-op if already running. Jobs left in
    /// `running` by a crash are requeued first, so the work is retried
    /// rather than lost; reconciliation is idempotent, so a duplicated
    /// cycle is harmless.
    pub fn run(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        let requeued = self.inner.store.requeue_running_jobs()?;
        if requeued > 0 {
            info!(count = requeued, "requeued orphaned running jobs");
        }

        let rx = lock(&self.wake_rx)
            .take()
            .ok_or_else(|| Error::Config("syncer cannot be restarted after stop".to_string()))?;

        let inner = Arc::clone(&self.inner);
        *worker = Some(std::thread::spawn(move || worker_loop(&inner, &rx)));

        self.inner.wake();
        Ok(())
    }

    /// Signals the worker to exit and waits for it. An in-flight cycle
    /// is not interrupted; only the next one is prevented.
    pub fn stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.wake();

        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
    }

    /// Processes at most one queued job end-to-end. Returns Err only
    /// for storage failures that should abort the attempt; git and
    /// parse failures are recorded on the job instead.
    pub fn process(&self) -> Result<()> {
        self.inner.process()
    }

    /// Re-wakes the worker if queued jobs remain, so a burst of enqueues
    /// drains completely before the worker idles.
    pub fn next(&self) {
        self.inner.next();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    /// Non-blocking wake; a send against a full slot is dropped because
    /// a cycle is already pending.
    fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    fn process(&self) -> Result<()> {
        let Some(job) = self.store.next_queued_job()? else {
            return Ok(());
        };

        self.store.set_job_status(&job.id, JobStatus::Running)?;

        let catalog = match self.store.get_catalog(&job.catalog_id)? {
            Some(catalog) => catalog,
            None => {
                // Jobs cascade-delete with their catalog, so this points
                // at a storage problem. Requeue and surface it.
                self.store.set_job_status(&job.id, JobStatus::Queued)?;
                return Err(Error::NotFound);
            }
        };

        info!(catalog = %catalog.name, job = %job.id, "syncing catalog");

        let spec = FetchSpec {
            url: catalog.url.clone(),
            revision: catalog.revision.clone(),
            path: self.clone_root.join(&catalog.name),
        };

        let repo = match self.git.fetch(&spec) {
            Ok(repo) => repo,
            Err(e) => {
                // Fetch failures are usually configuration problems, not
                // transient blips: the job ends in error and only a
                // fresh enqueue retries it.
                warn!(catalog = %catalog.name, "git fetch failed: {e}");
                self.store.set_job_status(&job.id, JobStatus::Error)?;
                return Ok(());
            }
        };

        if catalog.sha.as_deref() == Some(repo.head()) {
            debug!(catalog = %catalog.name, sha = repo.head(), "catalog unchanged");
            self.store.set_job_status(&job.id, JobStatus::Done)?;
            return Ok(());
        }

        let (resources, report) = Parser::new(&repo, catalog.context_dir.as_deref()).parse();

        if let Err(e) =
            self.store
                .reconcile_catalog(&catalog.id, repo.head(), &resources, &report)
        {
            // Storage hiccups are assumed transient: requeue so a later
            // cycle retries, and let the worker apply the backoff.
            self.store.set_job_status(&job.id, JobStatus::Queued)?;
            return Err(e);
        }

        self.store.set_job_status(&job.id, JobStatus::Done)?;
        info!(
            catalog = %catalog.name,
            sha = repo.head(),
            resources = resources.len(),
            issues = report.issues.len(),
            errors = report.errors.len(),
            "catalog synced"
        );
        Ok(())
    }

    fn next(&self) {
        match self.store.count_queued_jobs() {
            Ok(count) if count > 0 => self.wake(),
            Ok(_) => {}
            Err(e) => warn!("failed to check queue: {e}"),
        }
    }
}

fn worker_loop(inner: &Inner, rx: &Receiver<()>) {
    loop {
        if rx.recv().is_err() {
            break;
        }
        if inner.stopping.load(Ordering::SeqCst) {
            break;
        }

        match inner.process() {
            Ok(()) => inner.next(),
            Err(e) => {
                warn!("sync cycle failed: {e}");
                // Fixed backoff before the next attempt; a wake or stop
                // arriving earlier cuts the wait short.
                match rx.recv_timeout(inner.retry_delay) {
                    Ok(()) | Err(RecvTimeoutError::Timeout) => {
                        if inner.stopping.load(Ordering::SeqCst) {
                            break;
                        }
                        inner.wake();
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }
    }

    debug!("sync worker stopped");
}
