//! Scheduler: admission control, the worker pool, deadlines, cancellation,
//! and backpressure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::error::{Error, Result};
use crate::progress::ProgressBroker;
use crate::session::{Session, SessionLogEntry, SessionStatus, SessionStore};

use super::queue::JobQueue;
use super::worker::{Recorder, SessionPipeline, WorkerContext};

/// Scheduler policy knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool size (default: 32)
    pub worker_count: usize,
    /// Per-tenant cap on in-flight sessions (default: 8)
    pub per_tenant_cap: usize,
    /// Refuse admission when queue depth reaches this multiple of the pool
    pub queue_refuse_factor: usize,
    /// Resume admission when depth drops below this multiple of the pool
    pub queue_resume_factor: usize,
    /// Hard per-session deadline (default: 30 min)
    pub session_deadline: Duration,
    /// Grace window for cooperative cancellation (default: 30 s)
    pub grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 32,
            per_tenant_cap: 8,
            queue_refuse_factor: 4,
            queue_resume_factor: 2,
            session_deadline: Duration::from_secs(30 * 60),
            grace: Duration::from_secs(30),
        }
    }
}

enum RunEnd {
    Finished(Result<()>),
    CancelRequested,
    DeadlineFired,
}

/// Admission, queueing, and the fixed-size worker pool.
///
/// Each admitted session is owned by exactly one worker from `processing`
/// entry to its terminal transition.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn SessionStore>,
    broker: Arc<ProgressBroker>,
    pipeline: Arc<dyn SessionPipeline>,
    recorder: Recorder,
    queue: Arc<JobQueue>,
    cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
    tenant_active: Mutex<HashMap<String, usize>>,
    active_workers: AtomicUsize,
    refusing: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn SessionStore>,
        broker: Arc<ProgressBroker>,
        pipeline: Arc<dyn SessionPipeline>,
    ) -> Arc<Self> {
        let recorder = Recorder::new(Arc::clone(&store), Arc::clone(&broker));
        Arc::new(Self {
            config,
            store,
            broker,
            pipeline,
            recorder,
            queue: Arc::new(JobQueue::new()),
            cancels: Mutex::new(HashMap::new()),
            tenant_active: Mutex::new(HashMap::new()),
            active_workers: AtomicUsize::new(0),
            refusing: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Start the worker pool and recover sessions left over from a crash.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let recovery = self.store.recover_startup()?;
        for request_id in &recovery.interrupted {
            tracing::warn!(request_id, "session marked failed after restart");
        }
        for request_id in recovery.requeued {
            let session = self.store.get(&request_id)?;
            if let Some(session) = session {
                self.broker.register(&request_id);
                self.queue.push(request_id, session.priority);
            }
        }

        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for index in 0..self.config.worker_count {
            let scheduler = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                scheduler.worker_loop(index).await;
            }));
        }
        Ok(())
    }

    /// Stop the worker pool. In-flight sessions are abandoned, to be
    /// recovered as interrupted at the next startup.
    pub fn shutdown(&self) {
        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for worker in workers.drain(..) {
            worker.abort();
        }
    }

    /// Queue depth, for health reporting.
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Sessions currently in `processing`.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    /// Admit a session: validate, persist as pending, enforce caps, then
    /// promote to queued.
    pub fn submit(&self, session: Session) -> Result<String> {
        session.validate()?;

        // Backpressure with hysteresis on the queue depth.
        let depth = self.queue.depth();
        let refuse_at = self.config.queue_refuse_factor * self.config.worker_count;
        let resume_at = self.config.queue_resume_factor * self.config.worker_count;
        if self.refusing.load(Ordering::Relaxed) {
            if depth < resume_at {
                self.refusing.store(false, Ordering::Relaxed);
            } else {
                return Err(Error::Overloaded(format!("queue depth {depth}")));
            }
        }
        if depth >= refuse_at {
            self.refusing.store(true, Ordering::Relaxed);
            return Err(Error::Overloaded(format!("queue depth {depth}")));
        }

        // Per-tenant cap on in-flight sessions.
        if let Some(tenant) = &session.tenant {
            let mut tenants = self
                .tenant_active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let count = tenants.entry(tenant.clone()).or_insert(0);
            if *count >= self.config.per_tenant_cap {
                return Err(Error::Overloaded(format!(
                    "tenant {tenant} has {count} sessions in flight"
                )));
            }
            *count += 1;
        }

        let request_id = session.request_id.clone();
        let priority = session.priority;

        let admitted = (|| -> Result<()> {
            self.store.create(&session)?;
            self.broker.register(&request_id);

            let queued = self.store.update_status(&request_id, 0, SessionStatus::Queued)?;
            self.recorder.status(&request_id, queued.status);
            self.recorder.log(
                &request_id,
                SessionLogEntry::info("session admitted").with_payload(serde_json::json!({
                    "scope": session.scope,
                    "priority": priority,
                })),
            );

            self.queue.push(request_id.clone(), priority);
            Ok(())
        })();

        if let Err(e) = admitted {
            self.release_tenant(session.tenant.as_deref());
            return Err(e);
        }

        Ok(request_id)
    }

    /// Cancel a session. Queued sessions cancel immediately; processing
    /// sessions are signalled and cancel cooperatively within the grace
    /// window. Cancelling twice has the same effect as cancelling once.
    pub fn cancel(&self, request_id: &str) -> Result<SessionStatus> {
        let session = self
            .store
            .get(request_id)?
            .ok_or_else(|| Error::invalid_input(format!("unknown session {request_id}")))?;

        match session.status {
            SessionStatus::Queued => {
                let after =
                    self.transition_terminal(request_id, SessionStatus::Cancelled)?;
                self.release_tenant(session.tenant.as_deref());
                Ok(after)
            }
            SessionStatus::Processing => {
                let cancels = self
                    .cancels
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(signal) = cancels.get(request_id) {
                    let _ = signal.send(true);
                }
                Ok(SessionStatus::Processing)
            }
            status => Ok(status),
        }
    }

    fn release_tenant(&self, tenant: Option<&str>) {
        if let Some(tenant) = tenant {
            let mut tenants = self
                .tenant_active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(count) = tenants.get_mut(tenant) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    tenants.remove(tenant);
                }
            }
        }
    }

    /// Apply a terminal transition with CAS retries. Already-terminal
    /// sessions are left untouched (monotone terminality).
    fn transition_terminal(
        &self,
        request_id: &str,
        to: SessionStatus,
    ) -> Result<SessionStatus> {
        loop {
            let current = self
                .store
                .get(request_id)?
                .ok_or_else(|| Error::Internal(format!("session {request_id} vanished")))?;

            if current.status.is_terminal() {
                return Ok(current.status);
            }

            match self.store.update_status(request_id, current.version, to) {
                Ok(after) => {
                    self.recorder.status(request_id, after.status);
                    self.recorder.log(
                        request_id,
                        SessionLogEntry::info(format!("session {}", after.status)),
                    );
                    self.broker.mark_terminal(request_id);
                    return Ok(after.status);
                }
                Err(Error::VersionConflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, index: usize) {
        loop {
            let request_id = self.queue.pop().await;
            if let Err(e) = self.run_session(&request_id).await {
                tracing::error!(worker = index, request_id, error = %e, "worker run failed");
            }
        }
    }

    async fn run_session(&self, request_id: &str) -> Result<()> {
        let session = match self.store.get(request_id)? {
            Some(session) => session,
            None => return Ok(()),
        };

        // Cancelled while queued: nothing to do.
        if session.status != SessionStatus::Queued {
            return Ok(());
        }

        let session = match self.store.update_status(
            request_id,
            session.version,
            SessionStatus::Processing,
        ) {
            Ok(session) => session,
            // Lost the race (client cancel landed first).
            Err(Error::VersionConflict(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        self.recorder.status(request_id, SessionStatus::Processing);
        self.recorder
            .log(request_id, SessionLogEntry::info("session processing"));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut cancels = self
                .cancels
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            cancels.insert(request_id.to_string(), cancel_tx.clone());
        }
        self.active_workers.fetch_add(1, Ordering::Relaxed);

        let deadline = chrono::Utc::now()
            + chrono::Duration::from_std(self.config.session_deadline)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let ctx = WorkerContext {
            request_id: request_id.to_string(),
            cancel: cancel_rx.clone(),
            deadline,
        };

        let mut run = Box::pin(self.pipeline.run(&session, &ctx));
        let mut cancel_watch = cancel_rx.clone();

        let end = tokio::select! {
            result = &mut run => RunEnd::Finished(result.map(|_| ())),
            _ = sleep(self.config.session_deadline) => RunEnd::DeadlineFired,
            _ = cancel_watch.changed() => RunEnd::CancelRequested,
        };

        let terminal = match end {
            RunEnd::Finished(Ok(())) => SessionStatus::Completed,
            RunEnd::Finished(Err(Error::Cancelled)) => SessionStatus::Cancelled,
            RunEnd::Finished(Err(Error::DeadlineExceeded { .. })) => SessionStatus::TimedOut,
            RunEnd::Finished(Err(e)) => {
                self.recorder.log(
                    request_id,
                    SessionLogEntry::error(format!("session failed: {}", e.code()))
                        .with_payload(serde_json::json!({"code": e.code()})),
                );
                tracing::error!(request_id, error = %e, "session failed");
                SessionStatus::Failed
            }
            RunEnd::DeadlineFired | RunEnd::CancelRequested => {
                let target = if matches!(end, RunEnd::DeadlineFired) {
                    SessionStatus::TimedOut
                } else {
                    SessionStatus::Cancelled
                };
                // Signal the pipeline and allow the grace window for a
                // cooperative stop; afterwards the work is abandoned.
                let _ = cancel_tx.send(true);
                tokio::select! {
                    _ = &mut run => {}
                    _ = sleep(self.config.grace) => {
                        tracing::warn!(request_id, "worker wedged past grace window, abandoning");
                    }
                }
                target
            }
        };

        {
            let mut cancels = self
                .cancels
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            cancels.remove(request_id);
        }
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
        self.release_tenant(session.tenant.as_deref());

        self.transition_terminal(request_id, terminal)?;
        Ok(())
    }
}
