use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::ingest::{IngestPipeline, DEFAULT_FETCH_TIMEOUT};
use crate::store::WorkflowStore;
use crate::workflow::Workflow;
use crate::{Error, Result};

pub const DEFAULT_RECONCILE_EVERY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub reconcile_every: Duration,
    pub fetch_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_every: DEFAULT_RECONCILE_EVERY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// Changes made by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub added: Vec<i64>,
    pub rescheduled: Vec<i64>,
    pub removed: Vec<i64>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.rescheduled.is_empty() && self.removed.is_empty()
    }
}

/// Dropping the handle stops the timer after any in-flight run.
struct TimerHandle {
    interval_minutes: i64,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct BackgroundLoop {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Fires `fire` every `period`, re-arming only after the previous fire returns.
pub(crate) fn spawn_timer<F, Fut>(
    period: Duration,
    mut stop: watch::Receiver<bool>,
    mut fire: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                () = tokio::time::sleep(period) => {}
            }
            fire().await;
        }
    })
}

fn interval_period(minutes: i64) -> Duration {
    Duration::from_secs(minutes.unsigned_abs().saturating_mul(60))
}

/// One recurring timer per schedulable workflow.
///
/// Only reconciliation creates, reschedules or removes timers, and it never
/// writes workflow data.
pub struct Scheduler {
    pipeline: Arc<IngestPipeline>,
    store: WorkflowStore,
    config: SchedulerConfig,
    timers: Mutex<HashMap<i64, TimerHandle>>,
    reconcile_loop: Mutex<Option<BackgroundLoop>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(pipeline: Arc<IngestPipeline>, config: SchedulerConfig) -> Self {
        Self {
            store: pipeline.store().clone(),
            pipeline,
            config,
            timers: Mutex::new(HashMap::new()),
            reconcile_loop: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<IngestPipeline> {
        &self.pipeline
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Workflow id to interval minutes for every live timer.
    pub async fn timers(&self) -> BTreeMap<i64, i64> {
        self.timers
            .lock()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.interval_minutes))
            .collect()
    }

    fn arm(&self, workflow_id: i64, interval_minutes: i64) -> TimerHandle {
        let (stop, stopped) = watch::channel(false);
        let pipeline = Arc::clone(&self.pipeline);

        let task = spawn_timer(interval_period(interval_minutes), stopped, move || {
            let pipeline = Arc::clone(&pipeline);
            async move {
                if let Err(e) = pipeline.run(workflow_id).await {
                    tracing::error!(workflow_id, error = %e, "scheduled run failed");
                }
            }
        });

        tracing::debug!(workflow_id, interval_minutes, "timer armed");
        TimerHandle {
            interval_minutes,
            stop,
            task,
        }
    }

    /// Aligns timers with the schedulable workflows in storage.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let workflows = self.store.list_all().await?;
        let desired: HashMap<i64, i64> = workflows
            .iter()
            .filter(|w| w.is_schedulable())
            .map(|w| (w.id, w.recheck_interval_minutes))
            .collect();

        let mut report = ReconcileReport::default();
        let mut timers = self.timers.lock().await;

        timers.retain(|id, _| {
            let keep = desired.contains_key(id);
            if !keep {
                report.removed.push(*id);
            }
            keep
        });

        for (id, minutes) in desired {
            match timers.get(&id).map(|h| h.interval_minutes) {
                Some(current) if current == minutes => {}
                Some(_) => {
                    timers.insert(id, self.arm(id, minutes));
                    report.rescheduled.push(id);
                }
                None => {
                    timers.insert(id, self.arm(id, minutes));
                    report.added.push(id);
                }
            }
        }

        report.added.sort_unstable();
        report.rescheduled.sort_unstable();
        report.removed.sort_unstable();

        if !report.is_unchanged() {
            tracing::info!(
                added = ?report.added,
                rescheduled = ?report.rescheduled,
                removed = ?report.removed,
                active = timers.len(),
                "timers reconciled"
            );
        }
        Ok(report)
    }

    /// Applies one workflow's current definition right away.
    pub async fn reconcile_workflow(&self, workflow_id: i64) -> Result<ReconcileReport> {
        let workflow = match self.store.get(workflow_id).await {
            Ok(workflow) => Some(workflow),
            Err(Error::WorkflowNotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let mut report = ReconcileReport::default();
        let mut timers = self.timers.lock().await;

        match workflow.filter(Workflow::is_schedulable) {
            Some(wf) => match timers.get(&wf.id).map(|h| h.interval_minutes) {
                Some(current) if current == wf.recheck_interval_minutes => {}
                Some(_) => {
                    timers.insert(wf.id, self.arm(wf.id, wf.recheck_interval_minutes));
                    report.rescheduled.push(wf.id);
                }
                None => {
                    timers.insert(wf.id, self.arm(wf.id, wf.recheck_interval_minutes));
                    report.added.push(wf.id);
                }
            },
            None => {
                if timers.remove(&workflow_id).is_some() {
                    report.removed.push(workflow_id);
                }
            }
        }

        if !report.is_unchanged() {
            tracing::info!(workflow_id, ?report, "workflow timer updated");
        }
        Ok(report)
    }

    /// Starts the periodic reconciliation loop; the first pass runs immediately.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.reconcile_loop.lock().await;
        if slot.is_some() {
            return;
        }

        let (stop, mut stopped) = watch::channel(false);
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let period = self.config.reconcile_every;

        let task = tokio::spawn(async move {
            loop {
                let Some(this) = scheduler.upgrade() else {
                    break;
                };
                if let Err(e) = this.reconcile().await {
                    tracing::error!(error = %e, "reconciliation failed");
                }
                drop(this);

                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    () = tokio::time::sleep(period) => {}
                }
            }
        });

        tracing::info!(reconcile_every = ?period, "scheduler started");
        *slot = Some(BackgroundLoop { stop, task });
    }

    /// Stops reconciliation and all timers, waiting for in-flight runs to finish.
    pub async fn shutdown(&self) {
        if let Some(background) = self.reconcile_loop.lock().await.take() {
            let _ = background.stop.send(true);
            if let Err(e) = background.task.await {
                tracing::warn!(error = %e, "reconciliation loop ended abnormally");
            }
        }

        let handles: Vec<(i64, TimerHandle)> = self.timers.lock().await.drain().collect();
        for (workflow_id, handle) in handles {
            let _ = handle.stop.send(true);
            if let Err(e) = handle.task.await {
                tracing::warn!(workflow_id, error = %e, "timer ended abnormally");
            }
        }

        tracing::info!("scheduler stopped");
    }
}
