use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use super::engine::{IngestionEngine, LoadReport};
use super::record::Record;
use super::registry::TableRegistry;
use super::transformer::Transformer;
use crate::source::{Attachment, AttachmentSource};
use crate::storage::Storage;
use crate::store::WorkflowStore;
use crate::workflow::{LogStatus, NewWorkflowLog, RunStatus, Workflow};
use crate::{Error, Result};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// What one check-and-ingest attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// No matching attachment, or the source could not be reached in time.
    NoAttachment { reason: MissReason },
    /// The newest match is the message ingested last time.
    AlreadyProcessed { source_message_id: String },
    Ingested {
        filename: String,
        source_message_id: String,
        rows_processed: usize,
        rows_inserted: usize,
        rows_skipped: usize,
    },
    /// Attachment present but unusable.
    Failed { filename: String, reason: String },
}

impl RunOutcome {
    /// Status written to the workflow, if the outcome writes one.
    #[must_use]
    pub const fn run_status(&self) -> Option<RunStatus> {
        match self {
            Self::NoAttachment { .. } => Some(RunStatus::InfoNoEmail),
            Self::AlreadyProcessed { .. } => None,
            Self::Ingested { .. } => Some(RunStatus::Success),
            Self::Failed { .. } => Some(RunStatus::Failure),
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    NotFound,
    TimedOut,
    SourceError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow_id: i64,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub message: String,
}

/// Fetch, dedupe, transform and load for one workflow at a time.
///
/// Runs for the same workflow are serialized; runs for different
/// workflows proceed independently. Every attempt writes exactly one log row,
/// in the same transaction as any workflow state and ingested rows.
pub struct IngestPipeline {
    storage: Storage,
    store: WorkflowStore,
    source: Arc<dyn AttachmentSource>,
    transformer: Transformer,
    fetch_timeout: Duration,
    run_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl IngestPipeline {
    #[must_use]
    pub fn new(storage: Storage, source: Arc<dyn AttachmentSource>) -> Self {
        Self {
            store: WorkflowStore::new(&storage),
            storage,
            source,
            transformer: Transformer::new(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    #[must_use]
    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Scheduled entry point.
    pub async fn run(&self, workflow_id: i64) -> Result<RunReport> {
        self.execute(workflow_id).await
    }

    /// Manual entry point; the ownership check happens before any other I/O.
    pub async fn run_for_user(&self, user_id: i64, workflow_id: i64) -> Result<RunReport> {
        self.store.get_owned(user_id, workflow_id).await?;
        self.execute(workflow_id).await
    }

    async fn run_lock(&self, workflow_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().await;
        Arc::clone(locks.entry(workflow_id).or_default())
    }

    /// Drops the serialization lock of a deleted workflow.
    pub async fn forget(&self, workflow_id: i64) {
        self.run_locks.lock().await.remove(&workflow_id);
    }

    async fn execute(&self, workflow_id: i64) -> Result<RunReport> {
        let run_id = Uuid::now_v7();
        let span = tracing::info_span!("workflow_run", workflow_id, run_id = %run_id);
        self.execute_serialized(workflow_id, run_id).instrument(span).await
    }

    async fn execute_serialized(&self, workflow_id: i64, run_id: Uuid) -> Result<RunReport> {
        let lock = self.run_lock(workflow_id).await;
        let _guard = lock.lock().await;

        // Read after taking the lock so the marker reflects the previous run.
        let workflow = self.store.get(workflow_id).await?;
        let report = self.check_and_ingest(&workflow, run_id).await?;

        tracing::info!(
            status = report.outcome.run_status().map_or("UNCHANGED", |s| s.as_str()),
            message = %report.message,
            "run finished"
        );
        Ok(report)
    }

    async fn check_and_ingest(&self, workflow: &Workflow, run_id: Uuid) -> Result<RunReport> {
        let filter = workflow.filter();

        let fetched = tokio::time::timeout(self.fetch_timeout, self.source.find(&filter)).await;
        let attachment = match fetched {
            Ok(Ok(Some(attachment))) => attachment,
            Ok(Ok(None)) => return self.record_miss(workflow, run_id, MissReason::NotFound).await,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, source = self.source.name(), "attachment source failed");
                return self
                    .record_miss(workflow, run_id, MissReason::SourceError(e.to_string()))
                    .await;
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.fetch_timeout, "attachment fetch timed out");
                return self.record_miss(workflow, run_id, MissReason::TimedOut).await;
            }
        };

        let marker = workflow.last_processed_email_id.as_deref();
        if marker == Some(attachment.source_message_id.as_str()) {
            return self.record_duplicate(workflow, run_id, attachment).await;
        }

        tracing::info!(
            filename = %attachment.filename,
            source_message_id = %attachment.source_message_id,
            bytes = attachment.bytes.len(),
            "new attachment found"
        );

        let output = match self.transformer.transform(&attachment.bytes, &attachment.filename) {
            Ok(output) if output.is_empty() => {
                let reason = "No data produced after cleaning".to_string();
                return self.record_failure(workflow, run_id, attachment, reason).await;
            }
            Ok(output) => output,
            Err(e) => return self.record_failure(workflow, run_id, attachment, e.to_string()).await,
        };

        let now = Utc::now();
        let load = match self
            .commit_ingest(workflow, run_id, &attachment, &output.records, now)
            .await
        {
            Ok(load) => load,
            Err(e) => {
                self.record_store_error(workflow, run_id, &attachment, &e).await;
                return Err(e);
            }
        };

        Ok(RunReport {
            run_id,
            workflow_id: workflow.id,
            message: success_message(load.inserted),
            outcome: RunOutcome::Ingested {
                filename: attachment.filename,
                source_message_id: attachment.source_message_id,
                rows_processed: output.records.len(),
                rows_inserted: load.inserted,
                rows_skipped: load.skipped,
            },
        })
    }

    /// Rows, workflow state and the SUCCESS log in one transaction.
    ///
    /// The transaction rolls back when dropped on an early return.
    async fn commit_ingest(
        &self,
        workflow: &Workflow,
        run_id: Uuid,
        attachment: &Attachment,
        records: &[Record],
        now: DateTime<Utc>,
    ) -> Result<LoadReport> {
        let mut tx = self.storage.begin().await?;

        let relation = TableRegistry::ensure_relation(&mut tx, workflow.id).await?;
        let load = IngestionEngine::load(&mut tx, records, workflow.user_id, &relation).await?;

        WorkflowStore::record_run(
            &mut tx,
            workflow.id,
            RunStatus::Success,
            now,
            Some(attachment.source_message_id.as_str()),
        )
        .await?;
        let log = NewWorkflowLog::new(
            workflow,
            run_id,
            LogStatus::Success,
            success_message(load.inserted),
        )
        .with_file(&attachment.filename)
        .with_rows(i64::try_from(load.inserted).unwrap_or(i64::MAX));
        WorkflowStore::append_log(&mut tx, &log, now).await?;

        tx.commit().await?;
        Ok(load)
    }

    /// Leaves a FAILURE row behind when the ingest transaction could not commit.
    async fn record_store_error(
        &self,
        workflow: &Workflow,
        run_id: Uuid,
        attachment: &Attachment,
        error: &Error,
    ) {
        tracing::error!(
            error = %error,
            filename = %attachment.filename,
            "ingest transaction failed"
        );
        let message = format!("Failed to store {}: {error}", attachment.filename);
        let now = Utc::now();

        let written = async {
            let mut tx = self.storage.begin().await?;
            // A workflow deleted mid-run still gets its audit row.
            match WorkflowStore::record_run(&mut tx, workflow.id, RunStatus::Failure, now, None)
                .await
            {
                Ok(()) | Err(Error::WorkflowNotFound(_)) => {}
                Err(e) => return Err(e),
            }
            let log = NewWorkflowLog::new(workflow, run_id, LogStatus::Failure, message)
                .with_file(&attachment.filename);
            WorkflowStore::append_log(&mut tx, &log, now).await?;
            tx.commit().await?;
            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = written {
            tracing::error!(error = %e, "failed run could not be recorded");
        }
    }

    async fn record_miss(
        &self,
        workflow: &Workflow,
        run_id: Uuid,
        reason: MissReason,
    ) -> Result<RunReport> {
        let message = match &reason {
            MissReason::NotFound => "No new email found matching the trigger.".to_string(),
            MissReason::TimedOut => format!(
                "Attachment fetch timed out after {}s; treated as no email.",
                self.fetch_timeout.as_secs()
            ),
            MissReason::SourceError(e) => {
                format!("Attachment source unavailable ({e}); treated as no email.")
            }
        };

        let now = Utc::now();
        let mut tx = self.storage.begin().await?;
        WorkflowStore::record_run(&mut tx, workflow.id, RunStatus::InfoNoEmail, now, None).await?;
        let log = NewWorkflowLog::new(workflow, run_id, LogStatus::Info, message.clone());
        WorkflowStore::append_log(&mut tx, &log, now).await?;
        tx.commit().await?;

        Ok(RunReport {
            run_id,
            workflow_id: workflow.id,
            outcome: RunOutcome::NoAttachment { reason },
            message,
        })
    }

    async fn record_duplicate(
        &self,
        workflow: &Workflow,
        run_id: Uuid,
        attachment: Attachment,
    ) -> Result<RunReport> {
        let message = format!(
            "Email {} already processed; nothing ingested.",
            attachment.source_message_id
        );

        let mut tx = self.storage.begin().await?;
        let log = NewWorkflowLog::new(workflow, run_id, LogStatus::Info, message.clone())
            .with_file(&attachment.filename);
        WorkflowStore::append_log(&mut tx, &log, Utc::now()).await?;
        tx.commit().await?;

        Ok(RunReport {
            run_id,
            workflow_id: workflow.id,
            outcome: RunOutcome::AlreadyProcessed {
                source_message_id: attachment.source_message_id,
            },
            message,
        })
    }

    async fn record_failure(
        &self,
        workflow: &Workflow,
        run_id: Uuid,
        attachment: Attachment,
        reason: String,
    ) -> Result<RunReport> {
        tracing::warn!(
            filename = %attachment.filename,
            reason = %reason,
            "attachment could not be processed"
        );
        let message = format!("Failed to process {}: {reason}", attachment.filename);

        let now = Utc::now();
        let mut tx = self.storage.begin().await?;
        WorkflowStore::record_run(&mut tx, workflow.id, RunStatus::Failure, now, None).await?;
        let log = NewWorkflowLog::new(workflow, run_id, LogStatus::Failure, message.clone())
            .with_file(&attachment.filename);
        WorkflowStore::append_log(&mut tx, &log, now).await?;
        tx.commit().await?;

        Ok(RunReport {
            run_id,
            workflow_id: workflow.id,
            outcome: RunOutcome::Failed {
                filename: attachment.filename,
                reason,
            },
            message,
        })
    }
}

fn success_message(inserted: usize) -> String {
    format!("Ingestion successful. Processed {inserted} rows.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, MessageMeta, NullSource, SourceError, SourceResult};
    use crate::workflow::{NewWorkflow, TriggerFilter};
    use async_trait::async_trait;

    const REPORT: &str = "order_id,product_id,customer_id,order_qty,delivery_qty,\
                          delivery_date,on_time,in_full\n\
                          A1,P1,C1,10,10,2025-10-14,1,1\n\
                          A2,P2,C1,5,4,2025-10-14,1,0\n";

    fn meta(subject: &str) -> MessageMeta {
        MessageMeta {
            subject: subject.into(),
            sender: None,
            received_at: Utc::now(),
        }
    }

    async fn setup(source: Arc<dyn AttachmentSource>) -> (Storage, IngestPipeline, Workflow) {
        let storage = Storage::open_memory().await.unwrap();
        let pipeline = IngestPipeline::new(storage.clone(), source);
        let workflow = pipeline
            .store()
            .create(7, NewWorkflow::new("Client X", "Daily Sales"))
            .await
            .unwrap();
        (storage, pipeline, workflow)
    }

    #[tokio::test]
    async fn test_successful_run_commits_rows_state_and_log() {
        let source = Arc::new(MemorySource::new());
        source.deliver("msg-1", meta("Daily Sales Report"), "report.csv", REPORT).await;
        let (storage, pipeline, wf) = setup(source).await;

        let report = pipeline.run(wf.id).await.unwrap();
        assert!(matches!(
            report.outcome,
            RunOutcome::Ingested { rows_inserted: 2, rows_skipped: 0, .. }
        ));
        assert_eq!(report.message, "Ingestion successful. Processed 2 rows.");

        let wf = pipeline.store().get(wf.id).await.unwrap();
        assert_eq!(wf.last_processed_email_id.as_deref(), Some("msg-1"));
        assert_eq!(wf.last_run_status, Some(RunStatus::Success));
        assert!(wf.last_run_timestamp.is_some());

        let logs = pipeline.store().logs_for_workflow(wf.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Success);
        assert_eq!(logs[0].rows_inserted, 2);
        assert_eq!(logs[0].run_id, report.run_id);

        let rows = TableRegistry::new(&storage).fetch_rows(wf.id, 10).await.unwrap();
        assert!(rows.iter().all(|r| r.record.tenant_id == 7));
    }

    #[tokio::test]
    async fn test_no_email_is_info_not_failure() {
        let (_storage, pipeline, wf) = setup(Arc::new(NullSource)).await;

        let report = pipeline.run(wf.id).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::NoAttachment { reason: MissReason::NotFound });

        let wf = pipeline.store().get(wf.id).await.unwrap();
        assert_eq!(wf.last_run_status, Some(RunStatus::InfoNoEmail));
        let logs = pipeline.store().logs_for_workflow(wf.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Info);
        assert_eq!(logs[0].rows_inserted, 0);
    }

    struct SlowSource;

    #[async_trait]
    impl AttachmentSource for SlowSource {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn find(&self, _filter: &TriggerFilter) -> SourceResult<Option<Attachment>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl AttachmentSource for BrokenSource {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn find(&self, _filter: &TriggerFilter) -> SourceResult<Option<Attachment>> {
            Err(SourceError::Unavailable("mailbox offline".into()))
        }
    }

    /// Deletes the workflow it serves before handing over the attachment.
    struct VanishingSource {
        store: WorkflowStore,
        owner: i64,
        workflow_id: i64,
    }

    #[async_trait]
    impl AttachmentSource for VanishingSource {
        fn name(&self) -> &'static str {
            "vanishing"
        }

        async fn find(&self, _filter: &TriggerFilter) -> SourceResult<Option<Attachment>> {
            self.store
                .delete(self.owner, self.workflow_id)
                .await
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;
            Ok(Some(Attachment {
                bytes: REPORT.as_bytes().to_vec(),
                filename: "report.csv".into(),
                source_message_id: "msg-1".into(),
            }))
        }
    }

    #[tokio::test]
    async fn test_failed_ingest_commit_still_logs_the_attempt() {
        let storage = Storage::open_memory().await.unwrap();
        let store = WorkflowStore::new(&storage);
        let wf = store.create(7, NewWorkflow::new("wf", "Daily")).await.unwrap();
        let source = VanishingSource {
            store: store.clone(),
            owner: 7,
            workflow_id: wf.id,
        };
        let pipeline = IngestPipeline::new(storage.clone(), Arc::new(source));

        let result = pipeline.run(wf.id).await;
        assert!(matches!(result, Err(Error::WorkflowNotFound(_))));

        let logs = store.logs_for_workflow(wf.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Failure);
        assert_eq!(logs[0].rows_inserted, 0);
        assert!(logs[0].message.starts_with("Failed to store report.csv"));
        assert_eq!(TableRegistry::new(&storage).count_rows(wf.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timeout_distinguishable_from_empty_search() {
        let storage = Storage::open_memory().await.unwrap();
        let pipeline = IngestPipeline::new(storage, Arc::new(SlowSource))
            .with_fetch_timeout(Duration::from_millis(20));
        let wf = pipeline
            .store()
            .create(1, NewWorkflow::new("wf", "daily"))
            .await
            .unwrap();

        let report = pipeline.run(wf.id).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::NoAttachment { reason: MissReason::TimedOut });
        assert!(report.message.contains("timed out"));

        let wf = pipeline.store().get(wf.id).await.unwrap();
        assert_eq!(wf.last_run_status, Some(RunStatus::InfoNoEmail));
    }

    #[tokio::test]
    async fn test_source_error_degrades_to_no_email() {
        let (_storage, pipeline, wf) = setup(Arc::new(BrokenSource)).await;

        let report = pipeline.run(wf.id).await.unwrap();
        assert!(matches!(
            report.outcome,
            RunOutcome::NoAttachment { reason: MissReason::SourceError(_) }
        ));
        assert!(report.message.contains("mailbox offline"));
    }

    #[tokio::test]
    async fn test_malformed_attachment_fails_without_advancing_marker() {
        let source = Arc::new(MemorySource::new());
        source.deliver("msg-9", meta("Daily Sales"), "report.pdf", "%PDF").await;
        let (_storage, pipeline, wf) = setup(source).await;

        let report = pipeline.run(wf.id).await.unwrap();
        assert!(report.outcome.is_failure());

        let wf = pipeline.store().get(wf.id).await.unwrap();
        assert_eq!(wf.last_run_status, Some(RunStatus::Failure));
        assert!(wf.last_processed_email_id.is_none());
        let logs = pipeline.store().logs_for_workflow(wf.id, 10).await.unwrap();
        assert_eq!(logs[0].status, LogStatus::Failure);
        assert_eq!(logs[0].source_filename.as_deref(), Some("report.pdf"));
    }

    #[tokio::test]
    async fn test_header_only_attachment_is_failure() {
        let source = Arc::new(MemorySource::new());
        source
            .deliver("msg-2", meta("Daily Sales"), "empty.csv", "order_id,product_id\n")
            .await;
        let (_storage, pipeline, wf) = setup(source).await;

        let report = pipeline.run(wf.id).await.unwrap();
        assert!(report.outcome.is_failure());
    }

    #[tokio::test]
    async fn test_manual_trigger_checks_ownership_first() {
        let (_storage, pipeline, wf) = setup(Arc::new(NullSource)).await;

        assert!(matches!(
            pipeline.run_for_user(8, wf.id).await,
            Err(Error::WorkflowNotFound(_))
        ));
        assert!(pipeline.store().logs_for_workflow(wf.id, 10).await.unwrap().is_empty());

        pipeline.run_for_user(7, wf.id).await.unwrap();
        assert_eq!(pipeline.store().logs_for_workflow(wf.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_is_duplicate() {
        let source = Arc::new(MemorySource::new());
        source.deliver("msg-1", meta("Daily Sales"), "report.csv", REPORT).await;
        let (storage, pipeline, wf) = setup(source).await;

        pipeline.run(wf.id).await.unwrap();
        let before = pipeline.store().get(wf.id).await.unwrap();
        let second = pipeline.run(wf.id).await.unwrap();

        assert_eq!(
            second.outcome,
            RunOutcome::AlreadyProcessed { source_message_id: "msg-1".into() }
        );
        assert_eq!(TableRegistry::new(&storage).count_rows(wf.id).await.unwrap(), 2);

        let after = pipeline.store().get(wf.id).await.unwrap();
        assert_eq!(after.last_run_timestamp, before.last_run_timestamp);

        let logs = pipeline.store().logs_for_workflow(wf.id, 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, LogStatus::Info);
        assert_eq!(logs[0].rows_inserted, 0);
    }
}
