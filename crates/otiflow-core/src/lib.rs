pub mod assistant;
pub mod error;
pub mod ingest;
pub mod kpi;
pub mod maildrop;
pub mod query;
pub mod scheduler;
pub mod source;
pub mod storage;
pub mod store;
pub mod textgen;
pub mod workflow;

pub use error::{Error, Result};
pub use ingest::{
    FieldValue, IngestPipeline, IngestionEngine, LoadReport, Record, RelationHandle, RunOutcome,
    RunReport, SalesRecord, StoredSale, TableRegistry, TransformError, Transformer,
};
pub use kpi::{compute_kpis, detect_anomaly, AnomalyKind, AnomalyReport, KpiSnapshot};
pub use maildrop::MailDropSource;
pub use query::QueryGuard;
pub use scheduler::{ReconcileReport, Scheduler, SchedulerConfig};
pub use source::{
    Attachment, AttachmentSource, MemorySource, MessageMeta, NullSource, SourceError,
    SourceResult,
};
pub use storage::Storage;
pub use store::{WorkflowStore, MAX_LOG_PAGE};
pub use textgen::{
    CannedGenerator, HttpTextGenerator, TextGenConfig, TextGenError, TextGenResult, TextGenerator,
};
pub use workflow::{
    LogStatus, NewWorkflow, NewWorkflowLog, RunStatus, TriggerFilter, Workflow, WorkflowLog,
    WorkflowUpdate,
};
