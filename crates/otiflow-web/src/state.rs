use std::sync::Arc;

use otiflow_core::{
    AttachmentSource, HttpTextGenerator, IngestPipeline, MailDropSource, NullSource, QueryGuard,
    Scheduler, Storage, TableRegistry, TextGenerator, WorkflowStore,
};

use crate::config::ServerConfig;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub store: WorkflowStore,
    pub registry: TableRegistry,
    pub pipeline: Arc<IngestPipeline>,
    pub scheduler: Arc<Scheduler>,
    pub textgen: Option<Arc<dyn TextGenerator>>,
    pub query_guard: Arc<QueryGuard>,
    pub config: ServerConfig,
}

impl AppState {
    /// Opens storage and wires the configured collaborators.
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let storage = Storage::open(&config.db_path.to_string_lossy()).await?;

        let source: Arc<dyn AttachmentSource> = match &config.maildrop {
            Some(root) => Arc::new(MailDropSource::new(root.clone())),
            None => {
                tracing::warn!("OTIFLOW_MAILDROP not set; workflows will never find an attachment");
                Arc::new(NullSource)
            }
        };

        let textgen: Option<Arc<dyn TextGenerator>> = match &config.textgen {
            Some(tg) => Some(Arc::new(HttpTextGenerator::new(tg)?)),
            None => {
                tracing::warn!("no text generation API key; AI features return offline fallbacks");
                None
            }
        };

        Self::with_parts(storage, source, textgen, config)
    }

    pub fn with_parts(
        storage: Storage,
        source: Arc<dyn AttachmentSource>,
        textgen: Option<Arc<dyn TextGenerator>>,
        config: ServerConfig,
    ) -> anyhow::Result<Self> {
        let pipeline = Arc::new(
            IngestPipeline::new(storage.clone(), source)
                .with_fetch_timeout(config.scheduler.fetch_timeout),
        );
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&pipeline), config.scheduler));

        Ok(Self {
            store: WorkflowStore::new(&storage),
            registry: TableRegistry::new(&storage),
            query_guard: Arc::new(QueryGuard::new()?),
            storage,
            pipeline,
            scheduler,
            textgen,
            config,
        })
    }

    pub fn textgen(&self) -> Option<&dyn TextGenerator> {
        self.textgen.as_deref()
    }

    /// Applies a workflow change to its timer now rather than at the next reconciliation.
    pub async fn nudge_scheduler(&self, workflow_id: i64) {
        if let Err(e) = self.scheduler.reconcile_workflow(workflow_id).await {
            tracing::warn!(workflow_id, error = %e, "scheduler nudge failed");
        }
    }
}
