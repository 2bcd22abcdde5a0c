use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};

use crate::{
    storage::{parse_timestamp, Storage},
    workflow::{
        LogStatus, NewWorkflow, NewWorkflowLog, RunStatus, Workflow, WorkflowLog, WorkflowUpdate,
    },
    Error, Result,
};

const WORKFLOW_COLUMNS: &str = "id, user_id, name, trigger_subject, trigger_sender, \
     recheck_interval_minutes, is_active, last_run_status, last_run_at, \
     last_processed_email_id, created_at, updated_at";

const LOG_COLUMNS: &str =
    "id, workflow_id, user_id, run_id, logged_at, status, source_filename, rows_inserted, message";

pub const MAX_LOG_PAGE: i64 = 100;

type WorkflowRow = (
    i64,
    i64,
    String,
    String,
    Option<String>,
    i64,
    bool,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
);

type LogRow = (i64, i64, i64, String, String, String, Option<String>, i64, String);

/// Workflow definitions and their run history, scoped to the owning user.
#[derive(Clone)]
pub struct WorkflowStore {
    pool: Pool<Sqlite>,
}

impl WorkflowStore {
    #[must_use]
    pub fn new(storage: &Storage) -> Self {
        Self {
            pool: storage.pool().clone(),
        }
    }

    // Workflow operations

    pub async fn create(&self, user_id: i64, new: NewWorkflow) -> Result<Workflow> {
        let name = validate_required("name", &new.name)?;
        let subject = validate_required("trigger_subject", &new.trigger_subject)?;
        validate_interval(new.recheck_interval_minutes)?;
        let sender = normalize_sender(new.trigger_sender);
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO workflows (user_id, name, trigger_subject, trigger_sender,
                                   recheck_interval_minutes, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(subject)
        .bind(sender)
        .bind(new.recheck_interval_minutes)
        .bind(new.is_active)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let workflow = self.get(result.last_insert_rowid()).await?;
        tracing::info!(workflow_id = workflow.id, user_id, "workflow created");
        Ok(workflow)
    }

    /// Fetch by id without an ownership check; callers acting for a user use [`Self::get_owned`].
    pub async fn get(&self, id: i64) -> Result<Workflow> {
        let row: WorkflowRow = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::WorkflowNotFound(id))?;

        parse_workflow_row(row)
    }

    /// Foreign workflows are reported as missing so ids of other owners stay hidden.
    pub async fn get_owned(&self, user_id: i64, id: i64) -> Result<Workflow> {
        let row: WorkflowRow = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ? AND user_id = ?"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::WorkflowNotFound(id))?;

        parse_workflow_row(row)
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Workflow>> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE user_id = ? ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_workflow_row).collect()
    }

    pub async fn list_all(&self) -> Result<Vec<Workflow>> {
        let rows: Vec<WorkflowRow> =
            sqlx::query_as(&format!("SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(parse_workflow_row).collect()
    }

    pub async fn update(&self, user_id: i64, id: i64, update: WorkflowUpdate) -> Result<Workflow> {
        let mut workflow = self.get_owned(user_id, id).await?;
        if update.is_empty() {
            return Ok(workflow);
        }

        if let Some(name) = update.name {
            workflow.name = validate_required("name", &name)?;
        }
        if let Some(subject) = update.trigger_subject {
            workflow.trigger_subject = validate_required("trigger_subject", &subject)?;
        }
        if let Some(sender) = update.trigger_sender {
            workflow.trigger_sender = normalize_sender(Some(sender));
        }
        if let Some(minutes) = update.recheck_interval_minutes {
            validate_interval(minutes)?;
            workflow.recheck_interval_minutes = minutes;
        }
        if let Some(active) = update.is_active {
            workflow.is_active = active;
        }

        // Run-state columns are owned by the scheduler and left alone here.
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET name = ?, trigger_subject = ?, trigger_sender = ?,
                recheck_interval_minutes = ?, is_active = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(&workflow.name)
        .bind(&workflow.trigger_subject)
        .bind(&workflow.trigger_sender)
        .bind(workflow.recheck_interval_minutes)
        .bind(workflow.is_active)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::WorkflowNotFound(id));
        }

        tracing::info!(workflow_id = id, user_id, "workflow updated");
        self.get(id).await
    }

    /// Removes the definition only. Logs and the workflow's relation are kept.
    pub async fn delete(&self, user_id: i64, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::WorkflowNotFound(id));
        }

        tracing::info!(workflow_id = id, user_id, "workflow deleted");
        Ok(())
    }

    // Run state, always written inside the run's transaction

    pub async fn record_run(
        conn: &mut SqliteConnection,
        workflow_id: i64,
        status: RunStatus,
        at: DateTime<Utc>,
        processed_email_id: Option<&str>,
    ) -> Result<()> {
        let result = match processed_email_id {
            Some(email_id) => {
                sqlx::query(
                    r#"
                    UPDATE workflows
                    SET last_run_status = ?, last_run_at = ?, last_processed_email_id = ?
                    WHERE id = ?
                    "#,
                )
                .bind(status.as_str())
                .bind(at.to_rfc3339())
                .bind(email_id)
                .bind(workflow_id)
                .execute(&mut *conn)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE workflows SET last_run_status = ?, last_run_at = ? WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(at.to_rfc3339())
                .bind(workflow_id)
                .execute(&mut *conn)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(Error::WorkflowNotFound(workflow_id));
        }

        Ok(())
    }

    // Log operations

    pub async fn append_log(
        conn: &mut SqliteConnection,
        log: &NewWorkflowLog,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_logs (workflow_id, user_id, run_id, logged_at, status,
                                       source_filename, rows_inserted, message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.workflow_id)
        .bind(log.user_id)
        .bind(log.run_id.to_string())
        .bind(at.to_rfc3339())
        .bind(log.status.as_str())
        .bind(&log.source_filename)
        .bind(log.rows_inserted)
        .bind(&log.message)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn recent_logs_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<WorkflowLog>> {
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            "SELECT {LOG_COLUMNS} FROM workflow_logs WHERE user_id = ? ORDER BY id DESC LIMIT ?"
        ))
        .bind(user_id)
        .bind(limit.clamp(1, MAX_LOG_PAGE))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_log_row).collect()
    }

    pub async fn logs_for_workflow(
        &self,
        workflow_id: i64,
        limit: i64,
    ) -> Result<Vec<WorkflowLog>> {
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            "SELECT {LOG_COLUMNS} FROM workflow_logs WHERE workflow_id = ? ORDER BY id DESC LIMIT ?"
        ))
        .bind(workflow_id)
        .bind(limit.clamp(1, MAX_LOG_PAGE))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_log_row).collect()
    }
}

fn validate_required(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidWorkflow(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn validate_interval(minutes: i64) -> Result<()> {
    if minutes < 0 {
        return Err(Error::InvalidWorkflow(format!(
            "recheck_interval_minutes must not be negative (got {minutes})"
        )));
    }
    Ok(())
}

fn normalize_sender(sender: Option<String>) -> Option<String> {
    sender
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_workflow_row(row: WorkflowRow) -> Result<Workflow> {
    let (
        id,
        user_id,
        name,
        trigger_subject,
        trigger_sender,
        recheck_interval_minutes,
        is_active,
        last_run_status,
        last_run_at,
        last_processed_email_id,
        created_at,
        updated_at,
    ) = row;

    Ok(Workflow {
        id,
        user_id,
        name,
        trigger_subject,
        trigger_sender,
        recheck_interval_minutes,
        is_active,
        last_run_status: last_run_status.map(|s| s.parse()).transpose()?,
        last_run_timestamp: last_run_at.as_deref().map(parse_timestamp).transpose()?,
        last_processed_email_id,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_log_row(row: LogRow) -> Result<WorkflowLog> {
    let (
        id,
        workflow_id,
        user_id,
        run_id,
        logged_at,
        status,
        source_filename,
        rows_inserted,
        message,
    ) = row;

    Ok(WorkflowLog {
        id,
        workflow_id,
        user_id,
        run_id: run_id.parse().map_err(|_| Error::InvalidRunId(run_id))?,
        timestamp: parse_timestamp(&logged_at)?,
        status: status.parse::<LogStatus>()?,
        source_filename,
        rows_inserted,
        message,
    })
}
