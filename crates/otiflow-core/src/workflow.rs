use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_TRIGGER_SUBJECT: &str = "Daily Sales Report";
pub const DEFAULT_RECHECK_INTERVAL_MINUTES: i64 = 5;

/// Outcome of the most recent run attempt, as stored on the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    InfoNoEmail,
    Failure,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::InfoNoEmail => "INFO_NO_EMAIL",
            Self::Failure => "FAILURE",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "INFO_NO_EMAIL" => Ok(Self::InfoNoEmail),
            "FAILURE" => Ok(Self::Failure),
            _ => Err(crate::Error::InvalidRunStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Success,
    Failure,
    Info,
}

impl LogStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Info => "INFO",
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "INFO" => Ok(Self::Info),
            _ => Err(crate::Error::InvalidLogStatus(s.to_string())),
        }
    }
}

/// Search filter handed to the attachment source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFilter {
    pub subject_substring: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_substring: Option<String>,
}

impl TriggerFilter {
    #[must_use]
    pub fn new(subject_substring: impl Into<String>) -> Self {
        Self {
            subject_substring: subject_substring.into(),
            sender_substring: None,
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender_substring = Some(sender.into());
        self
    }

    /// Case-insensitive substring match on subject and, when set, sender.
    #[must_use]
    pub fn matches(&self, subject: &str, sender: Option<&str>) -> bool {
        if !contains_ignore_case(subject, &self.subject_substring) {
            return false;
        }
        match self.sender_substring.as_deref() {
            Some(wanted) => sender.is_some_and(|s| contains_ignore_case(s, wanted)),
            None => true,
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub trigger_subject: String,
    pub trigger_sender: Option<String>,
    pub recheck_interval_minutes: i64,
    pub is_active: bool,
    pub last_run_status: Option<RunStatus>,
    pub last_run_timestamp: Option<DateTime<Utc>>,
    pub last_processed_email_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    #[must_use]
    pub fn filter(&self) -> TriggerFilter {
        TriggerFilter {
            subject_substring: self.trigger_subject.clone(),
            sender_substring: self.trigger_sender.clone(),
        }
    }

    /// A workflow gets a timer only while active with an interval of at least a minute.
    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        self.is_active && self.recheck_interval_minutes >= 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    #[serde(default = "default_subject")]
    pub trigger_subject: String,
    #[serde(default)]
    pub trigger_sender: Option<String>,
    #[serde(default = "default_interval")]
    pub recheck_interval_minutes: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl NewWorkflow {
    #[must_use]
    pub fn new(name: impl Into<String>, trigger_subject: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trigger_subject: trigger_subject.into(),
            trigger_sender: None,
            recheck_interval_minutes: DEFAULT_RECHECK_INTERVAL_MINUTES,
            is_active: true,
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.trigger_sender = Some(sender.into());
        self
    }

    #[must_use]
    pub fn with_interval(mut self, minutes: i64) -> Self {
        self.recheck_interval_minutes = minutes;
        self
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

fn default_subject() -> String {
    DEFAULT_TRIGGER_SUBJECT.to_string()
}

const fn default_interval() -> i64 {
    DEFAULT_RECHECK_INTERVAL_MINUTES
}

const fn default_active() -> bool {
    true
}

/// Partial edit; `None` leaves the field untouched. An empty sender clears the filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub trigger_subject: Option<String>,
    #[serde(default)]
    pub trigger_sender: Option<String>,
    #[serde(default)]
    pub recheck_interval_minutes: Option<i64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl WorkflowUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.trigger_subject.is_none()
            && self.trigger_sender.is_none()
            && self.recheck_interval_minutes.is_none()
            && self.is_active.is_none()
    }
}

/// One row of the append-only run audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLog {
    pub id: i64,
    pub workflow_id: i64,
    pub user_id: i64,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: LogStatus,
    pub source_filename: Option<String>,
    pub rows_inserted: i64,
    pub message: String,
}

/// A log row that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewWorkflowLog {
    pub workflow_id: i64,
    pub user_id: i64,
    pub run_id: Uuid,
    pub status: LogStatus,
    pub source_filename: Option<String>,
    pub rows_inserted: i64,
    pub message: String,
}

impl NewWorkflowLog {
    #[must_use]
    pub fn new(
        workflow: &Workflow,
        run_id: Uuid,
        status: LogStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow.id,
            user_id: workflow.user_id,
            run_id,
            status,
            source_filename: None,
            rows_inserted: 0,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_file(mut self, filename: impl Into<String>) -> Self {
        self.source_filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn with_rows(mut self, rows_inserted: i64) -> Self {
        self.rows_inserted = rows_inserted;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [RunStatus::Success, RunStatus::InfoNoEmail, RunStatus::Failure] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("PENDING".parse::<RunStatus>().is_err());
        assert_eq!("INFO".parse::<LogStatus>().unwrap(), LogStatus::Info);
    }

    #[test]
    fn test_new_workflow_defaults_from_json() {
        let new: NewWorkflow = serde_json::from_str(r#"{"name": "Client X"}"#).unwrap();
        assert_eq!(new.trigger_subject, DEFAULT_TRIGGER_SUBJECT);
        assert_eq!(new.recheck_interval_minutes, 5);
        assert!(new.is_active);
        assert!(new.trigger_sender.is_none());
    }

    #[test]
    fn test_filter_matching() {
        let filter = TriggerFilter::new("daily sales");
        assert!(filter.matches("FW: Daily Sales Report", None));
        assert!(filter.matches("daily sales", Some("anyone@example.com")));
        assert!(!filter.matches("Weekly summary", None));

        let filter = filter.with_sender("OPS@");
        assert!(filter.matches("Daily Sales Report", Some("ops@client-x.com")));
        assert!(!filter.matches("Daily Sales Report", Some("billing@client-x.com")));
        assert!(!filter.matches("Daily Sales Report", None));
    }

    #[test]
    fn test_update_is_empty() {
        assert!(WorkflowUpdate::default().is_empty());
        let update = WorkflowUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
