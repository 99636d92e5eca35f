use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AdmissionError;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

impl TaskStatus {
    /// A settled task no longer holds the admission slot.
    pub fn is_settled(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Complete => write!(f, "complete"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One operation submitted to a plugin runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub operation: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(rename = "submitted")]
    pub submitted_at: DateTime<Utc>,
    #[serde(rename = "completed", default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Task {
    pub fn new(operation: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            operation: operation.into(),
            parameters,
            submitted_at: Utc::now(),
            completed_at: None,
            status: TaskStatus::Queued,
            message: None,
        }
    }

    pub(crate) fn complete(&mut self) {
        self.status = TaskStatus::Complete;
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.message = Some(message.into());
    }
}

/// The current task plus the retired ones, newest first.
#[derive(Debug, Default)]
pub(crate) struct TaskBook {
    current: Option<Task>,
    history: VecDeque<Task>,
}

impl TaskBook {
    /// Installs `task` as current and marks it running.
    ///
    /// Fails with `Busy` while the current task is unsettled; the book is left
    /// untouched in that case.
    pub fn install(&mut self, mut task: Task) -> Result<(), AdmissionError> {
        if let Some(current) = &self.current
            && !current.status.is_settled()
        {
            return Err(AdmissionError::Busy {
                status: current.status,
            });
        }
        if let Some(previous) = self.current.take() {
            self.history.push_front(previous);
        }
        task.status = TaskStatus::Running;
        self.current = Some(task);
        Ok(())
    }

    pub fn current(&self) -> Option<&Task> {
        self.current.as_ref()
    }

    /// Mutable access to the current task, only if it is still `id`.
    pub fn current_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.current.as_mut().filter(|task| task.id == id)
    }

    pub fn find(&self, id: &str) -> Option<&Task> {
        self.current
            .iter()
            .chain(self.history.iter())
            .find(|task| task.id == id)
    }

    pub fn history(&self) -> Vec<Task> {
        self.history.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_creation_defaults() {
        let task = Task::new("train", Value::Null);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.operation, "train");
        assert_eq!(task.id.len(), 32);
        assert!(task.completed_at.is_none());
        assert!(task.message.is_none());
    }

    #[test]
    fn install_marks_running_and_archives_previous() {
        let mut book = TaskBook::default();
        let first = Task::new("initialize", json!({}));
        let first_id = first.id.clone();
        book.install(first).unwrap();
        assert_eq!(book.current().unwrap().status, TaskStatus::Running);

        book.current_mut(&first_id).unwrap().complete();
        let second = Task::new("train", json!({}));
        let second_id = second.id.clone();
        book.install(second).unwrap();

        assert_eq!(book.current().unwrap().id, second_id);
        let history = book.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, first_id);
        assert_eq!(history[0].status, TaskStatus::Complete);
    }

    #[test]
    fn install_rejects_while_running_without_mutation() {
        let mut book = TaskBook::default();
        let first = Task::new("train", json!({}));
        let first_id = first.id.clone();
        book.install(first).unwrap();

        let err = book.install(Task::new("predict", json!({}))).unwrap_err();
        assert_eq!(
            err,
            AdmissionError::Busy {
                status: TaskStatus::Running
            }
        );
        assert_eq!(book.current().unwrap().id, first_id);
        assert!(book.history().is_empty());
    }

    #[test]
    fn failed_task_releases_the_slot() {
        let mut book = TaskBook::default();
        let first = Task::new("train", json!({}));
        let first_id = first.id.clone();
        book.install(first).unwrap();
        book.current_mut(&first_id).unwrap().fail("boom");

        assert!(book.install(Task::new("reset", json!({}))).is_ok());
        assert_eq!(book.find(&first_id).unwrap().message.as_deref(), Some("boom"));
    }

    #[test]
    fn history_is_newest_first() {
        let mut book = TaskBook::default();
        let mut ids = Vec::new();
        for op in ["initialize", "load_data", "train"] {
            let task = Task::new(op, json!({}));
            ids.push(task.id.clone());
            book.install(task).unwrap();
            let id = ids.last().unwrap().clone();
            book.current_mut(&id).unwrap().complete();
        }
        book.install(Task::new("predict", json!({}))).unwrap();

        let history: Vec<_> = book.history().into_iter().map(|t| t.id).collect();
        assert_eq!(history, vec![ids[2].clone(), ids[1].clone(), ids[0].clone()]);
    }

    #[test]
    fn task_serializes_with_wire_names() {
        let mut task = Task::new("save_model", json!({"path": "/tmp/m"}));
        task.complete();
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["status"], "complete");
        assert!(value.get("submitted").is_some());
        assert!(value.get("completed").is_some());
        assert!(value.get("message").is_none());

        let parsed: Task = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, task);
    }
}
