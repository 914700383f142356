//! Minimal workflow queue (ingest → query → fallback).
//!
//! Tasks live in an ordered queue of ids plus a status map, so finding the
//! next pending task never rescans tasks that already finished. Completing
//! a task by name is not bound to queue order: any pending task with that
//! name can be completed, exactly once.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use crate::models::{Task, TaskStatus};

pub type TaskId = u64;

#[derive(Debug, Default)]
pub struct TaskQueue {
    next_id: TaskId,
    /// Ids in enqueue order. Completed ids are popped lazily from the front.
    order: VecDeque<TaskId>,
    tasks: HashMap<TaskId, Task>,
    /// Pending ids per name, oldest first.
    pending_by_name: HashMap<String, VecDeque<TaskId>>,
    completed: Vec<Task>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusSnapshot {
    pub pending: Vec<Task>,
    pub completed: Vec<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, name: &str, params: serde_json::Value) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.insert(
            id,
            Task {
                id,
                name: name.to_string(),
                params,
                status: TaskStatus::Pending,
            },
        );
        self.order.push_back(id);
        self.pending_by_name
            .entry(name.to_string())
            .or_default()
            .push_back(id);
        id
    }

    /// The first pending task in queue order.
    pub fn next_pending(&mut self) -> Option<&Task> {
        while let Some(front) = self.order.front() {
            if self.tasks.contains_key(front) {
                break;
            }
            self.order.pop_front();
        }
        self.order.front().and_then(|id| self.tasks.get(id))
    }

    /// Complete the oldest pending task named `name`. Returns `false` when
    /// there is none; that is not an error.
    pub fn complete(&mut self, name: &str) -> bool {
        let id = match self.pending_by_name.get_mut(name).and_then(|q| q.pop_front()) {
            Some(id) => id,
            None => return false,
        };
        if self.pending_by_name.get(name).is_some_and(|q| q.is_empty()) {
            self.pending_by_name.remove(name);
        }
        match self.tasks.remove(&id) {
            Some(mut task) => {
                task.status = TaskStatus::Completed;
                self.completed.push(task);
                true
            }
            None => false,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.tasks.len()
    }

    pub fn completed(&self) -> &[Task] {
        &self.completed
    }

    pub fn status(&self) -> TaskStatusSnapshot {
        let pending = self
            .order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .cloned()
            .collect();
        TaskStatusSnapshot {
            pending,
            completed: self.completed.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Outline of how a question is handled.
    pub fn plan(question: &str) -> Vec<String> {
        vec![
            format!("Step 1: Understand the question '{}'.", question),
            "Step 2: Search relevant documents.".to_string(),
            "Step 3: Summarize findings.".to_string(),
            "Step 4: Provide final answer.".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn next_pending_is_fifo() {
        let mut q = TaskQueue::new();
        q.enqueue("ingest", json!({}));
        q.enqueue("query", json!({"q": "x"}));
        assert_eq!(q.next_pending().unwrap().name, "ingest");
        assert!(q.complete("ingest"));
        assert_eq!(q.next_pending().unwrap().name, "query");
        assert!(q.complete("query"));
        assert!(q.next_pending().is_none());
    }

    #[test]
    fn complete_by_name_ignores_queue_order_and_succeeds_once() {
        let mut q = TaskQueue::new();
        q.enqueue("ingest", json!({}));
        q.enqueue("query", json!({}));
        q.enqueue("fallback", json!({}));

        assert!(q.complete("query"));
        assert!(!q.complete("query"));
        assert_eq!(q.next_pending().unwrap().name, "ingest");

        let status = q.status();
        assert_eq!(names(&status.pending), vec!["ingest", "fallback"]);
        assert_eq!(names(&status.completed), vec!["query"]);
        assert_eq!(status.completed[0].status, TaskStatus::Completed);
    }

    #[test]
    fn completing_absent_task_fails_quietly() {
        let mut q = TaskQueue::new();
        assert!(!q.complete("nothing"));
    }

    #[test]
    fn duplicate_names_complete_oldest_first() {
        let mut q = TaskQueue::new();
        let first = q.enqueue("query", json!({"n": 1}));
        q.enqueue("query", json!({"n": 2}));
        assert!(q.complete("query"));
        assert_eq!(q.completed()[0].id, first);
        assert_eq!(q.pending_len(), 1);
    }

    #[test]
    fn reset_clears_both_lists() {
        let mut q = TaskQueue::new();
        q.enqueue("ingest", json!({}));
        q.complete("ingest");
        q.enqueue("query", json!({}));
        q.reset();
        let status = q.status();
        assert!(status.pending.is_empty());
        assert!(status.completed.is_empty());
    }

    #[test]
    fn plan_has_four_steps() {
        let steps = TaskQueue::plan("Why?");
        assert_eq!(steps.len(), 4);
        assert!(steps[0].contains("'Why?'"));
    }
}
