//! Guarded status transitions for workflow rows.
//!
//! A transition is a single `UPDATE ... WHERE id = ? AND school_id = ? [AND owner_id = ?]
//! AND status IN (...)`. The affected-row count is the only evidence of success, so two
//! racing callers can never both see `Applied`, and the caller never learns whether a
//! miss came from a wrong id, owner, school or status.

use crate::access::{Actor, Scope};
use crate::db::now_rfc3339;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Submitted,
    Graded,
    Draft,
    Published,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Approved => "approved",
            Status::Rejected => "rejected",
            Status::Cancelled => "cancelled",
            Status::Submitted => "submitted",
            Status::Graded => "graded",
            Status::Draft => "draft",
            Status::Published => "published",
        }
    }

    pub fn parse(raw: &str) -> Option<Status> {
        match raw {
            "pending" => Some(Status::Pending),
            "approved" => Some(Status::Approved),
            "rejected" => Some(Status::Rejected),
            "cancelled" => Some(Status::Cancelled),
            "submitted" => Some(Status::Submitted),
            "graded" => Some(Status::Graded),
            "draft" => Some(Status::Draft),
            "published" => Some(Status::Published),
            _ => None,
        }
    }
}

/// Reviewer verdict for leave requests and question-bank entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn parse(raw: &str) -> Option<Decision> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Some(Decision::Approve),
            "reject" | "rejected" => Some(Decision::Reject),
            _ => None,
        }
    }

    pub fn target_status(self) -> Status {
        match self {
            Decision::Approve => Status::Approved,
            Decision::Reject => Status::Rejected,
        }
    }
}

/// The tables that carry a guarded `status` column. Table and column names only
/// ever come from here, never from request input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    PermissionRequest,
    QuestionEntry,
    ExamPaper,
}

impl WorkflowKind {
    fn table(self) -> &'static str {
        match self {
            WorkflowKind::PermissionRequest => "permission_requests",
            WorkflowKind::QuestionEntry => "question_bank",
            WorkflowKind::ExamPaper => "exam_papers",
        }
    }

    /// Extra columns a transition of this kind is allowed to write.
    fn writable(self) -> &'static [&'static str] {
        match self {
            WorkflowKind::PermissionRequest => &["reviewed_by"],
            WorkflowKind::QuestionEntry => &["reviewer_id", "review_note"],
            WorkflowKind::ExamPaper => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    NotApplied,
}

impl TransitionOutcome {
    pub fn from_count(affected: usize) -> Self {
        if affected == 1 {
            TransitionOutcome::Applied
        } else {
            TransitionOutcome::NotApplied
        }
    }

    pub fn is_applied(self) -> bool {
        self == TransitionOutcome::Applied
    }
}

#[derive(Debug, Clone)]
pub struct Transition {
    kind: WorkflowKind,
    id: i64,
    scope: Scope,
    from: Vec<Status>,
    to: Status,
    extra: Vec<(&'static str, Value)>,
    not_own: bool,
}

impl Transition {
    pub fn new(kind: WorkflowKind, id: i64, scope: Scope, from: &[Status], to: Status) -> Self {
        Self {
            kind,
            id,
            scope,
            from: from.to_vec(),
            to,
            extra: Vec::new(),
            not_own: false,
        }
    }

    /// Adds `owner_id != actor` to the guard, so nobody reviews their own row.
    pub fn excluding_own(mut self) -> Self {
        self.not_own = true;
        self
    }

    /// Also writes `column` in the same statement.
    ///
    /// Panics if `column` is not one of the kind's writable columns; that is a
    /// programming error, not a request error.
    pub fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        assert!(
            self.kind.writable().contains(&column),
            "column {column} is not writable on {}",
            self.kind.table()
        );
        self.extra.push((column, value.into()));
        self
    }

    fn sql(&self) -> String {
        let mut sql = format!("UPDATE {} SET status = ?, updated_at = ?", self.kind.table());
        for (col, _) in &self.extra {
            sql.push_str(", ");
            sql.push_str(col);
            sql.push_str(" = ?");
        }
        sql.push_str(" WHERE id = ? AND school_id = ?");
        if self.scope == Scope::Owner {
            sql.push_str(" AND owner_id = ?");
        }
        if self.not_own {
            sql.push_str(" AND owner_id != ?");
        }
        let placeholders = vec!["?"; self.from.len()].join(", ");
        sql.push_str(&format!(" AND status IN ({placeholders})"));
        sql
    }

    fn bind_values(&self, actor: &Actor) -> Vec<Value> {
        let mut values: Vec<Value> = Vec::with_capacity(5 + self.extra.len() + self.from.len());
        values.push(Value::Text(self.to.as_str().to_string()));
        values.push(Value::Text(now_rfc3339()));
        values.extend(self.extra.iter().map(|(_, v)| v.clone()));
        values.push(Value::Integer(self.id));
        values.push(Value::Integer(actor.tenant_id));
        if self.scope == Scope::Owner {
            values.push(Value::Integer(actor.user_id));
        }
        if self.not_own {
            values.push(Value::Integer(actor.user_id));
        }
        values.extend(
            self.from
                .iter()
                .map(|s| Value::Text(s.as_str().to_string())),
        );
        values
    }

    /// Runs the guarded update. Store errors, including a busy timeout, come back
    /// as `Err`; they are never folded into `NotApplied`.
    pub fn apply(&self, conn: &Connection, actor: &Actor) -> rusqlite::Result<TransitionOutcome> {
        if self.from.is_empty() {
            return Ok(TransitionOutcome::NotApplied);
        }
        let affected = conn.execute(&self.sql(), params_from_iter(self.bind_values(actor)))?;
        let outcome = TransitionOutcome::from_count(affected);
        tracing::debug!(
            table = self.kind.table(),
            id = self.id,
            actor = actor.user_id,
            tenant = actor.tenant_id,
            to = self.to.as_str(),
            ?outcome,
            "guarded transition"
        );
        Ok(outcome)
    }
}
