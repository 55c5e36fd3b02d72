use crate::access::{Role, Scope};
use crate::db::now_rfc3339;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, optional_str, page_f64, page_i64, page_str, query_actor, query_error,
};
use crate::ipc::page;
use crate::ipc::types::{AppState, Request};
use crate::outcome::{self, Action, PageError};
use crate::transition::{Decision, Status, Transition, WorkflowKind};
use serde_json::json;

const QUESTION_TYPES: &[&str] = &["mcq", "short", "long", "true_false"];

fn handle_questions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::CreateQuestion, &[Role::Teacher], |conn, actor, cfg| {
        let subject = page_str(req, "subject")?;
        let text = page_str(req, "questionText")?;
        let question_type = optional_str(req, "questionType").unwrap_or("short");
        if !QUESTION_TYPES.contains(&question_type) {
            return Err(PageError::Validation(format!(
                "Question type must be one of: {}.",
                QUESTION_TYPES.join(", ")
            )));
        }
        let marks = page_f64(req, "marks")?;
        if !marks.is_finite() || marks <= 0.0 {
            return Err(PageError::Validation("Marks must be greater than 0.".into()));
        }

        conn.execute(
            "INSERT INTO question_bank(school_id, owner_id, subject, question_text, question_type, marks, status, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                actor.tenant_id,
                actor.user_id,
                subject,
                text,
                question_type,
                marks,
                Status::Pending.as_str(),
                now_rfc3339(),
            ),
        )?;
        let question_id = conn.last_insert_rowid();
        Ok(outcome::success(Action::CreateQuestion, &cfg.redirects)
            .with_data(json!({ "questionId": question_id })))
    })
}

fn handle_questions_review(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::ReviewQuestion, &[Role::Teacher], |conn, actor, cfg| {
        let question_id = page_i64(req, "questionId")?;
        let decision = Decision::parse(page_str(req, "decision")?)
            .ok_or_else(|| PageError::Validation("Decision must be approve or reject.".into()))?;
        let note = optional_str(req, "note").map(str::to_string);
        let res = Transition::new(
            WorkflowKind::QuestionEntry,
            question_id,
            Scope::Tenant,
            &[Status::Pending],
            decision.target_status(),
        )
        .excluding_own()
        .set("reviewer_id", actor.user_id)
        .set("review_note", note)
        .apply(conn, actor)
        .map_err(PageError::from);
        Ok(outcome::report(Action::ReviewQuestion, res, &cfg.redirects))
    })
}

fn handle_questions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match query_actor(conn, req, &[Role::Teacher]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let status = match optional_str(req, "status") {
        None => None,
        Some(raw) => match Status::parse(raw) {
            Some(s @ (Status::Pending | Status::Approved | Status::Rejected)) => Some(s.as_str()),
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "status must be one of: pending, approved, rejected",
                    Some(json!({ "status": raw })),
                )
            }
        },
    };

    let rows = conn
        .prepare(
            "SELECT q.id, q.owner_id, u.name, q.subject, q.question_text, q.question_type, q.marks, q.status, q.review_note
             FROM question_bank q
             JOIN users u ON u.id = q.owner_id
             WHERE q.school_id = ? AND (? IS NULL OR q.status = ?)
             ORDER BY q.subject, q.id",
        )
        .and_then(|mut stmt| {
            let rows = stmt.query_map((actor.tenant_id, status, status), |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "ownerId": row.get::<_, i64>(1)?,
                    "ownerName": row.get::<_, String>(2)?,
                    "subject": row.get::<_, String>(3)?,
                    "questionText": row.get::<_, String>(4)?,
                    "questionType": row.get::<_, String>(5)?,
                    "marks": row.get::<_, f64>(6)?,
                    "status": row.get::<_, String>(7)?,
                    "reviewNote": row.get::<_, Option<String>>(8)?,
                }))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        });

    match rows {
        Ok(questions) => ok(&req.id, json!({ "questions": questions })),
        Err(e) => query_error(req, PageError::Store(e)),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "questions.create" => Some(handle_questions_create(state, req)),
        "questions.review" => Some(handle_questions_review(state, req)),
        "questions.list" => Some(handle_questions_list(state, req)),
        _ => None,
    }
}
