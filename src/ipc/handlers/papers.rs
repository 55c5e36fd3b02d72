use crate::access::{self, Actor, AuthzDecision, DenyReason, Policy, Role, Scope, Subject};
use crate::db::now_rfc3339;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, optional_str, page_f64, page_i64, page_opt_f64, page_opt_i64, page_str, param_i64,
    query_actor, query_error,
};
use crate::ipc::page;
use crate::ipc::types::{AppState, Request};
use crate::outcome::{self, Action, PageError};
use crate::templates::{self, PaperDocument, PaperQuestion};
use crate::transition::{Status, Transition, TransitionOutcome, WorkflowKind};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const PAPER_OWNER: Policy = Policy::new(Role::Teacher, Scope::Owner);

struct PaperRow {
    id: i64,
    owner_id: i64,
    school_id: i64,
    school_name: String,
    title: String,
    subject: String,
    class_name: String,
    exam_date: Option<String>,
    duration_minutes: i64,
    total_marks: f64,
    instructions: String,
    status: String,
}

fn load_paper(conn: &Connection, paper_id: i64) -> rusqlite::Result<Option<PaperRow>> {
    conn.query_row(
        "SELECT p.id, p.owner_id, p.school_id, s.name, p.title, p.subject, p.class_name,
                p.exam_date, p.duration_minutes, p.total_marks, p.instructions, p.status
         FROM exam_papers p
         JOIN schools s ON s.id = p.school_id
         WHERE p.id = ?",
        [paper_id],
        |r| {
            Ok(PaperRow {
                id: r.get(0)?,
                owner_id: r.get(1)?,
                school_id: r.get(2)?,
                school_name: r.get(3)?,
                title: r.get(4)?,
                subject: r.get(5)?,
                class_name: r.get(6)?,
                exam_date: r.get(7)?,
                duration_minutes: r.get(8)?,
                total_marks: r.get(9)?,
                instructions: r.get(10)?,
                status: r.get(11)?,
            })
        },
    )
    .optional()
}

/// Loads a paper the actor owns. Someone else's paper reads as missing.
fn owned_paper(conn: &Connection, actor: &Actor, paper_id: i64) -> Result<PaperRow, PageError> {
    let Some(paper) = load_paper(conn, paper_id)? else {
        return Err(PageError::NotApplied);
    };
    let subject = Subject {
        owner_id: paper.owner_id,
        tenant_id: paper.school_id,
    };
    match access::authorize(actor, &subject, &PAPER_OWNER) {
        AuthzDecision::Permit => Ok(paper),
        AuthzDecision::Deny(DenyReason::WrongRole) => Err(PageError::WrongRole),
        AuthzDecision::Deny(DenyReason::WrongTenant) => Err(PageError::WrongTenant),
        AuthzDecision::Deny(DenyReason::NotOwner) => Err(PageError::NotOwner),
    }
}

fn paper_questions(conn: &Connection, paper_id: i64) -> rusqlite::Result<Vec<(i64, PaperQuestion)>> {
    let mut stmt = conn.prepare(
        "SELECT q.id, q.question_text, q.question_type, pq.marks
         FROM exam_paper_questions pq
         JOIN question_bank q ON q.id = pq.question_id
         WHERE pq.paper_id = ?
         ORDER BY pq.position",
    )?;
    let rows = stmt.query_map([paper_id], |r| {
        Ok((
            r.get(0)?,
            PaperQuestion {
                text: r.get(1)?,
                question_type: r.get(2)?,
                marks: r.get(3)?,
            },
        ))
    })?;
    rows.collect()
}

fn validate_date(raw: Option<&str>) -> Result<Option<String>, PageError> {
    match raw {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d")
            .map(|d| Some(d.to_string()))
            .map_err(|_| PageError::Validation("examDate must be a YYYY-MM-DD date.".into())),
    }
}

fn validate_duration(v: i64) -> Result<i64, PageError> {
    if !(1..=600).contains(&v) {
        return Err(PageError::Validation(
            "Duration must be between 1 and 600 minutes.".into(),
        ));
    }
    Ok(v)
}

fn validate_total(v: f64) -> Result<f64, PageError> {
    if !v.is_finite() || v <= 0.0 {
        return Err(PageError::Validation(
            "Total marks must be greater than 0.".into(),
        ));
    }
    Ok(v)
}

fn handle_papers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::CreatePaper, &[Role::Teacher], |conn, actor, cfg| {
        let title = page_str(req, "title")?;
        let subject = page_str(req, "subject")?;
        let class_name = page_str(req, "className")?;
        let exam_date = validate_date(optional_str(req, "examDate"))?;
        let duration = validate_duration(page_i64(req, "durationMinutes")?)?;
        let total = validate_total(page_f64(req, "totalMarks")?)?;
        let instructions = optional_str(req, "instructions").unwrap_or("");

        conn.execute(
            "INSERT INTO exam_papers(school_id, owner_id, title, subject, class_name, exam_date,
                                     duration_minutes, total_marks, instructions, status, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                actor.tenant_id,
                actor.user_id,
                title,
                subject,
                class_name,
                exam_date,
                duration,
                total,
                instructions,
                Status::Draft.as_str(),
                now_rfc3339(),
            ),
        )?;
        let paper_id = conn.last_insert_rowid();
        Ok(outcome::success(Action::CreatePaper, &cfg.redirects)
            .with_data(json!({ "paperId": paper_id })))
    })
}

fn handle_papers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::UpdatePaper, &[Role::Teacher], |conn, actor, cfg| {
        let paper_id = page_i64(req, "paperId")?;
        let exam_date = validate_date(optional_str(req, "examDate"))?;
        let duration = page_opt_i64(req, "durationMinutes")?
            .map(validate_duration)
            .transpose()?;
        let total = page_opt_f64(req, "totalMarks")?
            .map(validate_total)
            .transpose()?;
        // Absent fields keep their stored value. Only the owner's drafts match.
        let affected = conn.execute(
            "UPDATE exam_papers SET
               title = COALESCE(?, title),
               subject = COALESCE(?, subject),
               class_name = COALESCE(?, class_name),
               exam_date = COALESCE(?, exam_date),
               duration_minutes = COALESCE(?, duration_minutes),
               total_marks = COALESCE(?, total_marks),
               instructions = COALESCE(?, instructions),
               updated_at = ?
             WHERE id = ? AND owner_id = ? AND school_id = ? AND status = ?",
            (
                optional_str(req, "title"),
                optional_str(req, "subject"),
                optional_str(req, "className"),
                exam_date,
                duration,
                total,
                req.params.get("instructions").and_then(|v| v.as_str()),
                now_rfc3339(),
                paper_id,
                actor.user_id,
                actor.tenant_id,
                Status::Draft.as_str(),
            ),
        )?;
        Ok(outcome::report(
            Action::UpdatePaper,
            Ok(TransitionOutcome::from_count(affected)),
            &cfg.redirects,
        ))
    })
}

fn handle_papers_add_question(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::AddPaperQuestion, &[Role::Teacher], |conn, actor, cfg| {
        let paper_id = page_i64(req, "paperId")?;
        let question_id = page_i64(req, "questionId")?;
        let marks = page_opt_f64(req, "marks")?;
        if let Some(m) = marks {
            if !m.is_finite() || m <= 0.0 {
                return Err(PageError::Validation("Marks must be greater than 0.".into()));
            }
        }
        // Only approved questions of the same school may join an owned draft.
        let affected = conn.execute(
            "INSERT INTO exam_paper_questions(paper_id, question_id, position, marks)
             SELECT p.id, q.id,
                    (SELECT COALESCE(MAX(position), 0) + 1 FROM exam_paper_questions WHERE paper_id = p.id),
                    COALESCE(?, q.marks)
             FROM exam_papers p
             JOIN question_bank q ON q.school_id = p.school_id
             WHERE p.id = ? AND p.owner_id = ? AND p.school_id = ? AND p.status = ?
               AND q.id = ? AND q.status = ?
             ON CONFLICT(paper_id, question_id) DO NOTHING",
            (
                marks,
                paper_id,
                actor.user_id,
                actor.tenant_id,
                Status::Draft.as_str(),
                question_id,
                Status::Approved.as_str(),
            ),
        )?;
        Ok(outcome::report(
            Action::AddPaperQuestion,
            Ok(TransitionOutcome::from_count(affected)),
            &cfg.redirects,
        ))
    })
}

fn handle_papers_remove_question(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::RemovePaperQuestion, &[Role::Teacher], |conn, actor, cfg| {
        let paper_id = page_i64(req, "paperId")?;
        let question_id = page_i64(req, "questionId")?;
        let affected = conn.execute(
            "DELETE FROM exam_paper_questions
             WHERE paper_id = ? AND question_id = ?
               AND paper_id IN (
                 SELECT id FROM exam_papers
                 WHERE owner_id = ? AND school_id = ? AND status = ?
               )",
            (
                paper_id,
                question_id,
                actor.user_id,
                actor.tenant_id,
                Status::Draft.as_str(),
            ),
        )?;
        Ok(outcome::report(
            Action::RemovePaperQuestion,
            Ok(TransitionOutcome::from_count(affected)),
            &cfg.redirects,
        ))
    })
}

fn handle_papers_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::PublishPaper, &[Role::Teacher], |conn, actor, cfg| {
        let paper_id = page_i64(req, "paperId")?;
        let res = Transition::new(
            WorkflowKind::ExamPaper,
            paper_id,
            Scope::Owner,
            &[Status::Draft],
            Status::Published,
        )
        .apply(conn, actor)
        .map_err(PageError::from);
        Ok(outcome::report(Action::PublishPaper, res, &cfg.redirects))
    })
}

fn handle_papers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::DeletePaper, &[Role::Teacher], |conn, actor, cfg| {
        let paper_id = page_i64(req, "paperId")?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM exam_paper_questions
             WHERE paper_id IN (
               SELECT id FROM exam_papers
               WHERE id = ? AND owner_id = ? AND school_id = ? AND status = ?
             )",
            (paper_id, actor.user_id, actor.tenant_id, Status::Draft.as_str()),
        )?;
        let affected = tx.execute(
            "DELETE FROM exam_papers WHERE id = ? AND owner_id = ? AND school_id = ? AND status = ?",
            (paper_id, actor.user_id, actor.tenant_id, Status::Draft.as_str()),
        )?;
        tx.commit()?;
        Ok(outcome::report(
            Action::DeletePaper,
            Ok(TransitionOutcome::from_count(affected)),
            &cfg.redirects,
        ))
    })
}

fn handle_papers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match query_actor(conn, req, &[Role::Teacher]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };

    let rows = conn
        .prepare(
            "SELECT
               p.id, p.title, p.subject, p.class_name, p.exam_date, p.status,
               (SELECT COUNT(*) FROM exam_paper_questions pq WHERE pq.paper_id = p.id) AS question_count
             FROM exam_papers p
             WHERE p.owner_id = ? AND p.school_id = ?
             ORDER BY p.created_at DESC, p.id DESC",
        )
        .and_then(|mut stmt| {
            let rows = stmt.query_map((actor.user_id, actor.tenant_id), |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "title": row.get::<_, String>(1)?,
                    "subject": row.get::<_, String>(2)?,
                    "className": row.get::<_, String>(3)?,
                    "examDate": row.get::<_, Option<String>>(4)?,
                    "status": row.get::<_, String>(5)?,
                    "questionCount": row.get::<_, i64>(6)?,
                }))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        });

    match rows {
        Ok(papers) => ok(&req.id, json!({ "papers": papers })),
        Err(e) => query_error(req, PageError::Store(e)),
    }
}

fn handle_papers_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match query_actor(conn, req, &[Role::Teacher]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(paper_id) = param_i64(req, "paperId") else {
        return err(&req.id, "bad_params", "missing paperId", None);
    };

    let paper = match owned_paper(conn, &actor, paper_id) {
        Ok(p) => p,
        Err(e) => return query_error(req, e),
    };
    let questions = match paper_questions(conn, paper.id) {
        Ok(q) => q,
        Err(e) => return query_error(req, PageError::Store(e)),
    };
    let allocated: f64 = questions.iter().map(|(_, q)| q.marks).sum();

    ok(
        &req.id,
        json!({
            "paper": {
                "id": paper.id,
                "title": paper.title,
                "subject": paper.subject,
                "className": paper.class_name,
                "examDate": paper.exam_date,
                "durationMinutes": paper.duration_minutes,
                "totalMarks": paper.total_marks,
                "instructions": paper.instructions,
                "status": paper.status,
            },
            "questions": questions
                .iter()
                .map(|(id, q)| json!({
                    "id": id,
                    "questionText": q.text,
                    "questionType": q.question_type,
                    "marks": q.marks,
                }))
                .collect::<Vec<_>>(),
            "allocatedMarks": allocated,
        }),
    )
}

fn handle_papers_render(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match query_actor(conn, req, &[Role::Teacher]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(paper_id) = param_i64(req, "paperId") else {
        return err(&req.id, "bad_params", "missing paperId", None);
    };

    let paper = match owned_paper(conn, &actor, paper_id) {
        Ok(p) => p,
        Err(e) => return query_error(req, e),
    };
    let questions = match paper_questions(conn, paper.id) {
        Ok(q) => q,
        Err(e) => return query_error(req, PageError::Store(e)),
    };

    let doc = PaperDocument {
        school_name: paper.school_name,
        title: paper.title,
        subject: paper.subject,
        class_name: paper.class_name,
        exam_date: paper.exam_date,
        duration_minutes: paper.duration_minutes,
        total_marks: paper.total_marks,
        instructions: paper.instructions,
        questions: questions.into_iter().map(|(_, q)| q).collect(),
    };
    let rendered = templates::render_paper(&doc);
    ok(
        &req.id,
        serde_json::to_value(rendered).unwrap_or_else(|_| json!({})),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "papers.create" => Some(handle_papers_create(state, req)),
        "papers.update" => Some(handle_papers_update(state, req)),
        "papers.addQuestion" => Some(handle_papers_add_question(state, req)),
        "papers.removeQuestion" => Some(handle_papers_remove_question(state, req)),
        "papers.publish" => Some(handle_papers_publish(state, req)),
        "papers.delete" => Some(handle_papers_delete(state, req)),
        "papers.list" => Some(handle_papers_list(state, req)),
        "papers.get" => Some(handle_papers_get(state, req)),
        "papers.render" => Some(handle_papers_render(state, req)),
        _ => None,
    }
}
