use crate::access::Role;
use crate::db::now_rfc3339;
use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, optional_str, page_f64, page_i64, page_str, param_i64, query_actor, query_error,
};
use crate::ipc::page;
use crate::ipc::types::{AppState, Request};
use crate::outcome::{self, Action, PageError};
use crate::transition::{Status, TransitionOutcome};
use serde_json::json;

fn handle_activities_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::CreateActivity, &[Role::Teacher], |conn, actor, cfg| {
        let title = page_str(req, "title")?;
        let total_marks = page_f64(req, "totalMarks")?;
        if !total_marks.is_finite() || total_marks <= 0.0 {
            return Err(PageError::Validation(
                "Total marks must be greater than 0.".into(),
            ));
        }
        conn.execute(
            "INSERT INTO activities(school_id, owner_id, title, total_marks, created_at)
             VALUES(?, ?, ?, ?, ?)",
            (actor.tenant_id, actor.user_id, title, total_marks, now_rfc3339()),
        )?;
        let activity_id = conn.last_insert_rowid();
        Ok(outcome::success(Action::CreateActivity, &cfg.redirects)
            .with_data(json!({ "activityId": activity_id })))
    })
}

fn handle_activities_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
               a.id,
               a.title,
               a.total_marks,
               (SELECT COUNT(*) FROM submissions s WHERE s.activity_id = a.id) AS submitted,
               (SELECT COUNT(*) FROM submissions s WHERE s.activity_id = a.id AND s.status = 'graded') AS graded
             FROM activities a
             WHERE a.owner_id = ? AND a.school_id = ?
             ORDER BY a.created_at DESC, a.id DESC",
        )
        .and_then(|mut stmt| {
            let rows = stmt.query_map((actor.user_id, actor.tenant_id), |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "title": row.get::<_, String>(1)?,
                    "totalMarks": row.get::<_, f64>(2)?,
                    "submissionCount": row.get::<_, i64>(3)?,
                    "gradedCount": row.get::<_, i64>(4)?,
                }))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        });

    match rows {
        Ok(activities) => ok(&req.id, json!({ "activities": activities })),
        Err(e) => query_error(req, PageError::Store(e)),
    }
}

fn handle_submissions_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::SubmitWork, &[Role::Student], |conn, actor, cfg| {
        let activity_id = page_i64(req, "activityId")?;
        let content = page_str(req, "content")?;
        // Insert only when the activity is in the student's school and nothing was
        // submitted yet; the affected-row count says which happened.
        let affected = conn.execute(
            "INSERT INTO submissions(activity_id, student_id, content, status, submitted_at)
             SELECT a.id, ?, ?, ?, ?
             FROM activities a
             WHERE a.id = ? AND a.school_id = ?
             ON CONFLICT(activity_id, student_id) DO NOTHING",
            (
                actor.user_id,
                content,
                Status::Submitted.as_str(),
                now_rfc3339(),
                activity_id,
                actor.tenant_id,
            ),
        )?;
        let res = Ok(TransitionOutcome::from_count(affected));
        let out = outcome::report(Action::SubmitWork, res, &cfg.redirects);
        if out.applied {
            return Ok(out.with_data(json!({ "submissionId": conn.last_insert_rowid() })));
        }
        Ok(out)
    })
}

fn handle_submissions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match query_actor(conn, req, &[Role::Teacher]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(activity_id) = param_i64(req, "activityId") else {
        return err(&req.id, "bad_params", "missing activityId", None);
    };

    let rows = conn
        .prepare(
            "SELECT s.id, s.student_id, u.name, s.content, s.marks_obtained, s.feedback, s.status, s.submitted_at, s.graded_at
             FROM submissions s
             JOIN activities a ON a.id = s.activity_id
             JOIN users u ON u.id = s.student_id
             WHERE s.activity_id = ? AND a.owner_id = ? AND a.school_id = ?
             ORDER BY u.name, s.id",
        )
        .and_then(|mut stmt| {
            let rows = stmt.query_map((activity_id, actor.user_id, actor.tenant_id), |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "studentId": row.get::<_, i64>(1)?,
                    "studentName": row.get::<_, String>(2)?,
                    "content": row.get::<_, String>(3)?,
                    "marksObtained": row.get::<_, Option<f64>>(4)?,
                    "feedback": row.get::<_, Option<String>>(5)?,
                    "status": row.get::<_, String>(6)?,
                    "submittedAt": row.get::<_, String>(7)?,
                    "gradedAt": row.get::<_, Option<String>>(8)?,
                }))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        });

    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => query_error(req, PageError::Store(e)),
    }
}

fn handle_submissions_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::GradeSubmission, &[Role::Teacher], |conn, actor, cfg| {
        let submission_id = page_i64(req, "submissionId")?;
        let marks = page_f64(req, "marks")?;
        let feedback = optional_str(req, "feedback");
        let res = grading::grade(conn, actor, submission_id, marks, feedback);
        Ok(outcome::report(Action::GradeSubmission, res, &cfg.redirects))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "activities.create" => Some(handle_activities_create(state, req)),
        "activities.list" => Some(handle_activities_list(state, req)),
        "submissions.submit" => Some(handle_submissions_submit(state, req)),
        "submissions.list" => Some(handle_submissions_list(state, req)),
        "submissions.grade" => Some(handle_submissions_grade(state, req)),
        _ => None,
    }
}
