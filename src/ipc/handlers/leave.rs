use crate::access::{Role, Scope};
use crate::db::now_rfc3339;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, optional_str, page_i64, page_str, query_actor, query_error};
use crate::ipc::page;
use crate::ipc::types::{AppState, Request};
use crate::outcome::{self, Action, PageError};
use crate::transition::{Decision, Status, Transition, WorkflowKind};
use chrono::NaiveDate;
use serde_json::json;

fn parse_date(req: &Request, key: &str) -> Result<Option<NaiveDate>, PageError> {
    match optional_str(req, key) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| PageError::Validation(format!("{key} must be a YYYY-MM-DD date."))),
    }
}

fn handle_leave_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::CreateLeave, &[Role::Teacher], |conn, actor, cfg| {
        let kind = optional_str(req, "kind").unwrap_or("leave");
        if kind != "leave" && kind != "permission" {
            return Err(PageError::Validation(
                "Kind must be leave or permission.".into(),
            ));
        }
        let reason = page_str(req, "reason")?;
        let start = parse_date(req, "startDate")?;
        let end = parse_date(req, "endDate")?;
        if let (Some(s), Some(e)) = (start, end) {
            if e < s {
                return Err(PageError::Validation(
                    "End date must not be before start date.".into(),
                ));
            }
        }

        conn.execute(
            "INSERT INTO permission_requests(school_id, owner_id, kind, reason, start_date, end_date, status, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                actor.tenant_id,
                actor.user_id,
                kind,
                reason,
                start.map(|d| d.to_string()),
                end.map(|d| d.to_string()),
                Status::Pending.as_str(),
                now_rfc3339(),
            ),
        )?;
        let request_id = conn.last_insert_rowid();
        Ok(outcome::success(Action::CreateLeave, &cfg.redirects)
            .with_data(json!({ "requestId": request_id })))
    })
}

fn handle_leave_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::CancelLeave, &[Role::Teacher], |conn, actor, cfg| {
        let request_id = page_i64(req, "requestId")?;
        let res = Transition::new(
            WorkflowKind::PermissionRequest,
            request_id,
            Scope::Owner,
            &[Status::Pending],
            Status::Cancelled,
        )
        .apply(conn, actor)
        .map_err(PageError::from);
        Ok(outcome::report(Action::CancelLeave, res, &cfg.redirects))
    })
}

fn handle_leave_review(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::ReviewLeave, &[Role::Admin], |conn, actor, cfg| {
        let request_id = page_i64(req, "requestId")?;
        let decision = Decision::parse(page_str(req, "decision")?)
            .ok_or_else(|| PageError::Validation("Decision must be approve or reject.".into()))?;
        let res = Transition::new(
            WorkflowKind::PermissionRequest,
            request_id,
            Scope::Tenant,
            &[Status::Pending],
            decision.target_status(),
        )
        .set("reviewed_by", actor.user_id)
        .apply(conn, actor)
        .map_err(PageError::from);
        Ok(outcome::report(Action::ReviewLeave, res, &cfg.redirects))
    })
}

fn handle_leave_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match query_actor(conn, req, &[Role::Teacher, Role::Admin]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };

    // Teachers see their own requests; admins see the whole school.
    let owner_filter: Option<i64> = match actor.role {
        Role::Admin => None,
        _ => Some(actor.user_id),
    };
    let rows = conn
        .prepare(
            "SELECT r.id, r.owner_id, u.name, r.kind, r.reason, r.start_date, r.end_date, r.status, r.created_at
             FROM permission_requests r
             JOIN users u ON u.id = r.owner_id
             WHERE r.school_id = ? AND (? IS NULL OR r.owner_id = ?)
             ORDER BY r.created_at DESC, r.id DESC",
        )
        .and_then(|mut stmt| {
            let rows = stmt.query_map((actor.tenant_id, owner_filter, owner_filter), |row| {
                Ok(json!({
                    "id": row.get::<_, i64>(0)?,
                    "ownerId": row.get::<_, i64>(1)?,
                    "ownerName": row.get::<_, String>(2)?,
                    "kind": row.get::<_, String>(3)?,
                    "reason": row.get::<_, String>(4)?,
                    "startDate": row.get::<_, Option<String>>(5)?,
                    "endDate": row.get::<_, Option<String>>(6)?,
                    "status": row.get::<_, String>(7)?,
                    "createdAt": row.get::<_, String>(8)?,
                }))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        });

    match rows {
        Ok(requests) => ok(&req.id, json!({ "requests": requests })),
        Err(e) => query_error(req, PageError::Store(e)),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "leave.create" => Some(handle_leave_create(state, req)),
        "leave.cancel" => Some(handle_leave_cancel(state, req)),
        "leave.review" => Some(handle_leave_review(state, req)),
        "leave.list" => Some(handle_leave_list(state, req)),
        _ => None,
    }
}
