use crate::access::{self, Actor, AuthzDecision, Role};
use crate::auth;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::outcome::{PageError, GENERIC_FAILURE};
use rusqlite::Connection;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn session_token(req: &Request) -> Option<&str> {
    req.params.get("session").and_then(|v| v.as_str())
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Ids arrive as JSON numbers or numeric strings (form fields).
pub fn param_i64(req: &Request, key: &str) -> Option<i64> {
    match req.params.get(key)? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn param_f64(req: &Request, key: &str) -> Option<f64> {
    match req.params.get(key)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// Page-action flavours: a bad field becomes a flash, not an error envelope.

pub fn page_i64(req: &Request, key: &str) -> Result<i64, PageError> {
    param_i64(req, key).ok_or_else(|| PageError::Validation(format!("Missing or invalid {key}.")))
}

pub fn page_f64(req: &Request, key: &str) -> Result<f64, PageError> {
    param_f64(req, key).ok_or_else(|| PageError::Validation(format!("Missing or invalid {key}.")))
}

/// Optional numeric field: absent, null or blank is `None`, anything else must parse.
fn page_opt<T>(
    req: &Request,
    key: &str,
    parse: fn(&Request, &str) -> Option<T>,
) -> Result<Option<T>, PageError> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(_) => parse(req, key)
            .map(Some)
            .ok_or_else(|| PageError::Validation(format!("Invalid {key}."))),
    }
}

pub fn page_opt_i64(req: &Request, key: &str) -> Result<Option<i64>, PageError> {
    page_opt(req, key, param_i64)
}

pub fn page_opt_f64(req: &Request, key: &str) -> Result<Option<f64>, PageError> {
    page_opt(req, key, param_f64)
}

pub fn page_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, PageError> {
    optional_str(req, key).ok_or_else(|| PageError::Validation(format!("Missing {key}.")))
}

/// Resolves the session for a query-style request and checks the role.
pub fn query_actor(conn: &Connection, req: &Request, roles: &[Role]) -> Result<Actor, serde_json::Value> {
    let actor = auth::resolve(conn, session_token(req)).map_err(|e| query_error(req, e))?;
    if let AuthzDecision::Deny(_) = access::require_role(&actor, roles) {
        return Err(query_error(req, PageError::WrongRole));
    }
    Ok(actor)
}

pub fn query_error(req: &Request, e: PageError) -> serde_json::Value {
    match e {
        PageError::Unauthenticated | PageError::TenantMissing => {
            err(&req.id, "unauthenticated", e.to_string(), None)
        }
        PageError::WrongRole => err(&req.id, "forbidden", e.to_string(), None),
        PageError::WrongTenant | PageError::NotOwner | PageError::NotApplied => {
            err(&req.id, "not_found", "not found", None)
        }
        PageError::Validation(msg) => err(&req.id, "bad_params", msg, None),
        PageError::Store(e) => {
            tracing::error!(error = %e, method = %req.method, "query failed");
            err(&req.id, "db_query_failed", GENERIC_FAILURE, None)
        }
    }
}
