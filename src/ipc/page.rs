//! Boundary for page actions: every outcome becomes `ok: true` with a flash and
//! a redirect. This is the only place a flash is written into the session.

use crate::access::{self, Actor, AuthzDecision, Role};
use crate::auth;
use crate::config::Config;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, session_token};
use crate::ipc::types::{AppState, Request};
use crate::outcome::{self, Action, Flash, PageError, PageOutcome};
use rusqlite::Connection;

pub fn run<F>(state: &AppState, req: &Request, action: Action, roles: &[Role], body: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &Actor, &Config) -> Result<PageOutcome, PageError>,
{
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let cfg = &state.config;
    let token = session_token(req);

    let outcome = match auth::resolve(conn, token) {
        Err(e) => outcome::report(action, Err(e), &cfg.redirects),
        Ok(actor) => match access::require_role(&actor, roles) {
            AuthzDecision::Deny(_) => {
                tracing::info!(
                    user = actor.user_id,
                    role = actor.role.as_str(),
                    method = %req.method,
                    "role not allowed"
                );
                PageOutcome {
                    applied: false,
                    flash: Flash::error("You do not have access to that page."),
                    redirect: outcome::home_for(actor.role, &cfg.redirects).to_string(),
                    data: None,
                }
            }
            AuthzDecision::Permit => match body(conn, &actor, cfg) {
                Ok(o) => o,
                Err(e) => outcome::report(action, Err(e), &cfg.redirects),
            },
        },
    };

    if let Some(token) = token {
        if let Err(e) = auth::store_flash(conn, token, &outcome.flash) {
            tracing::warn!(error = %e, "could not store flash");
        }
    }
    respond(req, &outcome)
}

pub fn respond(req: &Request, outcome: &PageOutcome) -> serde_json::Value {
    ok(
        &req.id,
        serde_json::to_value(outcome).unwrap_or_else(|_| serde_json::json!({})),
    )
}
