use crate::access::Role;
use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, query_actor, query_error, session_token};
use crate::ipc::page::respond;
use crate::ipc::types::{AppState, Request};
use crate::outcome::{self, Flash, PageError, PageOutcome, GENERIC_FAILURE};
use serde_json::json;

const BAD_CREDENTIALS: &str = "Invalid email or password.";

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let redirects = &state.config.redirects;
    let to_login = |flash: Flash| PageOutcome {
        applied: false,
        flash,
        redirect: redirects.login.clone(),
        data: None,
    };

    let (Some(email), Some(password)) = (optional_str(req, "email"), optional_str(req, "password"))
    else {
        return respond(req, &to_login(Flash::error(BAD_CREDENTIALS)));
    };

    let outcome = match auth::login(conn, email, password, state.config.session_ttl_minutes) {
        Ok(Some(login)) => {
            let flash = Flash::success("Welcome back.");
            if let Err(e) = auth::store_flash(conn, &login.token, &flash) {
                tracing::warn!(error = %e, "could not store flash");
            }
            PageOutcome {
                applied: true,
                flash,
                redirect: outcome::home_for(login.actor.role, redirects).to_string(),
                data: Some(json!({
                    "session": login.token,
                    "userId": login.actor.user_id,
                    "schoolId": login.actor.tenant_id,
                    "role": login.actor.role,
                })),
            }
        }
        Ok(None) => {
            tracing::info!("login rejected");
            to_login(Flash::error(BAD_CREDENTIALS))
        }
        Err(PageError::TenantMissing) => {
            to_login(Flash::error("No school is linked to your account."))
        }
        Err(e) => {
            tracing::error!(error = %e, "login failed");
            to_login(Flash::error(GENERIC_FAILURE))
        }
    };
    respond(req, &outcome)
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Some(token) = session_token(req) {
        if let Err(e) = auth::logout(conn, token) {
            tracing::error!(error = %e, "logout failed");
        }
    }
    respond(
        req,
        &PageOutcome {
            applied: true,
            flash: Flash::success("You have been signed out."),
            redirect: state.config.redirects.login.clone(),
            data: None,
        },
    )
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match query_actor(conn, req, &[Role::Admin, Role::Teacher, Role::Student]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let profile = conn.query_row(
        "SELECT u.name, u.email, s.name
         FROM users u
         JOIN schools s ON s.id = u.school_id
         WHERE u.id = ?",
        [actor.user_id],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        },
    );
    match profile {
        Ok((name, email, school_name)) => ok(
            &req.id,
            json!({
                "userId": actor.user_id,
                "schoolId": actor.tenant_id,
                "role": actor.role,
                "name": name,
                "email": email,
                "schoolName": school_name,
            }),
        ),
        Err(e) => query_error(req, PageError::Store(e)),
    }
}

fn handle_flash_take(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(token) = session_token(req) else {
        return err(&req.id, "bad_params", "missing session", None);
    };
    match auth::take_flash(conn, token) {
        Ok(flash) => ok(&req.id, json!({ "flash": flash })),
        Err(e) => query_error(req, PageError::Store(e)),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "session.whoami" => Some(handle_whoami(state, req)),
        "flash.take" => Some(handle_flash_take(state, req)),
        _ => None,
    }
}
