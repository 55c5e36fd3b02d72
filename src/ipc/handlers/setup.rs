use crate::access::Role;
use crate::auth::{self, Bootstrap, BootstrapError, NewUser, MIN_PASSWORD_CHARS};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, page_str, required_str};
use crate::ipc::page;
use crate::ipc::types::{AppState, Request};
use crate::outcome::{self, Action, PageError, GENERIC_FAILURE};
use serde_json::json;

fn handle_bootstrap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let fields = (|| {
        Ok::<_, serde_json::Value>((
            required_str(req, "schoolCode")?,
            required_str(req, "schoolName")?,
            required_str(req, "adminEmail")?,
            required_str(req, "adminName")?,
            required_str(req, "adminPassword")?,
        ))
    })();
    let (school_code, school_name, admin_email, admin_name, admin_password) = match fields {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match auth::bootstrap(
        conn,
        &Bootstrap {
            school_code: &school_code,
            school_name: &school_name,
            admin_email: &admin_email,
            admin_name: &admin_name,
            admin_password: &admin_password,
        },
    ) {
        Ok((school_id, admin_id)) => ok(
            &req.id,
            json!({ "schoolId": school_id, "adminId": admin_id }),
        ),
        Err(BootstrapError::Store(e)) => {
            tracing::error!(error = %e, "bootstrap failed");
            err(&req.id, "db_query_failed", GENERIC_FAILURE, None)
        }
        Err(e) => {
            tracing::warn!(error = %e, "bootstrap refused");
            err(&req.id, "bootstrap_refused", e.to_string(), None)
        }
    }
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    page::run(state, req, Action::CreateUser, &[Role::Admin], |conn, actor, cfg| {
        let email = page_str(req, "email")?;
        let name = page_str(req, "name")?;
        let password = page_str(req, "password")?;
        let role = Role::parse(page_str(req, "role")?)
            .ok_or_else(|| PageError::Validation("Role must be admin, teacher or student.".into()))?;
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(PageError::Validation(
                "Password must be at least 8 characters.".into(),
            ));
        }

        let taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE email = ?",
            [email.to_ascii_lowercase()],
            |r| r.get(0),
        )?;
        if taken > 0 {
            return Err(PageError::Validation("That email is already in use.".into()));
        }

        // New users always join the admin's own school.
        let user_id = auth::create_user(
            conn,
            &NewUser {
                school_id: Some(actor.tenant_id),
                email,
                name,
                role,
                password,
            },
        )?;
        tracing::info!(user_id, role = role.as_str(), by = actor.user_id, "user created");
        Ok(outcome::success(Action::CreateUser, &cfg.redirects).with_data(json!({ "userId": user_id })))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.bootstrap" => Some(handle_bootstrap(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        _ => None,
    }
}
