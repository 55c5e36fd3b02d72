use crate::access::{Actor, Role};
use crate::db::now_rfc3339;
use crate::outcome::{Flash, FlashKind, PageError};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct NewUser<'a> {
    pub school_id: Option<i64>,
    pub email: &'a str,
    pub name: &'a str,
    pub role: Role,
    pub password: &'a str,
}

pub fn create_user(conn: &Connection, user: &NewUser<'_>) -> rusqlite::Result<i64> {
    let salt = Uuid::new_v4().simple().to_string();
    let hash = hash_password(&salt, user.password);
    conn.execute(
        "INSERT INTO users(school_id, email, name, role, password_salt, password_hash, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (
            user.school_id,
            user.email.trim().to_ascii_lowercase(),
            user.name,
            user.role.as_str(),
            &salt,
            &hash,
            now_rfc3339(),
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub struct Bootstrap<'a> {
    pub school_code: &'a str,
    pub school_name: &'a str,
    pub admin_email: &'a str,
    pub admin_name: &'a str,
    pub admin_password: &'a str,
}

pub const MIN_PASSWORD_CHARS: usize = 8;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("workspace already has users")]
    AlreadyInitialized,
    #[error("admin password must be at least 8 characters")]
    WeakPassword,
    #[error("store failure: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Creates the first school and its admin. Refuses once any user exists.
pub fn bootstrap(conn: &Connection, b: &Bootstrap<'_>) -> Result<(i64, i64), BootstrapError> {
    let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    if users > 0 {
        return Err(BootstrapError::AlreadyInitialized);
    }
    if b.admin_password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(BootstrapError::WeakPassword);
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO schools(code, name, created_at) VALUES(?, ?, ?)",
        (b.school_code.trim(), b.school_name.trim(), now_rfc3339()),
    )?;
    let school_id = tx.last_insert_rowid();
    let admin_id = create_user(
        &tx,
        &NewUser {
            school_id: Some(school_id),
            email: b.admin_email,
            name: b.admin_name,
            role: Role::Admin,
            password: b.admin_password,
        },
    )?;
    tx.commit()?;
    tracing::info!(school_id, admin_id, "workspace bootstrapped");
    Ok((school_id, admin_id))
}

pub struct Login {
    pub token: String,
    pub actor: Actor,
}

/// Checks credentials and opens a session. `None` covers both an unknown email and
/// a wrong password so the caller cannot tell them apart.
pub fn login(
    conn: &Connection,
    email: &str,
    password: &str,
    ttl_minutes: i64,
) -> Result<Option<Login>, PageError> {
    let now = Utc::now();
    // Lazy sweep of dead sessions.
    conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?",
        [now.to_rfc3339_opts(SecondsFormat::Secs, true)],
    )?;

    let row: Option<(i64, Option<i64>, String, String, String)> = conn
        .query_row(
            "SELECT id, school_id, role, password_salt, password_hash
             FROM users
             WHERE email = ? AND active = 1",
            [email.trim().to_ascii_lowercase()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;
    let Some((user_id, school_id, role, salt, hash)) = row else {
        return Ok(None);
    };
    if hash_password(&salt, password) != hash {
        return Ok(None);
    }
    let Some(role) = Role::parse(&role) else {
        tracing::warn!(user_id, "user has unknown role");
        return Ok(None);
    };
    let Some(tenant_id) = school_id else {
        return Err(PageError::TenantMissing);
    };

    let token = Uuid::new_v4().to_string();
    let expires = Duration::try_minutes(ttl_minutes)
        .filter(|ttl| *ttl > Duration::zero())
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| PageError::Validation(format!("session ttl {ttl_minutes} is out of range")))?;
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at, expires_at) VALUES(?, ?, ?, ?)",
        (
            &token,
            user_id,
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
            expires.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    )?;
    tracing::info!(user_id, tenant_id, "session opened");
    Ok(Some(Login {
        token,
        actor: Actor {
            user_id,
            tenant_id,
            role,
        },
    }))
}

pub fn logout(conn: &Connection, token: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM sessions WHERE token = ?", [token])? > 0)
}

/// Session token to trusted identity. Read-only.
pub fn resolve(conn: &Connection, token: Option<&str>) -> Result<Actor, PageError> {
    let Some(token) = token.filter(|t| !t.trim().is_empty()) else {
        return Err(PageError::Unauthenticated);
    };

    let row: Option<(i64, String, String, Option<i64>, Option<i64>)> = conn
        .query_row(
            "SELECT u.id, u.role, s.expires_at, u.school_id, sc.id
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             LEFT JOIN schools sc ON sc.id = u.school_id
             WHERE s.token = ? AND u.active = 1",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;
    let Some((user_id, role, expires_at, school_id, school_row)) = row else {
        return Err(PageError::Unauthenticated);
    };

    let expired = DateTime::parse_from_rfc3339(&expires_at)
        .map(|t| t.with_timezone(&Utc) <= Utc::now())
        .unwrap_or(true);
    if expired {
        return Err(PageError::Unauthenticated);
    }
    let Some(role) = Role::parse(&role) else {
        return Err(PageError::Unauthenticated);
    };
    let (Some(tenant_id), Some(_)) = (school_id, school_row) else {
        return Err(PageError::TenantMissing);
    };

    Ok(Actor {
        user_id,
        tenant_id,
        role,
    })
}

pub fn store_flash(conn: &Connection, token: &str, flash: &Flash) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sessions SET flash_kind = ?, flash_message = ? WHERE token = ?",
        (flash.kind.as_str(), &flash.message, token),
    )?;
    Ok(())
}

/// Returns the pending flash and clears it.
pub fn take_flash(conn: &Connection, token: &str) -> rusqlite::Result<Option<Flash>> {
    let tx = conn.unchecked_transaction()?;
    let row: Option<(Option<String>, Option<String>)> = tx
        .query_row(
            "SELECT flash_kind, flash_message FROM sessions WHERE token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((Some(kind), Some(message))) = row else {
        return Ok(None);
    };
    tx.execute(
        "UPDATE sessions SET flash_kind = NULL, flash_message = NULL WHERE token = ?",
        [token],
    )?;
    tx.commit()?;
    Ok(FlashKind::parse(&kind).map(|kind| Flash { kind, message }))
}
