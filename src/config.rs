use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "schoold.json";

/// One year.
pub const MAX_SESSION_TTL_MINUTES: i64 = 525_600;

/// Per-workspace settings. Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    pub session_ttl_minutes: i64,
    pub redirects: Redirects,
}

/// Fixed follow-up locations for page actions.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Redirects {
    pub login: String,
    pub home_teacher: String,
    pub home_admin: String,
    pub home_student: String,
    pub leave: String,
    pub grading: String,
    pub questions: String,
    pub papers: String,
    pub users: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            session_ttl_minutes: 8 * 60,
            redirects: Redirects::default(),
        }
    }
}

impl Default for Redirects {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            home_teacher: "/teacher/dashboard".to_string(),
            home_admin: "/admin/dashboard".to_string(),
            home_student: "/student/dashboard".to_string(),
            leave: "/teacher/leave".to_string(),
            grading: "/teacher/submissions".to_string(),
            questions: "/teacher/question-bank".to_string(),
            papers: "/teacher/papers".to_string(),
            users: "/admin/users".to_string(),
        }
    }
}

/// Reads `<workspace>/schoold.json`. A missing file yields the defaults.
pub fn load(workspace: &Path) -> anyhow::Result<Config> {
    let path = workspace.join(CONFIG_FILE_NAME);
    if !path.is_file() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let cfg: Config = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.to_string_lossy()))?;
    if !(1..=MAX_SESSION_TTL_MINUTES).contains(&cfg.session_ttl_minutes) {
        bail!(
            "sessionTtlMinutes must be between 1 and {MAX_SESSION_TTL_MINUTES}, got {}",
            cfg.session_ttl_minutes
        );
    }
    Ok(cfg)
}

/// Like [`load`], but never fails: a bad file is logged and ignored.
pub fn load_or_default(workspace: &Path) -> Config {
    match load(workspace) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "ignoring workspace config");
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = temp_dir("schoold-config-missing");
        assert_eq!(load(&dir).expect("load"), Config::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = temp_dir("schoold-config-partial");
        std::fs::write(
            dir.join(CONFIG_FILE_NAME),
            r#"{ "busyTimeoutMs": 250, "redirects": { "leave": "/staff/leave" } }"#,
        )
        .expect("write config");

        let cfg = load(&dir).expect("load");
        assert_eq!(cfg.busy_timeout_ms, 250);
        assert_eq!(cfg.session_ttl_minutes, 480);
        assert_eq!(cfg.redirects.leave, "/staff/leave");
        assert_eq!(cfg.redirects.login, "/login");
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = temp_dir("schoold-config-invalid");
        std::fs::write(dir.join(CONFIG_FILE_NAME), "{ not json").expect("write config");
        assert!(load(&dir).is_err());
        assert_eq!(load_or_default(&dir), Config::default());
    }

    #[test]
    fn out_of_range_session_ttl_is_rejected() {
        let dir = temp_dir("schoold-config-ttl");
        for ttl in ["0", "-1", "9223372036854775807", "525601"] {
            std::fs::write(
                dir.join(CONFIG_FILE_NAME),
                format!(r#"{{ "sessionTtlMinutes": {ttl} }}"#),
            )
            .expect("write config");
            assert!(load(&dir).is_err(), "ttl {ttl}");
            assert_eq!(load_or_default(&dir).session_ttl_minutes, 480);
        }

        std::fs::write(dir.join(CONFIG_FILE_NAME), r#"{ "sessionTtlMinutes": 525600 }"#)
            .expect("write config");
        assert_eq!(load(&dir).expect("load").session_ttl_minutes, 525_600);
    }
}
