use crate::access::Role;
use crate::config::Redirects;
use crate::transition::TransitionOutcome;
use serde::Serialize;
use thiserror::Error;

pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// Everything that can stop a page action short of success.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("no valid session")]
    Unauthenticated,
    #[error("role not allowed for this action")]
    WrongRole,
    #[error("session has no school")]
    TenantMissing,
    #[error("target belongs to another school")]
    WrongTenant,
    #[error("target belongs to another user")]
    NotOwner,
    #[error("transition not applied")]
    NotApplied,
    #[error("{0}")]
    Validation(String),
    #[error("store failure: {0}")]
    Store(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Success,
    Error,
}

impl FlashKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FlashKind::Success => "success",
            FlashKind::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<FlashKind> {
        match raw {
            "success" => Some(FlashKind::Success),
            "error" => Some(FlashKind::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Error,
            message: message.into(),
        }
    }
}

/// What the boundary does after a page action: show `flash`, go to `redirect`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageOutcome {
    pub applied: bool,
    pub flash: Flash,
    pub redirect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl PageOutcome {
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Every page action the sidecar knows, with its user-facing wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateUser,
    CreateLeave,
    CancelLeave,
    ReviewLeave,
    CreateActivity,
    SubmitWork,
    GradeSubmission,
    CreateQuestion,
    ReviewQuestion,
    CreatePaper,
    UpdatePaper,
    AddPaperQuestion,
    RemovePaperQuestion,
    PublishPaper,
    DeletePaper,
}

impl Action {
    fn success_message(self) -> &'static str {
        match self {
            Action::CreateUser => "User created.",
            Action::CreateLeave => "Request submitted.",
            Action::CancelLeave => "Request cancelled.",
            Action::ReviewLeave => "Request reviewed.",
            Action::CreateActivity => "Activity created.",
            Action::SubmitWork => "Submission received.",
            Action::GradeSubmission => "Submission graded.",
            Action::CreateQuestion => "Question submitted for review.",
            Action::ReviewQuestion => "Question reviewed.",
            Action::CreatePaper => "Exam paper created.",
            Action::UpdatePaper => "Exam paper updated.",
            Action::AddPaperQuestion => "Question added to paper.",
            Action::RemovePaperQuestion => "Question removed from paper.",
            Action::PublishPaper => "Exam paper published.",
            Action::DeletePaper => "Exam paper deleted.",
        }
    }

    fn not_applied_message(self) -> &'static str {
        match self {
            Action::CancelLeave => {
                "Request could not be cancelled. It may have already been processed."
            }
            Action::ReviewLeave | Action::ReviewQuestion => {
                "Could not review. It may have already been reviewed."
            }
            Action::GradeSubmission => "Submission not found.",
            Action::UpdatePaper
            | Action::AddPaperQuestion
            | Action::RemovePaperQuestion
            | Action::DeletePaper => "Paper not found or no longer editable.",
            Action::PublishPaper => "Paper not found or already published.",
            Action::SubmitWork => "Activity not found or already submitted.",
            Action::CreateUser
            | Action::CreateLeave
            | Action::CreateActivity
            | Action::CreateQuestion
            | Action::CreatePaper => "Nothing was saved.",
        }
    }

    /// The fixed page this action lands on, whatever happened.
    pub fn recovery<'a>(self, redirects: &'a Redirects) -> &'a str {
        match self {
            Action::CreateUser => &redirects.users,
            Action::CreateLeave | Action::CancelLeave | Action::ReviewLeave => &redirects.leave,
            Action::CreateActivity | Action::GradeSubmission => &redirects.grading,
            Action::SubmitWork => &redirects.home_student,
            Action::CreateQuestion | Action::ReviewQuestion => &redirects.questions,
            Action::CreatePaper
            | Action::UpdatePaper
            | Action::AddPaperQuestion
            | Action::RemovePaperQuestion
            | Action::PublishPaper
            | Action::DeletePaper => &redirects.papers,
        }
    }
}

pub fn home_for(role: Role, redirects: &Redirects) -> &str {
    match role {
        Role::Admin => &redirects.home_admin,
        Role::Teacher => &redirects.home_teacher,
        Role::Student => &redirects.home_student,
    }
}

pub fn success(action: Action, redirects: &Redirects) -> PageOutcome {
    PageOutcome {
        applied: true,
        flash: Flash::success(action.success_message()),
        redirect: action.recovery(redirects).to_string(),
        data: None,
    }
}

/// Maps a finished (or failed) action to a flash and a redirect.
///
/// `WrongRole` cannot be mapped here because it needs the actor's home page;
/// the page boundary handles it before calling this.
pub fn report(
    action: Action,
    result: Result<TransitionOutcome, PageError>,
    redirects: &Redirects,
) -> PageOutcome {
    let message = match result {
        Ok(TransitionOutcome::Applied) => return success(action, redirects),
        Ok(TransitionOutcome::NotApplied) | Err(PageError::NotApplied) => {
            action.not_applied_message().to_string()
        }
        Err(PageError::WrongTenant) | Err(PageError::NotOwner) => {
            action.not_applied_message().to_string()
        }
        Err(PageError::Validation(msg)) => msg,
        Err(PageError::Store(e)) => {
            tracing::error!(error = %e, ?action, "store failure");
            GENERIC_FAILURE.to_string()
        }
        Err(PageError::Unauthenticated) => {
            return PageOutcome {
                applied: false,
                flash: Flash::error("Please sign in to continue."),
                redirect: redirects.login.clone(),
                data: None,
            }
        }
        Err(PageError::TenantMissing) => {
            return PageOutcome {
                applied: false,
                flash: Flash::error("No school is linked to your account."),
                redirect: redirects.login.clone(),
                data: None,
            }
        }
        Err(PageError::WrongRole) => "You do not have access to that page.".to_string(),
    };
    PageOutcome {
        applied: false,
        flash: Flash::error(message),
        redirect: action.recovery(redirects).to_string(),
        data: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applied_maps_to_success_on_recovery_page() {
        let r = Redirects::default();
        let out = report(Action::CancelLeave, Ok(TransitionOutcome::Applied), &r);
        assert!(out.applied);
        assert_eq!(out.flash.kind, FlashKind::Success);
        assert_eq!(out.redirect, r.leave);
    }

    #[test]
    fn not_applied_and_ownership_denials_read_the_same() {
        let r = Redirects::default();
        let a = report(Action::CancelLeave, Ok(TransitionOutcome::NotApplied), &r);
        let b = report(Action::CancelLeave, Err(PageError::NotOwner), &r);
        let c = report(Action::CancelLeave, Err(PageError::WrongTenant), &r);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(!a.applied);
        assert_eq!(a.flash.kind, FlashKind::Error);
    }

    #[test]
    fn store_failure_does_not_leak_internal_text() {
        let r = Redirects::default();
        let e = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked: table permission_requests".to_string()),
        );
        let out = report(Action::GradeSubmission, Err(PageError::Store(e)), &r);
        assert_eq!(out.flash.message, GENERIC_FAILURE);
        assert_eq!(out.redirect, r.grading);
    }

    #[test]
    fn unauthenticated_goes_to_login() {
        let r = Redirects::default();
        let out = report(Action::ReviewQuestion, Err(PageError::Unauthenticated), &r);
        assert_eq!(out.redirect, r.login);
    }

    #[test]
    fn validation_message_is_shown_verbatim() {
        let r = Redirects::default();
        let out = report(
            Action::GradeSubmission,
            Err(PageError::Validation("Marks must be between 0 and 20.".into())),
            &r,
        );
        assert_eq!(out.flash.message, "Marks must be between 0 and 20.");
    }
}
