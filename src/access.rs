use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// The authenticated identity behind one request. Built only by `auth::resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: i64,
    pub tenant_id: i64,
    pub role: Role,
}

/// Whether an action is limited to the row's owner or open to the whole school.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Owner,
    Tenant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub role: Role,
    pub scope: Scope,
}

impl Policy {
    pub const fn new(role: Role, scope: Scope) -> Self {
        Self { role, scope }
    }
}

/// Ownership columns of a row that has already been loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub owner_id: i64,
    pub tenant_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    WrongRole,
    WrongTenant,
    NotOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzDecision {
    Permit,
    Deny(DenyReason),
}

/// Role-only half of the predicate. Transitions check this before touching the
/// store and push the tenant and owner half into their UPDATE.
pub fn require_role(actor: &Actor, allowed: &[Role]) -> AuthzDecision {
    if allowed.contains(&actor.role) {
        AuthzDecision::Permit
    } else {
        AuthzDecision::Deny(DenyReason::WrongRole)
    }
}

pub fn authorize(actor: &Actor, subject: &Subject, policy: &Policy) -> AuthzDecision {
    if let AuthzDecision::Deny(reason) = require_role(actor, &[policy.role]) {
        return AuthzDecision::Deny(reason);
    }
    if actor.tenant_id != subject.tenant_id {
        return AuthzDecision::Deny(DenyReason::WrongTenant);
    }
    if policy.scope == Scope::Owner && actor.user_id != subject.owner_id {
        return AuthzDecision::Deny(DenyReason::NotOwner);
    }
    AuthzDecision::Permit
}
