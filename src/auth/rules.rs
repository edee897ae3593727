//! Capability rules, role tiers and the `can` check.

use crate::config::{GROUP_RESOURCE, LOG_RESOURCE, USER_RESOURCE};
use crate::error::AppError;
use serde::{Deserialize, Serialize};

/// Wildcard subject.
pub const ALL: &str = "all";
/// Wildcard action.
pub const MANAGE: &str = "manage";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn contains(&self, item: &str) -> bool {
        match self {
            OneOrMany::One(s) => s == item,
            OneOrMany::Many(v) => v.iter().any(|s| s == item),
        }
    }
}

impl From<&str> for OneOrMany {
    fn from(s: &str) -> Self {
        OneOrMany::One(s.to_string())
    }
}

impl<const N: usize> From<[&str; N]> for OneOrMany {
    fn from(v: [&str; N]) -> Self {
        OneOrMany::Many(v.iter().map(|s| s.to_string()).collect())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub subject: OneOrMany,
    pub action: OneOrMany,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inverted: bool,
}

impl Rule {
    pub fn allow(subject: impl Into<OneOrMany>, action: impl Into<OneOrMany>) -> Self {
        Rule {
            subject: subject.into(),
            action: action.into(),
            inverted: false,
        }
    }

    pub fn deny(subject: impl Into<OneOrMany>, action: impl Into<OneOrMany>) -> Self {
        Rule {
            inverted: true,
            ..Rule::allow(subject, action)
        }
    }

    pub fn matches(&self, action: &str, subject: &str) -> bool {
        (self.subject.contains(subject) || self.subject.contains(ALL))
            && (self.action.contains(action) || self.action.contains(MANAGE))
    }
}

/// The last matching rule decides; inverted denies; no match denies.
pub fn can(rules: &[Rule], action: &str, subject: &str) -> bool {
    rules
        .iter()
        .rev()
        .find(|r| r.matches(action, subject))
        .map(|r| !r.inverted)
        .unwrap_or(false)
}

/// Ordered rules of one user; later rules take precedence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet(Vec<Rule>);

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        RuleSet(rules)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.0
    }

    pub fn can(&self, action: &str, subject: &str) -> bool {
        can(&self.0, action, subject)
    }
}

/// Role tiers, stored as integers on the user record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Locked = 0,
    Guest = 1,
    Staff = 16,
    Admin = 32,
    Super = 64,
}

impl TryFrom<i64> for Role {
    type Error = AppError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Role::Locked),
            1 => Ok(Role::Guest),
            16 => Ok(Role::Staff),
            32 => Ok(Role::Admin),
            64 => Ok(Role::Super),
            other => Err(AppError::InvalidRole(other)),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    /// Tier by name, case-insensitive: `locked`, `guest`, `staff`, `admin`, `super`.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "locked" => Ok(Role::Locked),
            "guest" => Ok(Role::Guest),
            "staff" => Ok(Role::Staff),
            "admin" => Ok(Role::Admin),
            "super" => Ok(Role::Super),
            other => Err(format!("unknown role `{}`", other)),
        }
    }
}

impl Role {
    pub fn rules(self) -> Vec<Rule> {
        match self {
            Role::Locked => vec![Rule::deny(ALL, MANAGE)],
            Role::Guest => vec![],
            Role::Staff => vec![
                Rule::allow(ALL, "read"),
                Rule::deny([USER_RESOURCE, GROUP_RESOURCE, LOG_RESOURCE], "read"),
            ],
            Role::Admin => vec![
                Rule::allow(ALL, MANAGE),
                Rule::deny(USER_RESOURCE, ["create", "update", "delete"]),
                Rule::deny(GROUP_RESOURCE, ["create", "update", "delete"]),
            ],
            Role::Super => vec![Rule::allow(ALL, MANAGE)],
        }
    }
}

/// Appended after every user's rules; the audit trail is append-only.
pub fn system_overrides() -> Vec<Rule> {
    vec![Rule::deny(LOG_RESOURCE, ["create", "update", "delete", "import"])]
}
