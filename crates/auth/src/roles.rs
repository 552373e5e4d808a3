use core::str::FromStr;
use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use keel_core::DomainError;

/// Project-scoped role.
///
/// Variants are declared in ascending precedence, so the derived `Ord` is the
/// total order `Viewer < Contributor < Manager < Owner`. Role resolution relies
/// on this order (most privilege wins).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Contributor,
    Manager,
    Owner,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Viewer, Role::Contributor, Role::Manager, Role::Owner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Contributor => "contributor",
            Role::Manager => "manager",
            Role::Owner => "owner",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "contributor" => Ok(Role::Contributor),
            "manager" => Ok(Role::Manager),
            "owner" => Ok(Role::Owner),
            other => Err(DomainError::validation(format!(
                "unknown role '{other}' (expected viewer, contributor, manager or owner)"
            ))),
        }
    }
}

/// Global (organization-wide) role carried by a principal, e.g. `"admin"`.
///
/// Global roles are opaque strings at this layer; only `admin` has meaning to
/// the permission gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalRole(Cow<'static, str>);

impl GlobalRole {
    pub const ADMIN: GlobalRole = GlobalRole(Cow::Borrowed("admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.as_str().eq_ignore_ascii_case("admin")
    }
}

impl core::fmt::Display for GlobalRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
