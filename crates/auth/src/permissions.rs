use core::str::FromStr;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use keel_core::DomainError;

use crate::Role;

/// Closed permission vocabulary checked by the permission gate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "project.read")]
    ProjectRead,
    #[serde(rename = "project.update")]
    ProjectUpdate,
    #[serde(rename = "project.archive")]
    ProjectArchive,
    #[serde(rename = "groups.manage")]
    GroupsManage,
    #[serde(rename = "milestones.manage")]
    MilestonesManage,
    #[serde(rename = "links.manage")]
    LinksManage,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::ProjectRead,
        Permission::ProjectUpdate,
        Permission::ProjectArchive,
        Permission::GroupsManage,
        Permission::MilestonesManage,
        Permission::LinksManage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ProjectRead => "project.read",
            Permission::ProjectUpdate => "project.update",
            Permission::ProjectArchive => "project.archive",
            Permission::GroupsManage => "groups.manage",
            Permission::MilestonesManage => "milestones.manage",
            Permission::LinksManage => "links.manage",
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| DomainError::validation(format!("unknown permission '{s}'")))
    }
}

/// What a permission demands of an authenticated, non-admin principal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "role", rename_all = "snake_case")]
pub enum Requirement {
    /// Any authenticated principal; project grants are not consulted.
    Authenticated,
    /// The effective project role must be at least this role.
    AtLeast(Role),
}

impl Requirement {
    pub fn is_satisfied_by(&self, role: Role) -> bool {
        match self {
            Requirement::Authenticated => true,
            Requirement::AtLeast(min) => role >= *min,
        }
    }
}

/// Declarative permission → requirement table.
///
/// The gate never matches on permissions itself; adding a permission means
/// adding a row here.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    rules: HashMap<Permission, Requirement>,
}

impl PermissionPolicy {
    pub fn from_rules(rules: impl IntoIterator<Item = (Permission, Requirement)>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    /// Requirement for a permission.
    ///
    /// Permissions missing from the table demand `owner`, so an incomplete
    /// table fails closed.
    pub fn requirement(&self, permission: Permission) -> Requirement {
        self.rules
            .get(&permission)
            .copied()
            .unwrap_or(Requirement::AtLeast(Role::Owner))
    }

    /// Permissions granted to a given project role.
    pub fn permissions_for(&self, role: Role) -> Vec<Permission> {
        Permission::ALL
            .into_iter()
            .filter(|p| self.requirement(*p).is_satisfied_by(role))
            .collect()
    }
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::from_rules([
            (Permission::ProjectRead, Requirement::Authenticated),
            (Permission::ProjectUpdate, Requirement::AtLeast(Role::Manager)),
            (Permission::ProjectArchive, Requirement::AtLeast(Role::Owner)),
            (Permission::GroupsManage, Requirement::AtLeast(Role::Owner)),
            (Permission::MilestonesManage, Requirement::AtLeast(Role::Contributor)),
            (Permission::LinksManage, Requirement::AtLeast(Role::Manager)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_role_ladder() {
        let policy = PermissionPolicy::default();

        assert_eq!(policy.permissions_for(Role::Viewer), vec![Permission::ProjectRead]);
        assert_eq!(
            policy.permissions_for(Role::Contributor),
            vec![Permission::ProjectRead, Permission::MilestonesManage]
        );
        assert_eq!(
            policy.permissions_for(Role::Manager),
            vec![
                Permission::ProjectRead,
                Permission::ProjectUpdate,
                Permission::MilestonesManage,
                Permission::LinksManage,
            ]
        );
        assert_eq!(policy.permissions_for(Role::Owner), Permission::ALL.to_vec());
    }

    #[test]
    fn missing_rule_fails_closed() {
        let policy = PermissionPolicy::from_rules([]);
        assert_eq!(
            policy.requirement(Permission::LinksManage),
            Requirement::AtLeast(Role::Owner)
        );
    }

    #[test]
    fn permission_names_parse_back() {
        for p in Permission::ALL {
            assert_eq!(p.as_str().parse::<Permission>().unwrap(), p);
        }
        assert!("project.delete".parse::<Permission>().is_err());
    }
}
