//! `keel-auth`: project access-control boundary.
//!
//! Principals, project roles, permissions, the grant table seam and the
//! permission gate. This crate does not depend on HTTP or storage;
//! the grant table and the group directory are injected as traits.

pub mod authorize;
pub mod claims;
pub mod directory;
pub mod grants;
pub mod permissions;
pub mod principal;
pub mod resolver;
pub mod role_resolver;
pub mod roles;

pub use authorize::{
    Access, AuthorizationExplanation, AuthzError, Decision, Denial, DenialKind, PermissionGate,
};
pub use claims::{Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError, validate_claims};
pub use directory::{DirectoryError, GroupDirectory, NoGroupDirectory, StaticGroupDirectory};
pub use grants::{Grant, GrantStore, GrantStoreError, NewGrant, RoleChange, ensure_owner_retained};
pub use permissions::{Permission, PermissionPolicy, Requirement};
pub use principal::{GroupId, Principal, PrincipalId};
pub use resolver::{AuthenticationError, Credential, PrincipalResolver, TrustedHeaders};
pub use role_resolver::{RoleResolver, effective_role};
pub use roles::{GlobalRole, Role};

#[cfg(test)]
pub(crate) mod testing;
