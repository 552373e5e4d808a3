use keel_auth::Principal;

/// Principal context for a request.
///
/// `None` means no credential was presented; handlers pass it through and the
/// service answers `401` for anything that needs an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Option<Principal>,
}

impl PrincipalContext {
    pub fn new(principal: Option<Principal>) -> Self {
        Self { principal }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }
}
