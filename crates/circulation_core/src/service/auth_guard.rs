//! Session-to-identity translation.
//!
//! # Responsibility
//! - Resolve an `Authorization` value to an [`Identity`] through the
//!   injected identity provider.
//! - Gate administrative variants on the admin role.
//!
//! # Invariants
//! - Any provider failure is treated as unauthenticated.
//! - A blank token never reaches the provider.

use crate::error::{CirculationError, CirculationResult};
use crate::model::identity::{Identity, Role};
use log::{debug, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

const BEARER_PREFIX: &str = "Bearer ";

/// Failure reported by an identity provider (cache or network outage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityLookupError(pub String);

impl Display for IdentityLookupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "identity lookup failed: {}", self.0)
    }
}

impl Error for IdentityLookupError {}

/// External session/identity collaborator.
pub trait IdentityProvider: Send + Sync {
    /// Returns `Ok(None)` for unknown or expired tokens.
    fn resolve(&self, token: &str) -> Result<Option<Identity>, IdentityLookupError>;
}

/// Process-local session table, used by the CLI and tests.
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    sessions: RwLock<HashMap<String, Identity>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_session(&self, token: impl Into<String>, identity: Identity) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into(), identity);
    }

    pub fn revoke_session(&self, token: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .is_some()
    }
}

impl IdentityProvider for InMemoryIdentityProvider {
    fn resolve(&self, token: &str) -> Result<Option<Identity>, IdentityLookupError> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned())
    }
}

pub struct AuthGuard {
    provider: Arc<dyn IdentityProvider>,
}

impl AuthGuard {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Resolves a raw `Authorization` header value (with or without the
    /// `Bearer ` prefix).
    pub fn authenticate(&self, authorization: Option<&str>) -> CirculationResult<Identity> {
        let token = authorization
            .map(|value| value.strip_prefix(BEARER_PREFIX).unwrap_or(value).trim())
            .filter(|token| !token.is_empty())
            .ok_or(CirculationError::NotAuthenticated)?;

        match self.provider.resolve(token) {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => {
                debug!("event=authenticate module=auth status=error error_code=unknown_session");
                Err(CirculationError::NotAuthenticated)
            }
            Err(err) => {
                warn!(
                    "event=authenticate module=auth status=error error_code=provider_failure error={}",
                    err
                );
                Err(CirculationError::NotAuthenticated)
            }
        }
    }

    /// Authenticates and additionally requires the admin role.
    pub fn authenticate_admin(&self, authorization: Option<&str>) -> CirculationResult<Identity> {
        let identity = self.authenticate(authorization)?;
        require_admin(&identity)?;
        Ok(identity)
    }
}

/// Role check for administrative variants.
pub fn require_admin(identity: &Identity) -> CirculationResult<()> {
    match identity.role {
        Role::Admin => Ok(()),
        Role::User => {
            debug!(
                "event=role_check module=auth status=error user_id={} required=admin",
                identity.user_id
            );
            Err(CirculationError::NotAuthorized {
                required: Role::Admin,
            })
        }
    }
}
