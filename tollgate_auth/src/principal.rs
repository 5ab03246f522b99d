//! Principals and the store they live in

use std::{collections::BTreeMap, fmt, sync::Mutex};

use async_trait::async_trait;
use tollgate::{Identity, PrincipalId, Role};

use crate::{credentials::PasswordHash, error::RepositoryError};

/// An account that can be issued tokens
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    /// Identifier assigned by the repository
    pub id: PrincipalId,
    /// Email address, unique across principals
    pub email: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Granted role
    pub role: Role,
    /// Hash of the principal's password
    pub password_hash: PasswordHash,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl Principal {
    /// The identity carried in this principal's tokens
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: self.role,
        }
    }
}

/// A principal that has not yet been assigned an identifier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPrincipal {
    /// Email address
    pub email: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Granted role
    pub role: Role,
    /// Hash of the principal's password
    pub password_hash: PasswordHash,
}

/// Persistence for principals
///
/// Implementations must enforce email uniqueness in
/// [`create`](Self::create); the auth service relies on it to settle
/// concurrent sign-ups for the same address.
#[async_trait]
pub trait PrincipalRepository: Send + Sync + fmt::Debug {
    /// Looks up a principal by identifier
    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, RepositoryError>;

    /// Looks up a principal by email address
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, RepositoryError>;

    /// Stores a new principal and assigns its identifier
    ///
    /// Fails with [`RepositoryError::DuplicateEmail`] if the email is taken.
    async fn create(&self, principal: NewPrincipal) -> Result<Principal, RepositoryError>;
}

/// A process-local principal store
///
/// Email addresses are compared case-insensitively.
#[derive(Debug, Default)]
pub struct InMemoryPrincipalRepository {
    inner: Mutex<Principals>,
}

#[derive(Debug, Default)]
struct Principals {
    last_id: u64,
    by_id: BTreeMap<PrincipalId, Principal>,
}

impl Principals {
    fn find_by_email(&self, email: &str) -> Option<&Principal> {
        self.by_id
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
    }
}

impl InMemoryPrincipalRepository {
    /// Constructs an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Principals>, RepositoryError> {
        self.inner
            .lock()
            .map_err(|_| RepositoryError::Unavailable("principal store lock poisoned".into()))
    }
}

#[async_trait]
impl PrincipalRepository for InMemoryPrincipalRepository {
    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, RepositoryError> {
        Ok(self.lock()?.by_id.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, RepositoryError> {
        Ok(self.lock()?.find_by_email(email).cloned())
    }

    async fn create(&self, principal: NewPrincipal) -> Result<Principal, RepositoryError> {
        let mut principals = self.lock()?;

        if principals.find_by_email(&principal.email).is_some() {
            return Err(RepositoryError::DuplicateEmail);
        }

        principals.last_id += 1;
        let id = PrincipalId(principals.last_id);

        let principal = Principal {
            id,
            email: principal.email,
            first_name: principal.first_name,
            last_name: principal.last_name,
            role: principal.role,
            password_hash: principal.password_hash,
        };

        principals.by_id.insert(id, principal.clone());
        tracing::debug!(principal.id = %id, "created principal");

        Ok(principal)
    }
}
