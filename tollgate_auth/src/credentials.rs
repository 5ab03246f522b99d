//! One-way password hashing

use std::fmt;

use aliri_braid::braid;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;

use crate::error::{credential_error, CredentialError};

/// A password hash in PHC string format
#[braid(serde, debug = "owned", display = "owned")]
pub struct PasswordHash;

impl fmt::Debug for PasswordHashRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("***PASSWORD HASH***")
    }
}

impl fmt::Display for PasswordHashRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("***PASSWORD HASH***")
    }
}

/// Hashes secrets and checks them against stored hashes
#[async_trait]
pub trait CredentialVerifier: Send + Sync + fmt::Debug {
    /// Hashes `secret` with a fresh salt
    async fn hash(&self, secret: &str) -> Result<PasswordHash, CredentialError>;

    /// Checks `secret` against a stored hash
    ///
    /// A mismatch is `Ok(false)`. A stored hash that cannot be parsed is an
    /// error.
    async fn verify(&self, secret: &str, hash: &PasswordHashRef) -> Result<bool, CredentialError>;
}

/// Argon2id hashing run on the blocking thread pool
#[derive(Clone, Debug)]
pub struct Argon2Verifier {
    params: Params,
}

/// Memory cost of the default parameters, in KiB
pub const DEFAULT_MEMORY_KIB: u32 = 64 * 1024;
/// Iterations of the default parameters
pub const DEFAULT_ITERATIONS: u32 = 3;
/// Parallelism of the default parameters
pub const DEFAULT_PARALLELISM: u32 = 1;

impl Argon2Verifier {
    /// Argon2id with 64 MiB of memory, 3 iterations and 1 lane
    ///
    /// # Errors
    ///
    /// Never under normal circumstances; the parameters are statically valid.
    pub fn new() -> Result<Self, CredentialError> {
        Self::with_cost(DEFAULT_MEMORY_KIB, DEFAULT_ITERATIONS, DEFAULT_PARALLELISM)
    }

    /// Argon2id with custom cost parameters
    ///
    /// # Errors
    ///
    /// The parameters are outside the ranges Argon2 accepts.
    pub fn with_cost(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    ) -> Result<Self, CredentialError> {
        let params =
            Params::new(memory_kib, iterations, parallelism, None).map_err(credential_error)?;
        Ok(Self { params })
    }

    fn hasher(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

#[async_trait]
impl CredentialVerifier for Argon2Verifier {
    async fn hash(&self, secret: &str) -> Result<PasswordHash, CredentialError> {
        let hasher = self.hasher();
        let secret = secret.to_owned();

        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            hasher
                .hash_password(secret.as_bytes(), &salt)
                .map(|hash| PasswordHash::new(hash.to_string()))
                .map_err(credential_error)
        })
        .await
        .map_err(credential_error)?
    }

    async fn verify(&self, secret: &str, hash: &PasswordHashRef) -> Result<bool, CredentialError> {
        let hasher = self.hasher();
        let secret = secret.to_owned();
        let hash = hash.to_owned();

        tokio::task::spawn_blocking(move || {
            let parsed =
                argon2::PasswordHash::new(hash.as_str()).map_err(credential_error)?;

            match hasher.verify_password(secret.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(argon2::password_hash::Error::Password) => Ok(false),
                Err(e) => Err(credential_error(e)),
            }
        })
        .await
        .map_err(credential_error)?
    }
}
