//! Argon2id hashing for staff passwords and customer OTP codes.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

/// Hashes and verifies credentials with an adjustable work factor.
///
/// The work factor maps to the Argon2 iteration count; memory and parallelism
/// stay at the crate defaults. Verification reads its parameters from the
/// stored PHC string, so raising the work factor never invalidates existing
/// hashes.
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
}

impl CredentialHasher {
    #[must_use]
    pub fn new(work_factor: u32) -> Self {
        let params = Params::new(
            Params::DEFAULT_M_COST,
            work_factor.max(1),
            Params::DEFAULT_P_COST,
            None,
        )
        .unwrap_or_default();
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Hash a credential into a PHC string with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if hashing fails (never for valid parameters).
    pub fn hash(&self, value: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(value.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash credential: {err}"))?;
        Ok(hash.to_string())
    }

    /// Constant-time comparison of a candidate against a stored PHC string.
    ///
    /// Unparseable stored hashes verify as false rather than erroring, so a
    /// corrupt row degrades to a failed login instead of a 500.
    #[must_use]
    pub fn verify(&self, value: &str, stored: &str) -> bool {
        PasswordHash::new(stored)
            .map(|parsed| {
                self.argon2
                    .verify_password(value.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new(2)
    }
}
