//! Time-based one-time passwords for the staff second factor.

use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Generates and verifies RFC 6238 codes (SHA-1, 6 digits, 30s step, one
/// step of skew either way, matching the common authenticator apps).
#[derive(Clone)]
pub struct TotpAuthenticator {
    issuer: String,
}

impl TotpAuthenticator {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    /// Generate a fresh base32 secret.
    #[must_use]
    pub fn generate_secret(&self) -> String {
        Secret::generate_secret().to_encoded().to_string()
    }

    /// Begin enrollment for `account_name` (the staff email).
    ///
    /// Returns `(secret_base32, qr_data_url)`; the QR encodes the otpauth
    /// provisioning URI with this authenticator's issuer label.
    ///
    /// # Errors
    /// Returns an error if QR rendering fails.
    pub fn begin_enrollment(&self, account_name: &str) -> Result<(String, String)> {
        let secret = self.generate_secret();
        let totp = self.instance(&secret, account_name)?;
        let qr = totp
            .get_qr_base64()
            .map_err(|err| anyhow!("failed to render enrollment QR: {err}"))?;
        Ok((secret, format!("data:image/png;base64,{qr}")))
    }

    /// Check a submitted code against a stored secret, tolerating one time
    /// step of clock drift either way.
    ///
    /// # Errors
    /// Returns an error if the stored secret is not valid base32.
    pub fn verify(&self, secret_base32: &str, code: &str) -> Result<bool> {
        let totp = self.instance(secret_base32, "")?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    fn instance(&self, secret_base32: &str, account_name: &str) -> Result<TOTP> {
        let secret = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|err| anyhow!("invalid TOTP secret: {err}"))?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret,
            Some(self.issuer.clone()),
            account_name.to_string(),
        )
        .map_err(|err| anyhow!("failed to build TOTP: {err}"))
    }

    /// Current code for a secret; test-only, for driving verification paths.
    #[cfg(test)]
    pub(crate) fn current_code(&self, secret_base32: &str) -> Result<String> {
        let totp = self.instance(secret_base32, "")?;
        totp.generate_current()
            .map_err(|err| anyhow!("failed to generate code: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::TotpAuthenticator;

    #[test]
    fn current_code_verifies() {
        let totp = TotpAuthenticator::new("Chiavi");
        let secret = totp.generate_secret();
        let code = totp.current_code(&secret).unwrap();
        assert!(totp.verify(&secret, &code).unwrap());
    }

    #[test]
    fn wrong_code_fails() {
        let totp = TotpAuthenticator::new("Chiavi");
        let secret = totp.generate_secret();
        let code = totp.current_code(&secret).unwrap();
        // Flip one digit to keep the same shape but break the value.
        let wrong: String = code
            .chars()
            .enumerate()
            .map(|(i, c)| if i == 0 { if c == '9' { '0' } else { '9' } } else { c })
            .collect();
        assert!(!totp.verify(&secret, &wrong).unwrap());
    }

    #[test]
    fn secrets_are_unique_per_enrollment() {
        let totp = TotpAuthenticator::new("Chiavi");
        assert_ne!(totp.generate_secret(), totp.generate_secret());
    }

    #[test]
    fn enrollment_yields_scannable_material() {
        let totp = TotpAuthenticator::new("Chiavi");
        let (secret, qr) = totp.begin_enrollment("owner@salon.test").unwrap();
        assert!(!secret.is_empty());
        assert!(qr.starts_with("data:image/png;base64,"));
        // The fresh secret is immediately usable.
        let code = totp.current_code(&secret).unwrap();
        assert!(totp.verify(&secret, &code).unwrap());
    }

    #[test]
    fn corrupt_secret_is_an_error() {
        let totp = TotpAuthenticator::new("Chiavi");
        assert!(totp.verify("not base32 at all!!!", "123456").is_err());
    }
}
