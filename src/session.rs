//! The five user-facing auth flows, orchestrated over the component seams.
//!
//! Failure messages are deliberately uniform ("Invalid or expired OTP",
//! "Invalid credentials") across distinct causes so callers cannot enumerate
//! accounts or learn which factor failed. Do not split them per cause.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::config::{parse_expires_in, AuthConfig};
use crate::error::{AuthError, Result};
use crate::hash::CredentialHasher;
use crate::identity::{
    normalize_email, CustomerIdentity, CustomerSummary, IdentityRepository, PendingOtp,
    StaffIdentity, StaffSummary, SubjectKind,
};
use crate::ledger::{RefreshTokenLedger, RefreshTokenRecord};
use crate::notify::NotificationGateway;
use crate::otp::{challenge_key, generate_code, OtpChallengeStore, RateLimitDecision};
use crate::token::{Claims, TokenError, TokenIssuer, TokenKind};
use crate::totp::TotpAuthenticator;

const OTP_TTL_SECONDS: i64 = 10 * 60;

#[derive(Clone, Debug, Serialize)]
pub struct OtpRequested {
    pub message: &'static str,
    pub expires_in: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CustomerSession {
    pub access_token: String,
    pub refresh_token: String,
    pub customer: CustomerSummary,
}

#[derive(Clone, Debug, Serialize)]
pub struct StaffSession {
    pub access_token: String,
    pub refresh_token: String,
    pub staff: StaffSummary,
}

/// Outcome of a staff password check: a full session, or a short-lived
/// handoff token when the account requires a second factor.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum StaffLogin {
    SecondFactor {
        requires_2fa: bool,
        temp_token: String,
    },
    Session(StaffSession),
}

#[derive(Clone, Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TwoFactorSetup {
    pub secret: String,
    pub qr_code: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct Ack {
    pub message: &'static str,
}

/// Authentication and session engine for staff and customers.
pub struct SessionService {
    identities: Arc<dyn IdentityRepository>,
    refresh_tokens: Arc<dyn RefreshTokenLedger>,
    challenges: Arc<dyn OtpChallengeStore>,
    notifications: Arc<dyn NotificationGateway>,
    tokens: TokenIssuer,
    totp: TotpAuthenticator,
    hasher: CredentialHasher,
    refresh_ttl_seconds: i64,
}

impl SessionService {
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        identities: Arc<dyn IdentityRepository>,
        refresh_tokens: Arc<dyn RefreshTokenLedger>,
        challenges: Arc<dyn OtpChallengeStore>,
        notifications: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            identities,
            refresh_tokens,
            challenges,
            notifications,
            tokens: TokenIssuer::from_config(config),
            totp: TotpAuthenticator::new(config.totp_issuer()),
            hasher: CredentialHasher::new(config.hash_work_factor()),
            refresh_ttl_seconds: parse_expires_in(config.refresh_token_ttl()),
        }
    }

    /// Start a customer OTP challenge: generate, persist, and dispatch a code.
    ///
    /// The code never appears in the response. Delivery failures are logged
    /// and swallowed; the code is already persisted and verifiable.
    ///
    /// # Errors
    /// `NotFound` for an unknown shop, `RateLimited` when the request window
    /// for this `(shop, email)` is full.
    pub async fn request_customer_otp(&self, shop_id: Uuid, email: &str) -> Result<OtpRequested> {
        let email = normalize_email(email);
        let shop = self
            .identities
            .find_shop(shop_id)
            .await?
            .ok_or(AuthError::NotFound("Shop not found"))?;

        let key = challenge_key(shop_id, &email);
        if self.challenges.check_request(&key).await? == RateLimitDecision::Limited {
            return Err(AuthError::RateLimited("OTP request limit exceeded"));
        }

        let customer = match self.identities.find_customer(shop_id, &email).await? {
            Some(customer) => customer,
            None => self.identities.create_customer(shop_id, &email).await?,
        };

        let code = generate_code();
        let expires_at = Utc::now() + Duration::seconds(OTP_TTL_SECONDS);
        let pending = PendingOtp {
            hash: self.hasher.hash(&code)?,
            expires_at,
        };
        self.identities
            .set_customer_otp(customer.id, Some(pending))
            .await?;
        self.challenges.reset_attempts(&key, expires_at).await?;

        if let Err(err) = self
            .notifications
            .send_otp(&email, &code, Some(&shop.name))
            .await
        {
            warn!(shop_id = %shop_id, "otp delivery failed: {err}");
        }

        Ok(OtpRequested {
            message: "OTP sent successfully",
            expires_in: OTP_TTL_SECONDS,
        })
    }

    /// Verify a customer's submitted code and open a session.
    ///
    /// # Errors
    /// `Unauthorized` for every failure cause: unknown customer, no pending
    /// code, exhausted attempts, expired code, or mismatch.
    pub async fn verify_customer_otp(
        &self,
        shop_id: Uuid,
        email: &str,
        code: &str,
    ) -> Result<CustomerSession> {
        let email = normalize_email(email);
        let customer = self.identities.find_customer(shop_id, &email).await?;
        let Some(customer) = customer else {
            return Err(AuthError::Unauthorized("Invalid or expired OTP"));
        };
        let (Some(otp_hash), Some(otp_expires_at)) =
            (customer.otp_hash.clone(), customer.otp_expires_at)
        else {
            return Err(AuthError::Unauthorized("Invalid or expired OTP"));
        };

        let key = challenge_key(shop_id, &email);
        if self.challenges.attempts_exceeded(&key).await? {
            return Err(AuthError::Unauthorized("OTP attempts exceeded"));
        }

        if otp_expires_at < Utc::now() {
            self.identities.set_customer_otp(customer.id, None).await?;
            return Err(AuthError::Unauthorized("Invalid or expired OTP"));
        }

        if !self.hasher.verify(code, &otp_hash) {
            self.challenges.register_failure(&key).await?;
            return Err(AuthError::Unauthorized("Invalid or expired OTP"));
        }

        // Consumed: the same code can never verify twice.
        self.identities.set_customer_otp(customer.id, None).await?;
        self.challenges.clear(&key).await?;

        self.issue_customer_session(customer).await
    }

    /// Check staff credentials and either open a session or hand back a
    /// temporary token for the second-factor step.
    ///
    /// # Errors
    /// `Unauthorized` on unknown email or password mismatch.
    pub async fn staff_login(&self, email: &str, password: &str) -> Result<StaffLogin> {
        let email = normalize_email(email);
        let staff = self.identities.find_staff_by_email(&email).await?;
        let Some(staff) = staff else {
            return Err(AuthError::Unauthorized("Invalid credentials"));
        };
        if !self.hasher.verify(password, &staff.password_hash) {
            return Err(AuthError::Unauthorized("Invalid credentials"));
        }

        if staff.two_factor_enabled {
            let temp_token = self
                .tokens
                .issue(TokenKind::TwoFactor, Claims::two_factor(staff.id))?;
            return Ok(StaffLogin::SecondFactor {
                requires_2fa: true,
                temp_token,
            });
        }

        Ok(StaffLogin::Session(self.issue_staff_session(staff).await?))
    }

    /// Complete a 2FA login with the temporary token and a current TOTP code.
    ///
    /// # Errors
    /// `Unauthorized` on a bad/expired/wrong-kind token, missing enrollment,
    /// or code mismatch.
    pub async fn verify_second_factor(
        &self,
        temp_token: &str,
        code: &str,
    ) -> Result<StaffSession> {
        let claims = self
            .tokens
            .verify(TokenKind::TwoFactor, temp_token)
            .map_err(|err| match err {
                TokenError::WrongKind => AuthError::Unauthorized("Invalid token"),
                _ => AuthError::Unauthorized("Invalid or expired token"),
            })?;

        let staff = self.identities.find_staff(claims.sub).await?;
        let Some(staff) = staff else {
            return Err(AuthError::Unauthorized("2FA not configured"));
        };
        let Some(secret) = staff.totp_secret.clone() else {
            return Err(AuthError::Unauthorized("2FA not configured"));
        };

        if !self.totp.verify(&secret, code)? {
            return Err(AuthError::Unauthorized("Invalid code"));
        }

        self.issue_staff_session(staff).await
    }

    /// Begin TOTP enrollment for an authenticated staff account.
    ///
    /// Overwrites any prior unconfirmed secret; `two_factor_enabled` stays
    /// untouched until the code is confirmed.
    ///
    /// # Errors
    /// `Unauthorized` when the account no longer exists.
    pub async fn setup_second_factor(&self, staff_id: Uuid) -> Result<TwoFactorSetup> {
        let staff = self.identities.find_staff(staff_id).await?;
        let Some(staff) = staff else {
            return Err(AuthError::Unauthorized("Unauthorized"));
        };

        let (secret, qr_code) = self.totp.begin_enrollment(&staff.email)?;
        self.identities
            .set_staff_totp_secret(staff.id, &secret)
            .await?;

        Ok(TwoFactorSetup { secret, qr_code })
    }

    /// Confirm enrollment by verifying the first code from the new secret.
    ///
    /// # Errors
    /// `BadRequest` when no setup is pending, `Unauthorized` on a wrong code.
    pub async fn confirm_second_factor(&self, staff_id: Uuid, code: &str) -> Result<Ack> {
        let staff = self.identities.find_staff(staff_id).await?;
        let Some(secret) = staff.as_ref().and_then(|staff| staff.totp_secret.clone()) else {
            return Err(AuthError::BadRequest("2FA setup not started"));
        };

        if !self.totp.verify(&secret, code)? {
            return Err(AuthError::Unauthorized("Invalid code"));
        }

        self.identities.enable_staff_two_factor(staff_id).await?;
        Ok(Ack {
            message: "2FA enabled successfully",
        })
    }

    /// Disable 2FA. Requires the account password and a current code; both
    /// must pass.
    ///
    /// # Errors
    /// `BadRequest` when no secret is configured, `Unauthorized` when either
    /// factor fails.
    pub async fn disable_second_factor(
        &self,
        staff_id: Uuid,
        code: &str,
        password: &str,
    ) -> Result<Ack> {
        let staff = self.identities.find_staff(staff_id).await?;
        let Some(staff) = staff else {
            return Err(AuthError::BadRequest("2FA not configured"));
        };
        let Some(secret) = staff.totp_secret.clone() else {
            return Err(AuthError::BadRequest("2FA not configured"));
        };

        if !self.hasher.verify(password, &staff.password_hash) {
            return Err(AuthError::Unauthorized("Invalid credentials"));
        }
        if !self.totp.verify(&secret, code)? {
            return Err(AuthError::Unauthorized("Invalid code"));
        }

        self.identities.clear_staff_two_factor(staff.id).await?;
        Ok(Ack {
            message: "2FA disabled successfully",
        })
    }

    /// Rotate a refresh token into a new access/refresh pair.
    ///
    /// A found ledger record is removed before its expiry is checked, so a
    /// token can never be presented twice, not even one that turns out to be
    /// expired or whose subject has since been deleted.
    ///
    /// # Errors
    /// `Unauthorized` on bad signature/kind, an unknown or expired ledger
    /// record, or a subject that no longer exists.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self
            .tokens
            .verify(TokenKind::Refresh, refresh_token)
            .map_err(|_| AuthError::Unauthorized("Invalid refresh token"))?;

        let record = self.refresh_tokens.take(refresh_token).await?;
        let record = record
            .filter(|record| record.expires_at > Utc::now())
            .ok_or(AuthError::Unauthorized("Refresh token expired"))?;

        let kind = if claims.subject == SubjectKind::Customer
            || record.owner_kind == SubjectKind::Customer
        {
            SubjectKind::Customer
        } else {
            SubjectKind::Staff
        };

        match kind {
            SubjectKind::Customer => {
                let customer = self
                    .identities
                    .find_customer_by_id(claims.sub)
                    .await?
                    .ok_or(AuthError::Unauthorized("Customer not found"))?;
                let session = self.issue_customer_session(customer).await?;
                Ok(TokenPair {
                    access_token: session.access_token,
                    refresh_token: session.refresh_token,
                })
            }
            SubjectKind::Staff => {
                let staff = self
                    .identities
                    .find_staff(claims.sub)
                    .await?
                    .ok_or(AuthError::Unauthorized("User not found"))?;
                let session = self.issue_staff_session(staff).await?;
                Ok(TokenPair {
                    access_token: session.access_token,
                    refresh_token: session.refresh_token,
                })
            }
        }
    }

    /// Revoke a refresh token. Always succeeds; revoking an unknown token is
    /// a no-op.
    pub async fn logout(&self, refresh_token: &str) -> Result<Ack> {
        self.refresh_tokens.revoke(refresh_token).await?;
        Ok(Ack {
            message: "Logged out successfully",
        })
    }

    async fn issue_customer_session(&self, customer: CustomerIdentity) -> Result<CustomerSession> {
        let access_token = self.tokens.issue(
            TokenKind::Access,
            Claims::customer_access(customer.id, customer.shop_id),
        )?;
        let refresh_token = self.tokens.issue(
            TokenKind::Refresh,
            Claims::refresh(customer.id, SubjectKind::Customer),
        )?;
        self.store_refresh_token(&refresh_token, customer.id, SubjectKind::Customer)
            .await?;

        Ok(CustomerSession {
            access_token,
            refresh_token,
            customer: customer.summary(),
        })
    }

    async fn issue_staff_session(&self, staff: StaffIdentity) -> Result<StaffSession> {
        let role = match staff.role_id {
            Some(role_id) => self.identities.find_role(role_id).await?,
            None => None,
        };
        let access_token = self
            .tokens
            .issue(TokenKind::Access, Claims::staff_access(&staff, role.as_ref()))?;
        let refresh_token = self.tokens.issue(
            TokenKind::Refresh,
            Claims::refresh(staff.id, SubjectKind::Staff),
        )?;
        self.store_refresh_token(&refresh_token, staff.id, SubjectKind::Staff)
            .await?;

        Ok(StaffSession {
            access_token,
            refresh_token,
            staff: staff.summary(role.as_ref()),
        })
    }

    async fn store_refresh_token(
        &self,
        token: &str,
        owner_id: Uuid,
        owner_kind: SubjectKind,
    ) -> Result<()> {
        let now = Utc::now();
        self.refresh_tokens
            .insert(RefreshTokenRecord {
                token: token.to_string(),
                owner_id,
                owner_kind,
                expires_at: now + Duration::seconds(self.refresh_ttl_seconds),
                created_at: now,
            })
            .await?;
        Ok(())
    }
}
