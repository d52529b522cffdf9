//! Signed session tokens: access, refresh, and the temporary 2FA handoff.
//!
//! Each kind signs with its own secret and lifetime, so compromise of one
//! secret cannot forge the other kinds. Access and 2FA tokens are stateless;
//! refresh tokens are additionally tracked in the ledger.

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::config::{parse_expires_in, AuthConfig};
use crate::identity::{Role, StaffIdentity, SubjectKind};

/// The three token classes. Doubles as the `use` claim inside the payload so
/// a token presented to the wrong verifier fails even before claims are read.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    #[serde(rename = "2fa")]
    TwoFactor,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::TwoFactor => "2fa",
        }
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
    #[error("unexpected token kind")]
    WrongKind,
}

/// Signed claims carried by every token kind.
///
/// Optional fields are populated per kind: staff access tokens embed shop and
/// role claims, customer access tokens embed the shop only, refresh and 2FA
/// tokens carry just the subject.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(rename = "use")]
    pub token_use: TokenKind,
    pub subject: SubjectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub exp: i64,
}

impl Claims {
    fn bare(sub: Uuid, token_use: TokenKind, subject: SubjectKind) -> Self {
        Self {
            sub,
            token_use,
            subject,
            shop_id: None,
            role_id: None,
            role_name: None,
            permissions: None,
            iat: 0,
            exp: 0,
        }
    }

    /// Access claims for a customer session.
    #[must_use]
    pub fn customer_access(customer_id: Uuid, shop_id: Uuid) -> Self {
        Self {
            shop_id: Some(shop_id),
            ..Self::bare(customer_id, TokenKind::Access, SubjectKind::Customer)
        }
    }

    /// Access claims for a staff session, embedding the resolved role.
    #[must_use]
    pub fn staff_access(staff: &StaffIdentity, role: Option<&Role>) -> Self {
        Self {
            shop_id: staff.shop_id,
            role_id: role.map(|role| role.id).or(staff.role_id),
            role_name: role.map(|role| role.name.clone()),
            permissions: Some(role.map(|role| role.permissions.clone()).unwrap_or_default()),
            ..Self::bare(staff.id, TokenKind::Access, SubjectKind::Staff)
        }
    }

    /// Refresh claims: subject id and kind marker only.
    #[must_use]
    pub fn refresh(subject_id: Uuid, kind: SubjectKind) -> Self {
        Self::bare(subject_id, TokenKind::Refresh, kind)
    }

    /// Temporary claims binding a password-verified staff login to the
    /// pending second-factor step.
    #[must_use]
    pub fn two_factor(staff_id: Uuid) -> Self {
        Self::bare(staff_id, TokenKind::TwoFactor, SubjectKind::Staff)
    }
}

struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_seconds: i64,
}

impl SigningKey {
    fn new(secret: &SecretString, ttl: &str, kind: TokenKind) -> Self {
        let ttl_seconds = parse_expires_in(ttl);
        if ttl_seconds == 0 {
            warn!(
                kind = kind.as_str(),
                ttl,
                "token lifetime parsed to zero seconds; tokens of this kind are issued already expired"
            );
        }
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_seconds,
        }
    }
}

/// Signs and verifies the three token kinds.
pub struct TokenIssuer {
    access: SigningKey,
    refresh: SigningKey,
    two_factor: SigningKey,
}

impl TokenIssuer {
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            access: SigningKey::new(
                config.access_token_secret(),
                config.access_token_ttl(),
                TokenKind::Access,
            ),
            refresh: SigningKey::new(
                config.refresh_token_secret(),
                config.refresh_token_ttl(),
                TokenKind::Refresh,
            ),
            two_factor: SigningKey::new(
                config.temp_token_secret(),
                config.temp_token_ttl(),
                TokenKind::TwoFactor,
            ),
        }
    }

    fn key(&self, kind: TokenKind) -> &SigningKey {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
            TokenKind::TwoFactor => &self.two_factor,
        }
    }

    /// Stamp `iat`/`exp`, force the `use` marker, and sign.
    ///
    /// # Errors
    /// Returns an error if serialization or signing fails.
    pub fn issue(&self, kind: TokenKind, mut claims: Claims) -> Result<String> {
        let key = self.key(kind);
        let now = Utc::now().timestamp();
        claims.token_use = kind;
        claims.iat = now;
        claims.exp = now + key.ttl_seconds;
        encode(&Header::default(), &claims, &key.encoding)
            .with_context(|| format!("failed to sign {} token", kind.as_str()))
    }

    /// Verify signature and expiry for `kind` and return the claims.
    ///
    /// # Errors
    /// [`TokenError::Expired`] past `exp`, [`TokenError::WrongKind`] when the
    /// `use` marker does not match, [`TokenError::Invalid`] for anything else.
    pub fn verify(&self, kind: TokenKind, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.key(kind).decoding, &validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            },
        )?;
        if data.claims.token_use != kind {
            return Err(TokenError::WrongKind);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::{Claims, TokenError, TokenIssuer, TokenKind};
    use crate::config::AuthConfig;
    use crate::identity::{Role, StaffIdentity, SubjectKind};
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    fn issuer() -> TokenIssuer {
        TokenIssuer::from_config(&AuthConfig::new())
    }

    fn staff() -> StaffIdentity {
        StaffIdentity {
            id: Uuid::new_v4(),
            shop_id: Some(Uuid::new_v4()),
            role_id: Some(Uuid::new_v4()),
            email: "owner@salon.test".to_string(),
            first_name: "Dana".to_string(),
            last_name: "Reyes".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            totp_secret: None,
            two_factor_enabled: false,
        }
    }

    #[test]
    fn round_trip_preserves_payload_for_every_kind() {
        let issuer = issuer();
        let staff = staff();
        let role = Role {
            id: staff.role_id.unwrap(),
            name: "Manager".to_string(),
            permissions: vec!["bookings.read".to_string(), "bookings.write".to_string()],
        };
        let cases = [
            (TokenKind::Access, Claims::staff_access(&staff, Some(&role))),
            (
                TokenKind::Access,
                Claims::customer_access(Uuid::new_v4(), Uuid::new_v4()),
            ),
            (
                TokenKind::Refresh,
                Claims::refresh(Uuid::new_v4(), SubjectKind::Customer),
            ),
            (TokenKind::TwoFactor, Claims::two_factor(staff.id)),
        ];
        for (kind, claims) in cases {
            let token = issuer.issue(kind, claims.clone()).unwrap();
            let verified = issuer.verify(kind, &token).unwrap();
            assert_eq!(verified.sub, claims.sub);
            assert_eq!(verified.token_use, kind);
            assert_eq!(verified.subject, claims.subject);
            assert_eq!(verified.shop_id, claims.shop_id);
            assert_eq!(verified.role_id, claims.role_id);
            assert_eq!(verified.role_name, claims.role_name);
            assert_eq!(verified.permissions, claims.permissions);
            assert!(verified.exp > verified.iat);
        }
    }

    #[test]
    fn kinds_do_not_cross_verify() {
        let issuer = issuer();
        let refresh = issuer
            .issue(
                TokenKind::Refresh,
                Claims::refresh(Uuid::new_v4(), SubjectKind::Staff),
            )
            .unwrap();
        // Different secret: the signature itself fails.
        assert_eq!(
            issuer.verify(TokenKind::Access, &refresh),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn use_marker_is_checked_even_with_matching_secret() {
        // Same secret for both kinds, so only the marker can tell them apart.
        let config = AuthConfig::new()
            .with_access_token_secret(secrecy::SecretString::from("shared"))
            .with_refresh_token_secret(secrecy::SecretString::from("shared"));
        let issuer = TokenIssuer::from_config(&config);
        let access = issuer
            .issue(
                TokenKind::Access,
                Claims::customer_access(Uuid::new_v4(), Uuid::new_v4()),
            )
            .unwrap();
        assert_eq!(
            issuer.verify(TokenKind::Refresh, &access),
            Err(TokenError::WrongKind)
        );
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let issuer = issuer();
        let mut claims = Claims::two_factor(Uuid::new_v4());
        claims.iat = Utc::now().timestamp() - 600;
        claims.exp = Utc::now().timestamp() - 300;
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"dev-temp-secret"),
        )
        .unwrap();
        assert_eq!(
            issuer.verify(TokenKind::TwoFactor, &token),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn garbage_tokens_are_invalid() {
        assert_eq!(
            issuer().verify(TokenKind::Access, "not-a-token"),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn use_marker_serializes_compactly() {
        let claims = Claims::two_factor(Uuid::new_v4());
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["use"], "2fa");
        assert_eq!(value["subject"], "staff");
        // Unset kind-specific claims stay off the wire.
        assert!(value.get("shop_id").is_none());
        assert!(value.get("permissions").is_none());
    }
}
