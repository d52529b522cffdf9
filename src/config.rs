//! Auth configuration: signing secrets, token lifetimes, hashing cost.

use regex::Regex;
use secrecy::SecretString;

const ENV_ACCESS_TOKEN_SECRET: &str = "CHIAVI_ACCESS_TOKEN_SECRET";
const ENV_REFRESH_TOKEN_SECRET: &str = "CHIAVI_REFRESH_TOKEN_SECRET";
const ENV_TEMP_TOKEN_SECRET: &str = "CHIAVI_TEMP_TOKEN_SECRET";
const ENV_ACCESS_TOKEN_TTL: &str = "CHIAVI_ACCESS_TOKEN_TTL";
const ENV_REFRESH_TOKEN_TTL: &str = "CHIAVI_REFRESH_TOKEN_TTL";
const ENV_TEMP_TOKEN_TTL: &str = "CHIAVI_TEMP_TOKEN_TTL";
const ENV_HASH_WORK_FACTOR: &str = "CHIAVI_HASH_WORK_FACTOR";
const ENV_TOTP_ISSUER: &str = "CHIAVI_TOTP_ISSUER";

const DEFAULT_ACCESS_TOKEN_TTL: &str = "15m";
const DEFAULT_REFRESH_TOKEN_TTL: &str = "7d";
const DEFAULT_TEMP_TOKEN_TTL: &str = "5m";
const DEFAULT_HASH_WORK_FACTOR: u32 = 2;
const DEFAULT_TOTP_ISSUER: &str = "Chiavi";

/// Configuration for the session core.
///
/// Each token kind signs with its own secret so a leaked secret cannot forge
/// the other kinds. Lifetimes are compact `<int><unit>` strings (`s|m|h|d`,
/// bare integers mean seconds).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    access_token_secret: SecretString,
    refresh_token_secret: SecretString,
    temp_token_secret: SecretString,
    access_token_ttl: String,
    refresh_token_ttl: String,
    temp_token_ttl: String,
    hash_work_factor: u32,
    totp_issuer: String,
}

impl AuthConfig {
    /// Development defaults; production deployments override the secrets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            access_token_secret: SecretString::from("dev-access-secret"),
            refresh_token_secret: SecretString::from("dev-refresh-secret"),
            temp_token_secret: SecretString::from("dev-temp-secret"),
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL.to_string(),
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL.to_string(),
            temp_token_ttl: DEFAULT_TEMP_TOKEN_TTL.to_string(),
            hash_work_factor: DEFAULT_HASH_WORK_FACTOR,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
        }
    }

    /// Read configuration from `CHIAVI_*` environment variables, falling back
    /// to the defaults of [`AuthConfig::new`] for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let base = Self::new();
        let secret = |name: &str, default: SecretString| {
            std::env::var(name).map_or(default, SecretString::from)
        };
        let string = |name: &str, default: String| std::env::var(name).unwrap_or(default);
        let work_factor = std::env::var(ENV_HASH_WORK_FACTOR)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_HASH_WORK_FACTOR);

        Self {
            access_token_secret: secret(ENV_ACCESS_TOKEN_SECRET, base.access_token_secret),
            refresh_token_secret: secret(ENV_REFRESH_TOKEN_SECRET, base.refresh_token_secret),
            temp_token_secret: secret(ENV_TEMP_TOKEN_SECRET, base.temp_token_secret),
            access_token_ttl: string(ENV_ACCESS_TOKEN_TTL, base.access_token_ttl),
            refresh_token_ttl: string(ENV_REFRESH_TOKEN_TTL, base.refresh_token_ttl),
            temp_token_ttl: string(ENV_TEMP_TOKEN_TTL, base.temp_token_ttl),
            hash_work_factor: work_factor,
            totp_issuer: string(ENV_TOTP_ISSUER, base.totp_issuer),
        }
    }

    #[must_use]
    pub fn with_access_token_secret(mut self, secret: SecretString) -> Self {
        self.access_token_secret = secret;
        self
    }

    #[must_use]
    pub fn with_refresh_token_secret(mut self, secret: SecretString) -> Self {
        self.refresh_token_secret = secret;
        self
    }

    #[must_use]
    pub fn with_temp_token_secret(mut self, secret: SecretString) -> Self {
        self.temp_token_secret = secret;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.access_token_ttl = ttl.into();
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.refresh_token_ttl = ttl.into();
        self
    }

    #[must_use]
    pub fn with_temp_token_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.temp_token_ttl = ttl.into();
        self
    }

    #[must_use]
    pub fn with_hash_work_factor(mut self, work_factor: u32) -> Self {
        self.hash_work_factor = work_factor;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.totp_issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn access_token_secret(&self) -> &SecretString {
        &self.access_token_secret
    }

    #[must_use]
    pub fn refresh_token_secret(&self) -> &SecretString {
        &self.refresh_token_secret
    }

    #[must_use]
    pub fn temp_token_secret(&self) -> &SecretString {
        &self.temp_token_secret
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> &str {
        &self.access_token_ttl
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> &str {
        &self.refresh_token_ttl
    }

    #[must_use]
    pub fn temp_token_ttl(&self) -> &str {
        &self.temp_token_ttl
    }

    #[must_use]
    pub fn hash_work_factor(&self) -> u32 {
        self.hash_work_factor
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a compact lifetime string (`90`, `15m`, `12h`, `7d`) into seconds.
///
/// Unparseable input yields zero: tokens minted with it are already expired.
/// [`crate::token::TokenIssuer::from_config`] warns when that happens so a
/// broken deployment is visible at startup.
#[must_use]
pub fn parse_expires_in(value: &str) -> i64 {
    let Some(captures) = Regex::new(r"^(\d+)([smhd])?$")
        .ok()
        .and_then(|regex| regex.captures(value.trim()))
    else {
        return 0;
    };
    let Ok(amount) = captures[1].parse::<i64>() else {
        return 0;
    };
    let unit = captures.get(2).map_or("s", |m| m.as_str());
    match unit {
        "m" => amount.saturating_mul(60),
        "h" => amount.saturating_mul(60 * 60),
        "d" => amount.saturating_mul(60 * 60 * 24),
        _ => amount,
    }
}
