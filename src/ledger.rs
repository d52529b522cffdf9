//! Server-side registry of issued refresh tokens.
//!
//! A validly signed refresh token is necessary but not sufficient: it must
//! also exist, unexpired, in the ledger. Records are deleted exactly once,
//! on rotation or on logout.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::identity::SubjectKind;

#[derive(Clone, Debug, PartialEq)]
pub struct RefreshTokenRecord {
    pub token: String,
    pub owner_id: Uuid,
    pub owner_kind: SubjectKind,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Persisted refresh-token registry.
#[async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<()>;

    /// Remove and return the record for `token` in one step.
    ///
    /// Refresh tokens are single-use: the record comes out of the ledger even
    /// when it turns out to be expired, so a found token can never be
    /// presented twice.
    async fn take(&self, token: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Delete the record for `token`. Matching zero rows is not an error;
    /// logout is idempotent.
    async fn revoke(&self, token: &str) -> Result<()>;
}
