//! Postgres-backed identity storage and refresh-token ledger.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::identity::{
    CustomerIdentity, IdentityRepository, PendingOtp, Role, Shop, StaffIdentity, SubjectKind,
};
use crate::ledger::{RefreshTokenLedger, RefreshTokenRecord};

/// [`IdentityRepository`] over the platform's Postgres schema.
#[derive(Clone)]
pub struct PgIdentities {
    pool: PgPool,
}

impl PgIdentities {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn staff_from_row(row: &sqlx::postgres::PgRow) -> StaffIdentity {
    StaffIdentity {
        id: row.get("id"),
        shop_id: row.get("shop_id"),
        role_id: row.get("role_id"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        password_hash: row.get("password_hash"),
        totp_secret: row.get("totp_secret"),
        two_factor_enabled: row.get("two_factor_enabled"),
    }
}

fn customer_from_row(row: &sqlx::postgres::PgRow) -> CustomerIdentity {
    CustomerIdentity {
        id: row.get("id"),
        shop_id: row.get("shop_id"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        otp_hash: row.get("otp_hash"),
        otp_expires_at: row.get("otp_expires_at"),
    }
}

const STAFF_COLUMNS: &str = "id, shop_id, role_id, email, first_name, last_name, \
     password_hash, totp_secret, two_factor_enabled";

const CUSTOMER_COLUMNS: &str = "id, shop_id, email, first_name, last_name, otp_hash, otp_expires_at";

#[async_trait]
impl IdentityRepository for PgIdentities {
    async fn find_shop(&self, shop_id: Uuid) -> Result<Option<Shop>> {
        let query = "SELECT id, name FROM shops WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(shop_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup shop")?;
        Ok(row.map(|row| Shop {
            id: row.get("id"),
            name: row.get("name"),
        }))
    }

    async fn find_customer(&self, shop_id: Uuid, email: &str) -> Result<Option<CustomerIdentity>> {
        let query = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE shop_id = $1 AND email = $2"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(shop_id)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup customer")?;
        Ok(row.as_ref().map(customer_from_row))
    }

    async fn find_customer_by_id(&self, customer_id: Uuid) -> Result<Option<CustomerIdentity>> {
        let query = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup customer by id")?;
        Ok(row.as_ref().map(customer_from_row))
    }

    async fn create_customer(&self, shop_id: Uuid, email: &str) -> Result<CustomerIdentity> {
        let query = format!(
            "INSERT INTO customers (shop_id, email) VALUES ($1, $2) RETURNING {CUSTOMER_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(shop_id)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to create customer")?;
        Ok(customer_from_row(&row))
    }

    async fn set_customer_otp(&self, customer_id: Uuid, otp: Option<PendingOtp>) -> Result<()> {
        let query = "UPDATE customers SET otp_hash = $2, otp_expires_at = $3 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let (hash, expires_at) = match otp {
            Some(otp) => (Some(otp.hash), Some(otp.expires_at)),
            None => (None, None),
        };
        sqlx::query(query)
            .bind(customer_id)
            .bind(hash)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update customer otp fields")?;
        Ok(())
    }

    async fn find_staff_by_email(&self, email: &str) -> Result<Option<StaffIdentity>> {
        let query = format!("SELECT {STAFF_COLUMNS} FROM staff WHERE email = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup staff by email")?;
        Ok(row.as_ref().map(staff_from_row))
    }

    async fn find_staff(&self, staff_id: Uuid) -> Result<Option<StaffIdentity>> {
        let query = format!("SELECT {STAFF_COLUMNS} FROM staff WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(staff_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup staff by id")?;
        Ok(row.as_ref().map(staff_from_row))
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>> {
        let query = "SELECT id, name, permissions FROM roles WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(role_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup role")?;
        Ok(row.map(|row| Role {
            id: row.get("id"),
            name: row.get("name"),
            permissions: row.get("permissions"),
        }))
    }

    async fn set_staff_totp_secret(&self, staff_id: Uuid, secret: &str) -> Result<()> {
        let query = "UPDATE staff SET totp_secret = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(staff_id)
            .bind(secret)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to store totp secret")?;
        Ok(())
    }

    async fn enable_staff_two_factor(&self, staff_id: Uuid) -> Result<()> {
        let query = "UPDATE staff SET two_factor_enabled = TRUE WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(staff_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to enable two factor")?;
        Ok(())
    }

    async fn clear_staff_two_factor(&self, staff_id: Uuid) -> Result<()> {
        // Secret and flag drop together in one row mutation.
        let query = "UPDATE staff SET totp_secret = NULL, two_factor_enabled = FALSE WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(staff_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear two factor")?;
        Ok(())
    }
}

/// [`RefreshTokenLedger`] over Postgres.
#[derive(Clone)]
pub struct PgRefreshTokens {
    pool: PgPool,
}

impl PgRefreshTokens {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<RefreshTokenRecord> {
    let owner_kind: String = row.get("owner_kind");
    let owner_kind = SubjectKind::from_str(&owner_kind)
        .ok_or_else(|| anyhow!("unknown refresh token owner kind: {owner_kind}"))?;
    let expires_at: DateTime<Utc> = row.get("expires_at");
    let created_at: DateTime<Utc> = row.get("created_at");
    Ok(RefreshTokenRecord {
        token: row.get("token"),
        owner_id: row.get("owner_id"),
        owner_kind,
        expires_at,
        created_at,
    })
}

#[async_trait]
impl RefreshTokenLedger for PgRefreshTokens {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<()> {
        let query = r"
            INSERT INTO refresh_tokens (token, owner_id, owner_kind, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&record.token)
            .bind(record.owner_id)
            .bind(record.owner_kind.as_str())
            .bind(record.expires_at)
            .bind(record.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert refresh token")?;
        Ok(())
    }

    async fn take(&self, token: &str) -> Result<Option<RefreshTokenRecord>> {
        // Single statement so a token can only ever be taken once.
        let query = r"
            DELETE FROM refresh_tokens
            WHERE token = $1
            RETURNING token, owner_id, owner_kind, expires_at, created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to take refresh token")?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        // Logout is idempotent; it's fine if no rows are deleted.
        let query = "DELETE FROM refresh_tokens WHERE token = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke refresh token")?;
        Ok(())
    }
}
