//! In-memory identity store and refresh-token ledger.
//!
//! Backing for tests and single-process development setups; production
//! deployments use the Postgres implementations in [`crate::storage`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::identity::{
    CustomerIdentity, IdentityRepository, PendingOtp, Role, Shop, StaffIdentity,
};
use crate::ledger::{RefreshTokenLedger, RefreshTokenRecord};

#[derive(Default)]
struct IdentityState {
    shops: HashMap<Uuid, Shop>,
    roles: HashMap<Uuid, Role>,
    staff: HashMap<Uuid, StaffIdentity>,
    customers: HashMap<Uuid, CustomerIdentity>,
}

/// Process-local [`IdentityRepository`].
#[derive(Default)]
pub struct MemoryIdentities {
    state: Mutex<IdentityState>,
}

impl MemoryIdentities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_shop(&self, shop: Shop) {
        self.state.lock().await.shops.insert(shop.id, shop);
    }

    pub async fn insert_role(&self, role: Role) {
        self.state.lock().await.roles.insert(role.id, role);
    }

    pub async fn insert_staff(&self, staff: StaffIdentity) {
        self.state.lock().await.staff.insert(staff.id, staff);
    }

    pub async fn insert_customer(&self, customer: CustomerIdentity) {
        self.state
            .lock()
            .await
            .customers
            .insert(customer.id, customer);
    }

    /// Remove a staff record, simulating account deactivation.
    pub async fn remove_staff(&self, staff_id: Uuid) {
        self.state.lock().await.staff.remove(&staff_id);
    }

    pub async fn remove_customer(&self, customer_id: Uuid) {
        self.state.lock().await.customers.remove(&customer_id);
    }
}

#[async_trait]
impl IdentityRepository for MemoryIdentities {
    async fn find_shop(&self, shop_id: Uuid) -> Result<Option<Shop>> {
        Ok(self.state.lock().await.shops.get(&shop_id).cloned())
    }

    async fn find_customer(&self, shop_id: Uuid, email: &str) -> Result<Option<CustomerIdentity>> {
        Ok(self
            .state
            .lock()
            .await
            .customers
            .values()
            .find(|customer| customer.shop_id == shop_id && customer.email == email)
            .cloned())
    }

    async fn find_customer_by_id(&self, customer_id: Uuid) -> Result<Option<CustomerIdentity>> {
        Ok(self.state.lock().await.customers.get(&customer_id).cloned())
    }

    async fn create_customer(&self, shop_id: Uuid, email: &str) -> Result<CustomerIdentity> {
        let customer = CustomerIdentity {
            id: Uuid::new_v4(),
            shop_id,
            email: email.to_string(),
            first_name: None,
            last_name: None,
            otp_hash: None,
            otp_expires_at: None,
        };
        self.state
            .lock()
            .await
            .customers
            .insert(customer.id, customer.clone());
        Ok(customer)
    }

    async fn set_customer_otp(&self, customer_id: Uuid, otp: Option<PendingOtp>) -> Result<()> {
        if let Some(customer) = self.state.lock().await.customers.get_mut(&customer_id) {
            match otp {
                Some(otp) => {
                    customer.otp_hash = Some(otp.hash);
                    customer.otp_expires_at = Some(otp.expires_at);
                }
                None => {
                    customer.otp_hash = None;
                    customer.otp_expires_at = None;
                }
            }
        }
        Ok(())
    }

    async fn find_staff_by_email(&self, email: &str) -> Result<Option<StaffIdentity>> {
        Ok(self
            .state
            .lock()
            .await
            .staff
            .values()
            .find(|staff| staff.email == email)
            .cloned())
    }

    async fn find_staff(&self, staff_id: Uuid) -> Result<Option<StaffIdentity>> {
        Ok(self.state.lock().await.staff.get(&staff_id).cloned())
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>> {
        Ok(self.state.lock().await.roles.get(&role_id).cloned())
    }

    async fn set_staff_totp_secret(&self, staff_id: Uuid, secret: &str) -> Result<()> {
        if let Some(staff) = self.state.lock().await.staff.get_mut(&staff_id) {
            staff.totp_secret = Some(secret.to_string());
        }
        Ok(())
    }

    async fn enable_staff_two_factor(&self, staff_id: Uuid) -> Result<()> {
        if let Some(staff) = self.state.lock().await.staff.get_mut(&staff_id) {
            staff.two_factor_enabled = true;
        }
        Ok(())
    }

    async fn clear_staff_two_factor(&self, staff_id: Uuid) -> Result<()> {
        if let Some(staff) = self.state.lock().await.staff.get_mut(&staff_id) {
            staff.totp_secret = None;
            staff.two_factor_enabled = false;
        }
        Ok(())
    }
}

/// Process-local [`RefreshTokenLedger`].
#[derive(Default)]
pub struct MemoryRefreshTokens {
    records: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryRefreshTokens {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) records; test visibility.
    pub async fn live_count(&self) -> usize {
        let now = Utc::now();
        self.records
            .lock()
            .await
            .values()
            .filter(|record| record.expires_at > now)
            .count()
    }
}

#[async_trait]
impl RefreshTokenLedger for MemoryRefreshTokens {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(record.token.clone(), record);
        Ok(())
    }

    async fn take(&self, token: &str) -> Result<Option<RefreshTokenRecord>> {
        Ok(self.records.lock().await.remove(token))
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        self.records.lock().await.remove(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryIdentities, MemoryRefreshTokens};
    use crate::identity::{IdentityRepository, PendingOtp, Shop, SubjectKind};
    use crate::ledger::{RefreshTokenLedger, RefreshTokenRecord};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    #[tokio::test]
    async fn customer_otp_fields_set_and_clear() {
        let identities = MemoryIdentities::new();
        let shop_id = Uuid::new_v4();
        identities
            .insert_shop(Shop {
                id: shop_id,
                name: "Bella Vista".to_string(),
            })
            .await;
        let customer = identities
            .create_customer(shop_id, "ana@example.com")
            .await
            .unwrap();

        let expires_at = Utc::now() + Duration::minutes(10);
        identities
            .set_customer_otp(
                customer.id,
                Some(PendingOtp {
                    hash: "$argon2id$stub".to_string(),
                    expires_at,
                }),
            )
            .await
            .unwrap();
        let stored = identities
            .find_customer(shop_id, "ana@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.otp_hash.as_deref(), Some("$argon2id$stub"));
        assert_eq!(stored.otp_expires_at, Some(expires_at));

        identities.set_customer_otp(customer.id, None).await.unwrap();
        let cleared = identities
            .find_customer_by_id(customer.id)
            .await
            .unwrap()
            .unwrap();
        assert!(cleared.otp_hash.is_none());
        assert!(cleared.otp_expires_at.is_none());
    }

    #[tokio::test]
    async fn ledger_take_is_single_use() {
        let ledger = MemoryRefreshTokens::new();
        let record = RefreshTokenRecord {
            token: "opaque-token".to_string(),
            owner_id: Uuid::new_v4(),
            owner_kind: SubjectKind::Customer,
            expires_at: Utc::now() + Duration::days(7),
            created_at: Utc::now(),
        };
        ledger.insert(record.clone()).await.unwrap();
        assert_eq!(ledger.take("opaque-token").await.unwrap(), Some(record));
        assert_eq!(ledger.take("opaque-token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let ledger = MemoryRefreshTokens::new();
        ledger.revoke("never-issued").await.unwrap();
        ledger.revoke("never-issued").await.unwrap();
    }
}
