//! Identity records, subject projections, and the repository seam.
//!
//! Staff and customers are divergent record shapes; the [`Identity`] union
//! carries the tag explicitly so token claims and summaries dispatch over it
//! instead of probing optional fields.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which kind of principal a token or ledger record belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Staff,
    Customer,
}

impl SubjectKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Customer => "customer",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "staff" => Some(Self::Staff),
            "customer" => Some(Self::Customer),
            _ => None,
        }
    }
}

/// A tenant. Customers, staff roles, and OTP throttling all partition per shop.
#[derive(Clone, Debug)]
pub struct Shop {
    pub id: Uuid,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub permissions: Vec<String>,
}

/// A staff account: password credential plus optional TOTP second factor.
///
/// `totp_secret` set with `two_factor_enabled == false` means enrollment was
/// started but not yet confirmed.
#[derive(Clone, Debug)]
pub struct StaffIdentity {
    pub id: Uuid,
    pub shop_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub totp_secret: Option<String>,
    pub two_factor_enabled: bool,
}

/// A customer account: passwordless, verified by a one-time code.
#[derive(Clone, Debug)]
pub struct CustomerIdentity {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub otp_hash: Option<String>,
    pub otp_expires_at: Option<DateTime<Utc>>,
}

/// Tagged union over the two principal kinds.
#[derive(Clone, Debug)]
pub enum Identity {
    Staff(StaffIdentity),
    Customer(CustomerIdentity),
}

impl Identity {
    #[must_use]
    pub fn kind(&self) -> SubjectKind {
        match self {
            Self::Staff(_) => SubjectKind::Staff,
            Self::Customer(_) => SubjectKind::Customer,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        match self {
            Self::Staff(staff) => staff.id,
            Self::Customer(customer) => customer.id,
        }
    }
}

/// Non-sensitive customer projection returned with session tokens.
#[derive(Clone, Debug, Serialize)]
pub struct CustomerSummary {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RoleSummary {
    pub id: Option<Uuid>,
    pub name: Option<String>,
}

/// Non-sensitive staff projection returned with session tokens.
#[derive(Clone, Debug, Serialize)]
pub struct StaffSummary {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: RoleSummary,
}

impl CustomerIdentity {
    #[must_use]
    pub fn summary(&self) -> CustomerSummary {
        CustomerSummary {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

impl StaffIdentity {
    #[must_use]
    pub fn summary(&self, role: Option<&Role>) -> StaffSummary {
        StaffSummary {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: RoleSummary {
                id: role.map(|role| role.id).or(self.role_id),
                name: role.map(|role| role.name.clone()),
            },
        }
    }
}

/// A pending OTP challenge as persisted on the customer record.
#[derive(Clone, Debug)]
pub struct PendingOtp {
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Normalize an email for lookup and challenge keying.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Durable identity storage.
///
/// The core reads shop/role/staff/customer records and writes exactly two
/// things: a customer's pending OTP fields and a staff member's 2FA fields.
/// Every write is a single-row mutation; the store's per-row atomicity is the
/// only locking relied on.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn find_shop(&self, shop_id: Uuid) -> Result<Option<Shop>>;

    /// Look up a customer by `(shop, normalized email)`.
    async fn find_customer(&self, shop_id: Uuid, email: &str) -> Result<Option<CustomerIdentity>>;

    async fn find_customer_by_id(&self, customer_id: Uuid) -> Result<Option<CustomerIdentity>>;

    /// Create a bare customer record on first OTP request.
    async fn create_customer(&self, shop_id: Uuid, email: &str) -> Result<CustomerIdentity>;

    /// Set (`Some`) or clear (`None`) the customer's pending OTP fields.
    async fn set_customer_otp(&self, customer_id: Uuid, otp: Option<PendingOtp>) -> Result<()>;

    /// Look up a staff account by normalized email.
    async fn find_staff_by_email(&self, email: &str) -> Result<Option<StaffIdentity>>;

    async fn find_staff(&self, staff_id: Uuid) -> Result<Option<StaffIdentity>>;

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>>;

    /// Store a freshly generated TOTP secret, replacing any prior one.
    async fn set_staff_totp_secret(&self, staff_id: Uuid, secret: &str) -> Result<()>;

    /// Mark enrollment confirmed.
    async fn enable_staff_two_factor(&self, staff_id: Uuid) -> Result<()>;

    /// Drop the secret and the enabled flag in one mutation.
    async fn clear_staff_two_factor(&self, staff_id: Uuid) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_email, CustomerIdentity, Identity, Role, StaffIdentity, SubjectKind,
    };
    use uuid::Uuid;

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
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Ana@Example.COM "), "ana@example.com");
    }

    #[test]
    fn subject_kind_round_trips() {
        assert_eq!(SubjectKind::from_str("staff"), Some(SubjectKind::Staff));
        assert_eq!(
            SubjectKind::from_str(" customer "),
            Some(SubjectKind::Customer)
        );
        assert_eq!(SubjectKind::from_str("admin"), None);
        assert_eq!(SubjectKind::Staff.as_str(), "staff");
    }

    #[test]
    fn identity_union_dispatches_on_tag() {
        let staff = staff();
        let staff_id = staff.id;
        let identity = Identity::Staff(staff);
        assert_eq!(identity.kind(), SubjectKind::Staff);
        assert_eq!(identity.id(), staff_id);

        let customer = CustomerIdentity {
            id: Uuid::new_v4(),
            shop_id: Uuid::new_v4(),
            email: "ana@example.com".to_string(),
            first_name: None,
            last_name: None,
            otp_hash: None,
            otp_expires_at: None,
        };
        assert_eq!(Identity::Customer(customer).kind(), SubjectKind::Customer);
    }

    #[test]
    fn staff_summary_prefers_resolved_role() {
        let staff = staff();
        let role = Role {
            id: Uuid::new_v4(),
            name: "Manager".to_string(),
            permissions: vec!["bookings.read".to_string()],
        };
        let summary = staff.summary(Some(&role));
        assert_eq!(summary.role.id, Some(role.id));
        assert_eq!(summary.role.name.as_deref(), Some("Manager"));
    }

    #[test]
    fn staff_summary_falls_back_to_role_id() {
        let staff = staff();
        let summary = staff.summary(None);
        assert_eq!(summary.role.id, staff.role_id);
        assert_eq!(summary.role.name, None);
    }
}
