//! Common types used across Plume

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Billing interval for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanInterval {
    Month,
    Year,
}

impl Default for PlanInterval {
    fn default() -> Self {
        Self::Month
    }
}

impl PlanInterval {
    /// Line-item quantity billed at the provider for this interval.
    /// Yearly subscriptions reuse the monthly unit price billed 12x
    /// by quantity rather than a distinct annual amount.
    pub fn quantity(&self) -> u64 {
        match self {
            Self::Month => 1,
            Self::Year => 12,
        }
    }
}

impl std::fmt::Display for PlanInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Month => write!(f, "month"),
            Self::Year => write!(f, "year"),
        }
    }
}

impl std::str::FromStr for PlanInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "month" | "monthly" => Ok(Self::Month),
            "year" | "yearly" | "annual" => Ok(Self::Year),
            _ => Err(format!("Invalid billing interval: {}", s)),
        }
    }
}

/// User role for admin gating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Member,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Member
    }
}

impl UserRole {
    /// Check if this role can administer plans and users
    pub fn can_administer(&self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Parse a role from string (case insensitive)
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "admin" => Self::Admin,
            _ => Self::Member, // Default to member for unknown roles
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// User model (billing-relevant columns)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
    pub is_trial_active: bool,
    pub has_trial_used: bool,
    pub trial_canceled: bool,
    pub trial_start_date: Option<OffsetDateTime>,
    pub trial_end_date: Option<OffsetDateTime>,
    pub plan_id: Option<Uuid>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_current_period_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_interval_default() {
        assert_eq!(PlanInterval::default(), PlanInterval::Month);
    }

    #[test]
    fn test_plan_interval_quantity() {
        assert_eq!(PlanInterval::Month.quantity(), 1);
        assert_eq!(PlanInterval::Year.quantity(), 12);
    }

    #[test]
    fn test_plan_interval_display() {
        assert_eq!(format!("{}", PlanInterval::Month), "month");
        assert_eq!(format!("{}", PlanInterval::Year), "year");
    }

    #[test]
    fn test_plan_interval_from_str() {
        assert_eq!(
            "month".parse::<PlanInterval>().unwrap(),
            PlanInterval::Month
        );
        assert_eq!(
            "MONTHLY".parse::<PlanInterval>().unwrap(),
            PlanInterval::Month
        );
        assert_eq!("year".parse::<PlanInterval>().unwrap(), PlanInterval::Year);
        assert_eq!(
            "yearly".parse::<PlanInterval>().unwrap(),
            PlanInterval::Year
        );
        assert!("weekly".parse::<PlanInterval>().is_err());
    }

    #[test]
    fn test_user_role_default() {
        assert_eq!(UserRole::default(), UserRole::Member);
    }

    #[test]
    fn test_user_role_permissions() {
        assert!(UserRole::Admin.can_administer());
        assert!(!UserRole::Member.can_administer());
    }

    #[test]
    fn test_user_role_from_str_lossy() {
        assert_eq!(UserRole::from_str_lossy("admin"), UserRole::Admin);
        assert_eq!(UserRole::from_str_lossy("ADMIN"), UserRole::Admin);
        assert_eq!(UserRole::from_str_lossy("unknown"), UserRole::Member); // Default
    }

}
