//! Common types used across Pipecraft

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// Plans
// =============================================================================

/// Subscription plan
/// Pricing ladder: Essential ($99) → Professional ($299) → Corporate ($499)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Essential,
    Professional,
    Corporate,
}

impl PlanType {
    /// All known plans, in ascending price order.
    pub const ALL: [PlanType; 3] = [Self::Essential, Self::Professional, Self::Corporate];

    /// One-off charge amount for this plan in minor units (USD cents).
    pub fn amount_cents(&self) -> i64 {
        match self {
            Self::Essential => 9_900,
            Self::Professional => 29_900,
            Self::Corporate => 49_900,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Essential => "essential",
            Self::Professional => "professional",
            Self::Corporate => "corporate",
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "essential" => Ok(Self::Essential),
            "professional" => Ok(Self::Professional),
            "corporate" => Ok(Self::Corporate),
            _ => Err(format!("Invalid plan type: {}", s)),
        }
    }
}

// =============================================================================
// Users
// =============================================================================

/// An account holder in the local system.
///
/// The (full name, email) pair is the reconciliation key into the payment
/// gateway's customer directory; `gateway_customer_id` is only populated once
/// a webhook or billing event has recorded the remote id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LocalUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub gateway_customer_id: Option<String>,
}

impl LocalUser {
    /// Full name as presented to the gateway ("First Last").
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
