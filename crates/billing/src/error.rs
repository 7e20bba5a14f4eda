//! Billing error types

use pipecraft_shared::PlanType;
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Gateway API error: {0}")]
    StripeApi(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Invalid plan type: {0}")]
    InvalidPlan(String),

    #[error("There is already an active subscription with the {0} plan")]
    DuplicateSubscription(PlanType),

    #[error("Billing name and email do not match the account holder")]
    IdentityMismatch,

    #[error("Card {card_id} was attached but could not be made the default payment method")]
    CardDefaultNotSet {
        card_id: String,
        #[source]
        source: Box<BillingError>,
    },

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook payload could not be parsed: {0}")]
    WebhookPayloadInvalid(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl BillingError {
    /// Message safe to surface to an end user.
    ///
    /// Gateway and database errors carry raw upstream text that belongs in
    /// logs, not in API responses; those collapse to a fixed sentence here.
    pub fn user_message(&self) -> String {
        match self {
            Self::StripeApi(_) => "The payment provider rejected the request".to_string(),
            Self::Database(_) | Self::Config(_) | Self::Internal(_) => {
                "Something went wrong processing your billing request".to_string()
            }
            Self::IdentityMismatch => {
                "Please verify your name and email combination".to_string()
            }
            Self::WebhookSignatureInvalid | Self::WebhookPayloadInvalid(_) => {
                "The event could not be verified".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_gateway_text() {
        let err = BillingError::StripeApi("card_declined: do not honor (req_abc123)".to_string());
        let msg = err.user_message();
        assert!(!msg.contains("req_abc123"));
        assert!(!msg.contains("card_declined"));
    }

    #[test]
    fn test_user_message_keeps_validation_text() {
        let err = BillingError::DuplicateSubscription(PlanType::Professional);
        assert!(err.user_message().contains("professional"));
    }

    #[test]
    fn test_partial_failure_reports_card() {
        let err = BillingError::CardDefaultNotSet {
            card_id: "src_123".to_string(),
            source: Box::new(BillingError::StripeApi("timeout".to_string())),
        };
        assert!(err.to_string().contains("src_123"));
        assert!(err.to_string().contains("attached"));
    }
}
