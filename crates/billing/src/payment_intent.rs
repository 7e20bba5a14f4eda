//! One-off payment capture
//!
//! Exchanges a confirmation token for a confirmed payment intent after
//! verifying the token's billing identity against the local account holder.

use pipecraft_shared::PlanType;
use uuid::Uuid;

use crate::directory::UserDirectory;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{IntentRequest, PaymentGateway, PaymentIntentRecord, TokenBillingDetails};

/// Orchestrates one-off charges.
pub struct PaymentIntentService<G: PaymentGateway, D: UserDirectory> {
    gateway: G,
    directory: D,
}

impl<G: PaymentGateway, D: UserDirectory> PaymentIntentService<G, D> {
    pub fn new(gateway: G, directory: D) -> Self {
        Self { gateway, directory }
    }

    /// Create and confirm a one-off charge for the given plan.
    ///
    /// The billing identity embedded in the confirmation token is checked
    /// against the local user before any money moves. The check trips only
    /// when name AND email both differ from the account holder; a single
    /// mismatched field is accepted.
    pub async fn create_payment_intent(
        &self,
        confirmation_token: &str,
        plan: PlanType,
        user_id: Uuid,
    ) -> BillingResult<PaymentIntentRecord> {
        let token = self
            .gateway
            .retrieve_confirmation_token(confirmation_token)
            .await?;
        let user = self.directory.get_user(user_id).await?;

        let full_name = user.full_name();
        let name_mismatch = token.name.as_deref() != Some(full_name.as_str());
        let email_mismatch = token.email.as_deref() != Some(user.email.as_str());
        if name_mismatch && email_mismatch {
            tracing::warn!(
                user_id = %user_id,
                "Confirmation token billing identity does not match account holder"
            );
            return Err(BillingError::IdentityMismatch);
        }

        // A fresh customer record per charge; one-off intents are correlated
        // by user-id metadata, not by the customer object.
        let customer = self.gateway.create_customer(&full_name, &user.email).await?;

        let intent = self
            .gateway
            .create_payment_intent(&IntentRequest {
                amount_cents: plan.amount_cents(),
                currency: "usd".to_string(),
                confirmation_token: confirmation_token.to_string(),
                user_id: user_id.to_string(),
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer.id,
            payment_intent_id = %intent.id,
            plan = %plan,
            amount_cents = intent.amount_cents,
            status = %intent.status,
            "Created one-off payment intent"
        );

        Ok(intent)
    }

    /// Billing details the gateway holds for a confirmation token, for
    /// payment summary screens ahead of the actual charge.
    pub async fn summarize_payment(
        &self,
        confirmation_token: &str,
    ) -> BillingResult<TokenBillingDetails> {
        self.gateway
            .retrieve_confirmation_token(confirmation_token)
            .await
    }
}
