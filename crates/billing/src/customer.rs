//! Gateway customer reconciliation
//!
//! The local system does not store a foreign key into the gateway's customer
//! directory; a user's full name and email are the reconciliation key. Every
//! billing workflow resolves the remote customer through this component.

use pipecraft_shared::LocalUser;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{CustomerRecord, PaymentGateway};

/// Resolves local users to gateway customer records.
pub struct CustomerReconciler<G: PaymentGateway> {
    gateway: G,
}

impl<G: PaymentGateway> CustomerReconciler<G> {
    pub fn new(gateway: G) -> Self {
        Self { gateway }
    }

    /// Find the gateway customer matching this user, creating one if none
    /// exists.
    ///
    /// When the directory returns more than one match the first is used;
    /// the search carries no further disambiguation. The resolved id is not
    /// written back to the user record, so every call re-runs the search.
    pub async fn resolve(&self, user: &LocalUser) -> BillingResult<CustomerRecord> {
        let name = user.full_name();

        let matches = self.gateway.search_customers(&name, &user.email).await?;
        if let Some(customer) = matches.into_iter().next() {
            return Ok(customer);
        }

        let customer = self.gateway.create_customer(&name, &user.email).await?;

        tracing::info!(
            user_id = %user.id,
            customer_id = %customer.id,
            "Created gateway customer for user"
        );

        Ok(customer)
    }

    /// Find the gateway customer matching this user, failing when none
    /// exists.
    ///
    /// Card management and history reads require a customer that prior
    /// billing activity already created.
    pub async fn require_existing(&self, user: &LocalUser) -> BillingResult<CustomerRecord> {
        let name = user.full_name();

        let matches = self.gateway.search_customers(&name, &user.email).await?;
        matches.into_iter().next().ok_or_else(|| {
            BillingError::CustomerNotFound(format!(
                "No gateway customer found for user {}",
                user.id
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test::{GatewayCall, MockGateway};
    use uuid::Uuid;

    fn test_user() -> LocalUser {
        LocalUser {
            id: Uuid::new_v4(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            email: "jane@x.com".to_string(),
            gateway_customer_id: None,
        }
    }

    #[tokio::test]
    async fn test_resolve_creates_when_no_match() {
        let gateway = MockGateway::new();
        let reconciler = CustomerReconciler::new(gateway.clone());

        let customer = reconciler.resolve(&test_user()).await.unwrap();

        assert!(customer.id.starts_with("cus_test_"));
        assert_eq!(customer.name.as_deref(), Some("Jane Doe"));
        assert!(gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::CreateCustomer { .. })));
    }

    #[tokio::test]
    async fn test_resolve_is_stable_once_created() {
        let gateway = MockGateway::new();
        let reconciler = CustomerReconciler::new(gateway.clone());
        let user = test_user();

        let first = reconciler.resolve(&user).await.unwrap();
        let second = reconciler.resolve(&user).await.unwrap();

        assert_eq!(first.id, second.id);
        // Only the first call created anything
        let creates = gateway
            .calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::CreateCustomer { .. }))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_resolve_takes_first_match() {
        let gateway = MockGateway::new();
        gateway.add_customer(CustomerRecord {
            id: "cus_first".to_string(),
            name: Some("Jane Doe".to_string()),
            email: Some("jane@x.com".to_string()),
        });
        gateway.add_customer(CustomerRecord {
            id: "cus_second".to_string(),
            name: Some("Jane Doe".to_string()),
            email: Some("jane@x.com".to_string()),
        });
        let reconciler = CustomerReconciler::new(gateway);

        let customer = reconciler.resolve(&test_user()).await.unwrap();
        assert_eq!(customer.id, "cus_first");
    }

    #[tokio::test]
    async fn test_require_existing_fails_for_unknown_user() {
        let gateway = MockGateway::new();
        let reconciler = CustomerReconciler::new(gateway);

        let result = reconciler.require_existing(&test_user()).await;
        assert!(matches!(result, Err(BillingError::CustomerNotFound(_))));
    }
}
