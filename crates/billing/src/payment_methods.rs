//! Payment method management
//!
//! Stored cards live under two gateway object kinds with disjoint id
//! namespaces: modern payment methods (detached to remove) and legacy
//! sources (deleted through the customer's source list). [`CardId`] keeps
//! the two removal paths apart by construction.

use uuid::Uuid;

use crate::customer::CustomerReconciler;
use crate::directory::UserDirectory;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{CardId, CustomerRecord, PaymentGateway, RemovedCard, StoredCard};

/// Card lifecycle operations for a reconciled customer.
pub struct PaymentMethodService<G: PaymentGateway + Clone, D: UserDirectory> {
    gateway: G,
    reconciler: CustomerReconciler<G>,
    directory: D,
}

impl<G: PaymentGateway + Clone, D: UserDirectory> PaymentMethodService<G, D> {
    pub fn new(gateway: G, directory: D) -> Self {
        Self {
            reconciler: CustomerReconciler::new(gateway.clone()),
            gateway,
            directory,
        }
    }

    /// Exchange a card token for a stored source and promote it to the
    /// customer's default payment method.
    ///
    /// Two gateway calls with no rollback: when the promotion fails after
    /// the exchange succeeded, the card exists but is not default, and the
    /// error names the attached card so the caller can compensate.
    pub async fn add_card(&self, customer_id: &str, token: &str) -> BillingResult<StoredCard> {
        let card = self.gateway.create_card_source(customer_id, token).await?;

        if let Err(source) = self
            .gateway
            .set_default_payment_method(customer_id, &card.id)
            .await
        {
            tracing::warn!(
                customer_id = %customer_id,
                card_id = %card.id,
                error = %source,
                "Card attached but default promotion failed"
            );
            return Err(BillingError::CardDefaultNotSet {
                card_id: card.id,
                source: Box::new(source),
            });
        }

        tracing::info!(
            customer_id = %customer_id,
            card_id = %card.id,
            "Added card and set as default"
        );

        Ok(card)
    }

    /// List the user's stored card payment methods.
    pub async fn list_cards(&self, user_id: Uuid) -> BillingResult<Vec<StoredCard>> {
        let user = self.directory.get_user(user_id).await?;
        let customer = self.reconciler.require_existing(&user).await?;

        self.gateway.list_card_payment_methods(&customer.id).await
    }

    /// Make an existing card the user's default payment method.
    pub async fn set_default_card(
        &self,
        user_id: Uuid,
        card_id: &str,
    ) -> BillingResult<CustomerRecord> {
        let user = self.directory.get_user(user_id).await?;
        let customer = self.reconciler.require_existing(&user).await?;

        self.gateway
            .set_default_payment_method(&customer.id, card_id)
            .await
    }

    /// Remove a stored card.
    ///
    /// The id kind picks the removal operation: payment methods are
    /// detached, legacy sources are deleted from the customer. The two
    /// gateway object kinds are not interchangeable.
    pub async fn delete_card(&self, user_id: Uuid, card: &CardId) -> BillingResult<RemovedCard> {
        let user = self.directory.get_user(user_id).await?;
        let customer = self.reconciler.require_existing(&user).await?;

        let removed = match card {
            CardId::PaymentMethod(id) => self.gateway.detach_payment_method(id).await?,
            CardId::Source(id) => self.gateway.delete_source(&customer.id, id).await?,
        };

        tracing::info!(
            user_id = %user_id,
            card_id = %removed.id,
            "Removed stored card"
        );

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::test::InMemoryUserDirectory;
    use crate::gateway::test::{GatewayCall, MockGateway};
    use pipecraft_shared::LocalUser;

    fn setup() -> (
        MockGateway,
        PaymentMethodService<MockGateway, InMemoryUserDirectory>,
        Uuid,
    ) {
        let gateway = MockGateway::new();
        let directory = InMemoryUserDirectory::new();
        let user_id = Uuid::new_v4();
        directory.add_user(LocalUser {
            id: user_id,
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            email: "jane@x.com".to_string(),
            gateway_customer_id: None,
        });
        let service = PaymentMethodService::new(gateway.clone(), directory);
        (gateway, service, user_id)
    }

    fn seeded_customer(gateway: &MockGateway) -> String {
        gateway.add_customer(CustomerRecord {
            id: "cus_seed".to_string(),
            name: Some("Jane Doe".to_string()),
            email: Some("jane@x.com".to_string()),
        });
        "cus_seed".to_string()
    }

    fn card(id: &str) -> StoredCard {
        StoredCard {
            id: id.to_string(),
            brand: Some("visa".to_string()),
            last4: Some("4242".to_string()),
            exp_month: Some(12),
            exp_year: Some(2099),
        }
    }

    #[tokio::test]
    async fn test_add_card_promotes_to_default() {
        let (gateway, service, _user_id) = setup();

        let added = service.add_card("cus_seed", "tok_visa").await.unwrap();

        assert_eq!(gateway.default_payment_method("cus_seed"), Some(added.id));
    }

    #[tokio::test]
    async fn test_add_card_reports_partial_failure() {
        let (gateway, service, _user_id) = setup();
        gateway.fail_set_default();

        let result = service.add_card("cus_seed", "tok_visa").await;

        match result {
            Err(BillingError::CardDefaultNotSet { card_id, .. }) => {
                // The card exists on the customer even though promotion failed
                let cards = gateway.list_card_payment_methods("cus_seed").await.unwrap();
                assert!(cards.iter().any(|c| c.id == card_id));
            }
            other => panic!("expected CardDefaultNotSet, got {:?}", other.map(|c| c.id)),
        }
    }

    #[tokio::test]
    async fn test_list_cards_requires_existing_customer() {
        let (_gateway, service, user_id) = setup();

        let result = service.list_cards(user_id).await;
        assert!(matches!(result, Err(BillingError::CustomerNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_cards_for_reconciled_customer() {
        let (gateway, service, user_id) = setup();
        let customer_id = seeded_customer(&gateway);
        gateway.add_card(&customer_id, card("pm_1"));
        gateway.add_card(&customer_id, card("pm_2"));

        let cards = service.list_cards(user_id).await.unwrap();
        assert_eq!(cards.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_payment_method_only_detaches() {
        let (gateway, service, user_id) = setup();
        let customer_id = seeded_customer(&gateway);
        gateway.add_card(&customer_id, card("pm_123"));

        let removed = service
            .delete_card(user_id, &CardId::parse("pm_123"))
            .await
            .unwrap();

        assert_eq!(removed.id, "pm_123");
        let calls = gateway.calls();
        assert!(calls.contains(&GatewayCall::DetachPaymentMethod {
            payment_method_id: "pm_123".to_string(),
        }));
        assert!(!calls
            .iter()
            .any(|c| matches!(c, GatewayCall::DeleteSource { .. })));
    }

    #[tokio::test]
    async fn test_delete_source_never_detaches() {
        let (gateway, service, user_id) = setup();
        let customer_id = seeded_customer(&gateway);
        gateway.add_card(&customer_id, card("src_456"));

        let removed = service
            .delete_card(user_id, &CardId::parse("src_456"))
            .await
            .unwrap();

        assert_eq!(removed.id, "src_456");
        let calls = gateway.calls();
        assert!(calls.contains(&GatewayCall::DeleteSource {
            customer_id,
            source_id: "src_456".to_string(),
        }));
        assert!(!calls
            .iter()
            .any(|c| matches!(c, GatewayCall::DetachPaymentMethod { .. })));
    }

    #[tokio::test]
    async fn test_set_default_card() {
        let (gateway, service, user_id) = setup();
        let customer_id = seeded_customer(&gateway);
        gateway.add_card(&customer_id, card("pm_1"));

        service.set_default_card(user_id, "pm_1").await.unwrap();

        assert_eq!(
            gateway.default_payment_method(&customer_id),
            Some("pm_1".to_string())
        );
    }
}
