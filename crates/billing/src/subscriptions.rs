//! Subscription management
//!
//! The gateway is the source of truth for recurring billing state. Before
//! writing, the orchestrator classifies the customer's existing subscription
//! set: a plan that is already active rejects the request, an incomplete
//! subscription is re-priced in place instead of creating a duplicate, and
//! only a customer with neither gets a new subscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use pipecraft_shared::PlanType;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::client::PriceIds;
use crate::customer::CustomerReconciler;
use crate::directory::UserDirectory;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{PaymentBehavior, PaymentGateway, SubscriptionRecord, SubscriptionState};

/// Per-customer critical sections.
///
/// The list-then-decide-then-write sequence in [`SubscriptionService::
/// create_or_resume`] is not transactional on the gateway side; holding the
/// customer's lock across it keeps two concurrent requests from both passing
/// the scan and creating duplicate subscriptions.
#[derive(Default, Clone)]
struct CustomerLocks {
    inner: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl CustomerLocks {
    fn lock_for(&self, customer_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(customer_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// What a caller needs to finish checkout of a pending subscription.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionCheckout {
    pub subscription_id: String,
    pub client_secret: String,
}

/// Subscription orchestration over the gateway.
pub struct SubscriptionService<G: PaymentGateway + Clone, D: UserDirectory> {
    gateway: G,
    reconciler: CustomerReconciler<G>,
    directory: D,
    prices: PriceIds,
    locks: CustomerLocks,
}

impl<G: PaymentGateway + Clone, D: UserDirectory> SubscriptionService<G, D> {
    pub fn new(gateway: G, directory: D, prices: PriceIds) -> Self {
        Self {
            reconciler: CustomerReconciler::new(gateway.clone()),
            gateway,
            directory,
            prices,
            locks: CustomerLocks::default(),
        }
    }

    /// Create a subscription for the plan, or resume an incomplete one.
    ///
    /// Scans every subscription and every line item for the customer:
    /// - an `active` subscription holding this plan's price (and the price
    ///   still purchasable on the gateway) rejects the request outright;
    /// - otherwise any `incomplete` subscription is re-priced in place;
    ///   when several exist the last one returned by the gateway wins;
    /// - with neither, a new single-item subscription is created.
    ///
    /// Either write leaves the first payment open (`default_incomplete`) and
    /// saves the confirmed payment method as the customer default; the
    /// returned client secret belongs to the latest invoice's payment intent.
    pub async fn create_or_resume(
        &self,
        plan: PlanType,
        user_id: Uuid,
    ) -> BillingResult<SubscriptionCheckout> {
        let user = self.directory.get_user(user_id).await?;
        let customer = self.reconciler.resolve(&user).await?;
        let price_id = self.prices.price_id_for(plan);

        // Serialize the scan-and-write window per customer
        let lock = self.locks.lock_for(&customer.id);
        let _guard = lock.lock().await;

        let subscriptions = self.gateway.list_subscriptions(&customer.id).await?;

        let mut plan_already_active = false;
        let mut resumable: Option<SubscriptionRecord> = None;
        for subscription in &subscriptions {
            match &subscription.status {
                SubscriptionState::Active => {
                    for item in &subscription.items {
                        if item.price_id == price_id && item.price_active {
                            plan_already_active = true;
                        }
                    }
                }
                SubscriptionState::Incomplete => {
                    resumable = Some(subscription.clone());
                }
                _ => {}
            }
        }

        if plan_already_active {
            tracing::info!(
                user_id = %user_id,
                customer_id = %customer.id,
                plan = %plan,
                "Rejected duplicate subscription for already-active plan"
            );
            return Err(BillingError::DuplicateSubscription(plan));
        }

        let subscription = match resumable {
            Some(incomplete) => {
                let item_id = incomplete
                    .items
                    .first()
                    .map(|item| item.id.clone())
                    .ok_or_else(|| {
                        BillingError::Internal("Subscription has no items".to_string())
                    })?;

                tracing::info!(
                    user_id = %user_id,
                    subscription_id = %incomplete.id,
                    plan = %plan,
                    "Resuming incomplete subscription with new plan"
                );

                self.gateway
                    .update_subscription_price(
                        &incomplete.id,
                        &item_id,
                        price_id,
                        PaymentBehavior::DefaultIncomplete,
                    )
                    .await?
            }
            None => {
                tracing::info!(
                    user_id = %user_id,
                    customer_id = %customer.id,
                    plan = %plan,
                    "Creating new subscription"
                );

                self.gateway
                    .create_subscription(
                        &customer.id,
                        price_id,
                        PaymentBehavior::DefaultIncomplete,
                        &user_id.to_string(),
                    )
                    .await?
            }
        };

        let client_secret = subscription.payment_intent_secret.clone().ok_or_else(|| {
            BillingError::Internal("Subscription has no payable invoice".to_string())
        })?;

        Ok(SubscriptionCheckout {
            subscription_id: subscription.id,
            client_secret,
        })
    }

    /// Switch an existing subscription's sole line item to a new plan.
    pub async fn update_subscription(
        &self,
        subscription_id: &str,
        plan: PlanType,
    ) -> BillingResult<SubscriptionRecord> {
        let current = self.gateway.retrieve_subscription(subscription_id).await?;

        let item_id = current
            .items
            .first()
            .map(|item| item.id.clone())
            .ok_or_else(|| BillingError::Internal("Subscription has no items".to_string()))?;

        let subscription = self
            .gateway
            .update_subscription_price(
                subscription_id,
                &item_id,
                self.prices.price_id_for(plan),
                PaymentBehavior::Immediate,
            )
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            plan = %plan,
            "Updated subscription plan"
        );

        Ok(subscription)
    }

    /// Cancel a subscription immediately; passthrough to the gateway.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionRecord> {
        let subscription = self.gateway.cancel_subscription(subscription_id).await?;

        tracing::info!(subscription_id = %subscription.id, "Cancelled subscription");

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::test::InMemoryUserDirectory;
    use crate::gateway::test::{GatewayCall, MockGateway};
    use crate::gateway::{SubscriptionItemRecord, SubscriptionState};
    use pipecraft_shared::LocalUser;

    fn prices() -> PriceIds {
        PriceIds {
            essential: "price_essential".to_string(),
            professional: "price_professional".to_string(),
            corporate: "price_corporate".to_string(),
        }
    }

    fn setup() -> (
        MockGateway,
        SubscriptionService<MockGateway, InMemoryUserDirectory>,
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
        let service = SubscriptionService::new(gateway.clone(), directory, prices());
        (gateway, service, user_id)
    }

    fn seeded_customer(gateway: &MockGateway) -> String {
        gateway.add_customer(crate::gateway::CustomerRecord {
            id: "cus_seed".to_string(),
            name: Some("Jane Doe".to_string()),
            email: Some("jane@x.com".to_string()),
        });
        "cus_seed".to_string()
    }

    fn subscription(
        id: &str,
        customer_id: &str,
        status: SubscriptionState,
        price_id: &str,
        price_active: bool,
    ) -> SubscriptionRecord {
        SubscriptionRecord {
            id: id.to_string(),
            customer_id: customer_id.to_string(),
            status,
            items: vec![SubscriptionItemRecord {
                id: format!("si_{}", id),
                price_id: price_id.to_string(),
                price_active,
            }],
            payment_intent_secret: Some(format!("{}_secret", id)),
        }
    }

    #[tokio::test]
    async fn test_fresh_customer_gets_exactly_one_create() {
        let (gateway, service, user_id) = setup();

        let checkout = service
            .create_or_resume(PlanType::Professional, user_id)
            .await
            .unwrap();

        assert!(!checkout.client_secret.is_empty());
        let creates: Vec<_> = gateway
            .calls()
            .into_iter()
            .filter(|c| matches!(c, GatewayCall::CreateSubscription { .. }))
            .collect();
        assert_eq!(
            creates,
            vec![GatewayCall::CreateSubscription {
                customer_id: checkout_customer(&gateway),
                price_id: "price_professional".to_string(),
            }]
        );
    }

    fn checkout_customer(gateway: &MockGateway) -> String {
        gateway
            .calls()
            .into_iter()
            .find_map(|c| match c {
                GatewayCall::CreateSubscription { customer_id, .. } => Some(customer_id),
                _ => None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_active_plan_rejects_without_writing() {
        let (gateway, service, user_id) = setup();
        let customer_id = seeded_customer(&gateway);
        gateway.add_subscription(subscription(
            "sub_active",
            &customer_id,
            SubscriptionState::Active,
            "price_professional",
            true,
        ));

        let result = service
            .create_or_resume(PlanType::Professional, user_id)
            .await;

        assert!(matches!(
            result,
            Err(BillingError::DuplicateSubscription(PlanType::Professional))
        ));
        assert!(!gateway.calls().iter().any(|c| matches!(
            c,
            GatewayCall::CreateSubscription { .. } | GatewayCall::UpdateSubscription { .. }
        )));
    }

    #[tokio::test]
    async fn test_active_plan_with_retired_price_does_not_block() {
        let (gateway, service, user_id) = setup();
        let customer_id = seeded_customer(&gateway);
        // Same price id but the gateway no longer sells it
        gateway.add_subscription(subscription(
            "sub_active",
            &customer_id,
            SubscriptionState::Active,
            "price_professional",
            false,
        ));

        let checkout = service
            .create_or_resume(PlanType::Professional, user_id)
            .await
            .unwrap();

        assert_ne!(checkout.subscription_id, "sub_active");
    }

    #[tokio::test]
    async fn test_active_other_plan_does_not_block() {
        let (gateway, service, user_id) = setup();
        let customer_id = seeded_customer(&gateway);
        gateway.add_subscription(subscription(
            "sub_active",
            &customer_id,
            SubscriptionState::Active,
            "price_essential",
            true,
        ));

        let checkout = service
            .create_or_resume(PlanType::Professional, user_id)
            .await
            .unwrap();

        assert!(gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::CreateSubscription { .. })));
        assert_ne!(checkout.subscription_id, "sub_active");
    }

    #[tokio::test]
    async fn test_incomplete_subscription_is_resumed_in_place() {
        let (gateway, service, user_id) = setup();
        let customer_id = seeded_customer(&gateway);
        gateway.add_subscription(subscription(
            "sub_pending",
            &customer_id,
            SubscriptionState::Incomplete,
            "price_essential",
            true,
        ));

        let checkout = service
            .create_or_resume(PlanType::Corporate, user_id)
            .await
            .unwrap();

        assert_eq!(checkout.subscription_id, "sub_pending");
        let calls = gateway.calls();
        assert!(calls.contains(&GatewayCall::UpdateSubscription {
            subscription_id: "sub_pending".to_string(),
            item_id: "si_sub_pending".to_string(),
            price_id: "price_corporate".to_string(),
        }));
        assert!(!calls
            .iter()
            .any(|c| matches!(c, GatewayCall::CreateSubscription { .. })));
    }

    #[tokio::test]
    async fn test_last_incomplete_subscription_wins() {
        let (gateway, service, user_id) = setup();
        let customer_id = seeded_customer(&gateway);
        gateway.add_subscription(subscription(
            "sub_older",
            &customer_id,
            SubscriptionState::Incomplete,
            "price_essential",
            true,
        ));
        gateway.add_subscription(subscription(
            "sub_newer",
            &customer_id,
            SubscriptionState::Incomplete,
            "price_essential",
            true,
        ));

        let checkout = service
            .create_or_resume(PlanType::Professional, user_id)
            .await
            .unwrap();

        assert_eq!(checkout.subscription_id, "sub_newer");
    }

    #[tokio::test]
    async fn test_sequential_calls_converge_on_one_subscription() {
        let (gateway, service, user_id) = setup();

        // First call creates; the mock leaves it incomplete, mirroring a
        // customer who never finished paying
        let first = service
            .create_or_resume(PlanType::Professional, user_id)
            .await
            .unwrap();
        let second = service
            .create_or_resume(PlanType::Professional, user_id)
            .await
            .unwrap();

        assert_eq!(first.subscription_id, second.subscription_id);
        let creates = gateway
            .calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::CreateSubscription { .. }))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_serialized_per_customer() {
        let (gateway, service, user_id) = setup();
        seeded_customer(&gateway);

        let (first, second) = tokio::join!(
            service.create_or_resume(PlanType::Professional, user_id),
            service.create_or_resume(PlanType::Professional, user_id),
        );

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.subscription_id, second.subscription_id);

        // One created, the other resumed; never two creates
        let creates = gateway
            .calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::CreateSubscription { .. }))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_update_subscription_swaps_sole_item() {
        let (gateway, service, _user_id) = setup();
        gateway.add_subscription(subscription(
            "sub_live",
            "cus_any",
            SubscriptionState::Active,
            "price_essential",
            true,
        ));

        let updated = service
            .update_subscription("sub_live", PlanType::Corporate)
            .await
            .unwrap();

        assert_eq!(updated.items[0].price_id, "price_corporate");
        assert!(gateway.calls().contains(&GatewayCall::UpdateSubscription {
            subscription_id: "sub_live".to_string(),
            item_id: "si_sub_live".to_string(),
            price_id: "price_corporate".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_update_subscription_without_items_fails() {
        let (gateway, service, _user_id) = setup();
        gateway.add_subscription(SubscriptionRecord {
            id: "sub_empty".to_string(),
            customer_id: "cus_any".to_string(),
            status: SubscriptionState::Active,
            items: vec![],
            payment_intent_secret: None,
        });

        let result = service
            .update_subscription("sub_empty", PlanType::Essential)
            .await;

        assert!(matches!(result, Err(BillingError::Internal(_))));
    }

    #[tokio::test]
    async fn test_cancel_subscription_passthrough() {
        let (gateway, service, _user_id) = setup();
        gateway.add_subscription(subscription(
            "sub_live",
            "cus_any",
            SubscriptionState::Active,
            "price_essential",
            true,
        ));

        let cancelled = service.cancel_subscription("sub_live").await.unwrap();

        assert_eq!(cancelled.status, SubscriptionState::Canceled);
        assert!(gateway.calls().contains(&GatewayCall::CancelSubscription {
            subscription_id: "sub_live".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_cancel_unknown_subscription_surfaces_gateway_error() {
        let (_gateway, service, _user_id) = setup();

        let result = service.cancel_subscription("sub_missing").await;
        assert!(matches!(result, Err(BillingError::StripeApi(_))));
    }
}
