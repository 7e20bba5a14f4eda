//! Payment gateway seam.
//!
//! Every orchestrator in this crate talks to the gateway through the
//! [`PaymentGateway`] trait rather than the Stripe SDK directly. The trait
//! surface is the exact set of remote calls the billing core needs; the
//! production implementation lives in [`crate::stripe_gateway`], and a
//! scriptable in-memory implementation backs the unit tests.

use serde::{Deserialize, Serialize};

use crate::error::BillingResult;

/// Gateway-side customer record correlated to a local user by name/email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Billing details embedded in a confirmation token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenBillingDetails {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Request for a confirmed one-off charge.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub confirmation_token: String,
    /// Local user id carried as gateway metadata for later correlation.
    pub user_id: String,
}

/// A one-off charge attempt as reported by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentRecord {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// Subscription status as this core classifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Active,
    /// Awaiting successful initial payment; eligible for in-place plan change.
    Incomplete,
    Canceled,
    Other(String),
}

/// One line item on a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionItemRecord {
    pub id: String,
    pub price_id: String,
    /// Whether the gateway still marks this price as purchasable.
    pub price_active: bool,
}

/// A recurring billing agreement on the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: String,
    pub customer_id: String,
    pub status: SubscriptionState,
    pub items: Vec<SubscriptionItemRecord>,
    /// Client secret of the latest invoice's payment intent, when expanded.
    pub payment_intent_secret: Option<String>,
}

/// How the gateway should collect the first payment when a subscription is
/// created or re-priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentBehavior {
    /// Leave the subscription `incomplete` until its first invoice is paid,
    /// saving the confirmed payment method as the customer default.
    DefaultIncomplete,
    /// Collect immediately using the customer's existing default.
    Immediate,
}

/// A stored card, regardless of which gateway object kind backs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCard {
    pub id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<u32>,
    pub exp_year: Option<u32>,
}

/// Result of removing a stored card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedCard {
    pub id: String,
}

/// A historical invoice, read-only from this core's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: String,
    pub amount_due_cents: i64,
    pub amount_paid_cents: i64,
    pub currency: String,
    pub status: Option<String>,
    /// Unix timestamp of invoice creation, as reported by the gateway.
    pub created: Option<i64>,
}

/// Tagged identifier for a stored payment instrument.
///
/// The gateway keeps two disjoint id namespaces for stored cards, and each
/// requires a different removal operation. Parsing the raw id into this type
/// at the boundary means the wrong removal path cannot be invoked by
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardId {
    /// Modern payment-method object, removed by detaching.
    PaymentMethod(String),
    /// Legacy source object, removed through the customer's source list.
    Source(String),
}

impl CardId {
    /// Classify a raw gateway card id. Ids beginning with `pm_` are
    /// payment methods; everything else is a legacy source.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("pm_") {
            Self::PaymentMethod(raw.to_string())
        } else {
            Self::Source(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::PaymentMethod(id) | Self::Source(id) => id,
        }
    }
}

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for the remote payment gateway.
///
/// All calls are synchronous request/response from the caller's perspective;
/// failures are terminal for the current request (no retries at this layer).
#[allow(async_fn_in_trait)]
pub trait PaymentGateway: Send + Sync {
    /// Search the customer directory by exact name and email.
    async fn search_customers(&self, name: &str, email: &str)
        -> BillingResult<Vec<CustomerRecord>>;

    /// Create a customer record.
    async fn create_customer(&self, name: &str, email: &str) -> BillingResult<CustomerRecord>;

    /// Retrieve the billing details embedded in a confirmation token.
    async fn retrieve_confirmation_token(
        &self,
        token_id: &str,
    ) -> BillingResult<TokenBillingDetails>;

    /// Create and confirm a one-off payment intent.
    async fn create_payment_intent(
        &self,
        request: &IntentRequest,
    ) -> BillingResult<PaymentIntentRecord>;

    /// List a customer's subscriptions (all non-expired statuses).
    async fn list_subscriptions(&self, customer_id: &str)
        -> BillingResult<Vec<SubscriptionRecord>>;

    /// Retrieve a single subscription.
    async fn retrieve_subscription(&self, subscription_id: &str)
        -> BillingResult<SubscriptionRecord>;

    /// Create a subscription with a single line item at `price_id`.
    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        behavior: PaymentBehavior,
        user_id: &str,
    ) -> BillingResult<SubscriptionRecord>;

    /// Re-price an existing line item on a subscription.
    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        item_id: &str,
        price_id: &str,
        behavior: PaymentBehavior,
    ) -> BillingResult<SubscriptionRecord>;

    /// Cancel a subscription immediately.
    async fn cancel_subscription(&self, subscription_id: &str)
        -> BillingResult<SubscriptionRecord>;

    /// List a customer's stored card payment methods.
    async fn list_card_payment_methods(&self, customer_id: &str)
        -> BillingResult<Vec<StoredCard>>;

    /// Exchange a card token for a stored legacy source on the customer.
    async fn create_card_source(&self, customer_id: &str, token: &str)
        -> BillingResult<StoredCard>;

    /// Set the customer's default payment method for invoices.
    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        card_id: &str,
    ) -> BillingResult<CustomerRecord>;

    /// Detach a modern payment method from its customer.
    async fn detach_payment_method(&self, payment_method_id: &str) -> BillingResult<RemovedCard>;

    /// Delete a legacy source from a customer's source list.
    async fn delete_source(&self, customer_id: &str, source_id: &str)
        -> BillingResult<RemovedCard>;

    /// List the customer's most recent invoices, newest first.
    async fn list_invoices(&self, customer_id: &str, limit: u8)
        -> BillingResult<Vec<InvoiceRecord>>;
}

/// Mock gateway for testing.
#[cfg(any(test, feature = "test-gateway"))]
#[allow(clippy::unwrap_used)]
pub mod test {
    use super::*;
    use crate::error::BillingError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, RwLock};

    /// A remote call the mock gateway observed, for test assertions.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum GatewayCall {
        CreateCustomer {
            name: String,
            email: String,
        },
        CreatePaymentIntent {
            amount_cents: i64,
        },
        CreateSubscription {
            customer_id: String,
            price_id: String,
        },
        UpdateSubscription {
            subscription_id: String,
            item_id: String,
            price_id: String,
        },
        CancelSubscription {
            subscription_id: String,
        },
        DetachPaymentMethod {
            payment_method_id: String,
        },
        DeleteSource {
            customer_id: String,
            source_id: String,
        },
        SetDefaultPaymentMethod {
            customer_id: String,
            card_id: String,
        },
        CreateCardSource {
            customer_id: String,
            token: String,
        },
    }

    /// In-memory [`PaymentGateway`] with scriptable fixtures and a call
    /// ledger for asserting which remote operations were (not) issued.
    #[derive(Default, Clone)]
    pub struct MockGateway {
        inner: Arc<MockGatewayState>,
    }

    #[derive(Default)]
    struct MockGatewayState {
        counter: AtomicU64,
        customers: RwLock<Vec<CustomerRecord>>,
        tokens: RwLock<HashMap<String, TokenBillingDetails>>,
        subscriptions: RwLock<Vec<SubscriptionRecord>>,
        cards: RwLock<HashMap<String, Vec<StoredCard>>>,
        defaults: RwLock<HashMap<String, String>>,
        invoices: RwLock<HashMap<String, Vec<InvoiceRecord>>>,
        calls: RwLock<Vec<GatewayCall>>,
        fail_set_default: AtomicBool,
    }

    impl MockGateway {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn next_id(&self, prefix: &str) -> String {
            format!("{}_test_{}", prefix, self.inner.counter.fetch_add(1, Ordering::SeqCst))
        }

        fn record(&self, call: GatewayCall) {
            self.inner.calls.write().unwrap().push(call);
        }

        /// Every call the gateway observed, in order.
        pub fn calls(&self) -> Vec<GatewayCall> {
            self.inner.calls.read().unwrap().clone()
        }

        pub fn add_customer(&self, customer: CustomerRecord) {
            self.inner.customers.write().unwrap().push(customer);
        }

        pub fn add_token(&self, token_id: &str, details: TokenBillingDetails) {
            self.inner
                .tokens
                .write()
                .unwrap()
                .insert(token_id.to_string(), details);
        }

        pub fn add_subscription(&self, subscription: SubscriptionRecord) {
            self.inner.subscriptions.write().unwrap().push(subscription);
        }

        pub fn add_card(&self, customer_id: &str, card: StoredCard) {
            self.inner
                .cards
                .write()
                .unwrap()
                .entry(customer_id.to_string())
                .or_default()
                .push(card);
        }

        pub fn add_invoice(&self, customer_id: &str, invoice: InvoiceRecord) {
            self.inner
                .invoices
                .write()
                .unwrap()
                .entry(customer_id.to_string())
                .or_default()
                .push(invoice);
        }

        /// Script the next default-promotion call to fail.
        pub fn fail_set_default(&self) {
            self.inner.fail_set_default.store(true, Ordering::SeqCst);
        }

        pub fn default_payment_method(&self, customer_id: &str) -> Option<String> {
            self.inner.defaults.read().unwrap().get(customer_id).cloned()
        }
    }

    impl PaymentGateway for MockGateway {
        async fn search_customers(
            &self,
            name: &str,
            email: &str,
        ) -> BillingResult<Vec<CustomerRecord>> {
            let customers = self.inner.customers.read().unwrap();
            Ok(customers
                .iter()
                .filter(|c| {
                    c.name.as_deref() == Some(name) && c.email.as_deref() == Some(email)
                })
                .cloned()
                .collect())
        }

        async fn create_customer(&self, name: &str, email: &str) -> BillingResult<CustomerRecord> {
            self.record(GatewayCall::CreateCustomer {
                name: name.to_string(),
                email: email.to_string(),
            });
            let customer = CustomerRecord {
                id: self.next_id("cus"),
                name: Some(name.to_string()),
                email: Some(email.to_string()),
            };
            self.inner.customers.write().unwrap().push(customer.clone());
            Ok(customer)
        }

        async fn retrieve_confirmation_token(
            &self,
            token_id: &str,
        ) -> BillingResult<TokenBillingDetails> {
            self.inner
                .tokens
                .read()
                .unwrap()
                .get(token_id)
                .cloned()
                .ok_or_else(|| BillingError::StripeApi(format!("No such token: {}", token_id)))
        }

        async fn create_payment_intent(
            &self,
            request: &IntentRequest,
        ) -> BillingResult<PaymentIntentRecord> {
            self.record(GatewayCall::CreatePaymentIntent {
                amount_cents: request.amount_cents,
            });
            let id = self.next_id("pi");
            Ok(PaymentIntentRecord {
                client_secret: Some(format!("{}_secret", id)),
                id,
                status: "succeeded".to_string(),
                amount_cents: request.amount_cents,
                currency: request.currency.clone(),
            })
        }

        async fn list_subscriptions(
            &self,
            customer_id: &str,
        ) -> BillingResult<Vec<SubscriptionRecord>> {
            let subscriptions = self.inner.subscriptions.read().unwrap();
            Ok(subscriptions
                .iter()
                .filter(|s| s.customer_id == customer_id)
                .cloned()
                .collect())
        }

        async fn retrieve_subscription(
            &self,
            subscription_id: &str,
        ) -> BillingResult<SubscriptionRecord> {
            let subscriptions = self.inner.subscriptions.read().unwrap();
            subscriptions
                .iter()
                .find(|s| s.id == subscription_id)
                .cloned()
                .ok_or_else(|| {
                    BillingError::StripeApi(format!("No such subscription: {}", subscription_id))
                })
        }

        async fn create_subscription(
            &self,
            customer_id: &str,
            price_id: &str,
            _behavior: PaymentBehavior,
            _user_id: &str,
        ) -> BillingResult<SubscriptionRecord> {
            self.record(GatewayCall::CreateSubscription {
                customer_id: customer_id.to_string(),
                price_id: price_id.to_string(),
            });
            let id = self.next_id("sub");
            let subscription = SubscriptionRecord {
                customer_id: customer_id.to_string(),
                status: SubscriptionState::Incomplete,
                items: vec![SubscriptionItemRecord {
                    id: self.next_id("si"),
                    price_id: price_id.to_string(),
                    price_active: true,
                }],
                payment_intent_secret: Some(format!("{}_secret", id)),
                id,
            };
            self.inner
                .subscriptions
                .write()
                .unwrap()
                .push(subscription.clone());
            Ok(subscription)
        }

        async fn update_subscription_price(
            &self,
            subscription_id: &str,
            item_id: &str,
            price_id: &str,
            _behavior: PaymentBehavior,
        ) -> BillingResult<SubscriptionRecord> {
            self.record(GatewayCall::UpdateSubscription {
                subscription_id: subscription_id.to_string(),
                item_id: item_id.to_string(),
                price_id: price_id.to_string(),
            });
            let mut subscriptions = self.inner.subscriptions.write().unwrap();
            let subscription = subscriptions
                .iter_mut()
                .find(|s| s.id == subscription_id)
                .ok_or_else(|| {
                    BillingError::StripeApi(format!("No such subscription: {}", subscription_id))
                })?;
            if let Some(item) = subscription.items.iter_mut().find(|i| i.id == item_id) {
                item.price_id = price_id.to_string();
            }
            if subscription.payment_intent_secret.is_none() {
                subscription.payment_intent_secret =
                    Some(format!("{}_secret", subscription.id));
            }
            Ok(subscription.clone())
        }

        async fn cancel_subscription(
            &self,
            subscription_id: &str,
        ) -> BillingResult<SubscriptionRecord> {
            self.record(GatewayCall::CancelSubscription {
                subscription_id: subscription_id.to_string(),
            });
            let mut subscriptions = self.inner.subscriptions.write().unwrap();
            let subscription = subscriptions
                .iter_mut()
                .find(|s| s.id == subscription_id)
                .ok_or_else(|| {
                    BillingError::StripeApi(format!("No such subscription: {}", subscription_id))
                })?;
            subscription.status = SubscriptionState::Canceled;
            Ok(subscription.clone())
        }

        async fn list_card_payment_methods(
            &self,
            customer_id: &str,
        ) -> BillingResult<Vec<StoredCard>> {
            Ok(self
                .inner
                .cards
                .read()
                .unwrap()
                .get(customer_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn create_card_source(
            &self,
            customer_id: &str,
            token: &str,
        ) -> BillingResult<StoredCard> {
            self.record(GatewayCall::CreateCardSource {
                customer_id: customer_id.to_string(),
                token: token.to_string(),
            });
            let card = StoredCard {
                id: self.next_id("src"),
                brand: Some("visa".to_string()),
                last4: Some("4242".to_string()),
                exp_month: Some(12),
                exp_year: Some(2099),
            };
            self.inner
                .cards
                .write()
                .unwrap()
                .entry(customer_id.to_string())
                .or_default()
                .push(card.clone());
            Ok(card)
        }

        async fn set_default_payment_method(
            &self,
            customer_id: &str,
            card_id: &str,
        ) -> BillingResult<CustomerRecord> {
            self.record(GatewayCall::SetDefaultPaymentMethod {
                customer_id: customer_id.to_string(),
                card_id: card_id.to_string(),
            });
            if self.inner.fail_set_default.swap(false, Ordering::SeqCst) {
                return Err(BillingError::StripeApi(
                    "default payment method update failed".to_string(),
                ));
            }
            self.inner
                .defaults
                .write()
                .unwrap()
                .insert(customer_id.to_string(), card_id.to_string());
            let customers = self.inner.customers.read().unwrap();
            Ok(customers
                .iter()
                .find(|c| c.id == customer_id)
                .cloned()
                .unwrap_or(CustomerRecord {
                    id: customer_id.to_string(),
                    name: None,
                    email: None,
                }))
        }

        async fn detach_payment_method(
            &self,
            payment_method_id: &str,
        ) -> BillingResult<RemovedCard> {
            self.record(GatewayCall::DetachPaymentMethod {
                payment_method_id: payment_method_id.to_string(),
            });
            let mut cards = self.inner.cards.write().unwrap();
            for customer_cards in cards.values_mut() {
                customer_cards.retain(|c| c.id != payment_method_id);
            }
            Ok(RemovedCard {
                id: payment_method_id.to_string(),
            })
        }

        async fn delete_source(
            &self,
            customer_id: &str,
            source_id: &str,
        ) -> BillingResult<RemovedCard> {
            self.record(GatewayCall::DeleteSource {
                customer_id: customer_id.to_string(),
                source_id: source_id.to_string(),
            });
            let mut cards = self.inner.cards.write().unwrap();
            if let Some(customer_cards) = cards.get_mut(customer_id) {
                customer_cards.retain(|c| c.id != source_id);
            }
            Ok(RemovedCard {
                id: source_id.to_string(),
            })
        }

        async fn list_invoices(
            &self,
            customer_id: &str,
            limit: u8,
        ) -> BillingResult<Vec<InvoiceRecord>> {
            let invoices = self.inner.invoices.read().unwrap();
            let mut records = invoices.get(customer_id).cloned().unwrap_or_default();
            records.sort_by(|a, b| b.created.cmp(&a.created));
            records.truncate(limit as usize);
            Ok(records)
        }
    }
}
