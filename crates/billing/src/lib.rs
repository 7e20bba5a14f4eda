// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::result_large_err)] // BillingError carries descriptive payloads
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Pipecraft Billing Module
//!
//! Orchestrates billing against the payment gateway, keeping local account
//! state consistent with the gateway's authoritative records.
//!
//! ## Features
//!
//! - **Customer Reconciliation**: Resolve local users to gateway customers
//!   by name/email search, creating lazily on first billing action
//! - **One-off Payments**: Confirmation-token payment intents with
//!   billing-identity verification
//! - **Subscriptions**: Create, resume-incomplete, upgrade, cancel, with a
//!   per-customer critical section around the decide-then-write window
//! - **Payment Methods**: Card lifecycle across both gateway object kinds
//!   (modern payment methods and legacy sources)
//! - **Billing History**: Recent invoices and the recorded event trail
//! - **Webhooks**: Signed-event verification

pub mod client;
pub mod customer;
pub mod directory;
pub mod error;
pub mod events;
pub mod gateway;
pub mod history;
pub mod payment_intent;
pub mod payment_methods;
pub mod stripe_gateway;
pub mod subscriptions;
pub mod webhooks;

// Client
pub use client::{ClientFactory, PriceIds, StripeClient, StripeConfig};

// Customer
pub use customer::CustomerReconciler;

// Directory
pub use directory::{PgUserDirectory, UserDirectory};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{BillingEvent, BillingEventStore, PgBillingEventStore};

// Gateway
pub use gateway::{
    CardId, CustomerRecord, IntentRequest, InvoiceRecord, PaymentBehavior, PaymentGateway,
    PaymentIntentRecord, RemovedCard, StoredCard, SubscriptionItemRecord, SubscriptionRecord,
    SubscriptionState, TokenBillingDetails,
};

// History
pub use history::BillingHistoryService;

// Payment intents
pub use payment_intent::PaymentIntentService;

// Payment methods
pub use payment_methods::PaymentMethodService;

// Stripe gateway
pub use stripe_gateway::StripeGateway;

// Subscriptions
pub use subscriptions::{SubscriptionCheckout, SubscriptionService};

// Webhooks
pub use webhooks::WebhookVerifier;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub customers: CustomerReconciler<StripeGateway>,
    pub payment_intents: PaymentIntentService<StripeGateway, PgUserDirectory>,
    pub subscriptions: SubscriptionService<StripeGateway, PgUserDirectory>,
    pub payment_methods: PaymentMethodService<StripeGateway, PgUserDirectory>,
    pub history: BillingHistoryService<StripeGateway, PgUserDirectory, PgBillingEventStore>,
    pub webhooks: WebhookVerifier,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        let gateway = StripeGateway::new(StripeClient::new(config.clone()));
        let directory = PgUserDirectory::new(pool.clone());
        let events = PgBillingEventStore::new(pool);

        Self {
            customers: CustomerReconciler::new(gateway.clone()),
            payment_intents: PaymentIntentService::new(gateway.clone(), directory.clone()),
            subscriptions: SubscriptionService::new(
                gateway.clone(),
                directory.clone(),
                config.price_ids.clone(),
            ),
            payment_methods: PaymentMethodService::new(gateway.clone(), directory.clone()),
            history: BillingHistoryService::new(gateway, directory, events),
            webhooks: WebhookVerifier::new(config.webhook_secret),
        }
    }
}
