//! Stripe client configuration

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use pipecraft_shared::PlanType;
use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Price IDs for each subscription plan
    pub price_ids: PriceIds,
    /// Return URL handed to the gateway for redirect-based confirmation
    pub return_url: String,
}

/// Stripe price IDs for the subscription plans
/// Plan ladder: Essential ($99) → Professional ($299) → Corporate ($499)
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub essential: String,
    pub professional: String,
    pub corporate: String,
}

impl PriceIds {
    /// Price ID for a plan. The match is exhaustive over the closed plan
    /// enum, so every known plan always resolves.
    pub fn price_id_for(&self, plan: PlanType) -> &str {
        match plan {
            PlanType::Essential => &self.essential,
            PlanType::Professional => &self.professional,
            PlanType::Corporate => &self.corporate,
        }
    }

    /// Reverse lookup from a gateway price ID.
    pub fn plan_for_price_id(&self, price_id: &str) -> Option<PlanType> {
        if price_id == self.essential {
            Some(PlanType::Essential)
        } else if price_id == self.professional {
            Some(PlanType::Professional)
        } else if price_id == self.corporate {
            Some(PlanType::Corporate)
        } else {
            None
        }
    }
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            price_ids: PriceIds {
                essential: std::env::var("STRIPE_PRICE_ESSENTIAL").map_err(|_| {
                    BillingError::Config("STRIPE_PRICE_ESSENTIAL not set".to_string())
                })?,
                professional: std::env::var("STRIPE_PRICE_PROFESSIONAL").map_err(|_| {
                    BillingError::Config("STRIPE_PRICE_PROFESSIONAL not set".to_string())
                })?,
                corporate: std::env::var("STRIPE_PRICE_CORPORATE").map_err(|_| {
                    BillingError::Config("STRIPE_PRICE_CORPORATE not set".to_string())
                })?,
            },
            return_url: std::env::var("STRIPE_RETURN_URL")
                .unwrap_or_else(|_| "http://localhost:3000/billing/complete".to_string()),
        })
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

/// Per-tenant client cache.
///
/// Sub-account requests bill against their own gateway credentials. Clients
/// are resolved once per tenant key and reused; the handle is safe for
/// concurrent use and must not be rebuilt per request.
#[derive(Default)]
pub struct ClientFactory {
    clients: RwLock<HashMap<String, Arc<StripeClient>>>,
}

impl ClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the cached client for a tenant, building it on first use.
    ///
    /// `tenant_key` identifies the credential set (e.g. the sub-account id).
    pub fn client_for(&self, tenant_key: &str, config: &StripeConfig) -> Arc<StripeClient> {
        if let Ok(clients) = self.clients.read() {
            if let Some(client) = clients.get(tenant_key) {
                return Arc::clone(client);
            }
        }

        let client = Arc::new(StripeClient::new(config.clone()));
        if let Ok(mut clients) = self.clients.write() {
            // Another caller may have raced us here; keep the first insert.
            return Arc::clone(
                clients
                    .entry(tenant_key.to_string())
                    .or_insert_with(|| Arc::clone(&client)),
            );
        }
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test".to_string(),
            price_ids: PriceIds {
                essential: "price_essential".to_string(),
                professional: "price_professional".to_string(),
                corporate: "price_corporate".to_string(),
            },
            return_url: "http://localhost:3000/billing/complete".to_string(),
        }
    }

    #[test]
    fn test_price_id_lookup_is_exhaustive() {
        let prices = test_config().price_ids;
        assert_eq!(prices.price_id_for(PlanType::Essential), "price_essential");
        assert_eq!(
            prices.price_id_for(PlanType::Professional),
            "price_professional"
        );
        assert_eq!(prices.price_id_for(PlanType::Corporate), "price_corporate");
    }

    #[test]
    fn test_plan_for_price_id() {
        let prices = test_config().price_ids;
        assert_eq!(
            prices.plan_for_price_id("price_corporate"),
            Some(PlanType::Corporate)
        );
        assert_eq!(prices.plan_for_price_id("price_unknown"), None);
    }

    #[test]
    fn test_client_factory_caches_per_tenant() {
        let factory = ClientFactory::new();
        let config = test_config();

        let a1 = factory.client_for("tenant-a", &config);
        let a2 = factory.client_for("tenant-a", &config);
        let b = factory.client_for("tenant-b", &config);

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
