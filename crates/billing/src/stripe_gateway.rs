//! Stripe-backed implementation of the payment gateway seam.
//!
//! Typed `async-stripe` calls wherever the pinned generation covers the
//! endpoint. Confirmation tokens, the confirm-by-token payment intent
//! parameter, and the legacy card sources API are newer or older than that
//! generation, so those go through plain form-encoded requests against the
//! Stripe REST API (same workaround as the webhook verifier).

use std::collections::HashMap;

use stripe::{
    CancelSubscription, CreateCustomer, CreateSubscription, CreateSubscriptionItems,
    CreateSubscriptionPaymentSettings, CreateSubscriptionPaymentSettingsSaveDefaultPaymentMethod,
    Customer, CustomerId, CustomerInvoiceSettings, CustomerSearchParams, Expandable, Invoice,
    ListInvoices, ListPaymentMethods, ListSubscriptions, PaymentMethod, PaymentMethodId,
    PaymentMethodTypeFilter, Subscription, SubscriptionId, SubscriptionPaymentBehavior,
    SubscriptionStatus, UpdateCustomer, UpdateSubscription, UpdateSubscriptionItems,
    UpdateSubscriptionPaymentSettings, UpdateSubscriptionPaymentSettingsSaveDefaultPaymentMethod,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    CustomerRecord, IntentRequest, InvoiceRecord, PaymentBehavior, PaymentGateway,
    PaymentIntentRecord, RemovedCard, StoredCard, SubscriptionItemRecord, SubscriptionRecord,
    SubscriptionState, TokenBillingDetails,
};

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Production [`PaymentGateway`] over a configured [`StripeClient`].
#[derive(Clone)]
pub struct StripeGateway {
    stripe: StripeClient,
    http: reqwest::Client,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self {
            stripe,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeClient::from_env()?))
    }

    pub fn config(&self) -> &crate::client::StripeConfig {
        self.stripe.config()
    }

    async fn get_json(&self, path: &str) -> BillingResult<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}{}", STRIPE_API_BASE, path))
            .bearer_auth(&self.stripe.config().secret_key)
            .send()
            .await
            .map_err(|e| BillingError::StripeApi(format!("Failed to call Stripe API: {}", e)))?;
        Self::read_json(response).await
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> BillingResult<serde_json::Value> {
        let response = self
            .http
            .post(format!("{}{}", STRIPE_API_BASE, path))
            .bearer_auth(&self.stripe.config().secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| BillingError::StripeApi(format!("Failed to call Stripe API: {}", e)))?;
        Self::read_json(response).await
    }

    async fn delete_json(&self, path: &str) -> BillingResult<serde_json::Value> {
        let response = self
            .http
            .delete(format!("{}{}", STRIPE_API_BASE, path))
            .bearer_auth(&self.stripe.config().secret_key)
            .send()
            .await
            .map_err(|e| BillingError::StripeApi(format!("Failed to call Stripe API: {}", e)))?;
        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> BillingResult<serde_json::Value> {
        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            // Prefer the structured gateway message when the body parses
            let message = serde_json::from_str::<serde_json::Value>(&error_body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or(error_body);
            tracing::error!(status = %status, message = %message, "Stripe API call failed");
            return Err(BillingError::StripeApi(format!(
                "Stripe API error ({}): {}",
                status, message
            )));
        }
        response
            .json()
            .await
            .map_err(|e| BillingError::StripeApi(format!("Failed to parse Stripe response: {}", e)))
    }

    fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
        customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))
    }

    fn map_customer(customer: Customer) -> CustomerRecord {
        CustomerRecord {
            id: customer.id.to_string(),
            name: customer.name,
            email: customer.email,
        }
    }

    fn map_subscription(subscription: Subscription) -> SubscriptionRecord {
        let customer_id = match &subscription.customer {
            Expandable::Id(id) => id.to_string(),
            Expandable::Object(customer) => customer.id.to_string(),
        };

        let status = match subscription.status {
            SubscriptionStatus::Active => SubscriptionState::Active,
            SubscriptionStatus::Incomplete => SubscriptionState::Incomplete,
            SubscriptionStatus::Canceled => SubscriptionState::Canceled,
            other => SubscriptionState::Other(format!("{:?}", other).to_lowercase()),
        };

        let items = subscription
            .items
            .data
            .iter()
            .map(|item| SubscriptionItemRecord {
                id: item.id.to_string(),
                price_id: item
                    .price
                    .as_ref()
                    .map(|price| price.id.to_string())
                    .unwrap_or_default(),
                price_active: item
                    .price
                    .as_ref()
                    .and_then(|price| price.active)
                    .unwrap_or(false),
            })
            .collect();

        let payment_intent_secret =
            subscription
                .latest_invoice
                .as_ref()
                .and_then(|invoice| match invoice {
                    Expandable::Object(invoice) => {
                        invoice.payment_intent.as_ref().and_then(|pi| match pi {
                            Expandable::Object(pi) => pi.client_secret.clone(),
                            Expandable::Id(_) => None,
                        })
                    }
                    Expandable::Id(_) => None,
                });

        SubscriptionRecord {
            id: subscription.id.to_string(),
            customer_id,
            status,
            items,
            payment_intent_secret,
        }
    }

    fn map_card(pm: PaymentMethod) -> StoredCard {
        let card = pm.card.as_ref();
        StoredCard {
            id: pm.id.to_string(),
            brand: card.map(|c| format!("{:?}", c.brand).to_lowercase()),
            last4: card.map(|c| c.last4.clone()),
            exp_month: card.map(|c| c.exp_month as u32),
            exp_year: card.map(|c| c.exp_year as u32),
        }
    }

    fn map_invoice(invoice: Invoice) -> InvoiceRecord {
        InvoiceRecord {
            id: invoice.id.to_string(),
            amount_due_cents: invoice.amount_due.unwrap_or(0),
            amount_paid_cents: invoice.amount_paid.unwrap_or(0),
            currency: invoice
                .currency
                .map(|c| c.to_string())
                .unwrap_or_else(|| "usd".to_string()),
            status: invoice.status.map(|s| format!("{:?}", s).to_lowercase()),
            created: invoice.created,
        }
    }
}

impl PaymentGateway for StripeGateway {
    async fn search_customers(
        &self,
        name: &str,
        email: &str,
    ) -> BillingResult<Vec<CustomerRecord>> {
        let params = CustomerSearchParams {
            query: format!("name:'{}' AND email:'{}'", name, email),
            ..Default::default()
        };

        let found = Customer::search(self.stripe.inner(), params).await?;

        Ok(found.data.into_iter().map(Self::map_customer).collect())
    }

    async fn create_customer(&self, name: &str, email: &str) -> BillingResult<CustomerRecord> {
        let params = CreateCustomer {
            name: Some(name),
            email: Some(email),
            ..Default::default()
        };

        let customer = Customer::create(self.stripe.inner(), params).await?;

        tracing::info!(customer_id = %customer.id, "Created gateway customer");

        Ok(Self::map_customer(customer))
    }

    async fn retrieve_confirmation_token(
        &self,
        token_id: &str,
    ) -> BillingResult<TokenBillingDetails> {
        // Confirmation tokens post-date the async-stripe 0.39 generation
        let body = self
            .get_json(&format!("/confirmation_tokens/{}", token_id))
            .await?;

        let billing = &body["payment_method_preview"]["billing_details"];

        Ok(TokenBillingDetails {
            name: billing["name"].as_str().map(String::from),
            email: billing["email"].as_str().map(String::from),
        })
    }

    async fn create_payment_intent(
        &self,
        request: &IntentRequest,
    ) -> BillingResult<PaymentIntentRecord> {
        // `confirmation_token` is not a parameter the pinned generation knows
        let form = [
            ("amount", request.amount_cents.to_string()),
            ("currency", request.currency.clone()),
            ("confirm", "true".to_string()),
            ("confirmation_token", request.confirmation_token.clone()),
            ("return_url", self.stripe.config().return_url.clone()),
            ("use_stripe_sdk", "true".to_string()),
            ("metadata[user_id]", request.user_id.clone()),
        ];

        let body = self.post_form("/payment_intents", &form).await?;

        let record = PaymentIntentRecord {
            id: body["id"].as_str().unwrap_or_default().to_string(),
            client_secret: body["client_secret"].as_str().map(String::from),
            status: body["status"].as_str().unwrap_or_default().to_string(),
            amount_cents: body["amount"].as_i64().unwrap_or(request.amount_cents),
            currency: body["currency"]
                .as_str()
                .unwrap_or(&request.currency)
                .to_string(),
        };

        tracing::info!(
            payment_intent_id = %record.id,
            status = %record.status,
            amount_cents = record.amount_cents,
            "Created payment intent"
        );

        Ok(record)
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<SubscriptionRecord>> {
        let customer_id = Self::parse_customer_id(customer_id)?;

        let mut params = ListSubscriptions::new();
        params.customer = Some(customer_id);

        let subscriptions = Subscription::list(self.stripe.inner(), &params).await?;

        Ok(subscriptions
            .data
            .into_iter()
            .map(Self::map_subscription)
            .collect())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionRecord> {
        let subscription_id = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))?;

        let subscription =
            Subscription::retrieve(self.stripe.inner(), &subscription_id, &[]).await?;

        Ok(Self::map_subscription(subscription))
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        behavior: PaymentBehavior,
        user_id: &str,
    ) -> BillingResult<SubscriptionRecord> {
        let customer_id = Self::parse_customer_id(customer_id)?;

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());

        let mut params = CreateSubscription::new(customer_id);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(price_id.to_string()),
            ..Default::default()
        }]);
        params.metadata = Some(metadata);
        params.expand = &["latest_invoice.payment_intent"];

        if behavior == PaymentBehavior::DefaultIncomplete {
            params.payment_behavior = Some(SubscriptionPaymentBehavior::DefaultIncomplete);
            params.payment_settings = Some(CreateSubscriptionPaymentSettings {
                save_default_payment_method: Some(
                    CreateSubscriptionPaymentSettingsSaveDefaultPaymentMethod::OnSubscription,
                ),
                ..Default::default()
            });
        }

        let subscription = Subscription::create(self.stripe.inner(), params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            price_id = %price_id,
            "Created subscription"
        );

        Ok(Self::map_subscription(subscription))
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        item_id: &str,
        price_id: &str,
        behavior: PaymentBehavior,
    ) -> BillingResult<SubscriptionRecord> {
        let subscription_id_parsed = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))?;

        let mut params = UpdateSubscription::new();
        params.items = Some(vec![UpdateSubscriptionItems {
            id: Some(item_id.to_string()),
            price: Some(price_id.to_string()),
            ..Default::default()
        }]);
        params.expand = &["latest_invoice.payment_intent"];

        if behavior == PaymentBehavior::DefaultIncomplete {
            params.payment_behavior = Some(SubscriptionPaymentBehavior::DefaultIncomplete);
            params.payment_settings = Some(UpdateSubscriptionPaymentSettings {
                save_default_payment_method: Some(
                    UpdateSubscriptionPaymentSettingsSaveDefaultPaymentMethod::OnSubscription,
                ),
                ..Default::default()
            });
        }

        let subscription =
            Subscription::update(self.stripe.inner(), &subscription_id_parsed, params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            item_id = %item_id,
            price_id = %price_id,
            "Re-priced subscription item"
        );

        Ok(Self::map_subscription(subscription))
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionRecord> {
        let subscription_id_parsed = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))?;

        let params = CancelSubscription {
            cancellation_details: None,
            invoice_now: None,
            prorate: None,
        };

        let subscription =
            Subscription::cancel(self.stripe.inner(), &subscription_id_parsed, params).await?;

        tracing::info!(subscription_id = %subscription.id, "Cancelled subscription");

        Ok(Self::map_subscription(subscription))
    }

    async fn list_card_payment_methods(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<StoredCard>> {
        let customer_id = Self::parse_customer_id(customer_id)?;

        let mut params = ListPaymentMethods::new();
        params.customer = Some(customer_id);
        params.type_ = Some(PaymentMethodTypeFilter::Card);

        let list = PaymentMethod::list(self.stripe.inner(), &params).await?;

        Ok(list.data.into_iter().map(Self::map_card).collect())
    }

    async fn create_card_source(
        &self,
        customer_id: &str,
        token: &str,
    ) -> BillingResult<StoredCard> {
        // Legacy card sources API, not part of the pinned generation
        let form = [("source", token.to_string())];
        let body = self
            .post_form(&format!("/customers/{}/sources", customer_id), &form)
            .await?;

        Ok(StoredCard {
            id: body["id"].as_str().unwrap_or_default().to_string(),
            brand: body["brand"].as_str().map(str::to_lowercase),
            last4: body["last4"].as_str().map(String::from),
            exp_month: body["exp_month"].as_u64().map(|v| v as u32),
            exp_year: body["exp_year"].as_u64().map(|v| v as u32),
        })
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        card_id: &str,
    ) -> BillingResult<CustomerRecord> {
        let customer_id = Self::parse_customer_id(customer_id)?;

        let mut params = UpdateCustomer::new();
        params.invoice_settings = Some(CustomerInvoiceSettings {
            default_payment_method: Some(card_id.to_string()),
            ..Default::default()
        });

        let customer = Customer::update(self.stripe.inner(), &customer_id, params).await?;

        tracing::info!(
            customer_id = %customer.id,
            card_id = %card_id,
            "Updated default payment method"
        );

        Ok(Self::map_customer(customer))
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> BillingResult<RemovedCard> {
        let pm_id = payment_method_id
            .parse::<PaymentMethodId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid payment method ID: {}", e)))?;

        let pm = PaymentMethod::detach(self.stripe.inner(), &pm_id).await?;

        tracing::info!(payment_method_id = %pm.id, "Detached payment method");

        Ok(RemovedCard { id: pm.id.to_string() })
    }

    async fn delete_source(
        &self,
        customer_id: &str,
        source_id: &str,
    ) -> BillingResult<RemovedCard> {
        // Legacy card sources API, not part of the pinned generation
        let body = self
            .delete_json(&format!("/customers/{}/sources/{}", customer_id, source_id))
            .await?;

        tracing::info!(customer_id = %customer_id, source_id = %source_id, "Deleted card source");

        Ok(RemovedCard {
            id: body["id"].as_str().unwrap_or(source_id).to_string(),
        })
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: u8,
    ) -> BillingResult<Vec<InvoiceRecord>> {
        let customer_id = Self::parse_customer_id(customer_id)?;

        let mut params = ListInvoices::new();
        params.customer = Some(customer_id);
        params.limit = Some(limit.into());

        let invoices = Invoice::list(self.stripe.inner(), &params).await?;

        Ok(invoices.data.into_iter().map(Self::map_invoice).collect())
    }
}
