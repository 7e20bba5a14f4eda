//! Billing history
//!
//! Read-only views over a customer's past billing activity: gateway
//! invoices, and the event trail recorded by webhook processing elsewhere in
//! the platform.

use uuid::Uuid;

use crate::customer::CustomerReconciler;
use crate::directory::UserDirectory;
use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventStore};
use crate::gateway::{InvoiceRecord, PaymentGateway};

/// Fixed cap on invoices returned; there is no pagination beyond it.
const INVOICE_HISTORY_LIMIT: u8 = 10;

/// Billing history reads for a reconciled customer.
pub struct BillingHistoryService<G: PaymentGateway + Clone, D: UserDirectory, E: BillingEventStore>
{
    gateway: G,
    reconciler: CustomerReconciler<G>,
    directory: D,
    events: E,
}

impl<G: PaymentGateway + Clone, D: UserDirectory, E: BillingEventStore>
    BillingHistoryService<G, D, E>
{
    pub fn new(gateway: G, directory: D, events: E) -> Self {
        Self {
            reconciler: CustomerReconciler::new(gateway.clone()),
            gateway,
            directory,
            events,
        }
    }

    /// The user's most recent invoices, newest first.
    pub async fn billing_history(&self, user_id: Uuid) -> BillingResult<Vec<InvoiceRecord>> {
        let user = self.directory.get_user(user_id).await?;
        let customer = self.reconciler.require_existing(&user).await?;

        self.gateway
            .list_invoices(&customer.id, INVOICE_HISTORY_LIMIT)
            .await
    }

    /// Billing events recorded against the user's stored gateway reference.
    pub async fn customer_events(&self, user_id: Uuid) -> BillingResult<Vec<BillingEvent>> {
        let user = self.directory.get_user(user_id).await?;

        let customer_ref = user.gateway_customer_id.as_deref().ok_or_else(|| {
            BillingError::CustomerNotFound(format!(
                "User {} has no recorded gateway customer",
                user_id
            ))
        })?;

        self.events.find_by_customer_reference(customer_ref).await
    }
}
