//! Billing event store collaborator.
//!
//! Gateway webhooks append events to `billing_events` elsewhere in the
//! platform; this core only reads them back, keyed by the gateway customer
//! reference, to answer "what happened on this account" queries.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Default cap on events returned per customer reference.
const EVENT_QUERY_LIMIT: i64 = 100;

/// A recorded billing event
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BillingEvent {
    pub id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub gateway_event_id: Option<String>,
    pub gateway_customer_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Read-only access to recorded billing events.
#[allow(async_fn_in_trait)]
pub trait BillingEventStore: Send + Sync {
    /// Events recorded against a gateway customer reference, newest first.
    async fn find_by_customer_reference(
        &self,
        customer_ref: &str,
    ) -> BillingResult<Vec<BillingEvent>>;
}

/// Postgres-backed event store.
#[derive(Clone)]
pub struct PgBillingEventStore {
    pool: PgPool,
}

impl PgBillingEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl BillingEventStore for PgBillingEventStore {
    async fn find_by_customer_reference(
        &self,
        customer_ref: &str,
    ) -> BillingResult<Vec<BillingEvent>> {
        let events: Vec<BillingEvent> = sqlx::query_as(
            r#"
            SELECT
                id,
                event_type,
                event_data,
                gateway_event_id,
                gateway_customer_id,
                created_at
            FROM billing_events
            WHERE gateway_customer_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(customer_ref)
        .bind(EVENT_QUERY_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

/// In-memory event store for testing.
#[cfg(any(test, feature = "test-gateway"))]
#[allow(clippy::unwrap_used)]
pub mod test {
    use super::*;
    use std::sync::{Arc, RwLock};

    #[derive(Default, Clone)]
    pub struct InMemoryBillingEventStore {
        events: Arc<RwLock<Vec<BillingEvent>>>,
    }

    impl InMemoryBillingEventStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_event(&self, event: BillingEvent) {
            self.events.write().unwrap().push(event);
        }
    }

    impl BillingEventStore for InMemoryBillingEventStore {
        async fn find_by_customer_reference(
            &self,
            customer_ref: &str,
        ) -> BillingResult<Vec<BillingEvent>> {
            let mut events: Vec<BillingEvent> = self
                .events
                .read()
                .unwrap()
                .iter()
                .filter(|e| e.gateway_customer_id.as_deref() == Some(customer_ref))
                .cloned()
                .collect();
            events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(events)
        }
    }
}
