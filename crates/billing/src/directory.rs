//! Local user directory collaborator.
//!
//! The billing core never owns account data; it reads the account holder's
//! name/email (the gateway reconciliation key) through this interface.

use pipecraft_shared::LocalUser;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Read-only access to the local account directory.
#[allow(async_fn_in_trait)]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> BillingResult<LocalUser>;
}

/// Postgres-backed directory.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UserDirectory for PgUserDirectory {
    async fn get_user(&self, user_id: Uuid) -> BillingResult<LocalUser> {
        let user: Option<LocalUser> = sqlx::query_as(
            r#"
            SELECT id, first_name, last_name, email, gateway_customer_id
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        user.ok_or_else(|| BillingError::NotFound(format!("User {} not found", user_id)))
    }
}

/// In-memory directory for testing.
#[cfg(any(test, feature = "test-gateway"))]
#[allow(clippy::unwrap_used)]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    #[derive(Default, Clone)]
    pub struct InMemoryUserDirectory {
        users: Arc<RwLock<HashMap<Uuid, LocalUser>>>,
    }

    impl InMemoryUserDirectory {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_user(&self, user: LocalUser) {
            self.users.write().unwrap().insert(user.id, user);
        }
    }

    impl UserDirectory for InMemoryUserDirectory {
        async fn get_user(&self, user_id: Uuid) -> BillingResult<LocalUser> {
            self.users
                .read()
                .unwrap()
                .get(&user_id)
                .cloned()
                .ok_or_else(|| BillingError::NotFound(format!("User {} not found", user_id)))
        }
    }
}
