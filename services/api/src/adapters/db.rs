//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `EntitlementStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parentmath_core::domain::{AccountCredentials, Plan, SubscriptionStatus, UsageProfile};
use parentmath_core::ports::{EntitlementStore, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `EntitlementStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    uid: Uuid,
    email: Option<String>,
    plan: String,
    free_uses_used: i32,
    subscription_status: String,
    stripe_customer_id: Option<String>,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
}

impl UserRecord {
    fn to_domain(self) -> UsageProfile {
        UsageProfile {
            uid: self.uid,
            email: self.email,
            plan: if self.plan == "pro" {
                Plan::Pro
            } else {
                Plan::Free
            },
            free_uses_used: self.free_uses_used.max(0) as u32,
            subscription_status: SubscriptionStatus::from(self.subscription_status.as_str()),
            stripe_customer_id: self.stripe_customer_id,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    uid: Uuid,
    email: String,
    hashed_password: String,
}

impl CredentialsRecord {
    fn to_domain(self) -> AccountCredentials {
        AccountCredentials {
            uid: self.uid,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct AuthSessionRecord {
    uid: Uuid,
    expires_at: DateTime<Utc>,
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// `EntitlementStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl EntitlementStore for DbAdapter {
    async fn get_profile(&self, uid: Uuid) -> PortResult<Option<UsageProfile>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT uid, email, plan, free_uses_used, subscription_status, \
             stripe_customer_id, created_at, last_used_at FROM users WHERE uid = $1",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.map(UserRecord::to_domain))
    }

    async fn create_account_if_absent(&self, uid: Uuid, email: Option<&str>) -> PortResult<()> {
        // First sign-in creates the row; later sign-ins only refresh
        // last_used_at. The counter and plan are never reset here.
        sqlx::query(
            "INSERT INTO users (uid, email) VALUES ($1, $2) \
             ON CONFLICT (uid) DO UPDATE SET last_used_at = now()",
        )
        .bind(uid)
        .bind(email)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn consume_use(&self, uid: Uuid) -> PortResult<()> {
        // A single UPDATE so the increment is atomic at the storage layer.
        let result = sqlx::query(
            "UPDATE users SET free_uses_used = free_uses_used + 1, last_used_at = now() \
             WHERE uid = $1",
        )
        .bind(uid)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", uid)));
        }
        Ok(())
    }

    async fn attach_email(&self, uid: Uuid, email: &str, password_hash: &str) -> PortResult<()> {
        // Only an anonymous account can be upgraded. A taken address trips
        // the unique index on `email` and surfaces as a conflict, not as a
        // generic failure.
        let result = sqlx::query(
            "UPDATE users SET email = $2, hashed_password = $3, last_used_at = now() \
             WHERE uid = $1 AND email IS NULL",
        )
        .bind(uid)
        .bind(email)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error().map(|d| d.kind()) {
            Some(sqlx::error::ErrorKind::UniqueViolation) => {
                PortError::Conflict(format!("Email {} is already in use", email))
            }
            _ => unexpected(e),
        })?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM users WHERE uid = $1")
                .bind(uid)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
            return Err(match exists {
                Some(_) => {
                    PortError::Conflict(format!("Account {} already has an email attached", uid))
                }
                None => PortError::NotFound(format!("User {} not found", uid)),
            });
        }
        Ok(())
    }

    async fn set_stripe_customer(&self, uid: Uuid, customer_id: &str) -> PortResult<()> {
        // Set once, never cleared: an existing reference is left alone.
        sqlx::query(
            "UPDATE users SET stripe_customer_id = $2 \
             WHERE uid = $1 AND stripe_customer_id IS NULL",
        )
        .bind(uid)
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_credentials_by_email(&self, email: &str) -> PortResult<AccountCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT uid, email, hashed_password FROM users \
             WHERE email = $1 AND hashed_password IS NOT NULL",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("No account for email {}", email))
            }
            _ => unexpected(e),
        })?;

        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        uid: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, uid, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(uid)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let record = sqlx::query_as::<_, AuthSessionRecord>(
            "SELECT uid, expires_at FROM auth_sessions WHERE id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or(PortError::Unauthorized)?;

        if record.expires_at < Utc::now() {
            return Err(PortError::Unauthorized);
        }
        Ok(record.uid)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
