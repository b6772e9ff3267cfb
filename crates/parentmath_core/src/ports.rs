//! crates/parentmath_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AccountCredentials, CheckoutSession, HelpMode, SubmissionPayload, UsageProfile,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Missing or invalid credential configuration: {0}")]
    Configuration(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Reads and writes account usage records, plus the browser auth sessions
/// that identify callers. Increments are atomic at the storage layer; the
/// core does no locking of its own.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    // --- Account and Usage ---

    /// Fetches the usage profile for `uid`, or `None` if no account exists.
    async fn get_profile(&self, uid: Uuid) -> PortResult<Option<UsageProfile>>;

    /// Creates the account record on first sign-in. Idempotent: an existing
    /// account only has its `last_used_at` refreshed.
    async fn create_account_if_absent(&self, uid: Uuid, email: Option<&str>) -> PortResult<()>;

    /// Atomically increments `free_uses_used` and stamps `last_used_at`.
    async fn consume_use(&self, uid: Uuid) -> PortResult<()>;

    /// Upgrades an anonymous account in place, attaching an email and
    /// password hash while preserving the usage counter. Fails with
    /// [`PortError::Conflict`] when the email is already taken or the
    /// account already has one attached.
    async fn attach_email(&self, uid: Uuid, email: &str, password_hash: &str) -> PortResult<()>;

    /// Records the billing customer reference. Set once, never cleared.
    async fn set_stripe_customer(&self, uid: Uuid, customer_id: &str) -> PortResult<()>;

    // --- Auth Methods ---

    async fn get_credentials_by_email(&self, email: &str) -> PortResult<AccountCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        uid: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}

/// Extracts text from a worksheet photo. The adapter's prompt must preserve
/// line breaks and problem-numbering tokens and must not solve or
/// editorialize.
#[async_trait]
pub trait TextRecognitionService: Send + Sync {
    async fn recognize(&self, image: &[u8], media_type: &str) -> PortResult<String>;
}

/// Produces teaching guidance for one submission. Parent mode is expected
/// to return the structured JSON schema; child mode freeform markdown-like
/// text. The returned string is rendered by `guidance::render`.
#[async_trait]
pub trait GuidanceService: Send + Sync {
    async fn generate(&self, mode: HelpMode, payload: &SubmissionPayload) -> PortResult<String>;
}

/// Creates a subscription checkout session for an authenticated account,
/// resolving (or creating) its billing-customer reference first.
#[async_trait]
pub trait CheckoutService: Send + Sync {
    async fn create_checkout_session(&self, uid: Uuid) -> PortResult<CheckoutSession>;
}
