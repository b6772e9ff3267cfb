//! crates/parentmath_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or transport format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free analyses granted to an account before the paywall engages.
pub const FREE_USE_LIMIT: u32 = 5;

/// One candidate problem produced by a segmentation run.
///
/// Ids are sequential (`problem-1`, `problem-2`, ...) in document order and
/// stable only within the run that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub id: String,
    pub text: String,
    pub label: String,
}

impl ProblemRecord {
    /// Builds the `ordinal`-th record (1-based) for `text`.
    pub fn numbered(ordinal: usize, text: String) -> Self {
        Self {
            id: format!("problem-{}", ordinal),
            label: format!("Problem {}", ordinal),
            text,
        }
    }
}

/// Which audience the generated guidance is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelpMode {
    Parent,
    Child,
}

/// The content of one analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionPayload {
    Text(String),
    Image { bytes: Vec<u8>, media_type: String },
}

impl SubmissionPayload {
    pub fn kind(&self) -> SubmissionKind {
        match self {
            SubmissionPayload::Text(_) => SubmissionKind::Text,
            SubmissionPayload::Image { .. } => SubmissionKind::Image,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Text,
    Image,
}

/// A single analysis request. Transient: created when the user submits and
/// consumed exactly once by the generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub mode: HelpMode,
    pub payload: SubmissionPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
}

/// Subscription state as reported by the billing system. States we do not
/// model explicitly are preserved in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Inactive,
    Active,
    Other(String),
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Other(s) => s,
        }
    }
}

impl From<&str> for SubscriptionStatus {
    fn from(s: &str) -> Self {
        match s {
            "inactive" => SubscriptionStatus::Inactive,
            "active" => SubscriptionStatus::Active,
            other => SubscriptionStatus::Other(other.to_string()),
        }
    }
}

/// The durable per-account usage record. Created exactly once on first
/// sign-in and kept for the account's lifetime. `free_uses_used` only ever
/// grows; `stripe_customer_id` is set once and never cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageProfile {
    pub uid: Uuid,
    pub email: Option<String>,
    pub plan: Plan,
    pub free_uses_used: u32,
    pub subscription_status: SubscriptionStatus,
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub uid: Uuid,
    pub expires_at: DateTime<Utc>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct AccountCredentials {
    pub uid: Uuid,
    pub email: String,
    pub hashed_password: String,
}

/// A subscription checkout session created by the billing system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub url: String,
}
