//! crates/parentmath_core/src/entitlement.rs
//!
//! Decides whether an account may run an analysis: an active subscription
//! or pro plan grants unlimited access, otherwise the free-use counter
//! applies.

use crate::domain::{Plan, SubscriptionStatus, UsageProfile, FREE_USE_LIMIT};

/// The entitlement decision for one profile at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entitlement {
    pub is_pro: bool,
    pub can_use_free: bool,
}

impl Entitlement {
    pub fn evaluate(profile: &UsageProfile) -> Self {
        Self {
            is_pro: profile.subscription_status == SubscriptionStatus::Active
                || profile.plan == Plan::Pro,
            can_use_free: profile.free_uses_used < FREE_USE_LIMIT,
        }
    }

    /// The composite gate: generation may proceed iff this is true.
    pub fn allowed(&self) -> bool {
        self.is_pro || self.can_use_free
    }
}

/// Free uses left before the paywall, floored at zero. Drives the paywall
/// prompt on a blocked attempt.
pub fn uses_remaining(profile: &UsageProfile) -> u32 {
    FREE_USE_LIMIT.saturating_sub(profile.free_uses_used)
}
