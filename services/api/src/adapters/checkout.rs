//! services/api/src/adapters/checkout.rs
//!
//! This module contains the adapter for creating subscription checkout
//! sessions. It implements the `CheckoutService` port from the `core` crate
//! against Stripe's form-encoded REST API.

use async_trait::async_trait;
use parentmath_core::domain::CheckoutSession;
use parentmath_core::ports::{CheckoutService, EntitlementStore, PortError, PortResult};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `CheckoutService` port using the Stripe
/// REST API. The billing-customer reference is created lazily on first
/// checkout and persisted through the entitlement store.
pub struct StripeCheckoutAdapter {
    client: Client,
    store: Arc<dyn EntitlementStore>,
    secret_key: String,
    price_id: String,
    success_url: String,
    cancel_url: String,
}

#[derive(Deserialize)]
struct CustomerResponse {
    id: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    url: Option<String>,
}

impl StripeCheckoutAdapter {
    /// Creates a new `StripeCheckoutAdapter`. Returns a configuration error
    /// when the Stripe credentials are absent.
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        secret_key: Option<String>,
        price_id: Option<String>,
        success_url: String,
        cancel_url: String,
    ) -> PortResult<Self> {
        let secret_key = secret_key
            .ok_or_else(|| PortError::Configuration("STRIPE_SECRET_KEY is not set".to_string()))?;
        let price_id = price_id
            .ok_or_else(|| PortError::Configuration("STRIPE_PRICE_ID is not set".to_string()))?;
        Ok(Self {
            client: Client::new(),
            store,
            secret_key,
            price_id,
            success_url,
            cancel_url,
        })
    }

    /// The form body for a subscription checkout session, in Stripe's
    /// bracketed array notation.
    fn session_form(&self, customer_id: &str, uid: Uuid) -> Vec<(&'static str, String)> {
        vec![
            ("mode", "subscription".to_string()),
            ("customer", customer_id.to_string()),
            ("line_items[0][price]", self.price_id.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", self.success_url.clone()),
            ("cancel_url", self.cancel_url.clone()),
            ("metadata[uid]", uid.to_string()),
        ]
    }

    async fn resolve_customer(&self, uid: Uuid) -> PortResult<String> {
        let profile = self
            .store
            .get_profile(uid)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", uid)))?;

        if let Some(customer_id) = profile.stripe_customer_id {
            return Ok(customer_id);
        }

        let customer: CustomerResponse = self
            .client
            .post(format!("{}/v1/customers", STRIPE_API_BASE))
            .bearer_auth(&self.secret_key)
            .form(&[("metadata[uid]", uid.to_string())])
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .error_for_status()
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        self.store.set_stripe_customer(uid, &customer.id).await?;
        info!(%uid, customer_id = %customer.id, "Created billing customer");
        Ok(customer.id)
    }
}

//=========================================================================================
// `CheckoutService` Trait Implementation
//=========================================================================================

#[async_trait]
impl CheckoutService for StripeCheckoutAdapter {
    /// Resolves (or creates) the billing customer for `uid`, then creates a
    /// subscription checkout session and returns its redirect URL.
    async fn create_checkout_session(&self, uid: Uuid) -> PortResult<CheckoutSession> {
        let customer_id = self.resolve_customer(uid).await?;

        let session: SessionResponse = self
            .client
            .post(format!("{}/v1/checkout/sessions", STRIPE_API_BASE))
            .bearer_auth(&self.secret_key)
            .form(&self.session_form(&customer_id, uid))
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .error_for_status()
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let url = session.url.ok_or_else(|| {
            PortError::Unexpected("Checkout session response contained no URL.".to_string())
        })?;

        Ok(CheckoutSession { url })
    }
}

/// Stands in when Stripe credentials are absent: every checkout attempt
/// surfaces a configuration error instead of a broken redirect.
pub struct UnconfiguredCheckout;

#[async_trait]
impl CheckoutService for UnconfiguredCheckout {
    async fn create_checkout_session(&self, _uid: Uuid) -> PortResult<CheckoutSession> {
        Err(PortError::Configuration(
            "Checkout is not configured; set STRIPE_SECRET_KEY and STRIPE_PRICE_ID".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use parentmath_core::domain::{AccountCredentials, UsageProfile};

    struct NullStore;

    #[async_trait]
    impl EntitlementStore for NullStore {
        async fn get_profile(&self, _uid: Uuid) -> PortResult<Option<UsageProfile>> {
            Ok(None)
        }
        async fn create_account_if_absent(
            &self,
            _uid: Uuid,
            _email: Option<&str>,
        ) -> PortResult<()> {
            Ok(())
        }
        async fn consume_use(&self, _uid: Uuid) -> PortResult<()> {
            Ok(())
        }
        async fn attach_email(
            &self,
            _uid: Uuid,
            _email: &str,
            _password_hash: &str,
        ) -> PortResult<()> {
            Ok(())
        }
        async fn set_stripe_customer(&self, _uid: Uuid, _customer_id: &str) -> PortResult<()> {
            Ok(())
        }
        async fn get_credentials_by_email(&self, _email: &str) -> PortResult<AccountCredentials> {
            Err(PortError::NotFound("none".into()))
        }
        async fn create_auth_session(
            &self,
            _session_id: &str,
            _uid: Uuid,
            _expires_at: DateTime<Utc>,
        ) -> PortResult<()> {
            Ok(())
        }
        async fn validate_auth_session(&self, _session_id: &str) -> PortResult<Uuid> {
            Err(PortError::Unauthorized)
        }
        async fn delete_auth_session(&self, _session_id: &str) -> PortResult<()> {
            Ok(())
        }
    }

    fn adapter() -> StripeCheckoutAdapter {
        StripeCheckoutAdapter::new(
            Arc::new(NullStore),
            Some("sk_test_123".into()),
            Some("price_123".into()),
            "https://parentmath.com/success".into(),
            "https://parentmath.com".into(),
        )
        .unwrap()
    }

    #[test]
    fn missing_credentials_is_a_configuration_error() {
        let result = StripeCheckoutAdapter::new(
            Arc::new(NullStore),
            None,
            Some("price_123".into()),
            "s".into(),
            "c".into(),
        );
        assert!(matches!(result, Err(PortError::Configuration(_))));
    }

    #[test]
    fn session_form_uses_subscription_mode_and_configured_price() {
        let uid = Uuid::new_v4();
        let form = adapter().session_form("cus_42", uid);
        assert!(form.contains(&("mode", "subscription".to_string())));
        assert!(form.contains(&("customer", "cus_42".to_string())));
        assert!(form.contains(&("line_items[0][price]", "price_123".to_string())));
        assert!(form.contains(&("metadata[uid]", uid.to_string())));
    }
}
