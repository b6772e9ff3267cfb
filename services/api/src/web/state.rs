//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use parentmath_core::ports::{
    CheckoutService, EntitlementStore, GuidanceService, TextRecognitionService,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntitlementStore>,
    pub config: Arc<Config>,
    pub recognizer: Arc<dyn TextRecognitionService>,
    pub guidance: Arc<dyn GuidanceService>,
    pub checkout: Arc<dyn CheckoutService>,
}
