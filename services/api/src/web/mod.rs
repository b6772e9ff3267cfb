pub mod auth;
pub mod middleware;
pub mod rest;
pub mod state;

// Re-export the handlers so the binary that builds the router can reach
// them without digging through submodules.
pub use middleware::require_auth;
pub use rest::{analyze_handler, checkout_handler, profile_handler, recognize_handler};
