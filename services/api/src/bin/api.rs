//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        checkout::{StripeCheckoutAdapter, UnconfiguredCheckout},
        db::DbAdapter,
        guidance_llm::OpenAiGuidanceAdapter,
        ocr_llm::OpenAiOcrAdapter,
    },
    config::Config,
    error::ApiError,
    web::{
        auth::{anonymous_handler, login_handler, logout_handler, signup_handler},
        middleware::require_auth,
        rest::{
            analyze_handler, checkout_handler, profile_handler, recognize_handler, ApiDoc,
        },
        state::AppState,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use parentmath_core::ports::CheckoutService;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let recognizer = Arc::new(OpenAiOcrAdapter::new(
        openai_client.clone(),
        config.ocr_model.clone(),
    ));
    let guidance = Arc::new(OpenAiGuidanceAdapter::new(
        openai_client.clone(),
        config.guidance_model.clone(),
    ));

    let checkout: Arc<dyn CheckoutService> =
        if config.stripe_secret_key.is_some() && config.stripe_price_id.is_some() {
            Arc::new(StripeCheckoutAdapter::new(
                db_adapter.clone(),
                config.stripe_secret_key.clone(),
                config.stripe_price_id.clone(),
                config.checkout_success_url.clone(),
                config.checkout_cancel_url.clone(),
            )?)
        } else {
            warn!("Stripe keys absent; checkout endpoint will report unavailable");
            Arc::new(UnconfiguredCheckout)
        };

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        store: db_adapter,
        config: config.clone(),
        recognizer,
        guidance,
        checkout,
    });

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origin
                .parse::<HeaderValue>()
                .map_err(|e| ApiError::Internal(format!("Invalid CORS_ORIGIN: {}", e)))?,
        )
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/anonymous", post(anonymous_handler))
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/recognize", post(recognize_handler))
        .route("/analyze", post(analyze_handler))
        .route("/checkout", post(checkout_handler))
        .route("/profile", get(profile_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
