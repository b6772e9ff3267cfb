//! services/api/src/web/auth.rs
//!
//! Authentication endpoints: anonymous session bootstrap, signup (which
//! upgrades an anonymous account in place so its free-use counter carries
//! over), login, and logout.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::middleware::session_id_from_cookies;
use crate::web::state::AppState;
use parentmath_core::ports::PortError;

const SESSION_DAYS: i64 = 30;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub uid: Uuid,
    pub email: Option<String>,
}

//=========================================================================================
// Helpers
//=========================================================================================

fn session_cookie(session_id: &str) -> String {
    format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        session_id,
        Duration::days(SESSION_DAYS).num_seconds()
    )
}

async fn issue_session(
    state: &AppState,
    uid: Uuid,
) -> Result<String, (StatusCode, String)> {
    let auth_session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::days(SESSION_DAYS);
    state
        .store
        .create_auth_session(&auth_session_id, uid, expires_at)
        .await
        .map_err(|e| {
            error!("Failed to create auth session: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create session".to_string(),
            )
        })?;
    Ok(auth_session_id)
}

/// The uid behind the caller's session cookie, if one is present and valid.
async fn current_uid(state: &AppState, headers: &HeaderMap) -> Option<Uuid> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    let session_id = session_id_from_cookies(cookie_header)?;
    state.store.validate_auth_session(session_id).await.ok()
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/anonymous - Start (or resume) an anonymous session.
///
/// This is the entry transition from no-session to a usable account: the
/// first call creates an account row and a cookie; repeat calls with a
/// valid cookie are no-ops, so the bootstrap is idempotent. Failures
/// surface to the caller and are not retried here.
#[utoipa::path(
    post,
    path = "/auth/anonymous",
    responses(
        (status = 200, description = "Session already active", body = AuthResponse),
        (status = 201, description = "Anonymous account created", body = AuthResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn anonymous_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Some(uid) = current_uid(&state, &headers).await {
        // Already bootstrapped: keep the existing cookie and account.
        return Ok((StatusCode::OK, Json(AuthResponse { uid, email: None })).into_response());
    }

    let uid = Uuid::new_v4();
    state
        .store
        .create_account_if_absent(uid, None)
        .await
        .map_err(|e| {
            error!("Failed to create anonymous account: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create account".to_string(),
            )
        })?;

    let auth_session_id = issue_session(&state, uid).await?;
    info!(%uid, "Anonymous session started");

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, session_cookie(&auth_session_id))],
        Json(AuthResponse { uid, email: None }),
    )
        .into_response())
}

/// POST /auth/signup - Create an account with email and password.
///
/// When the caller already holds an anonymous session, that account is
/// upgraded in place so the usage counter is preserved. If the email is
/// already taken, the request falls back to a normal login attempt.
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 401, description = "Email in use and password did not match"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Hash the password
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to hash password".to_string(),
            )
        })?
        .to_string();

    // 2. Reuse the anonymous account when one is active, otherwise mint a
    // fresh uid.
    let uid = match current_uid(&state, &headers).await {
        Some(uid) => uid,
        None => {
            let uid = Uuid::new_v4();
            state
                .store
                .create_account_if_absent(uid, None)
                .await
                .map_err(|e| {
                    error!("Failed to create account: {:?}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to create account".to_string(),
                    )
                })?;
            uid
        }
    };

    // 3. Attach the email. Only a conflict (the email is taken, or the
    // account already has one) falls back to a login attempt; anything
    // else is a server error.
    match state
        .store
        .attach_email(uid, &req.email, &password_hash)
        .await
    {
        Ok(()) => {}
        Err(PortError::Conflict(reason)) => {
            info!("Signup conflict, trying login: {}", reason);
            return login_handler(
                State(state),
                Json(LoginRequest {
                    email: req.email,
                    password: req.password,
                }),
            )
            .await
            .map(|r| r.into_response());
        }
        Err(e) => {
            error!("Failed to attach email: {:?}", e);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create account".to_string(),
            ));
        }
    }

    // 4. Issue a fresh session cookie
    let auth_session_id = issue_session(&state, uid).await?;

    let response = AuthResponse {
        uid,
        email: Some(req.email),
    };

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, session_cookie(&auth_session_id))],
        Json(response),
    )
        .into_response())
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Get account credentials by email
    let creds = state
        .store
        .get_credentials_by_email(&req.email)
        .await
        .map_err(|e| {
            error!("Failed to get account: {:?}", e);
            (
                StatusCode::UNAUTHORIZED,
                "Invalid email or password".to_string(),
            )
        })?;

    // 2. Verify password
    let parsed_hash = PasswordHash::new(&creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Authentication error".to_string(),
        )
    })?;

    let valid = Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_ok();

    if !valid {
        return Err((
            StatusCode::UNAUTHORIZED,
            "Invalid email or password".to_string(),
        ));
    }

    // 3. Issue a fresh session cookie
    let auth_session_id = issue_session(&state, creds.uid).await?;

    let response = AuthResponse {
        uid: creds.uid,
        email: Some(creds.email),
    };

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie(&auth_session_id))],
        Json(response),
    ))
}

/// POST /auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Extract session cookie
    let cookie_header = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    // 2. Parse session ID from cookie
    let auth_session_id = session_id_from_cookies(cookie_header)
        .ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    // 3. Delete auth session from database
    state
        .store
        .delete_auth_session(auth_session_id)
        .await
        .map_err(|e| {
            error!("Failed to delete auth session: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to logout".to_string(),
            )
        })?;

    // 4. Clear cookie
    let cookie = "session=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0";

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie.to_string())]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::checkout::UnconfiguredCheckout;
    use crate::config::Config;
    use async_trait::async_trait;
    use parentmath_core::domain::{
        AccountCredentials, HelpMode, SubmissionPayload, UsageProfile,
    };
    use parentmath_core::ports::{
        EntitlementStore, GuidanceService, PortResult, TextRecognitionService,
    };

    /// How a stub store answers `attach_email`.
    enum AttachBehavior {
        Succeed,
        Conflict,
        Fail,
    }

    struct StubStore {
        attach: AttachBehavior,
        credentials: Option<AccountCredentials>,
    }

    #[async_trait]
    impl EntitlementStore for StubStore {
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
            email: &str,
            _password_hash: &str,
        ) -> PortResult<()> {
            match self.attach {
                AttachBehavior::Succeed => Ok(()),
                AttachBehavior::Conflict => Err(PortError::Conflict(format!(
                    "Email {} is already in use",
                    email
                ))),
                AttachBehavior::Fail => {
                    Err(PortError::Unexpected("connection reset".to_string()))
                }
            }
        }

        async fn set_stripe_customer(&self, _uid: Uuid, _customer_id: &str) -> PortResult<()> {
            Ok(())
        }

        async fn get_credentials_by_email(&self, email: &str) -> PortResult<AccountCredentials> {
            self.credentials
                .clone()
                .filter(|c| c.email == email)
                .ok_or_else(|| PortError::NotFound(format!("No account for email {}", email)))
        }

        async fn create_auth_session(
            &self,
            _session_id: &str,
            _uid: Uuid,
            _expires_at: chrono::DateTime<Utc>,
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

    struct StubOcr;

    #[async_trait]
    impl TextRecognitionService for StubOcr {
        async fn recognize(&self, _image: &[u8], _media_type: &str) -> PortResult<String> {
            Err(PortError::Unexpected("not wired".to_string()))
        }
    }

    struct StubGuidance;

    #[async_trait]
    impl GuidanceService for StubGuidance {
        async fn generate(
            &self,
            _mode: HelpMode,
            _payload: &SubmissionPayload,
        ) -> PortResult<String> {
            Err(PortError::Unexpected("not wired".to_string()))
        }
    }

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            database_url: String::new(),
            log_level: tracing::Level::INFO,
            openai_api_key: None,
            ocr_model: "gpt-4o".to_string(),
            guidance_model: "gpt-4o".to_string(),
            stripe_secret_key: None,
            stripe_price_id: None,
            checkout_success_url: String::new(),
            checkout_cancel_url: String::new(),
            cors_origin: String::new(),
        }
    }

    fn app_state(store: StubStore) -> Arc<AppState> {
        Arc::new(AppState {
            store: Arc::new(store),
            config: Arc::new(test_config()),
            recognizer: Arc::new(StubOcr),
            guidance: Arc::new(StubGuidance),
            checkout: Arc::new(UnconfiguredCheckout),
        })
    }

    fn hash_of(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string()
    }

    fn signup(email: &str, password: &str) -> Json<SignupRequest> {
        Json(SignupRequest {
            email: email.to_string(),
            password: password.to_string(),
        })
    }

    #[tokio::test]
    async fn signup_with_taken_email_falls_back_to_login() {
        let state = app_state(StubStore {
            attach: AttachBehavior::Conflict,
            credentials: Some(AccountCredentials {
                uid: Uuid::new_v4(),
                email: "parent@example.com".to_string(),
                hashed_password: hash_of("hunter2"),
            }),
        });

        let response =
            signup_handler(State(state), HeaderMap::new(), signup("parent@example.com", "hunter2"))
                .await
                .map(|r| r.into_response())
                .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn signup_conflict_with_wrong_password_is_unauthorized() {
        let state = app_state(StubStore {
            attach: AttachBehavior::Conflict,
            credentials: Some(AccountCredentials {
                uid: Uuid::new_v4(),
                email: "parent@example.com".to_string(),
                hashed_password: hash_of("hunter2"),
            }),
        });

        let err =
            signup_handler(State(state), HeaderMap::new(), signup("parent@example.com", "wrong"))
                .await
                .map(|r| r.into_response())
                .unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signup_store_failure_is_a_server_error_not_a_login_attempt() {
        // A transient store failure must not be answered as if the
        // credentials were wrong.
        let state = app_state(StubStore {
            attach: AttachBehavior::Fail,
            credentials: None,
        });

        let err =
            signup_handler(State(state), HeaderMap::new(), signup("parent@example.com", "hunter2"))
                .await
                .map(|r| r.into_response())
                .unwrap_err();
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn plain_signup_attaches_email_and_sets_cookie() {
        let state = app_state(StubStore {
            attach: AttachBehavior::Succeed,
            credentials: None,
        });

        let response =
            signup_handler(State(state), HeaderMap::new(), signup("parent@example.com", "hunter2"))
                .await
                .map(|r| r.into_response())
                .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().contains_key(header::SET_COOKIE));
    }
}
