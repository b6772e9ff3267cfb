//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use parentmath_core::domain::HelpMode;
use parentmath_core::entitlement::{uses_remaining, Entitlement};
use parentmath_core::flow::{AnalysisFlow, FlowError, FlowOutcome};
use parentmath_core::ports::PortError;
use parentmath_core::segment::Segmentation;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::web::state::AppState;

const ACCEPTED_MEDIA_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::anonymous_handler,
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        recognize_handler,
        analyze_handler,
        checkout_handler,
        profile_handler,
    ),
    components(
        schemas(
            crate::web::auth::SignupRequest,
            crate::web::auth::LoginRequest,
            crate::web::auth::AuthResponse,
            ProblemDto,
            RecognizeResponse,
            AnalyzeRequest,
            AnalyzeResponse,
            CheckoutResponse,
            ProfileResponse,
        )
    ),
    tags(
        (name = "ParentMath API", description = "API endpoints for K-5 homework analysis.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// One detected problem the user can pick from.
#[derive(Serialize, ToSchema)]
pub struct ProblemDto {
    pub id: String,
    pub text: String,
    pub label: String,
}

/// The result of running recognition and segmentation on an uploaded photo.
#[derive(Serialize, ToSchema)]
pub struct RecognizeResponse {
    pub raw_text: String,
    /// Which segmentation branch was taken: `accepted` or `collapsed`.
    pub outcome: String,
    /// Why the split was collapsed, when it was.
    pub reason: Option<String>,
    pub problems: Vec<ProblemDto>,
}

/// One analysis request: either typed text or a base64-encoded photo.
#[derive(Deserialize, ToSchema)]
pub struct AnalyzeRequest {
    /// `parent` or `child`.
    #[schema(value_type = String)]
    pub mode: HelpMode,
    pub text: Option<String>,
    pub image_base64: Option<String>,
    pub media_type: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct AnalyzeResponse {
    /// `displayed` or `blocked`.
    pub status: String,
    /// The rendered guidance (structured or markdown), when displayed.
    #[schema(value_type = Object)]
    pub guidance: Option<serde_json::Value>,
    /// Free uses left, reported when blocked to drive the paywall prompt.
    pub uses_remaining: Option<u32>,
}

#[derive(Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Serialize, ToSchema)]
pub struct ProfileResponse {
    pub uid: Uuid,
    pub email: Option<String>,
    pub plan: String,
    pub free_uses_used: u32,
    pub subscription_status: String,
    pub is_pro: bool,
    pub uses_remaining: u32,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Recognize worksheet text from an uploaded photo and split it into
/// candidate problems.
///
/// Accepts a multipart/form-data request with a single image part
/// (JPEG, PNG or WebP).
#[utoipa::path(
    post,
    path = "/recognize",
    request_body(content_type = "multipart/form-data", description = "The worksheet photo."),
    responses(
        (status = 200, description = "Text recognized", body = RecognizeResponse),
        (status = 400, description = "Bad request (missing or unsupported image)"),
        (status = 401, description = "Not authenticated"),
        (status = 502, description = "Recognition failed")
    )
)]
pub async fn recognize_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(_uid): Extension<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (media_type, image) = if let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart data: {}", e),
        )
    })? {
        let media_type = field.content_type().unwrap_or("image/jpeg").to_string();
        let data = field.bytes().await.map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("Failed to read image bytes: {}", e),
            )
        })?;
        (media_type, data.to_vec())
    } else {
        return Err((
            StatusCode::BAD_REQUEST,
            "Multipart form must include an image".to_string(),
        ));
    };

    if !ACCEPTED_MEDIA_TYPES.contains(&media_type.as_str()) {
        return Err((
            StatusCode::BAD_REQUEST,
            "Please upload a JPG, PNG, or WebP image".to_string(),
        ));
    }

    let raw_text = app_state
        .recognizer
        .recognize(&image, &media_type)
        .await
        .map_err(|e| {
            error!("Recognition failed: {:?}", e);
            (
                StatusCode::BAD_GATEWAY,
                "Could not read text from this photo.".to_string(),
            )
        })?;

    let response = match parentmath_core::segment::segment_with_fallback(&raw_text) {
        Segmentation::Accepted(problems) => RecognizeResponse {
            raw_text,
            outcome: "accepted".to_string(),
            reason: None,
            problems: problems.into_iter().map(to_dto).collect(),
        },
        Segmentation::Collapsed { reason, problem } => RecognizeResponse {
            raw_text,
            outcome: "collapsed".to_string(),
            reason: Some(
                match reason {
                    parentmath_core::segment::CollapseReason::FragmentTooShort => {
                        "fragment_too_short"
                    }
                    parentmath_core::segment::CollapseReason::TooManyProblems => {
                        "too_many_problems"
                    }
                }
                .to_string(),
            ),
            problems: vec![to_dto(problem)],
        },
        Segmentation::Blank => {
            return Err((
                StatusCode::BAD_GATEWAY,
                "Could not read text from this photo.".to_string(),
            ));
        }
    };

    Ok(Json(response))
}

fn to_dto(p: parentmath_core::domain::ProblemRecord) -> ProblemDto {
    ProblemDto {
        id: p.id,
        text: p.text,
        label: p.label,
    }
}

/// Analyze one problem and return teaching guidance.
///
/// The entitlement gate runs first: a blocked account gets a 402 with the
/// remaining-use count instead of guidance. A successful gate consumes one
/// free use before the model is called.
#[utoipa::path(
    post,
    path = "/analyze",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Guidance generated", body = AnalyzeResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Not authenticated"),
        (status = 402, description = "Free uses exhausted", body = AnalyzeResponse),
        (status = 502, description = "Generation failed")
    )
)]
pub async fn analyze_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(uid): Extension<Uuid>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut flow = AnalysisFlow::new();

    match (req.text, req.image_base64) {
        (Some(text), None) => {
            let trimmed = text.trim().to_string();
            if trimmed.len() < 2 {
                return Err((
                    StatusCode::BAD_REQUEST,
                    "Problem seems too short. Please enter a complete math problem.".to_string(),
                ));
            }
            flow.submit_text(req.mode, trimmed)
        }
        (None, Some(image_base64)) => {
            let bytes = STANDARD.decode(image_base64).map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    "image_base64 is not valid base64".to_string(),
                )
            })?;
            let media_type = req
                .media_type
                .unwrap_or_else(|| "image/jpeg".to_string());
            flow.submit_image(req.mode, bytes, media_type)
        }
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                "Provide exactly one of text or image_base64".to_string(),
            ));
        }
    }
    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    match flow
        .run(uid, app_state.store.as_ref(), app_state.guidance.as_ref())
        .await
    {
        Ok(FlowOutcome::Displayed(rendered)) => {
            let guidance = serde_json::to_value(&rendered).map_err(|e| {
                error!("Failed to serialize guidance: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to render guidance".to_string(),
                )
            })?;
            Ok((
                StatusCode::OK,
                Json(AnalyzeResponse {
                    status: "displayed".to_string(),
                    guidance: Some(guidance),
                    uses_remaining: None,
                }),
            ))
        }
        Ok(FlowOutcome::Blocked { uses_remaining }) => Ok((
            StatusCode::PAYMENT_REQUIRED,
            Json(AnalyzeResponse {
                status: "blocked".to_string(),
                guidance: None,
                uses_remaining: Some(uses_remaining),
            }),
        )),
        Err(FlowError::Generation(e)) => {
            error!("Generation failed: {:?}", e);
            Err((
                StatusCode::BAD_GATEWAY,
                "Failed to analyze the problem. Please try again.".to_string(),
            ))
        }
        Err(FlowError::ProfileMissing) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Unable to load user profile".to_string(),
        )),
        Err(e) => {
            error!("Analysis flow failed: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to analyze the problem. Please try again.".to_string(),
            ))
        }
    }
}

/// Create a subscription checkout session and return its redirect URL.
#[utoipa::path(
    post,
    path = "/checkout",
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutResponse),
        (status = 401, description = "Not authenticated"),
        (status = 503, description = "Checkout is not configured"),
        (status = 502, description = "Billing provider error")
    )
)]
pub async fn checkout_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(uid): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match app_state.checkout.create_checkout_session(uid).await {
        Ok(session) => Ok(Json(CheckoutResponse { url: session.url })),
        Err(PortError::Configuration(msg)) => {
            error!("Checkout not configured: {}", msg);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "Checkout is not available right now".to_string(),
            ))
        }
        Err(e) => {
            error!("Failed to create checkout session: {:?}", e);
            Err((
                StatusCode::BAD_GATEWAY,
                "Failed to start checkout. Please try again.".to_string(),
            ))
        }
    }
}

/// The caller's usage profile and current entitlement.
#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "Profile loaded", body = ProfileResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No profile exists for this account")
    )
)]
pub async fn profile_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(uid): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let profile = app_state
        .store
        .get_profile(uid)
        .await
        .map_err(|e| {
            error!("Failed to load profile: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unable to load user profile".to_string(),
            )
        })?
        .ok_or((
            StatusCode::NOT_FOUND,
            "Unable to load user profile".to_string(),
        ))?;

    let entitlement = Entitlement::evaluate(&profile);
    Ok(Json(ProfileResponse {
        uid: profile.uid,
        email: profile.email.clone(),
        plan: match profile.plan {
            parentmath_core::domain::Plan::Free => "free".to_string(),
            parentmath_core::domain::Plan::Pro => "pro".to_string(),
        },
        free_uses_used: profile.free_uses_used,
        subscription_status: profile.subscription_status.as_str().to_string(),
        is_pro: entitlement.is_pro,
        uses_remaining: uses_remaining(&profile),
    }))
}
