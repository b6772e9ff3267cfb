pub mod domain;
pub mod entitlement;
pub mod flow;
pub mod guidance;
pub mod ports;
pub mod segment;

pub use domain::{
    AccountCredentials, AuthSession, CheckoutSession, HelpMode, Plan, ProblemRecord, Submission,
    SubmissionKind, SubmissionPayload, SubscriptionStatus, UsageProfile, FREE_USE_LIMIT,
};
pub use entitlement::{uses_remaining, Entitlement};
pub use flow::{AnalysisFlow, FlowError, FlowOutcome, FlowState};
pub use guidance::{render, Rendered};
pub use ports::{
    CheckoutService, EntitlementStore, GuidanceService, PortError, PortResult,
    TextRecognitionService,
};
pub use segment::{segment, segment_with_fallback, validate, Segmentation};
