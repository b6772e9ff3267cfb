//! crates/parentmath_core/src/flow.rs
//!
//! Drives one analysis from input selection through recognition,
//! segmentation, the entitlement gate and generation. The flow is an
//! explicit state machine: every operation checks the current state, and a
//! failure always leaves the flow in a state the user can reset out of.

use uuid::Uuid;

use crate::domain::{HelpMode, Submission, SubmissionKind, SubmissionPayload};
use crate::entitlement::{uses_remaining, Entitlement};
use crate::guidance::{render, Rendered};
use crate::ports::{EntitlementStore, GuidanceService, PortError, TextRecognitionService};
use crate::segment::{segment_with_fallback, Segmentation};

/// Where one analysis currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    InputSelected,
    Recognizing,
    Segmented,
    AwaitingEntitlement,
    Generating,
    Displayed,
    Blocked,
    Failed,
}

/// Mode and input-method choice carried across resets so the user does not
/// re-pick them for every problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preference {
    pub mode: HelpMode,
    pub method: SubmissionKind,
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Operation not valid in the current state: {0}")]
    InvalidState(&'static str),
    #[error("Multiple problems were detected; one must be selected first")]
    SelectionRequired,
    #[error("No problem with id {0} was detected")]
    UnknownProblem(String),
    #[error("Could not read text from the photo: {0}")]
    Recognition(#[source] PortError),
    #[error("Analysis failed: {0}")]
    Generation(#[source] PortError),
    #[error("Unable to load the usage profile: {0}")]
    Store(#[source] PortError),
    #[error("No usage profile exists for this account")]
    ProfileMissing,
}

/// How a finished (non-failed) analysis ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    /// Guidance was generated and rendered.
    Displayed(Rendered),
    /// The paywall engaged; no use was consumed and nothing was generated.
    Blocked { uses_remaining: u32 },
}

/// One interactive analysis. A single flow instance allows one in-flight
/// analysis at a time; a new submission is only accepted from `Idle`.
pub struct AnalysisFlow {
    state: FlowState,
    preference: Option<Preference>,
    // The original image is kept even after a recognition failure so the
    // user can resubmit it directly instead of the extracted text.
    image: Option<(Vec<u8>, String)>,
    segmentation: Option<Segmentation>,
    submission: Option<Submission>,
}

impl AnalysisFlow {
    pub fn new() -> Self {
        Self {
            state: FlowState::Idle,
            preference: None,
            image: None,
            segmentation: None,
            submission: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn preference(&self) -> Option<Preference> {
        self.preference
    }

    pub fn segmentation(&self) -> Option<&Segmentation> {
        self.segmentation.as_ref()
    }

    /// Supplies a typed problem. The flow moves straight to `InputSelected`;
    /// text input never goes through recognition.
    pub fn submit_text(&mut self, mode: HelpMode, text: String) -> Result<(), FlowError> {
        if self.state != FlowState::Idle {
            return Err(FlowError::InvalidState("submit requires Idle"));
        }
        self.preference = Some(Preference {
            mode,
            method: SubmissionKind::Text,
        });
        self.submission = Some(Submission {
            mode,
            payload: SubmissionPayload::Text(text),
        });
        self.state = FlowState::InputSelected;
        Ok(())
    }

    /// Supplies a photo of the worksheet.
    pub fn submit_image(
        &mut self,
        mode: HelpMode,
        bytes: Vec<u8>,
        media_type: String,
    ) -> Result<(), FlowError> {
        if self.state != FlowState::Idle {
            return Err(FlowError::InvalidState("submit requires Idle"));
        }
        self.preference = Some(Preference {
            mode,
            method: SubmissionKind::Image,
        });
        self.image = Some((bytes.clone(), media_type.clone()));
        self.submission = Some(Submission {
            mode,
            payload: SubmissionPayload::Image { bytes, media_type },
        });
        self.state = FlowState::InputSelected;
        Ok(())
    }

    /// Runs recognition and segmentation on an image input.
    ///
    /// A validated multi-problem split requires an explicit
    /// `select_problem` call before `run`; exactly one problem is
    /// auto-selected; a collapsed split auto-selects the whole recognized
    /// text. If recognition itself produced nothing usable the original
    /// image stays armed as the submission payload.
    pub async fn recognize(
        &mut self,
        ocr: &dyn TextRecognitionService,
    ) -> Result<&Segmentation, FlowError> {
        if self.state != FlowState::InputSelected {
            return Err(FlowError::InvalidState("recognize requires InputSelected"));
        }
        let (bytes, media_type) = self
            .image
            .clone()
            .ok_or(FlowError::InvalidState("recognize requires an image input"))?;

        self.state = FlowState::Recognizing;
        let raw_text = match ocr.recognize(&bytes, &media_type).await {
            Ok(text) => text,
            Err(e) => {
                self.state = FlowState::Failed;
                return Err(FlowError::Recognition(e));
            }
        };

        let segmentation = segment_with_fallback(&raw_text);
        match &segmentation {
            Segmentation::Accepted(problems) if problems.len() == 1 => {
                self.set_selected_text(problems[0].text.clone())?;
            }
            Segmentation::Accepted(_) => {
                // More than one candidate: no default selection.
            }
            Segmentation::Collapsed { problem, .. } => {
                self.set_selected_text(problem.text.clone())?;
            }
            Segmentation::Blank => {
                // Nothing recognized; the raw image remains the payload.
            }
        }

        self.state = FlowState::Segmented;
        Ok(&*self.segmentation.insert(segmentation))
    }

    /// Picks one of several detected problems as the thing to analyze.
    pub fn select_problem(&mut self, id: &str) -> Result<(), FlowError> {
        if self.state != FlowState::Segmented {
            return Err(FlowError::InvalidState("select requires Segmented"));
        }
        let problems = match &self.segmentation {
            Some(Segmentation::Accepted(problems)) => problems,
            _ => return Err(FlowError::InvalidState("select requires an accepted split")),
        };
        let problem = problems
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| FlowError::UnknownProblem(id.to_string()))?;
        let text = problem.text.clone();
        self.set_selected_text(text)
    }

    /// After a recognition failure, resubmits the raw image itself as the
    /// payload instead of extracted text.
    pub fn fallback_to_image(&mut self) -> Result<(), FlowError> {
        if self.state != FlowState::Failed {
            return Err(FlowError::InvalidState("image fallback requires Failed"));
        }
        let (bytes, media_type) = self
            .image
            .clone()
            .ok_or(FlowError::InvalidState("no image was submitted"))?;
        let mode = self.mode()?;
        self.submission = Some(Submission {
            mode,
            payload: SubmissionPayload::Image { bytes, media_type },
        });
        self.state = FlowState::InputSelected;
        Ok(())
    }

    /// Evaluates entitlement and, if allowed, consumes one use and invokes
    /// generation.
    ///
    /// The use is consumed immediately before the generation call: a failed
    /// generation still counts, is never refunded, and is never retried
    /// here. A blocked attempt consumes nothing and calls nothing.
    pub async fn run(
        &mut self,
        uid: Uuid,
        store: &dyn EntitlementStore,
        guidance: &dyn GuidanceService,
    ) -> Result<FlowOutcome, FlowError> {
        match self.state {
            FlowState::InputSelected | FlowState::Segmented => {}
            _ => return Err(FlowError::InvalidState("run requires a selected input")),
        }
        if let Some(Segmentation::Accepted(problems)) = &self.segmentation {
            if problems.len() > 1
                && !matches!(
                    self.submission.as_ref().map(|s| &s.payload),
                    Some(SubmissionPayload::Text(_))
                )
            {
                return Err(FlowError::SelectionRequired);
            }
        }
        let submission = self
            .submission
            .clone()
            .ok_or(FlowError::InvalidState("run requires a submission"))?;

        self.state = FlowState::AwaitingEntitlement;
        let profile = match store.get_profile(uid).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                self.state = FlowState::Failed;
                return Err(FlowError::ProfileMissing);
            }
            Err(e) => {
                self.state = FlowState::Failed;
                return Err(FlowError::Store(e));
            }
        };

        let entitlement = Entitlement::evaluate(&profile);
        if !entitlement.allowed() {
            self.state = FlowState::Blocked;
            return Ok(FlowOutcome::Blocked {
                uses_remaining: uses_remaining(&profile),
            });
        }

        // Consumption precedes the call; see the entitlement module docs.
        if let Err(e) = store.consume_use(uid).await {
            self.state = FlowState::Failed;
            return Err(FlowError::Store(e));
        }

        self.state = FlowState::Generating;
        match guidance.generate(submission.mode, &submission.payload).await {
            Ok(raw) => {
                self.state = FlowState::Displayed;
                Ok(FlowOutcome::Displayed(render(submission.mode, &raw)))
            }
            Err(e) => {
                self.state = FlowState::Failed;
                Err(FlowError::Generation(e))
            }
        }
    }

    /// Returns to `Idle` for the next problem. Input and detected problems
    /// are discarded; the mode/method preference is kept.
    pub fn reset(&mut self) {
        self.image = None;
        self.segmentation = None;
        self.submission = None;
        self.state = FlowState::Idle;
    }

    fn mode(&self) -> Result<HelpMode, FlowError> {
        self.submission
            .as_ref()
            .map(|s| s.mode)
            .or_else(|| self.preference.map(|p| p.mode))
            .ok_or(FlowError::InvalidState("no mode selected"))
    }

    fn set_selected_text(&mut self, text: String) -> Result<(), FlowError> {
        let mode = self.mode()?;
        self.submission = Some(Submission {
            mode,
            payload: SubmissionPayload::Text(text),
        });
        Ok(())
    }
}

impl Default for AnalysisFlow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Plan, SubscriptionStatus, UsageProfile};
    use crate::guidance::Rendered;
    use crate::ports::PortResult;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockStore {
        profile: Mutex<UsageProfile>,
        consume_calls: AtomicU32,
    }

    impl MockStore {
        fn with_uses(used: u32) -> Self {
            Self {
                profile: Mutex::new(UsageProfile {
                    uid: Uuid::new_v4(),
                    email: None,
                    plan: Plan::Free,
                    free_uses_used: used,
                    subscription_status: SubscriptionStatus::Inactive,
                    stripe_customer_id: None,
                    created_at: Utc::now(),
                    last_used_at: Utc::now(),
                }),
                consume_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl EntitlementStore for MockStore {
        async fn get_profile(&self, _uid: Uuid) -> PortResult<Option<UsageProfile>> {
            Ok(Some(self.profile.lock().unwrap().clone()))
        }

        async fn create_account_if_absent(
            &self,
            _uid: Uuid,
            _email: Option<&str>,
        ) -> PortResult<()> {
            Ok(())
        }

        async fn consume_use(&self, _uid: Uuid) -> PortResult<()> {
            self.consume_calls.fetch_add(1, Ordering::SeqCst);
            self.profile.lock().unwrap().free_uses_used += 1;
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

        async fn get_credentials_by_email(
            &self,
            _email: &str,
        ) -> PortResult<crate::domain::AccountCredentials> {
            Err(PortError::NotFound("no credentials".into()))
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

    struct MockGuidance {
        response: Result<String, String>,
        calls: AtomicU32,
        seen_mode: Mutex<Option<HelpMode>>,
    }

    impl MockGuidance {
        fn returning(raw: &str) -> Self {
            Self {
                response: Ok(raw.to_string()),
                calls: AtomicU32::new(0),
                seen_mode: Mutex::new(None),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                response: Err(message.to_string()),
                calls: AtomicU32::new(0),
                seen_mode: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl GuidanceService for MockGuidance {
        async fn generate(
            &self,
            mode: HelpMode,
            _payload: &SubmissionPayload,
        ) -> PortResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_mode.lock().unwrap() = Some(mode);
            self.response
                .clone()
                .map_err(PortError::Unexpected)
        }
    }

    struct MockOcr {
        response: Result<String, String>,
    }

    #[async_trait]
    impl TextRecognitionService for MockOcr {
        async fn recognize(&self, _image: &[u8], _media_type: &str) -> PortResult<String> {
            self.response.clone().map_err(PortError::Unexpected)
        }
    }

    #[tokio::test]
    async fn entitled_text_submission_consumes_once_and_renders_fallback() {
        let store = MockStore::with_uses(0);
        // Parseable JSON but missing the `teaching` key: the renderer must
        // fall back to markdown rather than error.
        let guidance =
            MockGuidance::returning(r#"{"parsed": {"original_problem": "25 x 4"}, "answer": {"expression": "25 x 4", "value": 100}}"#);

        let mut flow = AnalysisFlow::new();
        flow.submit_text(HelpMode::Parent, "25 × 4".into()).unwrap();
        let outcome = flow.run(Uuid::new_v4(), &store, &guidance).await.unwrap();

        assert_eq!(store.consume_calls.load(Ordering::SeqCst), 1);
        assert_eq!(guidance.calls.load(Ordering::SeqCst), 1);
        assert_eq!(flow.state(), FlowState::Displayed);
        match outcome {
            FlowOutcome::Displayed(Rendered::Markdown { .. }) => {}
            other => panic!("expected markdown fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn blocked_attempt_consumes_nothing_and_calls_nothing() {
        let store = MockStore::with_uses(5);
        let guidance = MockGuidance::returning("irrelevant");

        let mut flow = AnalysisFlow::new();
        flow.submit_text(HelpMode::Child, "1/2 + 1/4".into()).unwrap();
        let outcome = flow.run(Uuid::new_v4(), &store, &guidance).await.unwrap();

        assert_eq!(outcome, FlowOutcome::Blocked { uses_remaining: 0 });
        assert_eq!(store.consume_calls.load(Ordering::SeqCst), 0);
        assert_eq!(guidance.calls.load(Ordering::SeqCst), 0);
        assert_eq!(flow.state(), FlowState::Blocked);
    }

    #[tokio::test]
    async fn failed_generation_still_consumes_the_use() {
        let store = MockStore::with_uses(0);
        let guidance = MockGuidance::failing("model unavailable");

        let mut flow = AnalysisFlow::new();
        flow.submit_text(HelpMode::Parent, "7 + 8".into()).unwrap();
        let err = flow.run(Uuid::new_v4(), &store, &guidance).await.unwrap_err();

        assert!(matches!(err, FlowError::Generation(_)));
        assert_eq!(store.consume_calls.load(Ordering::SeqCst), 1);
        assert_eq!(flow.state(), FlowState::Failed);

        // Reset returns to input selection but keeps the preference.
        flow.reset();
        assert_eq!(flow.state(), FlowState::Idle);
        let pref = flow.preference().unwrap();
        assert_eq!(pref.mode, HelpMode::Parent);
        assert_eq!(pref.method, SubmissionKind::Text);
    }

    #[tokio::test]
    async fn single_detected_problem_is_auto_selected() {
        let ocr = MockOcr {
            response: Ok("What is 2/3 of 12?".into()),
        };
        let store = MockStore::with_uses(0);
        let guidance = MockGuidance::returning("### PROBLEM\nWhat is 2/3 of 12?");

        let mut flow = AnalysisFlow::new();
        flow.submit_image(HelpMode::Child, vec![1, 2, 3], "image/jpeg".into())
            .unwrap();
        match flow.recognize(&ocr).await.unwrap() {
            Segmentation::Accepted(problems) => assert_eq!(problems.len(), 1),
            other => panic!("expected accepted split, got {:?}", other),
        }
        let outcome = flow.run(Uuid::new_v4(), &store, &guidance).await.unwrap();
        assert!(matches!(outcome, FlowOutcome::Displayed(_)));
        // The auto-selected text keeps the mode the image was submitted
        // with; it is not reset to a default.
        assert_eq!(*guidance.seen_mode.lock().unwrap(), Some(HelpMode::Child));
    }

    #[tokio::test]
    async fn multiple_problems_require_explicit_selection() {
        let ocr = MockOcr {
            response: Ok("1. 2+2 equals?\n2. 3+3 equals?".into()),
        };
        let store = MockStore::with_uses(0);
        let guidance = MockGuidance::returning("fine");

        let mut flow = AnalysisFlow::new();
        flow.submit_image(HelpMode::Parent, vec![9], "image/png".into())
            .unwrap();
        flow.recognize(&ocr).await.unwrap();

        let err = flow.run(Uuid::new_v4(), &store, &guidance).await.unwrap_err();
        assert!(matches!(err, FlowError::SelectionRequired));
        assert_eq!(store.consume_calls.load(Ordering::SeqCst), 0);

        flow.select_problem("problem-2").unwrap();
        let outcome = flow.run(Uuid::new_v4(), &store, &guidance).await.unwrap();
        assert!(matches!(outcome, FlowOutcome::Displayed(_)));
        assert_eq!(store.consume_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recognition_failure_allows_image_fallback() {
        let ocr = MockOcr {
            response: Err("unreadable".into()),
        };

        let mut flow = AnalysisFlow::new();
        flow.submit_image(HelpMode::Parent, vec![0xFF], "image/jpeg".into())
            .unwrap();
        let err = flow.recognize(&ocr).await.unwrap_err();
        assert!(matches!(err, FlowError::Recognition(_)));
        assert_eq!(flow.state(), FlowState::Failed);

        flow.fallback_to_image().unwrap();
        assert_eq!(flow.state(), FlowState::InputSelected);

        let store = MockStore::with_uses(0);
        let guidance = MockGuidance::returning("read from the image instead");
        let outcome = flow.run(Uuid::new_v4(), &store, &guidance).await.unwrap();
        assert!(matches!(outcome, FlowOutcome::Displayed(_)));
    }

    #[tokio::test]
    async fn text_input_cannot_be_recognized() {
        let ocr = MockOcr {
            response: Ok("anything".into()),
        };
        let mut flow = AnalysisFlow::new();
        flow.submit_text(HelpMode::Parent, "2+2".into()).unwrap();
        let err = flow.recognize(&ocr).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidState(_)));
    }

    #[tokio::test]
    async fn second_submission_requires_reset() {
        let mut flow = AnalysisFlow::new();
        flow.submit_text(HelpMode::Parent, "2+2".into()).unwrap();
        let err = flow.submit_text(HelpMode::Parent, "3+3".into()).unwrap_err();
        assert!(matches!(err, FlowError::InvalidState(_)));
    }
}
