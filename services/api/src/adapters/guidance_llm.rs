//! services/api/src/adapters/guidance_llm.rs
//!
//! This module contains the adapter for the guidance-generating LLM.
//! It implements the `GuidanceService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use parentmath_core::{
    domain::{HelpMode, SubmissionPayload},
    ports::{GuidanceService, PortError, PortResult},
};

use crate::adapters::ocr_llm::image_data_url;

const PARENT_SYSTEM_PROMPT: &str = r#"You are ParentMath, a K-5 math helper for PARENTS. Your job is to parse elementary word problems and provide structured teaching guidance.

CRITICAL: You must respond with VALID JSON ONLY. No markdown, no commentary, just pure JSON.

OUTPUT FORMAT:
{
  "parsed": {
    "original_problem": string,
    "numbers": [{"value": number, "role": string}],
    "unit": string | null,
    "unknown": string (use simple 3rd-grade language: "We want to find..." or "We're looking for..."),
    "operation": string (use simple 3rd-grade language: "finding part of a number" NOT "multiplication"),
    "operation_why": string (explain in very simple terms why we do this, no jargon, short sentences),
    "problem_type": string (use simple description: "a percent problem" NOT technical terms)
  },
  "teaching": {
    "problem_restatement": string,
    "new_math_method": {"name": string, "explanation": string},
    "steps": [{"title": string, "instruction": string, "say_this": string}],
    "quick_notes": {"concept": string, "common_mistake": string, "if_they_ask": string},
    "visual_hint": string | null
  },
  "answer": {"expression": string, "value": number}
}

RULES:
1. Parse the problem: extract key quantities, units, relationships.
2. Use SIMPLE 3rd-grade language in "operation" and "operation_why". Short sentences, no jargon.
3. Identify ONE K-5 teaching method for new_math_method (Make-a-ten, Number bonds, Tape diagrams, Equal groups, Arrays, Area model, Visual area model, Grid model, Bar model, Part-part-whole...). The explanation is 1-2 sentences, parent-friendly, says why schools teach this way.
4. Generate 3-4 teaching steps max. Each step has a short title ("Step 1: ..."), what the parent should do, and a short phrase the parent can read aloud.
5. quick_notes has exactly 3 fields: concept (one sentence), common_mistake (one sentence), if_they_ask (one sentence answering the most likely kid question).
6. visual_hint: REQUIRED for fractions and percentages, simple text-based visuals 1-4 lines max; null or a brief hint otherwise.
7. Keep all strings concise. Max 2 sentences per field.

Tone: warm but efficient, instructional not chatty, parent-focused.
Goal: make the parent feel capable in 20 seconds or less.

OUTPUT MUST BE VALID JSON. Do not wrap in markdown code blocks."#;

const CHILD_SYSTEM_PROMPT: &str = r#"You are ParentMath in Kid-Friendly Mode. Your goal is to make K-5 math simple using short steps, kid-friendly language, and simple text-based visuals.

VISUAL RULES:
- For fractions show pieces: |■■■□| = 3/4, or a number line 0 -- 1/4 -- 1/2 -- 3/4 -- 1.
- For percentages show "out of 100" with a bar or grid.
- For other math use emojis sparingly. Maximum 1-3 lines of visuals per step.

LANGUAGE:
Use 3rd-grade words and analogies kids know (pizza slices, pieces, groups, pennies in a dollar). Keep it SHORT.

OUTPUT FORMAT:

### PROBLEM
Show the problem briefly.

### LET'S LEARN TOGETHER!
ONE sentence explaining the idea.

### STEPS
**Step 1: [Action]**
Brief explanation using simple words, with a visual if it helps.

**Step 2: [Action]**
Brief explanation.

### CHECK OUR WORK
Final answer with brief confirmation.

STYLE:
- Maximum 3-4 steps, each 1-3 sentences.
- Focus on understanding, not just the answer.
- No long stories or filler language.

Goal: make the child understand the concept visually AND verbally in under 20 seconds."#;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `GuidanceService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiGuidanceAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiGuidanceAdapter {
    /// Creates a new `OpenAiGuidanceAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn system_prompt(mode: HelpMode) -> &'static str {
        match mode {
            HelpMode::Parent => PARENT_SYSTEM_PROMPT,
            HelpMode::Child => CHILD_SYSTEM_PROMPT,
        }
    }

    fn user_message(
        mode: HelpMode,
        payload: &SubmissionPayload,
    ) -> Result<ChatCompletionRequestUserMessage, OpenAIError> {
        match payload {
            SubmissionPayload::Text(problem_text) => {
                let text = match mode {
                    HelpMode::Parent => format!(
                        "A parent needs help understanding how to teach their child this math problem:\n\n{}\n\nProvide warm, practical coaching on how to explain this to their child.",
                        problem_text
                    ),
                    HelpMode::Child => format!(
                        "Help explain this math problem to a child:\n\n{}\n\nExplain it in a fun, simple way they can understand.",
                        problem_text
                    ),
                };
                ChatCompletionRequestUserMessageArgs::default()
                    .content(text)
                    .build()
            }
            SubmissionPayload::Image { bytes, media_type } => {
                let text = match mode {
                    HelpMode::Parent => {
                        "A parent needs help understanding how to teach their child this math problem from their homework. Please analyze the image and provide warm, practical coaching on how to explain this to their child."
                    }
                    HelpMode::Child => {
                        "Help explain this math problem from the homework to a child. Explain it in a fun, simple way they can understand."
                    }
                };
                let image_part = ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(image_data_url(bytes, media_type))
                            .build()?,
                    )
                    .build()?;
                let text_part = ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(text)
                    .build()?;
                ChatCompletionRequestUserMessageArgs::default()
                    .content(vec![image_part.into(), text_part.into()])
                    .build()
            }
        }
    }
}

//=========================================================================================
// `GuidanceService` Trait Implementation
//=========================================================================================

#[async_trait]
impl GuidanceService for OpenAiGuidanceAdapter {
    /// Generates teaching guidance for one submission. The returned string
    /// is the model's raw output; rendering and the parent-mode JSON
    /// fallback happen in the core.
    async fn generate(&self, mode: HelpMode, payload: &SubmissionPayload) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(Self::system_prompt(mode))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            Self::user_message(mode, payload)
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(2048u32)
            .messages(messages)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        // Extract the text content from the first choice in the response.
        if let Some(choice) = response.choices.into_iter().next() {
            if let Some(content) = choice.message.content {
                Ok(content)
            } else {
                Err(PortError::Unexpected(
                    "Guidance LLM response contained no text content.".to_string(),
                ))
            }
        } else {
            Err(PortError::Unexpected(
                "Guidance LLM returned no choices in its response.".to_string(),
            ))
        }
    }
}
