//! services/api/src/adapters/ocr_llm.rs
//!
//! This module contains the adapter for extracting worksheet text from a photo.
//! It implements the `TextRecognitionService` port from the `core` crate using
//! a vision-capable chat model.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use parentmath_core::ports::{PortError, PortResult, TextRecognitionService};

const OCR_INSTRUCTIONS: &str = r#"Extract all text from this image. This is a math worksheet with one or more problems.

INSTRUCTIONS:
- Return ONLY the text you see, exactly as it appears
- Preserve line breaks and spacing
- Include problem numbers if present (1., 2., etc.)
- Do not add any commentary or explanations
- Do not solve the problems
- If you see multiple problems, keep them separated as they appear on the page

Return the raw text only."#;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `TextRecognitionService` port using a
/// vision-capable OpenAI-compatible model.
#[derive(Clone)]
pub struct OpenAiOcrAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiOcrAdapter {
    /// Creates a new `OpenAiOcrAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

/// Encodes raw image bytes as the data URL the chat API expects.
pub(crate) fn image_data_url(image: &[u8], media_type: &str) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(image))
}

//=========================================================================================
// `TextRecognitionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextRecognitionService for OpenAiOcrAdapter {
    /// Extracts worksheet text from an image, preserving line breaks and
    /// problem-numbering tokens.
    async fn recognize(&self, image: &[u8], media_type: &str) -> PortResult<String> {
        let image_part = ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(
                ImageUrlArgs::default()
                    .url(image_data_url(image, media_type))
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            )
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let text_part = ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(OCR_INSTRUCTIONS)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(vec![image_part.into(), text_part.into()])
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(1024u32)
            .messages(vec![message.into()])
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);

        match text {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(PortError::Unexpected(
                "Recognition returned no text content.".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_carries_media_type_and_base64_payload() {
        let url = image_data_url(&[0xFF, 0xD8, 0xFF], "image/jpeg");
        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert!(url.ends_with("/9j/"));
    }
}
