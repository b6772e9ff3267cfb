pub mod checkout;
pub mod db;
pub mod guidance_llm;
pub mod ocr_llm;

pub use checkout::StripeCheckoutAdapter;
pub use db::DbAdapter;
pub use guidance_llm::OpenAiGuidanceAdapter;
pub use ocr_llm::OpenAiOcrAdapter;
