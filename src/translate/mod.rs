use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::schedule::types::Language;

pub mod gemini;

pub use gemini::GeminiTranslator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub language: Language,
    pub text: String,
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates one text into every language in `languages`.
    async fn translate(&self, text: &str, languages: &[Language]) -> Result<Vec<Translation>>;
}
