use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{Translation, Translator};
use crate::schedule::types::Language;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Translator backed by the Gemini `generateContent` API in JSON response mode.
#[derive(Clone)]
pub struct GeminiTranslator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Content {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiTranslator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build translation HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    fn prompt(text: &str, languages: &[Language]) -> String {
        let languages = languages
            .iter()
            .map(Language::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "You are a multilingual translator. Translate the given text into the following languages: {}.\n\
             Respond with a JSON array of objects with the fields \"language\" (one of the given language codes) and \"text\".\n\n\
             Text:\n\"{}\"\n",
            languages, text
        )
    }
}

/// Pulls the translation list out of the model's reply, tolerating a
/// markdown code fence around the JSON.
fn parse_translations(reply: &str) -> Result<Vec<Translation>> {
    let trimmed = reply.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim())
        .with_context(|| format!("Unexpected translation payload: {}", reply))
}

#[async_trait]
impl Translator for GeminiTranslator {
    async fn translate(&self, text: &str, languages: &[Language]) -> Result<Vec<Translation>> {
        let request = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": Self::prompt(text, languages) }],
            }],
            "generationConfig": { "responseMimeType": "application/json" },
        });

        debug!("Requesting {} translations from {}", languages.len(), self.model);
        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Translation request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Translation service returned {}: {}", status, body));
        }

        let response: GenerateContentResponse = response
            .json()
            .await
            .context("Failed to parse translation response")?;
        let reply: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .ok_or_else(|| anyhow::anyhow!("Translation response has no candidates"))?;

        parse_translations(&reply)
    }
}
