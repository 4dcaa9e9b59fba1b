use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::debug;

use crate::asr::{AudioUpload, SpeechToText};

/// Client for a Whisper ASR webservice exposing `POST /asr`.
#[derive(Clone)]
pub struct WhisperApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl WhisperApiClient {
    /// `timeout` bounds each whole request, upload included.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Whisper HTTP client")?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperApiClient {
    async fn transcribe(&self, audio: AudioUpload) -> Result<Option<String>> {
        let size = audio.data.len();
        let part = Part::bytes(audio.data)
            .file_name(audio.file_name.clone())
            .mime_str(&audio.content_type)
            .with_context(|| format!("Invalid content type: {}", audio.content_type))?;
        let form = Form::new().part("audio_file", part);

        debug!("Uploading {} ({} bytes) to Whisper", audio.file_name, size);
        let response = self
            .client
            .post(format!("{}/asr", self.base_url))
            .query(&[("output", "txt")])
            .multipart(form)
            .send()
            .await
            .context("Whisper request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Whisper returned {}: {}", status, body));
        }

        let text = response
            .text()
            .await
            .context("Failed to read Whisper response")?;
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}
