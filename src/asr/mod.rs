use anyhow::Result;
use async_trait::async_trait;

pub mod accuracy;
pub mod whisper;

pub use accuracy::word_error_rate;

/// Audio bytes plus the metadata the speech-to-text service needs to decode them.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Returns the transcript, or `None` when the service recognised nothing.
    async fn transcribe(&self, audio: AudioUpload) -> Result<Option<String>>;
}
