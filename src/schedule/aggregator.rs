use std::collections::BTreeMap;
use std::io::{Read, Write};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::schedule::types::{AudioId, Language, SourceKind, TaskId};
use crate::translate::Translation;

pub const RESULT_CONTENT_TYPE: &str = "application/gzip";

/// language -> audio id (as string) -> source kind -> translated text
pub type ResultMap = BTreeMap<Language, BTreeMap<String, BTreeMap<SourceKind, String>>>;

/// Collects translations for one task attempt. Owned by the orchestrator for
/// the duration of that attempt and never shared.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    results: ResultMap,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites one entry.
    pub fn put(&mut self, language: Language, audio_id: AudioId, kind: SourceKind, text: String) {
        self.results
            .entry(language)
            .or_default()
            .entry(audio_id.to_string())
            .or_default()
            .insert(kind, text);
    }

    pub fn put_all(&mut self, audio_id: AudioId, kind: SourceKind, translations: Vec<Translation>) {
        for t in translations {
            self.put(t.language, audio_id, kind, t.text);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &ResultMap {
        &self.results
    }

    /// Serializes to JSON and gzips it.
    pub fn pack(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(&self.results).context("Failed to serialize results")?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }
}

/// Reader side of a packed result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultArtifact {
    results: ResultMap,
}

impl ResultArtifact {
    pub fn unpack(packed: &[u8]) -> Result<Self> {
        let mut decoder = GzDecoder::new(packed);
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .context("Result artifact is not valid gzip")?;
        let results = serde_json::from_slice(&json).context("Result artifact is not valid JSON")?;
        Ok(Self { results })
    }

    pub fn get(&self, language: Language, audio_id: AudioId, kind: SourceKind) -> Option<&str> {
        self.results
            .get(&language)?
            .get(&audio_id.to_string())?
            .get(&kind)
            .map(String::as_str)
    }

    pub fn results(&self) -> &ResultMap {
        &self.results
    }

    pub fn into_results(self) -> ResultMap {
        self.results
    }
}

/// Object path of a task's result artifact.
pub fn result_path(task_id: TaskId) -> String {
    format!("translation/{}.pack", task_id)
}
