//! Plugin registry: optional providers for enrichment and transcription.
//!
//! Plugins are external collaborators; the daemon only holds their
//! interfaces. A missing provider never fails an operation, it just
//! narrows what the phase executor can do.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use vpo_common::TrackInfo;

/// Result of analyzing one audio track.
#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    /// Detected language (canonical 3-letter), if confident enough.
    pub detected_language: Option<String>,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    /// 'main', 'commentary', 'alternate', 'music', 'sfx' or 'non_speech'.
    pub track_type: String,
    /// Short sample of the transcript, for operator review.
    pub transcript_sample: Option<String>,
}

/// A transcription provider: extracts samples from an audio track and
/// returns language plus classification.
pub trait TranscriptionPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Analyze one audio track of the file.
    fn analyze(
        &self,
        file_path: &Path,
        track: &TrackInfo,
        track_duration: f64,
    ) -> anyhow::Result<TranscriptionOutcome>;
}

/// Registry of optional plugin providers.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    transcription: Option<Arc<dyn TranscriptionPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transcription(mut self, plugin: Arc<dyn TranscriptionPlugin>) -> Self {
        info!("Transcription plugin registered: {}", plugin.name());
        self.transcription = Some(plugin);
        self
    }

    pub fn transcription(&self) -> Option<&Arc<dyn TranscriptionPlugin>> {
        self.transcription.as_ref()
    }

    pub fn has_transcription(&self) -> bool {
        self.transcription.is_some()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("transcription", &self.transcription.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Canned transcription provider for tests.
    pub(crate) struct FakeTranscriber {
        pub language: String,
    }

    impl TranscriptionPlugin for FakeTranscriber {
        fn name(&self) -> &str {
            "fake-transcriber"
        }

        fn analyze(
            &self,
            _file_path: &Path,
            _track: &TrackInfo,
            _track_duration: f64,
        ) -> anyhow::Result<TranscriptionOutcome> {
            Ok(TranscriptionOutcome {
                detected_language: Some(self.language.clone()),
                confidence: 0.9,
                track_type: "main".to_string(),
                transcript_sample: Some("sample text".to_string()),
            })
        }
    }

    #[test]
    fn empty_registry_has_no_providers() {
        let registry = PluginRegistry::new();
        assert!(!registry.has_transcription());
    }

    #[test]
    fn registered_plugin_is_reachable() {
        let registry = PluginRegistry::new().with_transcription(Arc::new(FakeTranscriber {
            language: "eng".to_string(),
        }));
        assert!(registry.has_transcription());
        assert_eq!(registry.transcription().unwrap().name(), "fake-transcriber");
    }
}
