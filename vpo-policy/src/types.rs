//! Policy model: closed config structs with explicit defaults.
//!
//! Policies reach this crate as already-parsed values (the YAML surface
//! lives elsewhere). Every knob is an explicit field with no open maps
//! in the evaluator, and unknown keys are rejected at
//! deserialization time.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use vpo_common::error::{Error, Result};

/// A complete policy: global config plus named phases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicySchema {
    /// Schema version of the policy document.
    pub version: i64,
    pub config: PolicyConfig,
    pub phases: Vec<PhaseDefinition>,
}

/// Global knobs that apply across phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Per-phase error handling mode.
    pub on_error: OnErrorMode,
    /// Overrides temp file placement for remux/transcode outputs.
    pub temp_directory: Option<PathBuf>,
    pub hardware_acceleration: HardwareAccelConfig,
    /// Keep the original file as a `.original` sibling after transcode.
    pub backup_original: bool,
    /// Per-operation transcode budget in seconds (None = no limit).
    pub transcode_timeout: Option<u64>,
    /// Thread hint forwarded to the transcoder.
    pub cpu_cores: Option<u32>,
    /// Title anti-patterns that mark commentary tracks.
    pub commentary_patterns: Vec<String>,
    /// Audio language preference, most preferred first.
    pub audio_language_preference: Vec<String>,
    /// Subtitle language preference, most preferred first.
    pub subtitle_language_preference: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            on_error: OnErrorMode::Fail,
            temp_directory: None,
            hardware_acceleration: HardwareAccelConfig::default(),
            backup_original: true,
            transcode_timeout: None,
            cpu_cores: None,
            commentary_patterns: vec![
                "commentary".to_string(),
                "director".to_string(),
                "isolated score".to_string(),
            ],
            audio_language_preference: Vec::new(),
            subtitle_language_preference: Vec::new(),
        }
    }
}

/// Per-phase error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnErrorMode {
    /// Roll back the phase and fail the job.
    #[default]
    Fail,
    /// Record the failure, stop further operations in this phase.
    Skip,
    /// Record the failure, proceed to the next operation.
    Continue,
}

/// The operation kinds a phase may contain, in canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Container,
    AudioFilter,
    SubtitleFilter,
    AttachmentFilter,
    TrackOrder,
    DefaultFlags,
    Conditional,
    AudioSynthesis,
    Transcode,
    FileTimestamp,
    Transcription,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Container => "container",
            OperationType::AudioFilter => "audio_filter",
            OperationType::SubtitleFilter => "subtitle_filter",
            OperationType::AttachmentFilter => "attachment_filter",
            OperationType::TrackOrder => "track_order",
            OperationType::DefaultFlags => "default_flags",
            OperationType::Conditional => "conditional",
            OperationType::AudioSynthesis => "audio_synthesis",
            OperationType::Transcode => "transcode",
            OperationType::FileTimestamp => "file_timestamp",
            OperationType::Transcription => "transcription",
        }
    }
}

/// Canonical execution order of operation kinds within a phase.
pub const CANONICAL_OPERATION_ORDER: [OperationType; 11] = [
    OperationType::Container,
    OperationType::AudioFilter,
    OperationType::SubtitleFilter,
    OperationType::AttachmentFilter,
    OperationType::TrackOrder,
    OperationType::DefaultFlags,
    OperationType::Conditional,
    OperationType::AudioSynthesis,
    OperationType::Transcode,
    OperationType::FileTimestamp,
    OperationType::Transcription,
];

/// One named stage of a policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhaseDefinition {
    pub name: String,
    pub container: Option<ContainerConfig>,
    pub audio_filter: Option<AudioFilterConfig>,
    pub subtitle_filter: Option<SubtitleFilterConfig>,
    pub attachment_filter: Option<AttachmentFilterConfig>,
    pub track_order: Option<TrackOrderConfig>,
    pub default_flags: Option<DefaultFlagsConfig>,
    pub conditional: Option<ConditionalConfig>,
    pub audio_synthesis: Option<AudioSynthesisConfig>,
    pub transcode: Option<TranscodePolicyConfig>,
    pub audio_transcode: Option<AudioTranscodeConfig>,
    pub file_timestamp: Option<FileTimestampConfig>,
    pub transcription: Option<TranscriptionOpConfig>,
}

impl PhaseDefinition {
    /// Operation kinds present in this phase, in canonical order.
    pub fn operations(&self) -> Vec<OperationType> {
        CANONICAL_OPERATION_ORDER
            .into_iter()
            .filter(|op| self.has_operation(*op))
            .collect()
    }

    fn has_operation(&self, op: OperationType) -> bool {
        match op {
            OperationType::Container => self.container.is_some(),
            OperationType::AudioFilter => self.audio_filter.is_some(),
            OperationType::SubtitleFilter => self.subtitle_filter.is_some(),
            OperationType::AttachmentFilter => self.attachment_filter.is_some(),
            OperationType::TrackOrder => self.track_order.is_some(),
            OperationType::DefaultFlags => self.default_flags.is_some(),
            OperationType::Conditional => self.conditional.is_some(),
            OperationType::AudioSynthesis => self.audio_synthesis.is_some(),
            OperationType::Transcode => self.transcode.is_some(),
            OperationType::FileTimestamp => self.file_timestamp.is_some(),
            OperationType::Transcription => self.transcription.is_some(),
        }
    }
}

/// Container conversion target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    /// Target container: `mp4`, `mkv` or `matroska`.
    pub target: String,
}

/// Audio track filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioFilterConfig {
    /// Keep-list of languages (canonical or alias). Empty keeps every
    /// language.
    pub languages: Vec<String>,
    /// Allow-list of codecs (alias-aware). Empty allows every codec.
    pub codecs: Vec<String>,
    /// Drop tracks whose title matches a commentary pattern.
    pub remove_commentary: bool,
    pub min_channels: Option<i64>,
    pub max_channels: Option<i64>,
    /// Plugin-metadata conditions, dotted key -> expected value. The
    /// filter only applies to files where every condition holds.
    pub metadata_conditions: BTreeMap<String, serde_json::Value>,
    /// Judge language by the analysis cache instead of the container tag
    /// when a verdict exists for the track.
    pub use_language_analysis: bool,
    /// Never drop below this many audio tracks.
    pub minimum_tracks: i64,
}

impl Default for AudioFilterConfig {
    fn default() -> Self {
        Self {
            languages: Vec::new(),
            codecs: Vec::new(),
            remove_commentary: false,
            min_channels: None,
            max_channels: None,
            metadata_conditions: BTreeMap::new(),
            use_language_analysis: false,
            minimum_tracks: 1,
        }
    }
}

/// Subtitle track filter. Forced subtitles are always kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubtitleFilterConfig {
    pub languages: Vec<String>,
    pub remove_commentary: bool,
    pub minimum_tracks: i64,
}

impl Default for SubtitleFilterConfig {
    fn default() -> Self {
        Self {
            languages: Vec::new(),
            remove_commentary: false,
            minimum_tracks: 0,
        }
    }
}

/// Attachment filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttachmentFilterConfig {
    /// Remove attachments (subject to keep_fonts).
    pub remove_all: bool,
    /// Keep font attachments even when remove_all is set (subtitle
    /// rendering needs them).
    pub keep_fonts: bool,
}

impl Default for AttachmentFilterConfig {
    fn default() -> Self {
        Self {
            remove_all: false,
            keep_fonts: true,
        }
    }
}

/// Ordering buckets for track_order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOrderBucket {
    Video,
    AudioMain,
    AudioAlternate,
    Audio,
    Subtitle,
    Attachment,
    Other,
}

/// Desired track order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackOrderConfig {
    pub order: Vec<TrackOrderBucket>,
}

/// Subtitle default-flag handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleDefaultMode {
    /// Leave subtitle defaults untouched.
    #[default]
    None,
    /// Default on the first kept forced subtitle, cleared elsewhere.
    ForcedOnly,
    /// Default on the first kept subtitle in the preferred language.
    FirstPreferred,
}

/// Default-flag policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultFlagsConfig {
    /// Exactly one default video track (the first kept one).
    pub set_video: bool,
    /// Exactly one default audio track (first kept track of the most
    /// preferred language present).
    pub set_audio: bool,
    pub subtitle_mode: SubtitleDefaultMode,
}

impl Default for DefaultFlagsConfig {
    fn default() -> Self {
        Self {
            set_video: true,
            set_audio: true,
            subtitle_mode: SubtitleDefaultMode::None,
        }
    }
}

/// One conditional rule: when every plugin-metadata condition holds, the
/// nested configs replace the phase-level ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConditionalRule {
    /// Dotted plugin-metadata key -> expected value.
    pub when: BTreeMap<String, serde_json::Value>,
    pub audio_filter: Option<AudioFilterConfig>,
    pub subtitle_filter: Option<SubtitleFilterConfig>,
    pub default_flags: Option<DefaultFlagsConfig>,
}

/// Conditional rules, evaluated in order; the first matching rule wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConditionalConfig {
    pub rules: Vec<ConditionalRule>,
}

/// Audio channel layouts for synthesis and downmix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioLayout {
    #[serde(rename = "stereo")]
    Stereo,
    #[serde(rename = "5.1")]
    Surround51,
}

impl AudioLayout {
    pub fn channels(&self) -> i64 {
        match self {
            AudioLayout::Stereo => 2,
            AudioLayout::Surround51 => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioLayout::Stereo => "stereo",
            AudioLayout::Surround51 => "5.1",
        }
    }
}

/// Synthesize an additional audio track in a target layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioSynthesisConfig {
    pub target_layout: AudioLayout,
    pub codec: String,
    pub bitrate: Option<String>,
    /// Skip synthesis when a track with the target layout already exists.
    pub only_if_missing: bool,
}

impl Default for AudioSynthesisConfig {
    fn default() -> Self {
        Self {
            target_layout: AudioLayout::Stereo,
            codec: "aac".to_string(),
            bitrate: Some("192k".to_string()),
            only_if_missing: true,
        }
    }
}

/// Skip conditions for conditional transcoding. Each unspecified
/// predicate passes; skipping requires all specified predicates to hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SkipCondition {
    /// Skip when the current codec alias-matches any of these.
    pub codec_matches: Vec<String>,
    /// Skip when the resolution fits within this preset.
    pub resolution_within: Option<String>,
    /// Skip when the current bitrate is under this threshold.
    pub bitrate_under: Option<String>,
}

impl SkipCondition {
    pub fn is_empty(&self) -> bool {
        self.codec_matches.is_empty()
            && self.resolution_within.is_none()
            && self.bitrate_under.is_none()
    }
}

/// Rate-control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMode {
    #[default]
    Crf,
    Bitrate,
    ConstrainedQuality,
}

/// Encoder quality settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualitySettings {
    pub mode: QualityMode,
    pub crf: Option<u32>,
    pub bitrate: Option<String>,
    pub min_bitrate: Option<String>,
    pub max_bitrate: Option<String>,
    pub preset: String,
    pub tune: Option<String>,
    /// Bitrate-targeted two-pass encoding (libx264/libx265 only).
    pub two_pass: bool,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            mode: QualityMode::Crf,
            crf: None,
            bitrate: None,
            min_bitrate: None,
            max_bitrate: None,
            preset: "medium".to_string(),
            tune: None,
            two_pass: false,
        }
    }
}

/// Hardware encoder selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareAccelMode {
    #[default]
    None,
    Nvenc,
    Vaapi,
    Qsv,
    Amf,
    Videotoolbox,
}

/// Hardware acceleration config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HardwareAccelConfig {
    pub enabled: HardwareAccelMode,
    /// Retry once with software encoding when the hardware encoder fails
    /// to initialize.
    pub fallback_to_cpu: bool,
}

impl Default for HardwareAccelConfig {
    fn default() -> Self {
        Self {
            enabled: HardwareAccelMode::None,
            fallback_to_cpu: true,
        }
    }
}

/// Video transcode policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranscodePolicyConfig {
    pub target_video_codec: Option<String>,
    /// Resolution cap: a preset name (`1080p`, `4k`, ...) or `WIDTHxHEIGHT`.
    pub max_resolution: Option<String>,
    pub target_crf: Option<u32>,
    pub target_bitrate: Option<String>,
    pub skip_if: Option<SkipCondition>,
    pub quality: Option<QualitySettings>,
    /// Scaling algorithm flag for the scale filter (e.g. `lanczos`).
    pub scale_algorithm: Option<String>,
    /// Extra arguments appended before the output path.
    pub extra_args: Vec<String>,
}

impl TranscodePolicyConfig {
    /// Maximum dimensions from `max_resolution`, or None when unset.
    pub fn max_dimensions(&self) -> Result<Option<(i64, i64)>> {
        match &self.max_resolution {
            Some(label) => resolution_preset(label).map(Some),
            None => Ok(None),
        }
    }
}

/// Audio transcode policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioTranscodeConfig {
    /// Codecs copied through untouched (alias-aware).
    pub preserve_codecs: Vec<String>,
    /// Target codec for tracks not preserved.
    pub transcode_to: Option<String>,
    /// Bitrate for transcoded tracks.
    pub bitrate: Option<String>,
    /// Add a downmixed companion track.
    pub downmix: Option<DownmixConfig>,
}

/// Downmix companion track derived from the first surviving stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownmixConfig {
    pub layout: AudioLayout,
    pub codec: Option<String>,
    pub bitrate: Option<String>,
}

impl Default for DownmixConfig {
    fn default() -> Self {
        Self {
            layout: AudioLayout::Stereo,
            codec: Some("aac".to_string()),
            bitrate: Some("192k".to_string()),
        }
    }
}

/// File timestamp handling after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampMode {
    #[default]
    Preserve,
    ReleaseDate,
    Now,
}

/// Fallback when release_date mode finds no date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFallback {
    #[default]
    Preserve,
    Now,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileTimestampConfig {
    pub mode: TimestampMode,
    pub fallback: TimestampFallback,
    /// Which plugin's dates to prefer: `auto` or a plugin name.
    pub date_source: String,
}

impl Default for FileTimestampConfig {
    fn default() -> Self {
        Self {
            mode: TimestampMode::Preserve,
            fallback: TimestampFallback::Preserve,
            date_source: "auto".to_string(),
        }
    }
}

/// Transcription operation config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranscriptionOpConfig {
    pub enabled: bool,
    pub confidence_threshold: Option<f64>,
}

impl Default for TranscriptionOpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: None,
        }
    }
}

/// Resolve a resolution preset (or explicit `WIDTHxHEIGHT`) to max
/// dimensions. Unknown labels are an input error.
pub fn resolution_preset(label: &str) -> Result<(i64, i64)> {
    let normalized = label.trim().to_ascii_lowercase();
    let dims = match normalized.as_str() {
        "480p" => (854, 480),
        "576p" => (1024, 576),
        "720p" => (1280, 720),
        "1080p" => (1920, 1080),
        "1440p" => (2560, 1440),
        "2160p" | "4k" => (3840, 2160),
        "4320p" | "8k" => (7680, 4320),
        other => {
            if let Some((w, h)) = other.split_once('x') {
                match (w.parse::<i64>(), h.parse::<i64>()) {
                    (Ok(w), Ok(h)) if w > 0 && h > 0 => return Ok((w, h)),
                    _ => {
                        return Err(Error::InvalidInput(format!(
                            "unknown resolution preset: {label:?}"
                        )))
                    }
                }
            }
            return Err(Error::InvalidInput(format!(
                "unknown resolution preset: {label:?}"
            )));
        }
    };
    Ok(dims)
}

/// Default CRF per target codec.
pub fn default_crf(codec: &str) -> u32 {
    match vpo_common::codecs::canonical_video_codec(codec).as_str() {
        "hevc" => 28,
        "vp9" => 31,
        "av1" => 30,
        _ => 23,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_operations_follow_canonical_order() {
        let phase = PhaseDefinition {
            name: "normalize".to_string(),
            transcode: Some(TranscodePolicyConfig::default()),
            audio_filter: Some(AudioFilterConfig::default()),
            container: Some(ContainerConfig {
                target: "mkv".to_string(),
            }),
            ..Default::default()
        };

        assert_eq!(
            phase.operations(),
            vec![
                OperationType::Container,
                OperationType::AudioFilter,
                OperationType::Transcode,
            ]
        );
    }

    #[test]
    fn resolution_presets_resolve() {
        assert_eq!(resolution_preset("1080p").unwrap(), (1920, 1080));
        assert_eq!(resolution_preset("4k").unwrap(), (3840, 2160));
        assert_eq!(resolution_preset("2160p").unwrap(), (3840, 2160));
        assert_eq!(resolution_preset("1920x800").unwrap(), (1920, 800));
        assert!(resolution_preset("cinema").is_err());
        assert!(resolution_preset("0x0").is_err());
    }

    #[test]
    fn default_crf_by_codec() {
        assert_eq!(default_crf("hevc"), 28);
        assert_eq!(default_crf("h265"), 28);
        assert_eq!(default_crf("h264"), 23);
        assert_eq!(default_crf("mystery"), 23);
    }

    #[test]
    fn policy_round_trips_through_json() {
        let schema = PolicySchema {
            version: 3,
            config: PolicyConfig {
                audio_language_preference: vec!["eng".to_string(), "jpn".to_string()],
                ..Default::default()
            },
            phases: vec![PhaseDefinition {
                name: "cleanup".to_string(),
                audio_filter: Some(AudioFilterConfig {
                    languages: vec!["eng".to_string()],
                    ..Default::default()
                }),
                ..Default::default()
            }],
        };

        let json = serde_json::to_string(&schema).unwrap();
        let back: PolicySchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, 3);
        assert_eq!(back.phases.len(), 1);
        assert_eq!(back.phases[0].name, "cleanup");
    }

    #[test]
    fn unknown_policy_keys_are_rejected() {
        let result: std::result::Result<PolicySchema, _> =
            serde_json::from_str(r#"{"version": 1, "confg": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn on_error_modes_deserialize_lowercase() {
        let config: PolicyConfig = serde_json::from_str(r#"{"on_error": "continue"}"#).unwrap();
        assert_eq!(config.on_error, OnErrorMode::Continue);
    }
}
