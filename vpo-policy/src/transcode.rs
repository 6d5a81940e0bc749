//! Transcode planning: skip conditions, scaling decisions and the
//! per-track audio plan.

use serde::{Deserialize, Serialize};

use vpo_common::codecs::{audio_codec_matches, canonical_audio_codec, parse_bitrate, video_codec_matches};
use vpo_common::{TrackInfo, TrackType};

use crate::types::{
    resolution_preset, AudioTranscodeConfig, SkipCondition, TranscodePolicyConfig,
};

/// Outcome of skip-condition evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipEvaluationResult {
    pub skip: bool,
    /// Names every condition that matched (on skip) or the first one that
    /// failed (on no-skip).
    pub reason: String,
}

impl SkipEvaluationResult {
    fn no_conditions() -> Self {
        Self {
            skip: false,
            reason: "no skip conditions configured".to_string(),
        }
    }
}

/// Evaluate skip conditions: logical AND over the three optional
/// predicates; an unspecified predicate passes.
pub fn evaluate_skip_condition(
    skip_if: Option<&SkipCondition>,
    video_codec: Option<&str>,
    video_width: Option<i64>,
    video_height: Option<i64>,
    video_bitrate: Option<u64>,
) -> SkipEvaluationResult {
    let Some(condition) = skip_if else {
        return SkipEvaluationResult::no_conditions();
    };
    if condition.is_empty() {
        return SkipEvaluationResult::no_conditions();
    }

    let mut matched: Vec<String> = Vec::new();

    if !condition.codec_matches.is_empty() {
        let codec = video_codec.unwrap_or("");
        if condition
            .codec_matches
            .iter()
            .any(|want| video_codec_matches(want, codec))
        {
            matched.push(format!(
                "codec {codec} matches [{}]",
                condition.codec_matches.join(", ")
            ));
        } else {
            return SkipEvaluationResult {
                skip: false,
                reason: format!(
                    "codec {codec} does not match [{}]",
                    condition.codec_matches.join(", ")
                ),
            };
        }
    }

    if let Some(preset) = &condition.resolution_within {
        match resolution_preset(preset) {
            Ok((max_w, max_h)) => match (video_width, video_height) {
                (Some(w), Some(h)) if w <= max_w && h <= max_h => {
                    matched.push(format!("resolution {w}x{h} within {preset}"));
                }
                (Some(w), Some(h)) => {
                    return SkipEvaluationResult {
                        skip: false,
                        reason: format!("resolution {w}x{h} exceeds {preset}"),
                    };
                }
                _ => {
                    return SkipEvaluationResult {
                        skip: false,
                        reason: "resolution unknown, cannot confirm skip".to_string(),
                    };
                }
            },
            Err(e) => {
                return SkipEvaluationResult {
                    skip: false,
                    reason: format!("invalid resolution_within: {e}"),
                };
            }
        }
    }

    if let Some(threshold) = &condition.bitrate_under {
        match parse_bitrate(threshold) {
            Ok(limit) => match video_bitrate {
                Some(rate) if rate < limit => {
                    matched.push(format!("bitrate {rate} under {threshold}"));
                }
                Some(rate) => {
                    return SkipEvaluationResult {
                        skip: false,
                        reason: format!("bitrate {rate} not under {threshold}"),
                    };
                }
                None => {
                    return SkipEvaluationResult {
                        skip: false,
                        reason: "bitrate unknown, cannot confirm skip".to_string(),
                    };
                }
            },
            Err(e) => {
                return SkipEvaluationResult {
                    skip: false,
                    reason: format!("invalid bitrate_under: {e}"),
                };
            }
        }
    }

    SkipEvaluationResult {
        skip: true,
        reason: matched.join("; "),
    }
}

/// Why video transcoding is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeReason {
    CodecMismatch {
        current_codec: String,
        target_codec: String,
    },
    ResolutionExceeded {
        current_width: i64,
        current_height: i64,
        max_label: String,
        target_width: i64,
        target_height: i64,
    },
}

/// Result of evaluating whether video transcoding is needed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranscodeDecision {
    pub needs_transcode: bool,
    pub needs_scale: bool,
    pub target_width: Option<i64>,
    pub target_height: Option<i64>,
    pub reasons: Vec<TranscodeReason>,
}

/// Determine if video transcoding is needed for codec or resolution
/// reasons. Scaling always implies transcoding.
pub fn should_transcode_video(
    policy: &TranscodePolicyConfig,
    current_codec: Option<&str>,
    current_width: Option<i64>,
    current_height: Option<i64>,
) -> TranscodeDecision {
    let mut decision = TranscodeDecision::default();

    if let Some(target) = &policy.target_video_codec {
        if let Some(codec) = current_codec {
            if !video_codec_matches(codec, target) {
                decision.needs_transcode = true;
                decision.reasons.push(TranscodeReason::CodecMismatch {
                    current_codec: codec.to_string(),
                    target_codec: target.to_string(),
                });
            }
        }
    }

    if let Ok(Some((max_w, max_h))) = policy.max_dimensions() {
        if let (Some(w), Some(h)) = (current_width, current_height) {
            if w > max_w || h > max_h {
                decision.needs_scale = true;

                // Scale preserving aspect ratio, then force even
                // dimensions (required by most encoders).
                let width_ratio = max_w as f64 / w as f64;
                let height_ratio = max_h as f64 / h as f64;
                let scale = width_ratio.min(height_ratio);

                let mut target_w = (w as f64 * scale) as i64;
                let mut target_h = (h as f64 * scale) as i64;
                target_w -= target_w % 2;
                target_h -= target_h % 2;

                decision.target_width = Some(target_w);
                decision.target_height = Some(target_h);
                decision.reasons.push(TranscodeReason::ResolutionExceeded {
                    current_width: w,
                    current_height: h,
                    max_label: policy
                        .max_resolution
                        .clone()
                        .unwrap_or_else(|| format!("{max_w}x{max_h}")),
                    target_width: target_w,
                    target_height: target_h,
                });
            }
        }
    }

    if decision.needs_scale {
        decision.needs_transcode = true;
    }

    decision
}

/// Per-track audio handling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioAction {
    Copy,
    Transcode,
    Remove,
}

/// One audio track's plan entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrackPlan {
    /// Input track index within the file.
    pub track_index: i64,
    /// Audio-relative stream index (`0:a:N`).
    pub stream_index: i64,
    pub codec: Option<String>,
    pub language: Option<String>,
    pub channels: Option<i64>,
    pub action: AudioAction,
    pub target_codec: Option<String>,
    pub target_bitrate: Option<String>,
    /// Target layout for the downmix virtual track.
    pub channel_layout: Option<String>,
    pub reason: String,
}

/// Complete audio plan for a transcode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioPlan {
    pub tracks: Vec<AudioTrackPlan>,
    /// At most one synthesized downmix stream.
    pub downmix_track: Option<AudioTrackPlan>,
}

impl AudioPlan {
    /// True when any track is transcoded, removed or synthesized.
    pub fn has_changes(&self) -> bool {
        self.downmix_track.is_some()
            || self
                .tracks
                .iter()
                .any(|t| t.action != AudioAction::Copy)
    }

    pub fn removed_count(&self) -> i64 {
        self.tracks
            .iter()
            .filter(|t| t.action == AudioAction::Remove)
            .count() as i64
    }

    pub fn transcoded_count(&self) -> i64 {
        self.tracks
            .iter()
            .filter(|t| t.action == AudioAction::Transcode)
            .count() as i64
    }
}

/// Build the audio plan for a set of audio tracks.
///
/// `removed_indices` carries filter decisions made by the evaluator, so
/// the command builder can emit the exclusion map.
pub fn create_audio_plan(
    audio_tracks: &[TrackInfo],
    config: &AudioTranscodeConfig,
    removed_indices: &[i64],
) -> AudioPlan {
    let mut tracks = Vec::new();

    for (stream_index, track) in audio_tracks
        .iter()
        .filter(|t| t.track_type == TrackType::Audio)
        .enumerate()
    {
        let codec = track.codec.as_deref().unwrap_or("");

        let (action, target_codec, target_bitrate, reason) = if removed_indices
            .contains(&track.index)
        {
            (
                AudioAction::Remove,
                None,
                None,
                "removed by track filter".to_string(),
            )
        } else if config
            .preserve_codecs
            .iter()
            .any(|keep| audio_codec_matches(keep, codec))
        {
            (
                AudioAction::Copy,
                None,
                None,
                format!("codec {} in preserve list", canonical_audio_codec(codec)),
            )
        } else if let Some(target) = config
            .transcode_to
            .as_deref()
            .filter(|target| !audio_codec_matches(target, codec))
        {
            (
                AudioAction::Transcode,
                Some(target.to_string()),
                config.bitrate.clone(),
                format!("codec {codec} differs from target {target}"),
            )
        } else {
            (
                AudioAction::Copy,
                None,
                None,
                "no codec change required".to_string(),
            )
        };

        tracks.push(AudioTrackPlan {
            track_index: track.index,
            stream_index: stream_index as i64,
            codec: track.codec.clone(),
            language: track.language.clone(),
            channels: track.channels,
            action,
            target_codec,
            target_bitrate,
            channel_layout: None,
            reason,
        });
    }

    let downmix_track = config.downmix.as_ref().and_then(|downmix| {
        let target_channels = downmix.layout.channels();

        // Skip when a surviving track already has the target layout.
        let already_present = tracks.iter().any(|t| {
            t.action != AudioAction::Remove && t.channels == Some(target_channels)
        });
        if already_present {
            return None;
        }

        // Derive from the first surviving stream with more channels than
        // the target.
        let source = tracks
            .iter()
            .find(|t| {
                t.action != AudioAction::Remove
                    && t.channels.map(|c| c > target_channels).unwrap_or(false)
            })?;

        Some(AudioTrackPlan {
            track_index: source.track_index,
            stream_index: source.stream_index,
            codec: source.codec.clone(),
            language: source.language.clone(),
            channels: Some(target_channels),
            action: AudioAction::Transcode,
            target_codec: downmix.codec.clone(),
            target_bitrate: downmix.bitrate.clone(),
            channel_layout: Some(downmix.layout.as_str().to_string()),
            reason: format!(
                "downmix to {} from {} channels",
                downmix.layout.as_str(),
                source.channels.unwrap_or(0)
            ),
        })
    });

    AudioPlan {
        tracks,
        downmix_track,
    }
}

/// Human-readable lines describing an audio plan (dry-run output).
pub fn describe_audio_plan(plan: &AudioPlan) -> Vec<String> {
    let mut lines: Vec<String> = plan
        .tracks
        .iter()
        .map(|t| {
            format!(
                "audio #{} ({}, {}): {:?} - {}",
                t.stream_index,
                t.codec.as_deref().unwrap_or("unknown"),
                t.language.as_deref().unwrap_or("und"),
                t.action,
                t.reason
            )
        })
        .collect();
    if let Some(downmix) = &plan.downmix_track {
        lines.push(format!(
            "audio new ({}): downmix - {}",
            downmix.channel_layout.as_deref().unwrap_or("stereo"),
            downmix.reason
        ));
    }
    lines
}

/// Downmix pan filter preserving dialog placement.
///
/// Stereo uses Dolby Pro Logic II matrix encoding; 5.1 folds back
/// surrounds symmetrically (the usual 7.1 source case).
pub fn downmix_filter(downmix: &AudioTrackPlan) -> Option<String> {
    let source = downmix.stream_index;
    match downmix.channel_layout.as_deref() {
        Some("stereo") => Some(format!(
            "[0:a:{source}]aresample=matrix_encoding=dplii,\
             pan=stereo|FL=FC+0.30*FL+0.30*BL|FR=FC+0.30*FR+0.30*BR[downmix]"
        )),
        Some("5.1") => Some(format!(
            "[0:a:{source}]pan=5.1|FL=FL|FR=FR|FC=FC|LFE=LFE|\
             BL=0.5*BL+0.5*SL|BR=0.5*BR+0.5*SR[downmix]"
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DownmixConfig;

    fn skip_all() -> SkipCondition {
        SkipCondition {
            codec_matches: vec!["hevc".to_string(), "h265".to_string()],
            resolution_within: Some("1080p".to_string()),
            bitrate_under: Some("15M".to_string()),
        }
    }

    fn audio_track(index: i64, codec: &str, channels: i64) -> TrackInfo {
        let mut t = TrackInfo::new(index, TrackType::Audio);
        t.codec = Some(codec.to_string());
        t.language = Some("eng".to_string());
        t.channels = Some(channels);
        t
    }

    #[test]
    fn compliant_file_skips_with_full_reason() {
        let result = evaluate_skip_condition(
            Some(&skip_all()),
            Some("hevc"),
            Some(1920),
            Some(1080),
            Some(8_000_000),
        );
        assert!(result.skip);
        assert!(result.reason.contains("codec hevc matches"));
        assert!(result.reason.contains("resolution 1920x1080 within 1080p"));
        assert!(result.reason.contains("bitrate 8000000 under 15M"));
    }

    #[test]
    fn codec_alias_satisfies_skip() {
        let result = evaluate_skip_condition(
            Some(&skip_all()),
            Some("x265"),
            Some(1280),
            Some(720),
            Some(4_000_000),
        );
        assert!(result.skip);
    }

    #[test]
    fn wrong_codec_fails_skip_with_reason() {
        let result = evaluate_skip_condition(
            Some(&skip_all()),
            Some("h264"),
            Some(1920),
            Some(1080),
            Some(8_000_000),
        );
        assert!(!result.skip);
        assert!(result.reason.contains("codec h264 does not match"));
    }

    #[test]
    fn oversized_resolution_fails_skip() {
        let result = evaluate_skip_condition(
            Some(&skip_all()),
            Some("hevc"),
            Some(3840),
            Some(2160),
            Some(8_000_000),
        );
        assert!(!result.skip);
        assert!(result.reason.contains("exceeds 1080p"));
    }

    #[test]
    fn high_bitrate_fails_skip() {
        let result = evaluate_skip_condition(
            Some(&skip_all()),
            Some("hevc"),
            Some(1920),
            Some(1080),
            Some(20_000_000),
        );
        assert!(!result.skip);
        assert!(result.reason.contains("not under 15M"));
    }

    #[test]
    fn unspecified_predicates_pass() {
        let condition = SkipCondition {
            codec_matches: vec!["hevc".to_string()],
            resolution_within: None,
            bitrate_under: None,
        };
        let result = evaluate_skip_condition(Some(&condition), Some("hevc"), None, None, None);
        assert!(result.skip);
    }

    #[test]
    fn no_conditions_means_no_skip() {
        let result = evaluate_skip_condition(None, Some("hevc"), None, None, None);
        assert!(!result.skip);
    }

    #[test]
    fn scaling_preserves_aspect_and_evenness() {
        let policy = TranscodePolicyConfig {
            target_video_codec: Some("hevc".to_string()),
            max_resolution: Some("1080p".to_string()),
            ..Default::default()
        };

        // 4K UHD -> exactly 1080p
        let decision = should_transcode_video(&policy, Some("h264"), Some(3840), Some(2160));
        assert!(decision.needs_transcode);
        assert!(decision.needs_scale);
        assert_eq!(decision.target_width, Some(1920));
        assert_eq!(decision.target_height, Some(1080));

        // Cinema-ratio source stays even after scaling
        let decision = should_transcode_video(&policy, Some("hevc"), Some(4096), Some(1716));
        assert!(decision.needs_scale);
        let w = decision.target_width.unwrap();
        let h = decision.target_height.unwrap();
        assert_eq!(w % 2, 0);
        assert_eq!(h % 2, 0);
        assert!(w <= 1920 && h <= 1080);
    }

    #[test]
    fn codec_match_means_no_transcode() {
        let policy = TranscodePolicyConfig {
            target_video_codec: Some("hevc".to_string()),
            ..Default::default()
        };
        let decision = should_transcode_video(&policy, Some("x265"), Some(1920), Some(1080));
        assert!(!decision.needs_transcode);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn audio_plan_preserves_listed_codecs() {
        let tracks = vec![audio_track(1, "eac3", 6), audio_track(2, "dts", 6)];
        let config = AudioTranscodeConfig {
            preserve_codecs: vec!["eac3".to_string()],
            transcode_to: Some("aac".to_string()),
            bitrate: Some("256k".to_string()),
            downmix: None,
        };

        let plan = create_audio_plan(&tracks, &config, &[]);
        assert_eq!(plan.tracks[0].action, AudioAction::Copy);
        assert!(plan.tracks[0].reason.contains("preserve list"));
        assert_eq!(plan.tracks[1].action, AudioAction::Transcode);
        assert_eq!(plan.tracks[1].target_codec.as_deref(), Some("aac"));
        assert!(plan.has_changes());
    }

    #[test]
    fn audio_plan_reflects_filter_removals() {
        let tracks = vec![audio_track(1, "aac", 2), audio_track(2, "aac", 2)];
        let config = AudioTranscodeConfig::default();

        let plan = create_audio_plan(&tracks, &config, &[2]);
        assert_eq!(plan.tracks[0].action, AudioAction::Copy);
        assert_eq!(plan.tracks[1].action, AudioAction::Remove);
        assert_eq!(plan.removed_count(), 1);
    }

    #[test]
    fn downmix_created_only_when_missing() {
        let config = AudioTranscodeConfig {
            downmix: Some(DownmixConfig::default()),
            ..Default::default()
        };

        // 5.1 source, no stereo: downmix appears.
        let surround_only = vec![audio_track(1, "eac3", 6)];
        let plan = create_audio_plan(&surround_only, &config, &[]);
        let downmix = plan.downmix_track.as_ref().unwrap();
        assert_eq!(downmix.channels, Some(2));
        assert_eq!(downmix.channel_layout.as_deref(), Some("stereo"));

        // Stereo already present: no downmix.
        let with_stereo = vec![audio_track(1, "eac3", 6), audio_track(2, "aac", 2)];
        let plan = create_audio_plan(&with_stereo, &config, &[]);
        assert!(plan.downmix_track.is_none());
    }

    #[test]
    fn downmix_filter_uses_source_stream_index() {
        let mut track = AudioTrackPlan {
            track_index: 3,
            stream_index: 1,
            codec: Some("truehd".to_string()),
            language: None,
            channels: Some(2),
            action: AudioAction::Transcode,
            target_codec: Some("aac".to_string()),
            target_bitrate: None,
            channel_layout: Some("stereo".to_string()),
            reason: String::new(),
        };
        let filter = downmix_filter(&track).unwrap();
        assert!(filter.starts_with("[0:a:1]"));
        assert!(filter.contains("dplii"));

        track.channel_layout = Some("5.1".to_string());
        let filter = downmix_filter(&track).unwrap();
        assert!(filter.contains("pan=5.1"));
        assert!(filter.contains("0.5*SL"));
    }

    #[test]
    fn copy_only_plan_reports_no_changes() {
        let tracks = vec![audio_track(1, "aac", 2)];
        let plan = create_audio_plan(&tracks, &AudioTranscodeConfig::default(), &[]);
        assert!(!plan.has_changes());
        assert_eq!(plan.transcoded_count(), 0);
    }
}
