//! Policy evaluator: from introspected tracks plus a policy to a plan.
//!
//! Pure function territory. The evaluator never touches the filesystem,
//! the database or a clock; everything it needs arrives in
//! `EvaluationInput`. Identical inputs produce byte-identical plans.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde_json::{json, Value};
use tracing::debug;

use vpo_common::codecs::audio_codec_matches;
use vpo_common::lang::{language_matches, normalize_language};
use vpo_common::{TrackInfo, TrackType};

use crate::plan::{
    ActionType, ContainerChange, DispositionAction, Plan, PlannedAction, TrackDisposition,
};
use crate::types::{
    AudioFilterConfig, ConditionalConfig, ContainerConfig, DefaultFlagsConfig, PhaseDefinition,
    PolicyConfig, SubtitleDefaultMode, SubtitleFilterConfig, TrackOrderBucket, TrackOrderConfig,
    AttachmentFilterConfig,
};
use crate::PolicyError;

/// Language-analysis verdict for one track, keyed by track index in
/// `EvaluationInput::language_results`.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageVerdict {
    pub primary_language: String,
    pub primary_percentage: f64,
}

/// The slice of a policy one evaluation run needs: the phase's operation
/// configs plus the global preferences they consult.
#[derive(Debug, Clone, Default)]
pub struct EvaluationPolicy {
    pub policy_version: i64,
    pub container: Option<ContainerConfig>,
    pub audio_filter: Option<AudioFilterConfig>,
    pub subtitle_filter: Option<SubtitleFilterConfig>,
    pub attachment_filter: Option<AttachmentFilterConfig>,
    pub track_order: Option<TrackOrderConfig>,
    pub default_flags: Option<DefaultFlagsConfig>,
    pub conditional: Option<ConditionalConfig>,
    pub audio_language_preference: Vec<String>,
    pub subtitle_language_preference: Vec<String>,
    pub commentary_patterns: Vec<String>,
}

impl EvaluationPolicy {
    pub fn from_phase(phase: &PhaseDefinition, config: &PolicyConfig, version: i64) -> Self {
        Self {
            policy_version: version,
            container: phase.container.clone(),
            audio_filter: phase.audio_filter.clone(),
            subtitle_filter: phase.subtitle_filter.clone(),
            attachment_filter: phase.attachment_filter.clone(),
            track_order: phase.track_order.clone(),
            default_flags: phase.default_flags.clone(),
            conditional: phase.conditional.clone(),
            audio_language_preference: config.audio_language_preference.clone(),
            subtitle_language_preference: config.subtitle_language_preference.clone(),
            commentary_patterns: config.commentary_patterns.clone(),
        }
    }
}

/// Everything one evaluation run looks at.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub file_id: &'a str,
    pub file_path: &'a Path,
    /// Current container format (probe spelling is fine).
    pub container: &'a str,
    pub tracks: &'a [TrackInfo],
    /// Plugin enrichment, keyed by plugin name.
    pub plugin_metadata: Option<&'a Value>,
    /// Language-analysis verdicts keyed by track index.
    pub language_results: Option<&'a HashMap<i64, LanguageVerdict>>,
}

/// Evaluate a policy against a file's current state.
///
/// Returns `PolicyError` when applying the policy would violate a stated
/// floor (e.g. removing every audio track); the caller treats that as a
/// constraint skip, not a failure.
pub fn evaluate_policy(
    input: &EvaluationInput<'_>,
    policy: &EvaluationPolicy,
) -> Result<Plan, PolicyError> {
    // Conditional rules may swap in alternative configs for this file.
    let (audio_filter, subtitle_filter, default_flags) = resolve_conditional(policy, input);

    let dispositions = compute_dispositions(
        input,
        policy,
        audio_filter.as_ref(),
        subtitle_filter.as_ref(),
    );

    enforce_floors(input.tracks, &dispositions, audio_filter.as_ref(), subtitle_filter.as_ref())?;

    let kept: Vec<&TrackInfo> = input
        .tracks
        .iter()
        .filter(|t| disposition_for(&dispositions, t.index) == DispositionAction::Keep)
        .collect();

    let mut actions: Vec<PlannedAction> = Vec::new();

    if let Some(flags) = default_flags.as_ref() {
        actions.extend(default_flag_actions(&kept, flags, policy));
    }

    // Metadata normalization only applies alongside plan-based track
    // operations; a transcode-only phase leaves tags alone.
    if audio_filter.is_some() || subtitle_filter.is_some() || default_flags.is_some() {
        actions.extend(language_normalization_actions(&kept));
    }

    let mut requires_remux = false;

    if let Some(order) = policy.track_order.as_ref() {
        if let Some(action) = reorder_action(&kept, order, policy) {
            actions.push(action);
            requires_remux = true;
        }
    }

    let container_change = container_change_for(policy.container.as_ref(), input.container);
    if container_change.is_some() {
        requires_remux = true;
    }

    let tracks_removed = dispositions
        .iter()
        .filter(|d| d.action == DispositionAction::Remove)
        .count() as i64;
    if tracks_removed > 0 {
        requires_remux = true;
    }

    // Total order: clears < sets < metadata < reorder. Construction above
    // already interleaves per-track actions; the stable sort pins it.
    actions.sort_by_key(|a| a.action_type.rank());

    debug!(
        file = %input.file_path.display(),
        actions = actions.len(),
        removed = tracks_removed,
        "policy evaluation complete"
    );

    Ok(Plan {
        file_id: input.file_id.to_string(),
        file_path: input.file_path.to_path_buf(),
        policy_version: policy.policy_version,
        actions,
        tracks_kept: input.tracks.len() as i64 - tracks_removed,
        tracks_removed,
        track_dispositions: dispositions,
        requires_remux,
        container_change,
    })
}

fn resolve_conditional(
    policy: &EvaluationPolicy,
    input: &EvaluationInput<'_>,
) -> (
    Option<AudioFilterConfig>,
    Option<SubtitleFilterConfig>,
    Option<DefaultFlagsConfig>,
) {
    if let Some(conditional) = policy.conditional.as_ref() {
        for rule in &conditional.rules {
            let matches = rule
                .when
                .iter()
                .all(|(key, expected)| metadata_lookup(input.plugin_metadata, key) == Some(expected));
            if matches && !rule.when.is_empty() {
                debug!("conditional rule matched, overriding phase configs");
                return (
                    rule.audio_filter
                        .clone()
                        .or_else(|| policy.audio_filter.clone()),
                    rule.subtitle_filter
                        .clone()
                        .or_else(|| policy.subtitle_filter.clone()),
                    rule.default_flags
                        .clone()
                        .or_else(|| policy.default_flags.clone()),
                );
            }
        }
    }
    (
        policy.audio_filter.clone(),
        policy.subtitle_filter.clone(),
        policy.default_flags.clone(),
    )
}

/// Look up a dotted key (`radarr.original_language`) in the plugin
/// metadata object.
fn metadata_lookup<'a>(metadata: Option<&'a Value>, dotted_key: &str) -> Option<&'a Value> {
    let mut current = metadata?;
    for part in dotted_key.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn disposition_for(dispositions: &[TrackDisposition], index: i64) -> DispositionAction {
    dispositions
        .iter()
        .find(|d| d.track_index == index)
        .map(|d| d.action)
        .unwrap_or(DispositionAction::Keep)
}

fn make_disposition(track: &TrackInfo, action: DispositionAction, reason: String) -> TrackDisposition {
    let resolution = match (track.width, track.height) {
        (Some(w), Some(h)) => Some(format!("{w}x{h}")),
        _ => None,
    };
    TrackDisposition {
        track_index: track.index,
        track_type: track.track_type,
        codec: track.codec.clone(),
        language: track.language.clone(),
        title: track.title.clone(),
        channels: track.channels,
        resolution,
        action,
        reason,
    }
}

fn is_commentary(title: Option<&str>, patterns: &[String]) -> Option<String> {
    let title = title?.to_lowercase();
    patterns
        .iter()
        .find(|p| !p.is_empty() && title.contains(&p.to_lowercase()))
        .cloned()
}

fn is_font_attachment(track: &TrackInfo) -> bool {
    let by_codec = track
        .codec
        .as_deref()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            c.contains("ttf") || c.contains("otf") || c.contains("font")
        })
        .unwrap_or(false);
    let by_name = track
        .title
        .as_deref()
        .map(|t| {
            let t = t.to_ascii_lowercase();
            t.ends_with(".ttf") || t.ends_with(".otf")
        })
        .unwrap_or(false);
    by_codec || by_name
}

fn compute_dispositions(
    input: &EvaluationInput<'_>,
    policy: &EvaluationPolicy,
    audio_filter: Option<&AudioFilterConfig>,
    subtitle_filter: Option<&SubtitleFilterConfig>,
) -> Vec<TrackDisposition> {
    // A filter whose plugin-metadata conditions do not hold for this file
    // is inactive for the whole file.
    let audio_filter = audio_filter.filter(|f| {
        f.metadata_conditions.iter().all(|(key, expected)| {
            metadata_lookup(input.plugin_metadata, key) == Some(expected)
        })
    });

    input
        .tracks
        .iter()
        .map(|track| match track.track_type {
            TrackType::Video => {
                make_disposition(track, DispositionAction::Keep, "video track".to_string())
            }
            TrackType::Audio => audio_disposition(track, audio_filter, policy, input),
            TrackType::Subtitle => subtitle_disposition(track, subtitle_filter, policy),
            TrackType::Attachment => {
                attachment_disposition(track, policy.attachment_filter.as_ref())
            }
            TrackType::Other => make_disposition(
                track,
                DispositionAction::Keep,
                "unclassified track kept".to_string(),
            ),
        })
        .collect()
}

fn audio_disposition(
    track: &TrackInfo,
    filter: Option<&AudioFilterConfig>,
    policy: &EvaluationPolicy,
    input: &EvaluationInput<'_>,
) -> TrackDisposition {
    let Some(filter) = filter else {
        return make_disposition(track, DispositionAction::Keep, "no audio filter".to_string());
    };

    // Language: the analysis verdict outranks the container tag when the
    // policy asks for it and a verdict exists.
    if !filter.languages.is_empty() {
        let verdict_language = filter
            .use_language_analysis
            .then(|| {
                input
                    .language_results
                    .and_then(|m| m.get(&track.index))
                    .map(|v| v.primary_language.clone())
            })
            .flatten();
        let effective = verdict_language.or_else(|| track.language.clone());

        match effective {
            Some(lang) => {
                if !filter.languages.iter().any(|want| language_matches(want, &lang)) {
                    return make_disposition(
                        track,
                        DispositionAction::Remove,
                        format!("language {lang} not in preference"),
                    );
                }
            }
            None => {
                return make_disposition(
                    track,
                    DispositionAction::Remove,
                    "language untagged, not in preference".to_string(),
                );
            }
        }
    }

    if !filter.codecs.is_empty() {
        let codec = track.codec.as_deref().unwrap_or("");
        if !filter.codecs.iter().any(|want| audio_codec_matches(want, codec)) {
            return make_disposition(
                track,
                DispositionAction::Remove,
                format!("codec {codec} not in allow-list"),
            );
        }
    }

    if filter.remove_commentary {
        if let Some(pattern) = is_commentary(track.title.as_deref(), &policy.commentary_patterns) {
            return make_disposition(
                track,
                DispositionAction::Remove,
                format!("commentary title matched pattern {pattern:?}"),
            );
        }
    }

    if let Some(min) = filter.min_channels {
        if track.channels.map(|c| c < min).unwrap_or(false) {
            return make_disposition(
                track,
                DispositionAction::Remove,
                format!("{} channels below minimum {min}", track.channels.unwrap_or(0)),
            );
        }
    }
    if let Some(max) = filter.max_channels {
        if track.channels.map(|c| c > max).unwrap_or(false) {
            return make_disposition(
                track,
                DispositionAction::Remove,
                format!("{} channels above maximum {max}", track.channels.unwrap_or(0)),
            );
        }
    }

    let language = track.language.as_deref().unwrap_or("untagged");
    make_disposition(
        track,
        DispositionAction::Keep,
        format!("language {language} matches preference"),
    )
}

fn subtitle_disposition(
    track: &TrackInfo,
    filter: Option<&SubtitleFilterConfig>,
    policy: &EvaluationPolicy,
) -> TrackDisposition {
    let Some(filter) = filter else {
        return make_disposition(
            track,
            DispositionAction::Keep,
            "no subtitle filter".to_string(),
        );
    };

    // Forced subtitles carry dialog the viewer needs; always kept.
    if track.is_forced {
        return make_disposition(
            track,
            DispositionAction::Keep,
            "forced subtitle preserved".to_string(),
        );
    }

    if filter.remove_commentary {
        if let Some(pattern) = is_commentary(track.title.as_deref(), &policy.commentary_patterns) {
            return make_disposition(
                track,
                DispositionAction::Remove,
                format!("commentary title matched pattern {pattern:?}"),
            );
        }
    }

    if !filter.languages.is_empty() {
        match track.language.as_deref() {
            Some(lang) => {
                if !filter.languages.iter().any(|want| language_matches(want, lang)) {
                    return make_disposition(
                        track,
                        DispositionAction::Remove,
                        format!("language {lang} not in preference"),
                    );
                }
            }
            None => {
                return make_disposition(
                    track,
                    DispositionAction::Remove,
                    "language untagged, not in preference".to_string(),
                );
            }
        }
    }

    let language = track.language.as_deref().unwrap_or("untagged");
    make_disposition(
        track,
        DispositionAction::Keep,
        format!("language {language} matches preference"),
    )
}

fn attachment_disposition(
    track: &TrackInfo,
    filter: Option<&AttachmentFilterConfig>,
) -> TrackDisposition {
    let Some(filter) = filter else {
        return make_disposition(
            track,
            DispositionAction::Keep,
            "no attachment filter".to_string(),
        );
    };

    if filter.remove_all {
        if filter.keep_fonts && is_font_attachment(track) {
            return make_disposition(
                track,
                DispositionAction::Keep,
                "font attachment kept for subtitle rendering".to_string(),
            );
        }
        return make_disposition(
            track,
            DispositionAction::Remove,
            "attachment removal requested".to_string(),
        );
    }

    make_disposition(track, DispositionAction::Keep, "attachments kept".to_string())
}

fn enforce_floors(
    tracks: &[TrackInfo],
    dispositions: &[TrackDisposition],
    audio_filter: Option<&AudioFilterConfig>,
    subtitle_filter: Option<&SubtitleFilterConfig>,
) -> Result<(), PolicyError> {
    if let Some(filter) = audio_filter {
        check_floor(
            tracks,
            dispositions,
            TrackType::Audio,
            filter.minimum_tracks,
            "audio",
        )?;
    }
    if let Some(filter) = subtitle_filter {
        check_floor(
            tracks,
            dispositions,
            TrackType::Subtitle,
            filter.minimum_tracks,
            "subtitle",
        )?;
    }
    Ok(())
}

fn check_floor(
    tracks: &[TrackInfo],
    dispositions: &[TrackDisposition],
    kind: TrackType,
    minimum: i64,
    label: &str,
) -> Result<(), PolicyError> {
    if minimum <= 0 {
        return Ok(());
    }
    let input_count = tracks.iter().filter(|t| t.track_type == kind).count() as i64;
    if input_count < minimum {
        // The file never had enough tracks of this kind; the floor does
        // not bind.
        return Ok(());
    }
    let kept = dispositions
        .iter()
        .filter(|d| d.track_type == kind && d.action == DispositionAction::Keep)
        .count() as i64;
    if kept < minimum {
        return Err(PolicyError(format!(
            "constraint: would drop below {label} floor ({kept} < {minimum})"
        )));
    }
    Ok(())
}

fn language_rank(language: Option<&str>, preference: &[String]) -> usize {
    match language {
        Some(lang) => preference
            .iter()
            .position(|p| language_matches(p, lang))
            .unwrap_or(usize::MAX),
        None => usize::MAX,
    }
}

/// First kept audio track of the most preferred language present (falls
/// back to the first kept audio track).
fn main_audio_index(kept: &[&TrackInfo], preference: &[String]) -> Option<i64> {
    let audio: Vec<&&TrackInfo> = kept
        .iter()
        .filter(|t| t.track_type == TrackType::Audio)
        .collect();
    if audio.is_empty() {
        return None;
    }
    for pref in preference {
        if let Some(track) = audio.iter().find(|t| {
            t.language
                .as_deref()
                .map(|l| language_matches(pref, l))
                .unwrap_or(false)
        }) {
            return Some(track.index);
        }
    }
    Some(audio[0].index)
}

fn default_flag_actions(
    kept: &[&TrackInfo],
    flags: &DefaultFlagsConfig,
    policy: &EvaluationPolicy,
) -> Vec<PlannedAction> {
    let mut desired: BTreeSet<i64> = BTreeSet::new();
    let mut governed: BTreeSet<i64> = BTreeSet::new();

    if flags.set_video {
        let videos: Vec<&&TrackInfo> = kept
            .iter()
            .filter(|t| t.track_type == TrackType::Video)
            .collect();
        for t in &videos {
            governed.insert(t.index);
        }
        if let Some(first) = videos.first() {
            desired.insert(first.index);
        }
    }

    if flags.set_audio {
        for t in kept.iter().filter(|t| t.track_type == TrackType::Audio) {
            governed.insert(t.index);
        }
        if let Some(main) = main_audio_index(kept, &policy.audio_language_preference) {
            desired.insert(main);
        }
    }

    if flags.subtitle_mode != SubtitleDefaultMode::None {
        let subtitles: Vec<&&TrackInfo> = kept
            .iter()
            .filter(|t| t.track_type == TrackType::Subtitle)
            .collect();
        for t in &subtitles {
            governed.insert(t.index);
        }
        let chosen = match flags.subtitle_mode {
            SubtitleDefaultMode::ForcedOnly => subtitles.iter().find(|t| t.is_forced),
            SubtitleDefaultMode::FirstPreferred => subtitles
                .iter()
                .filter(|t| {
                    language_rank(t.language.as_deref(), &policy.subtitle_language_preference)
                        != usize::MAX
                })
                .min_by_key(|t| {
                    language_rank(t.language.as_deref(), &policy.subtitle_language_preference)
                }),
            SubtitleDefaultMode::None => None,
        };
        if let Some(t) = chosen {
            desired.insert(t.index);
        }
    }

    let mut actions = Vec::new();
    for track in kept {
        if !governed.contains(&track.index) {
            continue;
        }
        let want_default = desired.contains(&track.index);
        if track.is_default && !want_default {
            actions.push(PlannedAction {
                action_type: ActionType::ClearDefault,
                track_index: Some(track.index),
                track_id: track.id,
                current_value: json!(true),
                desired_value: json!(false),
            });
        } else if !track.is_default && want_default {
            actions.push(PlannedAction {
                action_type: ActionType::SetDefault,
                track_index: Some(track.index),
                track_id: track.id,
                current_value: json!(false),
                desired_value: json!(true),
            });
        }
    }
    actions
}

fn language_normalization_actions(kept: &[&TrackInfo]) -> Vec<PlannedAction> {
    kept.iter()
        .filter_map(|track| {
            let lang = track.language.as_deref()?;
            let canonical = normalize_language(lang);
            if canonical != lang {
                Some(PlannedAction {
                    action_type: ActionType::SetLanguage,
                    track_index: Some(track.index),
                    track_id: track.id,
                    current_value: json!(lang),
                    desired_value: json!(canonical),
                })
            } else {
                None
            }
        })
        .collect()
}

fn reorder_action(
    kept: &[&TrackInfo],
    order: &TrackOrderConfig,
    policy: &EvaluationPolicy,
) -> Option<PlannedAction> {
    let current: Vec<i64> = kept.iter().map(|t| t.index).collect();
    let main_audio = main_audio_index(kept, &policy.audio_language_preference);

    let mut placed: BTreeSet<i64> = BTreeSet::new();
    let mut desired: Vec<i64> = Vec::new();

    for bucket in &order.order {
        let mut members: Vec<&&TrackInfo> = kept
            .iter()
            .filter(|t| !placed.contains(&t.index) && in_bucket(t, *bucket, main_audio))
            .collect();
        // Stable within a bucket: language preference first, then input
        // position.
        let preference = match members.first().map(|t| t.track_type) {
            Some(TrackType::Subtitle) => &policy.subtitle_language_preference,
            _ => &policy.audio_language_preference,
        };
        members.sort_by_key(|t| {
            (
                language_rank(t.language.as_deref(), preference),
                current.iter().position(|i| *i == t.index),
            )
        });
        for t in members {
            placed.insert(t.index);
            desired.push(t.index);
        }
    }

    // Anything the buckets did not cover trails in input order.
    for t in kept {
        if !placed.contains(&t.index) {
            desired.push(t.index);
        }
    }

    if desired == current {
        return None;
    }

    Some(PlannedAction {
        action_type: ActionType::Reorder,
        track_index: None,
        track_id: None,
        current_value: json!(current),
        desired_value: json!(desired),
    })
}

fn in_bucket(track: &TrackInfo, bucket: TrackOrderBucket, main_audio: Option<i64>) -> bool {
    match bucket {
        TrackOrderBucket::Video => track.track_type == TrackType::Video,
        TrackOrderBucket::AudioMain => {
            track.track_type == TrackType::Audio && Some(track.index) == main_audio
        }
        TrackOrderBucket::AudioAlternate => {
            track.track_type == TrackType::Audio && Some(track.index) != main_audio
        }
        TrackOrderBucket::Audio => track.track_type == TrackType::Audio,
        TrackOrderBucket::Subtitle => track.track_type == TrackType::Subtitle,
        TrackOrderBucket::Attachment => track.track_type == TrackType::Attachment,
        TrackOrderBucket::Other => track.track_type == TrackType::Other,
    }
}

/// Normalize a container spelling to its canonical family name.
pub fn normalize_container(container: &str) -> String {
    let c = container.trim().to_ascii_lowercase();
    if c.contains("matroska") || c == "mkv" || c == "webm" {
        "matroska".to_string()
    } else if c.contains("mp4") || c == "m4v" || c.contains("mov") {
        "mp4".to_string()
    } else {
        c
    }
}

fn container_change_for(
    config: Option<&ContainerConfig>,
    current: &str,
) -> Option<ContainerChange> {
    let config = config?;
    let source = normalize_container(current);
    let target = normalize_container(&config.target);
    if source == target {
        return None;
    }
    Some(ContainerChange {
        source_format: source,
        target_format: target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PolicySchema;
    use std::path::PathBuf;

    fn video(index: i64) -> TrackInfo {
        let mut t = TrackInfo::new(index, TrackType::Video);
        t.codec = Some("hevc".to_string());
        t.width = Some(1920);
        t.height = Some(1080);
        t
    }

    fn audio(index: i64, lang: &str) -> TrackInfo {
        let mut t = TrackInfo::new(index, TrackType::Audio);
        t.codec = Some("aac".to_string());
        t.language = Some(lang.to_string());
        t.channels = Some(6);
        t
    }

    fn subtitle(index: i64, lang: &str, forced: bool) -> TrackInfo {
        let mut t = TrackInfo::new(index, TrackType::Subtitle);
        t.codec = Some("subrip".to_string());
        t.language = Some(lang.to_string());
        t.is_forced = forced;
        t
    }

    fn input<'a>(tracks: &'a [TrackInfo], path: &'a Path) -> EvaluationInput<'a> {
        EvaluationInput {
            file_id: "1",
            file_path: path,
            container: "matroska",
            tracks,
            plugin_metadata: None,
            language_results: None,
        }
    }

    fn policy_with(
        audio_filter: Option<AudioFilterConfig>,
        default_flags: Option<DefaultFlagsConfig>,
        track_order: Option<TrackOrderConfig>,
    ) -> EvaluationPolicy {
        EvaluationPolicy {
            policy_version: 3,
            audio_filter,
            default_flags,
            track_order,
            audio_language_preference: vec![
                "eng".to_string(),
                "jpn".to_string(),
                "fra".to_string(),
            ],
            commentary_patterns: vec!["commentary".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn language_filter_keeps_preferred_audio() {
        let tracks = vec![video(0), audio(1, "eng"), audio(2, "ger"), audio(3, "jpn")];
        let path = PathBuf::from("/m/a.mkv");
        let policy = policy_with(
            Some(AudioFilterConfig {
                languages: vec!["eng".to_string(), "jpn".to_string()],
                ..Default::default()
            }),
            None,
            None,
        );

        let plan = evaluate_policy(&input(&tracks, &path), &policy).unwrap();

        assert_eq!(plan.tracks_removed, 1);
        assert_eq!(plan.tracks_kept, 3);
        assert!(plan.requires_remux);
        assert_eq!(plan.removed_indices(), vec![2]);
        let removed = &plan.track_dispositions[2];
        assert!(removed.reason.contains("deu") || removed.reason.contains("ger"));
    }

    #[test]
    fn floor_violation_is_a_constraint_not_a_plan() {
        // Only non-English audio; keeping English-only would drop to zero.
        let tracks = vec![video(0), audio(1, "ger"), audio(2, "fra")];
        let path = PathBuf::from("/m/a.mkv");
        let policy = policy_with(
            Some(AudioFilterConfig {
                languages: vec!["eng".to_string()],
                ..Default::default()
            }),
            None,
            None,
        );

        let err = evaluate_policy(&input(&tracks, &path), &policy).unwrap_err();
        assert!(err.0.contains("constraint"));
        assert!(err.0.contains("audio floor"));
    }

    #[test]
    fn floor_does_not_bind_without_enough_input_tracks() {
        // No audio at all: the floor of one cannot apply.
        let tracks = vec![video(0)];
        let path = PathBuf::from("/m/a.mkv");
        let policy = policy_with(
            Some(AudioFilterConfig {
                languages: vec!["eng".to_string()],
                ..Default::default()
            }),
            None,
            None,
        );

        let plan = evaluate_policy(&input(&tracks, &path), &policy).unwrap();
        assert_eq!(plan.tracks_removed, 0);
    }

    #[test]
    fn forced_subtitles_survive_filters() {
        let tracks = vec![
            video(0),
            audio(1, "eng"),
            subtitle(2, "ger", true),
            subtitle(3, "ger", false),
        ];
        let path = PathBuf::from("/m/a.mkv");
        let mut policy = policy_with(None, None, None);
        policy.subtitle_filter = Some(SubtitleFilterConfig {
            languages: vec!["eng".to_string()],
            ..Default::default()
        });

        let plan = evaluate_policy(&input(&tracks, &path), &policy).unwrap();
        assert_eq!(plan.removed_indices(), vec![3]);
        assert_eq!(
            plan.track_dispositions[2].reason,
            "forced subtitle preserved"
        );
    }

    #[test]
    fn multi_audio_reorder_and_default() {
        // Three audio tracks [jpn, eng, fra]; preference [eng, jpn, fra]:
        // eng becomes default, order becomes video, eng, jpn, fra.
        let mut jpn = audio(1, "jpn");
        jpn.is_default = true;
        let tracks = vec![video(0), jpn, audio(2, "eng"), audio(3, "fra")];
        let path = PathBuf::from("/m/a.mkv");
        let policy = policy_with(
            None,
            Some(DefaultFlagsConfig::default()),
            Some(TrackOrderConfig {
                order: vec![
                    TrackOrderBucket::Video,
                    TrackOrderBucket::AudioMain,
                    TrackOrderBucket::AudioAlternate,
                ],
            }),
        );

        let plan = evaluate_policy(&input(&tracks, &path), &policy).unwrap();

        let clear: Vec<_> = plan
            .actions
            .iter()
            .filter(|a| a.action_type == ActionType::ClearDefault)
            .collect();
        let set: Vec<_> = plan
            .actions
            .iter()
            .filter(|a| a.action_type == ActionType::SetDefault)
            .collect();
        assert_eq!(clear.len(), 1);
        assert_eq!(clear[0].track_index, Some(1));
        assert_eq!(set.len(), 2); // video 0 and audio 2
        assert!(set.iter().any(|a| a.track_index == Some(2)));

        assert_eq!(plan.desired_track_order().unwrap(), vec![0, 2, 1, 3]);
        assert!(plan.requires_remux);

        // Clears come before sets, reorder comes last.
        let ranks: Vec<u8> = plan.actions.iter().map(|a| a.action_type.rank()).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn already_conformant_file_yields_empty_plan() {
        let mut v = video(0);
        v.is_default = true;
        let mut a = audio(1, "eng");
        a.is_default = true;
        let tracks = vec![v, a];
        let path = PathBuf::from("/m/a.mkv");
        let policy = policy_with(
            Some(AudioFilterConfig::default()),
            Some(DefaultFlagsConfig::default()),
            Some(TrackOrderConfig {
                order: vec![TrackOrderBucket::Video, TrackOrderBucket::Audio],
            }),
        );

        let plan = evaluate_policy(&input(&tracks, &path), &policy).unwrap();
        assert!(plan.actions.is_empty());
        assert_eq!(plan.tracks_removed, 0);
        assert!(!plan.requires_remux);
        assert_eq!(plan.change_count(), 0);
    }

    #[test]
    fn language_tags_normalize_to_canonical_form() {
        let tracks = vec![video(0), audio(1, "fre")];
        let path = PathBuf::from("/m/a.mkv");
        let policy = policy_with(Some(AudioFilterConfig::default()), None, None);

        let plan = evaluate_policy(&input(&tracks, &path), &policy).unwrap();
        let set_lang: Vec<_> = plan
            .actions
            .iter()
            .filter(|a| a.action_type == ActionType::SetLanguage)
            .collect();
        assert_eq!(set_lang.len(), 1);
        assert_eq!(set_lang[0].desired_value, json!("fra"));
    }

    #[test]
    fn unknown_language_tag_left_unchanged() {
        let tracks = vec![video(0), audio(1, "tlh")];
        let path = PathBuf::from("/m/a.mkv");
        let policy = policy_with(Some(AudioFilterConfig::default()), None, None);

        let plan = evaluate_policy(&input(&tracks, &path), &policy).unwrap();
        assert!(plan
            .actions
            .iter()
            .all(|a| a.action_type != ActionType::SetLanguage));
    }

    #[test]
    fn container_change_sets_remux_flag() {
        let tracks = vec![video(0), audio(1, "eng")];
        let path = PathBuf::from("/m/a.mkv");
        let mut policy = policy_with(None, None, None);
        policy.container = Some(ContainerConfig {
            target: "mp4".to_string(),
        });

        let plan = evaluate_policy(&input(&tracks, &path), &policy).unwrap();
        let change = plan.container_change.unwrap();
        assert_eq!(change.source_format, "matroska");
        assert_eq!(change.target_format, "mp4");
        assert!(plan.requires_remux);
    }

    #[test]
    fn container_aliases_do_not_trigger_conversion() {
        let tracks = vec![video(0)];
        let path = PathBuf::from("/m/a.mkv");
        let mut policy = policy_with(None, None, None);
        policy.container = Some(ContainerConfig {
            target: "mkv".to_string(),
        });

        let mut eval_input = input(&tracks, &path);
        eval_input.container = "matroska,webm";
        let plan = evaluate_policy(&eval_input, &policy).unwrap();
        assert!(plan.container_change.is_none());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let tracks = vec![video(0), audio(1, "jpn"), audio(2, "eng"), subtitle(3, "eng", false)];
        let path = PathBuf::from("/m/a.mkv");
        let policy = policy_with(
            Some(AudioFilterConfig {
                languages: vec!["eng".to_string()],
                minimum_tracks: 1,
                ..Default::default()
            }),
            Some(DefaultFlagsConfig::default()),
            Some(TrackOrderConfig {
                order: vec![TrackOrderBucket::Video, TrackOrderBucket::Audio, TrackOrderBucket::Subtitle],
            }),
        );

        let a = evaluate_policy(&input(&tracks, &path), &policy).unwrap();
        let b = evaluate_policy(&input(&tracks, &path), &policy).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn conditional_rule_overrides_audio_filter() {
        let tracks = vec![video(0), audio(1, "eng"), audio(2, "jpn")];
        let path = PathBuf::from("/m/a.mkv");
        let metadata = json!({"radarr": {"original_language": "jpn"}});

        let mut policy = policy_with(
            Some(AudioFilterConfig {
                languages: vec!["eng".to_string()],
                ..Default::default()
            }),
            None,
            None,
        );
        policy.conditional = Some(ConditionalConfig {
            rules: vec![crate::types::ConditionalRule {
                when: [(
                    "radarr.original_language".to_string(),
                    json!("jpn"),
                )]
                .into_iter()
                .collect(),
                audio_filter: Some(AudioFilterConfig {
                    languages: vec!["jpn".to_string(), "eng".to_string()],
                    ..Default::default()
                }),
                ..Default::default()
            }],
        });

        let mut eval_input = input(&tracks, &path);
        eval_input.plugin_metadata = Some(&metadata);
        let plan = evaluate_policy(&eval_input, &policy).unwrap();
        assert_eq!(plan.tracks_removed, 0);

        // Without the metadata the base filter applies and jpn is removed.
        let plan = evaluate_policy(&input(&tracks, &path), &policy).unwrap();
        assert_eq!(plan.removed_indices(), vec![2]);
    }

    #[test]
    fn language_analysis_verdict_outranks_tag() {
        // Track tagged eng but the analysis says it is actually jpn.
        let tracks = vec![video(0), audio(1, "eng"), audio(2, "eng")];
        let path = PathBuf::from("/m/a.mkv");
        let verdicts: HashMap<i64, LanguageVerdict> = [(
            2,
            LanguageVerdict {
                primary_language: "jpn".to_string(),
                primary_percentage: 0.95,
            },
        )]
        .into_iter()
        .collect();

        let policy = policy_with(
            Some(AudioFilterConfig {
                languages: vec!["eng".to_string()],
                use_language_analysis: true,
                ..Default::default()
            }),
            None,
            None,
        );

        let mut eval_input = input(&tracks, &path);
        eval_input.language_results = Some(&verdicts);
        let plan = evaluate_policy(&eval_input, &policy).unwrap();
        assert_eq!(plan.removed_indices(), vec![2]);
    }

    #[test]
    fn evaluation_policy_builds_from_phase() {
        let schema = PolicySchema {
            version: 2,
            config: PolicyConfig {
                audio_language_preference: vec!["eng".to_string()],
                ..Default::default()
            },
            phases: vec![PhaseDefinition {
                name: "cleanup".to_string(),
                audio_filter: Some(AudioFilterConfig::default()),
                ..Default::default()
            }],
        };

        let eval = EvaluationPolicy::from_phase(&schema.phases[0], &schema.config, schema.version);
        assert_eq!(eval.policy_version, 2);
        assert!(eval.audio_filter.is_some());
        assert_eq!(eval.audio_language_preference, vec!["eng".to_string()]);
    }
}
