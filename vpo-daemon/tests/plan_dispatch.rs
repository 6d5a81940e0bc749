//! Evaluation-to-dispatch flow: a policy evaluates into a plan, the plan
//! selects the right executor, and the executor builds the expected
//! arguments. Nothing here invokes a real external tool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use vpo_common::{TrackInfo, TrackType};
use vpo_daemon::tools::{
    select_executor, MkvmergeExecutor, ToolAvailability, KNOWN_TOOLS,
};
use vpo_policy::evaluator::{evaluate_policy, EvaluationInput, EvaluationPolicy};
use vpo_policy::plan::ActionType;
use vpo_policy::types::{
    AudioFilterConfig, DefaultFlagsConfig, TrackOrderBucket, TrackOrderConfig,
};

fn video(index: i64) -> TrackInfo {
    let mut t = TrackInfo::new(index, TrackType::Video);
    t.codec = Some("hevc".to_string());
    t.width = Some(1920);
    t.height = Some(1080);
    t
}

fn audio(index: i64, lang: &str, default: bool) -> TrackInfo {
    let mut t = TrackInfo::new(index, TrackType::Audio);
    t.codec = Some("aac".to_string());
    t.language = Some(lang.to_string());
    t.is_default = default;
    t
}

fn all_tools() -> ToolAvailability {
    ToolAvailability::from_entries(
        KNOWN_TOOLS.map(|t| (t.to_string(), PathBuf::from(format!("/usr/bin/{t}")))),
    )
}

#[test]
fn multi_audio_policy_reorders_and_remuxes_via_mkvmerge() {
    // Three audio tracks [jpn, eng, fra]; preference [eng, jpn, fra].
    let tracks = vec![
        video(0),
        audio(1, "jpn", true),
        audio(2, "eng", false),
        audio(3, "fra", false),
    ];
    let path = Path::new("/m/movie.mkv");

    let policy = EvaluationPolicy {
        policy_version: 3,
        default_flags: Some(DefaultFlagsConfig::default()),
        track_order: Some(TrackOrderConfig {
            order: vec![
                TrackOrderBucket::Video,
                TrackOrderBucket::AudioMain,
                TrackOrderBucket::AudioAlternate,
            ],
        }),
        audio_language_preference: vec!["eng".to_string(), "jpn".to_string(), "fra".to_string()],
        ..Default::default()
    };

    let verdicts = HashMap::new();
    let input = EvaluationInput {
        file_id: "1",
        file_path: path,
        container: "matroska",
        tracks: &tracks,
        plugin_metadata: None,
        language_results: Some(&verdicts),
    };
    let plan = evaluate_policy(&input, &policy).unwrap();

    // The English track becomes default, the Japanese default clears.
    assert!(plan.actions.iter().any(|a| {
        a.action_type == ActionType::SetDefault && a.track_index == Some(2)
    }));
    assert!(plan.actions.iter().any(|a| {
        a.action_type == ActionType::ClearDefault && a.track_index == Some(1)
    }));
    assert_eq!(plan.desired_track_order().unwrap(), vec![0, 2, 1, 3]);
    assert!(plan.requires_remux);

    // Remux on matroska dispatches to mkvmerge.
    let selected = select_executor(&plan, "matroska", &all_tools(), None).unwrap();
    assert_eq!(selected.name(), "mkvmerge");

    // And the built command carries the order and the flag edits.
    let args = MkvmergeExecutor::build_args(&plan, Path::new("/m/.vpo_temp_movie.mkv"));
    let joined = args.join(" ");
    assert!(joined.contains("--track-order 0:0,0:2,0:1,0:3"));
    assert!(joined.contains("--default-track-flag 2:1"));
    assert!(joined.contains("--default-track-flag 1:0"));
}

#[test]
fn metadata_only_policy_dispatches_to_mkvpropedit() {
    let mut default_video = video(0);
    default_video.is_default = true;
    let tracks = vec![default_video, audio(1, "eng", false)];
    let path = Path::new("/m/movie.mkv");

    let policy = EvaluationPolicy {
        policy_version: 3,
        audio_filter: Some(AudioFilterConfig::default()),
        default_flags: Some(DefaultFlagsConfig::default()),
        audio_language_preference: vec!["eng".to_string()],
        ..Default::default()
    };

    let input = EvaluationInput {
        file_id: "1",
        file_path: path,
        container: "matroska",
        tracks: &tracks,
        plugin_metadata: None,
        language_results: None,
    };
    let plan = evaluate_policy(&input, &policy).unwrap();

    assert_eq!(plan.tracks_removed, 0);
    assert!(!plan.requires_remux);
    assert_eq!(plan.actions.len(), 1); // set audio default

    let selected = select_executor(&plan, "matroska", &all_tools(), None).unwrap();
    assert_eq!(selected.name(), "mkvpropedit");
}
