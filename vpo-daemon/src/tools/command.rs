//! FFmpeg command construction for transcoding.
//!
//! Builds the full argv for single-pass and two-pass encodes: encoder
//! selection (software or hardware), rate control, scaling, HDR
//! preservation, per-track audio handling and explicit stream maps when
//! tracks are removed.

use std::path::PathBuf;

use tracing::{debug, warn};

use vpo_common::codecs::{canonical_video_codec, parse_bitrate};
use vpo_policy::transcode::{AudioAction, AudioPlan};
use vpo_policy::types::{
    default_crf, HardwareAccelConfig, HardwareAccelMode, QualityMode, QualitySettings,
};
use vpo_policy::video_analysis::hdr_preservation_args;

use super::transcode::TranscodePlan;

/// Hardware encoder suffixes, used to classify a chosen encoder.
const HARDWARE_ENCODER_SUFFIXES: [&str; 5] =
    ["_nvenc", "_vaapi", "_qsv", "_amf", "_videotoolbox"];

/// Known software encoders (library encoders and codec shorthands).
const SOFTWARE_ENCODERS: [&str; 11] = [
    "libx264",
    "libx265",
    "libvpx",
    "libvpx-vp9",
    "libaom-av1",
    "libsvtav1",
    "librav1e",
    "h264",
    "hevc",
    "vp9",
    "av1",
];

/// stderr patterns that indicate the hardware encoder failed to
/// initialize (and a software retry may succeed).
pub const HARDWARE_FALLBACK_PATTERNS: [&str; 9] = [
    "Failed to initialise VAAPI",
    "No device available",
    "Cannot load nvenc",
    "hwaccel initialisation returned error",
    "Failed to create VAAPI",
    "NVENC not available",
    "No VAAPI support",
    "Cannot open display",
    "Failed to open encoder",
];

/// Software encoder for a target codec.
pub fn software_encoder(codec: &str) -> &'static str {
    match canonical_video_codec(codec).as_str() {
        "hevc" => "libx265",
        "h264" => "libx264",
        "vp8" => "libvpx",
        "vp9" => "libvpx-vp9",
        "av1" => "libsvtav1",
        _ => "libx264",
    }
}

/// Encoder for a target codec under a hardware acceleration mode.
pub fn select_encoder(codec: &str, hardware: &HardwareAccelConfig) -> String {
    let canonical = canonical_video_codec(codec);
    let suffix = match hardware.enabled {
        HardwareAccelMode::None => return software_encoder(codec).to_string(),
        HardwareAccelMode::Nvenc => "nvenc",
        HardwareAccelMode::Vaapi => "vaapi",
        HardwareAccelMode::Qsv => "qsv",
        HardwareAccelMode::Amf => "amf",
        HardwareAccelMode::Videotoolbox => "videotoolbox",
    };
    match canonical.as_str() {
        "hevc" | "h264" | "av1" => format!("{canonical}_{suffix}"),
        // No hardware pipeline for this codec; use software.
        _ => software_encoder(codec).to_string(),
    }
}

/// Classify the video encoder in a built command.
pub fn detect_encoder_type(args: &[String]) -> &'static str {
    let codec_flags = ["-c:v", "-codec:v", "-vcodec"];
    for (i, arg) in args.iter().enumerate() {
        if codec_flags.contains(&arg.as_str()) {
            let Some(encoder) = args.get(i + 1) else {
                continue;
            };
            if encoder == "copy" {
                return "unknown";
            }
            if HARDWARE_ENCODER_SUFFIXES
                .iter()
                .any(|suffix| encoder.contains(suffix))
            {
                return "hardware";
            }
            if SOFTWARE_ENCODERS.contains(&encoder.as_str()) {
                return "software";
            }
        }
    }
    "unknown"
}

/// True when stderr matches a known hardware-encoder init failure.
pub fn detect_hw_encoder_error(stderr_text: &str) -> bool {
    let lowered = stderr_text.to_lowercase();
    HARDWARE_FALLBACK_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(&pattern.to_lowercase()))
}

/// Context for two-pass encoding: the shared pass-log prefix.
#[derive(Debug, Clone)]
pub struct TwoPassContext {
    pub passlogfile: PathBuf,
    pub current_pass: u8,
}

impl TwoPassContext {
    pub fn new(passlogfile: PathBuf) -> Self {
        Self {
            passlogfile,
            current_pass: 1,
        }
    }

    /// Remove pass log files after encoding (or on failure).
    ///
    /// x265 writes `<prefix>.log` and `.log.cutree`; x264 writes
    /// `<prefix>-0.log` and `-0.log.mbtree`.
    pub fn cleanup(&self) {
        for suffix in [".log", ".log.cutree", "-0.log", "-0.log.mbtree"] {
            let log_file = PathBuf::from(format!("{}{suffix}", self.passlogfile.display()));
            if log_file.exists() {
                match std::fs::remove_file(&log_file) {
                    Ok(()) => debug!("Cleaned up pass log file: {}", log_file.display()),
                    Err(e) => {
                        warn!("Could not clean up pass log file {}: {e}", log_file.display())
                    }
                }
            }
        }
    }
}

/// Two-pass is only wired for encoders with known pass-log semantics.
pub fn encoder_supports_two_pass(encoder: &str) -> bool {
    matches!(encoder, "libx264" | "libx265")
}

/// Quality-related arguments for the chosen encoder.
pub fn build_quality_args(
    quality: Option<&QualitySettings>,
    policy: &vpo_policy::types::TranscodePolicyConfig,
    codec: &str,
    encoder: &str,
    two_pass: Option<&TwoPassContext>,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    match quality {
        Some(quality) => {
            match quality.mode {
                QualityMode::Crf => {
                    let crf = quality.crf.unwrap_or_else(|| default_crf(codec));
                    args.push("-crf".to_string());
                    args.push(crf.to_string());
                }
                QualityMode::Bitrate => {
                    if let Some(bitrate) = &quality.bitrate {
                        args.push("-b:v".to_string());
                        args.push(bitrate.clone());
                    }
                    if quality.two_pass {
                        if let Some(ctx) = two_pass {
                            match encoder {
                                "libx264" => {
                                    args.push("-pass".to_string());
                                    args.push(ctx.current_pass.to_string());
                                    args.push("-passlogfile".to_string());
                                    args.push(ctx.passlogfile.to_string_lossy().into_owned());
                                }
                                "libx265" => {
                                    args.push("-x265-params".to_string());
                                    args.push(format!(
                                        "pass={}:stats={}",
                                        ctx.current_pass,
                                        ctx.passlogfile.display()
                                    ));
                                }
                                _ => {
                                    warn!(
                                        "Two-pass encoding requested for {encoder} but not \
                                         supported; using single pass"
                                    );
                                }
                            }
                        }
                    }
                }
                QualityMode::ConstrainedQuality => {
                    let crf = quality.crf.unwrap_or_else(|| default_crf(codec));
                    args.push("-crf".to_string());
                    args.push(crf.to_string());
                    if let Some(min) = &quality.min_bitrate {
                        args.push("-minrate".to_string());
                        args.push(min.clone());
                    }
                    if let Some(max) = &quality.max_bitrate {
                        args.push("-maxrate".to_string());
                        args.push(max.clone());
                        // VBV buffer at twice the ceiling.
                        if let Ok(rate) = parse_bitrate(max) {
                            args.push("-bufsize".to_string());
                            args.push(format!("{}k", rate * 2 / 1000));
                        }
                    }
                }
            }

            if matches!(encoder, "libx264" | "libx265") {
                args.push("-preset".to_string());
                args.push(quality.preset.clone());
            }
            if let Some(tune) = &quality.tune {
                args.push("-tune".to_string());
                args.push(tune.clone());
            }
        }
        None => {
            if let Some(crf) = policy.target_crf {
                args.push("-crf".to_string());
                args.push(crf.to_string());
            } else if let Some(bitrate) = &policy.target_bitrate {
                args.push("-b:v".to_string());
                args.push(bitrate.clone());
            } else {
                args.push("-crf".to_string());
                args.push(default_crf(codec).to_string());
            }

            if matches!(encoder, "libx264" | "libx265") {
                args.push("-preset".to_string());
                args.push("medium".to_string());
            }
        }
    }

    args
}

fn audio_encoder(codec: &str) -> &'static str {
    match vpo_common::codecs::canonical_audio_codec(codec).as_str() {
        "aac" => "aac",
        "ac3" => "ac3",
        "eac3" => "eac3",
        "flac" => "flac",
        "opus" => "libopus",
        "mp3" => "libmp3lame",
        "vorbis" => "libvorbis",
        "pcm_s16le" => "pcm_s16le",
        "pcm_s24le" => "pcm_s24le",
        _ => "aac",
    }
}

/// Audio codec arguments, numbered by output stream position.
///
/// Removed tracks are already excluded by the stream maps, so output
/// indices only advance for surviving tracks.
pub fn build_audio_args(audio_plan: &AudioPlan) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut output_index = 0usize;

    for track in &audio_plan.tracks {
        match track.action {
            AudioAction::Copy => {
                args.push(format!("-c:a:{output_index}"));
                args.push("copy".to_string());
                output_index += 1;
            }
            AudioAction::Transcode => {
                let target = track.target_codec.as_deref().unwrap_or("aac");
                args.push(format!("-c:a:{output_index}"));
                args.push(audio_encoder(target).to_string());
                if let Some(bitrate) = &track.target_bitrate {
                    args.push(format!("-b:a:{output_index}"));
                    args.push(bitrate.clone());
                }
                output_index += 1;
            }
            AudioAction::Remove => {
                // Excluded by -map; no codec args, no output slot.
            }
        }
    }

    if let Some(downmix) = &audio_plan.downmix_track {
        if let Some(filter) = vpo_policy::transcode::downmix_filter(downmix) {
            args.push("-filter_complex".to_string());
            args.push(filter);
            args.push("-map".to_string());
            args.push("[downmix]".to_string());
            let target = downmix.target_codec.as_deref().unwrap_or("aac");
            args.push(format!("-c:a:{output_index}"));
            args.push(audio_encoder(target).to_string());
            if let Some(bitrate) = &downmix.target_bitrate {
                args.push(format!("-b:a:{output_index}"));
                args.push(bitrate.clone());
            }
        }
    }

    args
}

fn needs_explicit_mapping(audio_plan: Option<&AudioPlan>) -> bool {
    audio_plan
        .map(|plan| plan.tracks.iter().any(|t| t.action == AudioAction::Remove))
        .unwrap_or(false)
}

fn build_stream_maps(audio_plan: Option<&AudioPlan>) -> Vec<String> {
    let mut args = vec!["-map".to_string(), "0:v:0".to_string()];

    match audio_plan {
        Some(plan) => {
            for track in &plan.tracks {
                if track.action != AudioAction::Remove {
                    args.push("-map".to_string());
                    args.push(format!("0:{}", track.track_index));
                }
            }
        }
        None => {
            args.push("-map".to_string());
            args.push("0:a?".to_string());
        }
    }

    args.push("-map".to_string());
    args.push("0:s?".to_string());
    args.push("-map".to_string());
    args.push("0:t?".to_string());
    args
}

/// Build the full transcode argument list (excluding the program path).
pub fn build_ffmpeg_command(
    plan: &TranscodePlan,
    cpu_cores: Option<u32>,
    quality: Option<&QualitySettings>,
    target_codec: Option<&str>,
    two_pass: Option<&TwoPassContext>,
    scale_algorithm: Option<&str>,
    extra_args: &[String],
    hardware: &HardwareAccelConfig,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-i".to_string(),
        plan.input_path.to_string_lossy().into_owned(),
    ];

    if needs_explicit_mapping(plan.audio_plan.as_ref()) {
        args.extend(build_stream_maps(plan.audio_plan.as_ref()));
    }

    if plan.needs_video_transcode {
        let codec = target_codec
            .map(str::to_string)
            .or_else(|| plan.policy.target_video_codec.clone())
            .unwrap_or_else(|| "hevc".to_string());
        let encoder = select_encoder(&codec, hardware);
        args.push("-c:v".to_string());
        args.push(encoder.clone());

        args.extend(build_quality_args(
            quality,
            &plan.policy,
            &codec,
            &encoder,
            two_pass,
        ));

        if plan.needs_video_scale {
            if let (Some(w), Some(h)) = (plan.target_width, plan.target_height) {
                let mut filter = format!("scale={w}:{h}");
                if let Some(algorithm) = scale_algorithm {
                    filter.push_str(&format!(":flags={algorithm}"));
                }
                args.push("-vf".to_string());
                args.push(filter);
            }
        }

        // HDR metadata must survive the encode.
        args.extend(hdr_preservation_args(plan.hdr_type));
    } else {
        args.push("-c:v".to_string());
        args.push("copy".to_string());
    }

    match plan.audio_plan.as_ref() {
        Some(audio_plan) if audio_plan.has_changes() => {
            args.extend(build_audio_args(audio_plan));
        }
        _ => {
            args.push("-c:a".to_string());
            args.push("copy".to_string());
        }
    }

    args.push("-c:s".to_string());
    args.push("copy".to_string());

    if let Some(cores) = cpu_cores {
        args.push("-threads".to_string());
        args.push(cores.to_string());
    }

    args.extend(extra_args.iter().cloned());

    args.push("-stats_period".to_string());
    args.push("1".to_string());

    args.push(plan.output_path.to_string_lossy().into_owned());
    args
}

/// First pass of two-pass encoding: analyze only, no audio, null output.
pub fn build_ffmpeg_command_pass1(
    plan: &TranscodePlan,
    two_pass: &TwoPassContext,
    cpu_cores: Option<u32>,
    quality: Option<&QualitySettings>,
    target_codec: Option<&str>,
    scale_algorithm: Option<&str>,
    extra_args: &[String],
    hardware: &HardwareAccelConfig,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-i".to_string(),
        plan.input_path.to_string_lossy().into_owned(),
    ];

    let codec = target_codec
        .map(str::to_string)
        .or_else(|| plan.policy.target_video_codec.clone())
        .unwrap_or_else(|| "hevc".to_string());
    let encoder = select_encoder(&codec, hardware);
    args.push("-c:v".to_string());
    args.push(encoder.clone());

    args.extend(build_quality_args(
        quality,
        &plan.policy,
        &codec,
        &encoder,
        Some(two_pass),
    ));

    if plan.needs_video_scale {
        if let (Some(w), Some(h)) = (plan.target_width, plan.target_height) {
            let mut filter = format!("scale={w}:{h}");
            if let Some(algorithm) = scale_algorithm {
                filter.push_str(&format!(":flags={algorithm}"));
            }
            args.push("-vf".to_string());
            args.push(filter);
        }
    }

    args.extend(hdr_preservation_args(plan.hdr_type));

    // Analysis pass needs no audio.
    args.push("-an".to_string());

    if let Some(cores) = cpu_cores {
        args.push("-threads".to_string());
        args.push(cores.to_string());
    }

    args.extend(extra_args.iter().cloned());

    args.push("-stats_period".to_string());
    args.push("1".to_string());

    args.push("-f".to_string());
    args.push("null".to_string());
    args.push(null_device().to_string());
    args
}

fn null_device() -> &'static str {
    if cfg!(windows) {
        "NUL"
    } else {
        "/dev/null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vpo_common::{TrackInfo, TrackType};
    use vpo_policy::transcode::create_audio_plan;
    use vpo_policy::types::{AudioTranscodeConfig, TranscodePolicyConfig};
    use vpo_policy::video_analysis::HdrType;

    fn base_plan() -> TranscodePlan {
        TranscodePlan {
            input_path: PathBuf::from("/m/in.mkv"),
            output_path: PathBuf::from("/m/out.mkv"),
            policy: TranscodePolicyConfig {
                target_video_codec: Some("hevc".to_string()),
                ..Default::default()
            },
            video_codec: Some("h264".to_string()),
            video_width: Some(3840),
            video_height: Some(2160),
            video_bitrate: Some(20_000_000),
            duration_seconds: Some(5400.0),
            audio_tracks: Vec::new(),
            skip_result: None,
            needs_video_transcode: true,
            needs_video_scale: true,
            target_width: Some(1920),
            target_height: Some(1080),
            audio_plan: None,
            warnings: Vec::new(),
            is_vfr: false,
            hdr_type: HdrType::None,
            bitrate_estimated: false,
            primary_video_index: Some(0),
        }
    }

    fn audio(index: i64, codec: &str) -> TrackInfo {
        let mut t = TrackInfo::new(index, TrackType::Audio);
        t.codec = Some(codec.to_string());
        t.channels = Some(6);
        t
    }

    #[test]
    fn default_command_uses_software_encoder_and_scale() {
        let plan = base_plan();
        let args = build_ffmpeg_command(
            &plan,
            None,
            None,
            None,
            None,
            None,
            &[],
            &HardwareAccelConfig::default(),
        );
        let joined = args.join(" ");

        assert!(joined.contains("-c:v libx265"));
        assert!(joined.contains("-crf 28"));
        assert!(joined.contains("-preset medium"));
        assert!(joined.contains("-vf scale=1920:1080"));
        assert!(joined.contains("-c:a copy"));
        assert!(joined.contains("-c:s copy"));
        assert!(joined.ends_with("/m/out.mkv"));
        assert_eq!(detect_encoder_type(&args), "software");
    }

    #[test]
    fn hardware_mode_selects_hw_encoder() {
        let plan = base_plan();
        let hw = HardwareAccelConfig {
            enabled: HardwareAccelMode::Nvenc,
            fallback_to_cpu: true,
        };
        let args = build_ffmpeg_command(&plan, None, None, None, None, None, &[], &hw);
        assert!(args.join(" ").contains("-c:v hevc_nvenc"));
        assert_eq!(detect_encoder_type(&args), "hardware");
    }

    #[test]
    fn audio_removal_forces_explicit_maps_with_output_numbering() {
        let tracks = vec![audio(1, "eac3"), audio(2, "dts"), audio(3, "aac")];
        let config = AudioTranscodeConfig {
            preserve_codecs: vec!["eac3".to_string()],
            transcode_to: Some("aac".to_string()),
            bitrate: Some("256k".to_string()),
            ..Default::default()
        };
        // Track 2 removed by the filter.
        let audio_plan = create_audio_plan(&tracks, &config, &[2]);

        let mut plan = base_plan();
        plan.audio_plan = Some(audio_plan);
        let args = build_ffmpeg_command(
            &plan,
            None,
            None,
            None,
            None,
            None,
            &[],
            &HardwareAccelConfig::default(),
        );
        let joined = args.join(" ");

        // Maps skip track 2 entirely.
        assert!(joined.contains("-map 0:1"));
        assert!(!joined.contains("-map 0:2 "));
        assert!(joined.contains("-map 0:3"));
        // Output stream numbering: eac3 copies as a:0, aac track is a:1.
        assert!(joined.contains("-c:a:0 copy"));
        assert!(joined.contains("-c:a:1 copy") || joined.contains("-c:a:1 aac"));
        assert!(!joined.contains("-c:a:2"));
    }

    #[test]
    fn two_pass_args_differ_per_encoder() {
        let quality = QualitySettings {
            mode: QualityMode::Bitrate,
            bitrate: Some("4M".to_string()),
            two_pass: true,
            ..Default::default()
        };
        let ctx = TwoPassContext::new(PathBuf::from("/tmp/vpo_passlog_x"));
        let policy = TranscodePolicyConfig::default();

        let x264 = build_quality_args(Some(&quality), &policy, "h264", "libx264", Some(&ctx));
        assert!(x264.join(" ").contains("-pass 1"));
        assert!(x264.join(" ").contains("-passlogfile /tmp/vpo_passlog_x"));

        let x265 = build_quality_args(Some(&quality), &policy, "hevc", "libx265", Some(&ctx));
        assert!(x265
            .join(" ")
            .contains("-x265-params pass=1:stats=/tmp/vpo_passlog_x"));
    }

    #[test]
    fn pass1_outputs_to_null_without_audio() {
        let plan = base_plan();
        let ctx = TwoPassContext::new(PathBuf::from("/tmp/passlog"));
        let args = build_ffmpeg_command_pass1(
            &plan,
            &ctx,
            Some(8),
            None,
            None,
            None,
            &[],
            &HardwareAccelConfig::default(),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-an"));
        assert!(joined.contains("-threads 8"));
        assert!(joined.contains("-f null"));
    }

    #[test]
    fn hdr_args_present_for_hdr_plans() {
        let mut plan = base_plan();
        plan.hdr_type = HdrType::Hdr10;
        let args = build_ffmpeg_command(
            &plan,
            None,
            None,
            None,
            None,
            None,
            &[],
            &HardwareAccelConfig::default(),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-color_trc smpte2084"));
        assert!(joined.contains("-pix_fmt yuv420p10le"));
    }

    #[test]
    fn hw_error_patterns_match_case_insensitively() {
        assert!(detect_hw_encoder_error("blah Cannot load nvenc blah"));
        assert!(detect_hw_encoder_error("FAILED TO INITIALISE VAAPI"));
        assert!(!detect_hw_encoder_error("frame= 100 fps= 30"));
    }

    #[test]
    fn two_pass_gated_to_known_encoders() {
        assert!(encoder_supports_two_pass("libx264"));
        assert!(encoder_supports_two_pass("libx265"));
        assert!(!encoder_supports_two_pass("libsvtav1"));
        assert!(!encoder_supports_two_pass("hevc_nvenc"));
    }
}
