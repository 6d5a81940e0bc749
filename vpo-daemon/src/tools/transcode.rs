//! Transcode execution via FFmpeg.
//!
//! Plans carry the probe facts plus the computed decisions; execution is
//! write-to-temp-then-move with disk-space checks, optional two-pass
//! encoding, per-operation timeouts, hardware fallback and an
//! `.original` backup of the source on success.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vpo_common::TrackInfo;
use vpo_policy::transcode::{
    create_audio_plan, evaluate_skip_condition, should_transcode_video, AudioPlan,
    SkipEvaluationResult,
};
use vpo_policy::types::{
    AudioTranscodeConfig, HardwareAccelConfig, HardwareAccelMode, QualityMode, QualitySettings,
    SkipCondition, TranscodePolicyConfig,
};
use vpo_policy::video_analysis::{
    detect_hdr_type, detect_missing_bitrate, detect_vfr_content, select_primary_video_stream,
    HdrType,
};

use crate::error::ToolError;

use super::command::{
    build_ffmpeg_command, build_ffmpeg_command_pass1, detect_encoder_type, detect_hw_encoder_error,
    encoder_supports_two_pass, select_encoder, TwoPassContext,
};
use super::progress::{parse_progress_line, EncodingMetrics, FfmpegProgress};
use super::runner::run_tool;
use super::{rename_or_copy, temp_output_path, validate_output};

/// A fully computed transcode plan for one file.
#[derive(Debug, Clone)]
pub struct TranscodePlan {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub policy: TranscodePolicyConfig,

    // Probe facts
    pub video_codec: Option<String>,
    pub video_width: Option<i64>,
    pub video_height: Option<i64>,
    /// Effective bitrate (may be estimated; see `bitrate_estimated`).
    pub video_bitrate: Option<u64>,
    pub duration_seconds: Option<f64>,
    pub audio_tracks: Vec<TrackInfo>,

    // Decisions
    pub skip_result: Option<SkipEvaluationResult>,
    pub needs_video_transcode: bool,
    pub needs_video_scale: bool,
    pub target_width: Option<i64>,
    pub target_height: Option<i64>,
    pub audio_plan: Option<AudioPlan>,

    // Edge cases
    pub warnings: Vec<String>,
    pub is_vfr: bool,
    pub hdr_type: HdrType,
    pub bitrate_estimated: bool,
    pub primary_video_index: Option<i64>,
}

impl TranscodePlan {
    pub fn should_skip(&self) -> bool {
        self.skip_result.as_ref().map(|r| r.skip).unwrap_or(false)
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_result
            .as_ref()
            .filter(|r| r.skip)
            .map(|r| r.reason.as_str())
    }

    /// True if any transcoding work is needed.
    pub fn needs_any_transcode(&self) -> bool {
        if self.should_skip() {
            return false;
        }
        self.needs_video_transcode
            || self
                .audio_plan
                .as_ref()
                .map(AudioPlan::has_changes)
                .unwrap_or(false)
    }
}

/// Outcome of a transcode run.
#[derive(Debug, Clone, Default)]
pub struct TranscodeOutcome {
    /// False when the plan skipped (compliant file).
    pub executed: bool,
    pub output_path: Option<PathBuf>,
    pub backup_path: Option<PathBuf>,
    pub encoding_fps: Option<f64>,
    pub encoding_bitrate_kbps: Option<i64>,
    pub total_frames: Option<i64>,
    /// 'hardware', 'software' or None when nothing was encoded.
    pub encoder_type: Option<String>,
}

/// Executor for video/audio transcoding operations.
pub struct TranscodeExecutor {
    ffmpeg_path: PathBuf,
    policy: TranscodePolicyConfig,
    skip_if: Option<SkipCondition>,
    audio_config: Option<AudioTranscodeConfig>,
    hardware_acceleration: HardwareAccelConfig,
    cpu_cores: Option<u32>,
    temp_directory: Option<PathBuf>,
    backup_original: bool,
    transcode_timeout: Option<Duration>,
}

impl TranscodeExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ffmpeg_path: PathBuf,
        policy: TranscodePolicyConfig,
        audio_config: Option<AudioTranscodeConfig>,
        hardware_acceleration: HardwareAccelConfig,
        cpu_cores: Option<u32>,
        temp_directory: Option<PathBuf>,
        backup_original: bool,
        transcode_timeout: Option<Duration>,
    ) -> Self {
        let skip_if = policy.skip_if.clone();
        Self {
            ffmpeg_path,
            policy,
            skip_if,
            audio_config,
            hardware_acceleration,
            cpu_cores,
            temp_directory,
            backup_original,
            transcode_timeout,
        }
    }

    /// Compute the plan for one file, including edge-case detection.
    #[allow(clippy::too_many_arguments)]
    pub fn create_plan(
        &self,
        input_path: &Path,
        output_path: &Path,
        all_tracks: &[TrackInfo],
        video_bitrate: Option<u64>,
        duration_seconds: Option<f64>,
        file_size_bytes: Option<i64>,
        removed_audio_indices: &[i64],
    ) -> TranscodePlan {
        let mut warnings: Vec<String> = Vec::new();

        // Primary video stream (multi-angle releases carry several).
        let (primary, multi_video_warnings) = select_primary_video_stream(all_tracks);
        warnings.extend(multi_video_warnings.iter().cloned());
        for warning in &multi_video_warnings {
            warn!("{}: {warning}", input_path.display());
        }

        let video_codec = primary.and_then(|t| t.codec.clone());
        let video_width = primary.and_then(|t| t.width);
        let video_height = primary.and_then(|t| t.height);
        let primary_video_index = primary.map(|t| t.index);

        // VFR detection from the primary stream's rates.
        let (is_vfr, vfr_warning) = detect_vfr_content(
            primary.and_then(|t| t.frame_rate.as_deref()),
            primary.and_then(|t| t.avg_frame_rate.as_deref()),
        );
        if let Some(warning) = vfr_warning {
            warn!("{}: {warning}", input_path.display());
            warnings.push(warning);
        }

        // Missing bitrate: estimate from size over duration.
        let (bitrate_estimated, effective_bitrate, bitrate_warning) =
            detect_missing_bitrate(video_bitrate, file_size_bytes, duration_seconds);
        if let Some(warning) = bitrate_warning {
            warn!("{}: {warning}", input_path.display());
            warnings.push(warning);
        }

        // HDR detection.
        let (hdr_type, hdr_description) = detect_hdr_type(all_tracks);
        if let Some(description) = hdr_description {
            info!("{}: {description}", input_path.display());
        }

        let audio_tracks: Vec<TrackInfo> = all_tracks
            .iter()
            .filter(|t| t.track_type == vpo_common::TrackType::Audio)
            .cloned()
            .collect();

        // Skip conditions come first; a compliant file short-circuits the
        // rest of the decision tree.
        let skip_result = evaluate_skip_condition(
            self.skip_if.as_ref(),
            video_codec.as_deref(),
            video_width,
            video_height,
            effective_bitrate,
        );
        if skip_result.skip {
            info!(
                "Skipping video transcode - {}: {}",
                skip_result.reason,
                input_path.display()
            );
            return TranscodePlan {
                input_path: input_path.to_path_buf(),
                output_path: output_path.to_path_buf(),
                policy: self.policy.clone(),
                video_codec,
                video_width,
                video_height,
                video_bitrate: effective_bitrate,
                duration_seconds,
                audio_tracks,
                skip_result: Some(skip_result),
                needs_video_transcode: false,
                needs_video_scale: false,
                target_width: None,
                target_height: None,
                audio_plan: None,
                warnings,
                is_vfr,
                hdr_type,
                bitrate_estimated,
                primary_video_index,
            };
        }

        let decision = should_transcode_video(
            &self.policy,
            video_codec.as_deref(),
            video_width,
            video_height,
        );

        if hdr_type.is_hdr() && decision.needs_scale {
            let warning = "HDR content will be scaled; HDR metadata is preserved but \
                 visual quality may suffer"
                .to_string();
            warn!("{}: {warning}", input_path.display());
            warnings.push(warning);
        }

        let audio_plan = self.audio_config.as_ref().map(|config| {
            create_audio_plan(&audio_tracks, config, removed_audio_indices)
        });

        TranscodePlan {
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            policy: self.policy.clone(),
            video_codec,
            video_width,
            video_height,
            video_bitrate: effective_bitrate,
            duration_seconds,
            audio_tracks,
            skip_result: Some(skip_result),
            needs_video_transcode: decision.needs_transcode,
            needs_video_scale: decision.needs_scale,
            target_width: decision.target_width,
            target_height: decision.target_height,
            audio_plan,
            warnings,
            is_vfr,
            hdr_type,
            bitrate_estimated,
            primary_video_index,
        }
    }

    /// Estimated output size check against free space in the staging
    /// directory.
    fn check_disk_space(&self, plan: &TranscodePlan) -> Result<(), ToolError> {
        let input_size = match std::fs::metadata(&plan.input_path) {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                warn!("Could not stat input file: {e}");
                return Ok(());
            }
        };

        let target = self
            .policy
            .target_video_codec
            .as_deref()
            .unwrap_or("hevc");
        let ratio = match vpo_common::codecs::canonical_video_codec(target).as_str() {
            "hevc" | "av1" => 0.5,
            _ => 0.8,
        };
        let estimated = (input_size as f64 * ratio * 1.2) as u64;

        let check_dir = self
            .temp_directory
            .clone()
            .or_else(|| plan.output_path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        match free_space(&check_dir) {
            Some(free) if free < estimated => Err(ToolError::Filesystem {
                path: check_dir,
                message: format!(
                    "insufficient disk space: {:.1} GB free, need ~{:.1} GB",
                    free as f64 / 1e9,
                    estimated as f64 / 1e9
                ),
            }),
            _ => Ok(()),
        }
    }

    /// Execute the plan. Progress samples stream into `on_progress`;
    /// cancellation is observed between and during passes.
    pub async fn execute(
        &self,
        plan: &TranscodePlan,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(&FfmpegProgress),
    ) -> Result<TranscodeOutcome, ToolError> {
        if plan.should_skip() {
            info!(
                "Skipping video transcode - already compliant: {} ({})",
                plan.input_path.display(),
                plan.skip_reason().unwrap_or("skip conditions met")
            );
            return Ok(TranscodeOutcome::default());
        }
        if !plan.needs_any_transcode() {
            info!(
                "File already compliant, no transcode needed: {}",
                plan.input_path.display()
            );
            return Ok(TranscodeOutcome::default());
        }

        self.check_disk_space(plan)?;

        let temp_output = temp_output_path(&plan.output_path, self.temp_directory.as_deref());
        if let Some(parent) = temp_output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let quality = plan.policy.quality.clone();
        let target_codec = plan.policy.target_video_codec.clone();
        let scale_algorithm = plan.policy.scale_algorithm.clone();
        let extra_args = plan.policy.extra_args.clone();

        // Two-pass only for bitrate mode on encoders with pass-log
        // support; everything else goes single pass.
        let encoder = select_encoder(
            target_codec.as_deref().unwrap_or("hevc"),
            &self.hardware_acceleration,
        );
        let wants_two_pass = quality
            .as_ref()
            .map(|q| q.two_pass && q.mode == QualityMode::Bitrate)
            .unwrap_or(false);
        let two_pass = if wants_two_pass && encoder_supports_two_pass(&encoder) {
            true
        } else {
            if wants_two_pass {
                warn!(
                    "Two-pass requested but encoder {encoder} has no pass-log support; \
                     encoding single pass"
                );
            }
            false
        };

        let result = if two_pass {
            self.execute_two_pass(
                plan,
                &temp_output,
                quality.as_ref(),
                target_codec.as_deref(),
                scale_algorithm.as_deref(),
                &extra_args,
                cancel,
                &mut on_progress,
            )
            .await
        } else {
            self.execute_single_pass(
                plan,
                &temp_output,
                quality.as_ref(),
                target_codec.as_deref(),
                scale_algorithm.as_deref(),
                &extra_args,
                cancel,
                &mut on_progress,
                true,
            )
            .await
        };

        let (metrics, encoder_type) = match result {
            Ok(success) => success,
            Err(e) => {
                let _ = std::fs::remove_file(&temp_output);
                return Err(e);
            }
        };

        validate_output(&temp_output, "ffmpeg").map_err(|e| {
            let _ = std::fs::remove_file(&temp_output);
            e
        })?;

        // Keep the source as an `.original` sibling before the output
        // lands on the primary path.
        let backup_path = if self.backup_original {
            match self.backup_original_file(&plan.input_path) {
                Ok(backup) => Some(backup),
                Err(e) => {
                    warn!("Could not backup original: {e}");
                    None
                }
            }
        } else {
            None
        };

        rename_or_copy(&temp_output, &plan.output_path)?;

        info!(
            "Transcode completed: {}",
            plan.output_path.display()
        );

        Ok(TranscodeOutcome {
            executed: true,
            output_path: Some(plan.output_path.clone()),
            backup_path,
            encoding_fps: metrics.avg_fps(),
            encoding_bitrate_kbps: metrics.avg_bitrate_kbps(),
            total_frames: metrics.total_frames,
            encoder_type: Some(encoder_type.to_string()),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_single_pass(
        &self,
        plan: &TranscodePlan,
        temp_output: &Path,
        quality: Option<&QualitySettings>,
        target_codec: Option<&str>,
        scale_algorithm: Option<&str>,
        extra_args: &[String],
        cancel: &CancellationToken,
        on_progress: &mut impl FnMut(&FfmpegProgress),
        allow_hw_fallback: bool,
    ) -> Result<(EncodingMetrics, &'static str), ToolError> {
        let mut temp_plan = plan.clone();
        temp_plan.output_path = temp_output.to_path_buf();

        let args = build_ffmpeg_command(
            &temp_plan,
            self.cpu_cores,
            quality,
            target_codec,
            None,
            scale_algorithm,
            extra_args,
            &self.hardware_acceleration,
        );
        info!("Executing FFmpeg: {}", args.join(" "));

        let (output, metrics) = self
            .run_with_progress(&args, cancel, on_progress)
            .await?;

        if output.timed_out {
            return Err(ToolError::Timeout {
                tool: "ffmpeg".to_string(),
                seconds: self.transcode_timeout.map(|t| t.as_secs()).unwrap_or(0),
            });
        }

        if !output.success {
            // Known hardware-init failures get one software retry.
            if allow_hw_fallback
                && self.hardware_acceleration.fallback_to_cpu
                && self.hardware_acceleration.enabled != HardwareAccelMode::None
                && detect_encoder_type(&args) == "hardware"
                && detect_hw_encoder_error(&output.tail_text())
            {
                warn!(
                    "Hardware encoder failed, retrying with software encoder: {}",
                    plan.input_path.display()
                );
                let _ = std::fs::remove_file(temp_output);

                let software = TranscodeExecutor {
                    ffmpeg_path: self.ffmpeg_path.clone(),
                    policy: self.policy.clone(),
                    skip_if: self.skip_if.clone(),
                    audio_config: self.audio_config.clone(),
                    hardware_acceleration: HardwareAccelConfig {
                        enabled: HardwareAccelMode::None,
                        fallback_to_cpu: false,
                    },
                    cpu_cores: self.cpu_cores,
                    temp_directory: self.temp_directory.clone(),
                    backup_original: self.backup_original,
                    transcode_timeout: self.transcode_timeout,
                };
                return Box::pin(software.execute_single_pass(
                    plan,
                    temp_output,
                    quality,
                    target_codec,
                    scale_algorithm,
                    extra_args,
                    cancel,
                    on_progress,
                    false,
                ))
                .await;
            }

            return Err(ToolError::failure(
                "ffmpeg",
                format!("exit code {:?}: {}", output.exit_code, output.tail_text()),
            ));
        }

        Ok((metrics, detect_encoder_type(&args)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_two_pass(
        &self,
        plan: &TranscodePlan,
        temp_output: &Path,
        quality: Option<&QualitySettings>,
        target_codec: Option<&str>,
        scale_algorithm: Option<&str>,
        extra_args: &[String],
        cancel: &CancellationToken,
        on_progress: &mut impl FnMut(&FfmpegProgress),
    ) -> Result<(EncodingMetrics, &'static str), ToolError> {
        let passlog_dir = self
            .temp_directory
            .clone()
            .or_else(|| plan.output_path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let passlogfile = passlog_dir.join(format!(
            "vpo_passlog_{}",
            plan.output_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "out".to_string())
        ));
        let mut context = TwoPassContext::new(passlogfile);

        let result = async {
            // Pass 1: analyze into the pass log, output discarded.
            context.current_pass = 1;
            let pass1_args = build_ffmpeg_command_pass1(
                plan,
                &context,
                self.cpu_cores,
                quality,
                target_codec,
                scale_algorithm,
                extra_args,
                &self.hardware_acceleration,
            );
            info!("Starting two-pass encoding pass 1: {}", plan.input_path.display());

            let (output, _) = self.run_with_progress(&pass1_args, cancel, on_progress).await?;
            if output.timed_out {
                return Err(ToolError::Timeout {
                    tool: "ffmpeg".to_string(),
                    seconds: self.transcode_timeout.map(|t| t.as_secs()).unwrap_or(0),
                });
            }
            if !output.success {
                return Err(ToolError::failure(
                    "ffmpeg",
                    format!("two-pass encoding failed on pass 1: {}", output.tail_text()),
                ));
            }

            // Pass 2: encode using the stats.
            context.current_pass = 2;
            let mut temp_plan = plan.clone();
            temp_plan.output_path = temp_output.to_path_buf();
            let pass2_args = build_ffmpeg_command(
                &temp_plan,
                self.cpu_cores,
                quality,
                target_codec,
                Some(&context),
                scale_algorithm,
                extra_args,
                &self.hardware_acceleration,
            );
            info!("Pass 1 complete, starting pass 2: {}", plan.input_path.display());

            let (output, metrics) = self.run_with_progress(&pass2_args, cancel, on_progress).await?;
            if output.timed_out {
                return Err(ToolError::Timeout {
                    tool: "ffmpeg".to_string(),
                    seconds: self.transcode_timeout.map(|t| t.as_secs()).unwrap_or(0),
                });
            }
            if !output.success {
                return Err(ToolError::failure(
                    "ffmpeg",
                    format!("two-pass encoding failed on pass 2: {}", output.tail_text()),
                ));
            }

            Ok((metrics, detect_encoder_type(&pass2_args)))
        }
        .await;

        // Pass logs are cleaned up after pass 2 and on every failure path,
        // including cancellation between passes.
        context.cleanup();
        result
    }

    async fn run_with_progress(
        &self,
        args: &[String],
        cancel: &CancellationToken,
        on_progress: &mut impl FnMut(&FfmpegProgress),
    ) -> Result<(super::runner::CommandOutput, EncodingMetrics), ToolError> {
        let mut metrics = EncodingMetrics::default();

        let output = {
            let metrics = &mut metrics;
            let run = run_tool(&self.ffmpeg_path, args, self.transcode_timeout, |line| {
                if let Some(sample) = parse_progress_line(line) {
                    metrics.record(&sample);
                    on_progress(&sample);
                }
            });

            tokio::select! {
                output = run => output?,
                _ = cancel.cancelled() => {
                    // Dropping the run future kills the child (kill_on_drop).
                    return Err(ToolError::failure("ffmpeg", "transcode cancelled"));
                }
            }
        };

        Ok((output, metrics))
    }

    /// Rename the source to `<file>.<ext>.original[.<n>]`.
    fn backup_original_file(&self, original: &Path) -> Result<PathBuf, ToolError> {
        let base = format!(
            "{}.original",
            original
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        let mut backup = original.with_file_name(&base);
        let mut counter = 1;
        while backup.exists() {
            backup = original.with_file_name(format!("{base}.{counter}"));
            counter += 1;
        }

        std::fs::rename(original, &backup).map_err(|e| ToolError::Filesystem {
            path: backup.clone(),
            message: format!("original backup failed: {e}"),
        })?;
        info!("Backed up original: {}", backup.display());
        Ok(backup)
    }
}

fn free_space(path: &Path) -> Option<u64> {
    fs2::available_space(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpo_common::TrackType;

    fn executor(policy: TranscodePolicyConfig) -> TranscodeExecutor {
        TranscodeExecutor::new(
            PathBuf::from("/usr/bin/ffmpeg"),
            policy,
            None,
            HardwareAccelConfig::default(),
            None,
            None,
            true,
            None,
        )
    }

    fn video_track(codec: &str, width: i64, height: i64) -> TrackInfo {
        let mut t = TrackInfo::new(0, TrackType::Video);
        t.codec = Some(codec.to_string());
        t.width = Some(width);
        t.height = Some(height);
        t
    }

    fn audio_track(index: i64, codec: &str) -> TrackInfo {
        let mut t = TrackInfo::new(index, TrackType::Audio);
        t.codec = Some(codec.to_string());
        t.channels = Some(6);
        t
    }

    #[test]
    fn compliant_file_plans_a_skip() {
        let executor = executor(TranscodePolicyConfig {
            target_video_codec: Some("hevc".to_string()),
            skip_if: Some(SkipCondition {
                codec_matches: vec!["hevc".to_string(), "h265".to_string()],
                resolution_within: Some("1080p".to_string()),
                bitrate_under: Some("15M".to_string()),
            }),
            ..Default::default()
        });

        let tracks = vec![video_track("hevc", 1920, 1080), audio_track(1, "aac")];
        let plan = executor.create_plan(
            Path::new("/m/a.mkv"),
            Path::new("/m/a.mkv"),
            &tracks,
            Some(8_000_000),
            Some(5400.0),
            Some(5_000_000_000),
            &[],
        );

        assert!(plan.should_skip());
        let reason = plan.skip_reason().unwrap();
        assert!(reason.contains("codec"));
        assert!(reason.contains("resolution"));
        assert!(reason.contains("bitrate"));
        assert!(!plan.needs_any_transcode());
    }

    #[test]
    fn h264_4k_plans_transcode_with_scale() {
        let executor = executor(TranscodePolicyConfig {
            target_video_codec: Some("hevc".to_string()),
            max_resolution: Some("1080p".to_string()),
            ..Default::default()
        });

        let tracks = vec![video_track("h264", 3840, 2160), audio_track(1, "eac3")];
        let plan = executor.create_plan(
            Path::new("/m/a.mkv"),
            Path::new("/m/a.mkv"),
            &tracks,
            Some(20_000_000),
            Some(5400.0),
            None,
            &[],
        );

        assert!(plan.needs_video_transcode);
        assert!(plan.needs_video_scale);
        assert_eq!(plan.target_width, Some(1920));
        assert_eq!(plan.target_height, Some(1080));
        assert!(plan.needs_any_transcode());
    }

    #[test]
    fn missing_bitrate_is_estimated_and_flagged() {
        let executor = executor(TranscodePolicyConfig::default());
        let tracks = vec![video_track("h264", 1920, 1080)];
        let plan = executor.create_plan(
            Path::new("/m/a.mkv"),
            Path::new("/m/a.mkv"),
            &tracks,
            None,
            Some(1000.0),
            Some(1_000_000_000),
            &[],
        );

        assert!(plan.bitrate_estimated);
        assert_eq!(plan.video_bitrate, Some(8_000_000));
        assert!(plan.warnings.iter().any(|w| w.contains("estimated")));
    }

    #[test]
    fn hdr_scale_emits_quality_warning() {
        let executor = executor(TranscodePolicyConfig {
            target_video_codec: Some("hevc".to_string()),
            max_resolution: Some("1080p".to_string()),
            ..Default::default()
        });

        let mut hdr_video = video_track("hevc", 3840, 2160);
        hdr_video.color_transfer = Some("smpte2084".to_string());
        let plan = executor.create_plan(
            Path::new("/m/a.mkv"),
            Path::new("/m/a.mkv"),
            &[hdr_video],
            Some(30_000_000),
            Some(5400.0),
            None,
            &[],
        );

        assert_eq!(plan.hdr_type, HdrType::Hdr10);
        assert!(plan.warnings.iter().any(|w| w.contains("HDR")));
    }

    #[test]
    fn multiple_video_streams_pick_primary_and_warn() {
        let executor = executor(TranscodePolicyConfig::default());
        let mut small = video_track("h264", 720, 480);
        small.index = 0;
        let mut big = video_track("h264", 1920, 1080);
        big.index = 1;

        let plan = executor.create_plan(
            Path::new("/m/a.mkv"),
            Path::new("/m/a.mkv"),
            &[small, big],
            Some(8_000_000),
            None,
            None,
            &[],
        );

        assert_eq!(plan.primary_video_index, Some(1));
        assert_eq!(plan.video_width, Some(1920));
        assert!(plan.warnings.iter().any(|w| w.contains("video streams")));
    }
}
