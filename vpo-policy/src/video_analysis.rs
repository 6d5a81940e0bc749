//! Video stream analysis: VFR detection, HDR detection, primary stream
//! selection and bitrate estimation.
//!
//! These cover the awkward files: variable frame rate remuxes, HDR10/HLG
//! masters, multi-angle releases with several video streams, and files
//! whose muxer never wrote a bitrate.

use serde::{Deserialize, Serialize};

use vpo_common::{TrackInfo, TrackType};

/// HDR flavor detected from color metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HdrType {
    #[default]
    None,
    /// PQ transfer (HDR10 family).
    Hdr10,
    /// Hybrid log-gamma broadcast HDR.
    Hlg,
    DolbyVision,
}

impl HdrType {
    pub fn is_hdr(&self) -> bool {
        *self != HdrType::None
    }
}

/// Parse an ffprobe rational like `24000/1001` (or a bare number).
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let rate = rate.trim();
    if let Some((num, den)) = rate.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    rate.parse().ok()
}

/// Detect variable frame rate content: the real and average frame rates
/// differ materially.
pub fn detect_vfr_content(
    r_frame_rate: Option<&str>,
    avg_frame_rate: Option<&str>,
) -> (bool, Option<String>) {
    let (Some(r), Some(avg)) = (
        r_frame_rate.and_then(parse_frame_rate),
        avg_frame_rate.and_then(parse_frame_rate),
    ) else {
        return (false, None);
    };

    if r <= 0.0 || avg <= 0.0 {
        return (false, None);
    }

    // More than 1% apart counts as materially different.
    let delta = (r - avg).abs() / r.max(avg);
    if delta > 0.01 {
        let warning = format!(
            "variable frame rate detected (r_frame_rate {r:.3} vs avg_frame_rate {avg:.3}); \
             encoded timing may shift"
        );
        return (true, Some(warning));
    }
    (false, None)
}

/// Estimate a missing bitrate from file size and duration.
///
/// Returns (was_estimated, effective_bitrate, warning).
pub fn detect_missing_bitrate(
    video_bitrate: Option<u64>,
    file_size_bytes: Option<i64>,
    duration_seconds: Option<f64>,
) -> (bool, Option<u64>, Option<String>) {
    if video_bitrate.is_some() {
        return (false, video_bitrate, None);
    }

    match (file_size_bytes, duration_seconds) {
        (Some(size), Some(duration)) if size > 0 && duration > 0.0 => {
            let estimated = (size as f64 * 8.0 / duration) as u64;
            let warning = format!(
                "bitrate missing from metadata, estimated {estimated} b/s from file size"
            );
            (true, Some(estimated), Some(warning))
        }
        _ => (false, None, Some("bitrate unknown and not estimable".to_string())),
    }
}

/// Pick the primary video stream: first stream with the largest area.
/// Emits a warning when more than one video stream exists.
pub fn select_primary_video_stream<'a>(
    tracks: &'a [TrackInfo],
) -> (Option<&'a TrackInfo>, Vec<String>) {
    let videos: Vec<&TrackInfo> = tracks
        .iter()
        .filter(|t| t.track_type == TrackType::Video)
        .collect();

    let mut warnings = Vec::new();
    if videos.len() > 1 {
        warnings.push(format!(
            "{} video streams present; transcoding only the primary stream",
            videos.len()
        ));
    }

    let primary = videos.iter().copied().max_by_key(|t| {
        let area = t.width.unwrap_or(0) * t.height.unwrap_or(0);
        // max_by_key takes the last maximum; invert the index to keep the
        // first of equal-area streams.
        (area, std::cmp::Reverse(t.index))
    });

    (primary, warnings)
}

/// Detect HDR from the video tracks' color metadata and codec tags.
pub fn detect_hdr_type(tracks: &[TrackInfo]) -> (HdrType, Option<String>) {
    for track in tracks.iter().filter(|t| t.track_type == TrackType::Video) {
        if let Some(codec) = track.codec.as_deref() {
            let c = codec.to_ascii_lowercase();
            if c.starts_with("dvhe") || c.starts_with("dvh1") || c.contains("dolby") {
                return (
                    HdrType::DolbyVision,
                    Some(format!("Dolby Vision stream at index {}", track.index)),
                );
            }
        }

        let transfer = track
            .color_transfer
            .as_deref()
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let primaries = track
            .color_primaries
            .as_deref()
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if transfer.contains("smpte2084") || transfer == "pq" {
            return (
                HdrType::Hdr10,
                Some(format!(
                    "HDR10 (PQ transfer, {} primaries) at index {}",
                    if primaries.is_empty() { "unknown" } else { &primaries },
                    track.index
                )),
            );
        }
        if transfer.contains("arib-std-b67") || transfer == "hlg" {
            return (
                HdrType::Hlg,
                Some(format!("HLG transfer at index {}", track.index)),
            );
        }
    }
    (HdrType::None, None)
}

/// Encoder arguments that carry HDR metadata through a transcode.
///
/// Must follow the video encoder settings on the command line.
pub fn hdr_preservation_args(hdr: HdrType) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    match hdr {
        HdrType::None => return args,
        HdrType::Hdr10 | HdrType::DolbyVision => {
            args.extend(
                [
                    "-color_primaries",
                    "bt2020",
                    "-color_trc",
                    "smpte2084",
                    "-colorspace",
                    "bt2020nc",
                    "-pix_fmt",
                    "yuv420p10le",
                ]
                .map(String::from),
            );
        }
        HdrType::Hlg => {
            args.extend(
                [
                    "-color_primaries",
                    "bt2020",
                    "-color_trc",
                    "arib-std-b67",
                    "-colorspace",
                    "bt2020nc",
                    "-pix_fmt",
                    "yuv420p10le",
                ]
                .map(String::from),
            );
        }
    }
    args
}
