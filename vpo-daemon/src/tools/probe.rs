//! Media introspection via ffprobe.
//!
//! Runs `ffprobe -print_format json -show_format -show_streams` and maps
//! the JSON into the domain `FileInfo`/`TrackInfo` types, including the
//! HDR color quartet and per-stream durations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use vpo_common::{FileInfo, ScanStatus, TrackInfo, TrackType};

use crate::error::ToolError;

use super::runner::run_tool_capture_stdout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// ffprobe-backed introspector.
#[derive(Debug, Clone)]
pub struct FfprobeIntrospector {
    ffprobe_path: PathBuf,
}

impl FfprobeIntrospector {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }

    /// Introspect one file into a `FileInfo`.
    pub async fn probe(&self, path: &Path) -> Result<FileInfo, ToolError> {
        let metadata = std::fs::metadata(path).map_err(|e| ToolError::Filesystem {
            path: path.to_path_buf(),
            message: format!("cannot stat: {e}"),
        })?;
        let modified_at: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        let args = vec![
            "-v".to_string(),
            "quiet".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
            path.to_string_lossy().into_owned(),
        ];

        let (output, stdout) =
            run_tool_capture_stdout(&self.ffprobe_path, &args, Some(PROBE_TIMEOUT)).await?;

        if output.timed_out {
            return Err(ToolError::Timeout {
                tool: "ffprobe".to_string(),
                seconds: PROBE_TIMEOUT.as_secs(),
            });
        }
        if !output.success {
            return Err(ToolError::failure(
                "ffprobe",
                format!("exit code {:?}: {}", output.exit_code, output.tail_text()),
            ));
        }

        let json: Value = serde_json::from_slice(&stdout)
            .map_err(|e| ToolError::Parse(format!("ffprobe JSON: {e}")))?;

        let format = &json["format"];
        let container_format = format["format_name"].as_str().map(str::to_string);
        let format_duration = format["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok());
        let container_tags = parse_tags(&format["tags"]);

        let tracks: Vec<TrackInfo> = json["streams"]
            .as_array()
            .map(|streams| {
                streams
                    .iter()
                    .map(|stream| parse_stream(stream, format_duration))
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            "Probed {}: container={:?}, {} tracks",
            path.display(),
            container_format,
            tracks.len()
        );

        Ok(FileInfo {
            path: path.to_path_buf(),
            size_bytes: metadata.len() as i64,
            modified_at,
            content_hash: None,
            container_format,
            scanned_at: Utc::now(),
            scan_status: ScanStatus::Ok,
            scan_error: None,
            tracks,
            container_tags,
            plugin_metadata: None,
        })
    }
}

fn parse_tags(tags: &Value) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(object) = tags.as_object() {
        for (key, value) in object {
            if let Some(value) = value.as_str() {
                map.insert(key.to_lowercase(), value.to_string());
            }
        }
    }
    map
}

fn parse_stream(stream: &Value, format_duration: Option<f64>) -> TrackInfo {
    let index = stream["index"].as_i64().unwrap_or(0);
    let codec_type = stream["codec_type"].as_str().unwrap_or("");
    let track_type = TrackType::parse(codec_type);

    let tags = &stream["tags"];
    let disposition = &stream["disposition"];

    // Stream duration: explicit field, then the matroska DURATION tag,
    // then the container duration.
    let duration_seconds = stream["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            tags.as_object().and_then(|o| {
                o.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("duration"))
                    .and_then(|(_, v)| v.as_str())
                    .and_then(super::progress::parse_ffmpeg_time)
            })
        })
        .or(format_duration);

    let mut track = TrackInfo::new(index, track_type);
    track.codec = stream["codec_name"].as_str().map(str::to_string);
    track.language = tags["language"].as_str().map(str::to_string);
    track.title = tags["title"]
        .as_str()
        .or_else(|| tags["filename"].as_str())
        .map(str::to_string);
    track.is_default = disposition["default"].as_i64() == Some(1);
    track.is_forced = disposition["forced"].as_i64() == Some(1);
    track.channels = stream["channels"].as_i64();
    track.channel_layout = stream["channel_layout"].as_str().map(str::to_string);
    track.width = stream["width"].as_i64();
    track.height = stream["height"].as_i64();
    track.frame_rate = stream["r_frame_rate"].as_str().map(str::to_string);
    track.avg_frame_rate = stream["avg_frame_rate"].as_str().map(str::to_string);
    track.color_transfer = stream["color_transfer"].as_str().map(str::to_string);
    track.color_primaries = stream["color_primaries"].as_str().map(str::to_string);
    track.color_space = stream["color_space"].as_str().map(str::to_string);
    track.color_range = stream["color_range"].as_str().map(str::to_string);
    track.duration_seconds = duration_seconds;
    track
}

/// Bitrate of the primary video stream, from either the stream or the
/// container metadata.
pub fn video_bitrate_from_probe(json: &Value) -> Option<u64> {
    if let Some(streams) = json["streams"].as_array() {
        for stream in streams {
            if stream["codec_type"].as_str() == Some("video") {
                if let Some(rate) = stream["bit_rate"].as_str().and_then(|b| b.parse().ok()) {
                    return Some(rate);
                }
            }
        }
    }
    json["format"]["bit_rate"]
        .as_str()
        .and_then(|b| b.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_parsing_covers_video_fields() {
        let stream = json!({
            "index": 0,
            "codec_type": "video",
            "codec_name": "hevc",
            "width": 3840,
            "height": 2160,
            "r_frame_rate": "24000/1001",
            "avg_frame_rate": "24000/1001",
            "color_transfer": "smpte2084",
            "color_primaries": "bt2020",
            "color_space": "bt2020nc",
            "color_range": "tv",
            "disposition": {"default": 1, "forced": 0},
            "tags": {"language": "und"}
        });

        let track = parse_stream(&stream, Some(7200.0));
        assert_eq!(track.track_type, TrackType::Video);
        assert_eq!(track.codec.as_deref(), Some("hevc"));
        assert_eq!(track.width, Some(3840));
        assert!(track.is_default);
        assert!(!track.is_forced);
        assert_eq!(track.color_transfer.as_deref(), Some("smpte2084"));
        assert_eq!(track.duration_seconds, Some(7200.0));
    }

    #[test]
    fn stream_duration_prefers_matroska_tag() {
        let stream = json!({
            "index": 1,
            "codec_type": "audio",
            "codec_name": "aac",
            "channels": 6,
            "channel_layout": "5.1",
            "disposition": {"default": 0, "forced": 0},
            "tags": {"language": "eng", "DURATION": "00:45:30.500000000"}
        });

        let track = parse_stream(&stream, Some(9999.0));
        assert_eq!(track.channels, Some(6));
        assert!((track.duration_seconds.unwrap() - 2730.5).abs() < 1e-6);
    }

    #[test]
    fn unknown_codec_type_maps_to_other() {
        let stream = json!({
            "index": 3,
            "codec_type": "data",
            "disposition": {},
            "tags": {}
        });
        let track = parse_stream(&stream, None);
        assert_eq!(track.track_type, TrackType::Other);
    }

    #[test]
    fn format_tags_lowercase_keys() {
        let tags = json!({"Title": "Movie", "ENCODER": "libebml"});
        let parsed = parse_tags(&tags);
        assert_eq!(parsed.get("title").map(String::as_str), Some("Movie"));
        assert_eq!(parsed.get("encoder").map(String::as_str), Some("libebml"));
    }

    #[test]
    fn bitrate_falls_back_to_container() {
        let probe = json!({
            "streams": [{"codec_type": "video"}],
            "format": {"bit_rate": "8000000"}
        });
        assert_eq!(video_bitrate_from_probe(&probe), Some(8_000_000));

        let probe = json!({
            "streams": [{"codec_type": "video", "bit_rate": "5000000"}],
            "format": {"bit_rate": "8000000"}
        });
        assert_eq!(video_bitrate_from_probe(&probe), Some(5_000_000));
    }
}
