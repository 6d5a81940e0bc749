//! Codec alias matching and bitrate parsing.
//!
//! Probe output, policy files and FFmpeg encoder names all spell codecs
//! differently (`hevc` / `h265` / `x265`, `h264` / `avc`). Policy
//! comparisons go through the canonical form so any spelling matches.

use crate::error::{Error, Result};

/// Canonical name for a video codec, folding known aliases.
pub fn canonical_video_codec(codec: &str) -> String {
    let c = codec.trim().to_ascii_lowercase();
    match c.as_str() {
        "hevc" | "h265" | "h.265" | "x265" | "hev1" | "hvc1" => "hevc".to_string(),
        "h264" | "h.264" | "avc" | "avc1" | "x264" => "h264".to_string(),
        "av1" | "av01" => "av1".to_string(),
        "vp9" | "vp09" => "vp9".to_string(),
        "vp8" | "vp08" => "vp8".to_string(),
        "mpeg2" | "mpeg2video" | "mpeg-2" => "mpeg2".to_string(),
        "mpeg4" | "mpeg-4" | "divx" | "xvid" => "mpeg4".to_string(),
        _ => c,
    }
}

/// True when two video codec names refer to the same codec.
pub fn video_codec_matches(a: &str, b: &str) -> bool {
    canonical_video_codec(a) == canonical_video_codec(b)
}

/// Canonical name for an audio codec, folding known aliases.
pub fn canonical_audio_codec(codec: &str) -> String {
    let c = codec.trim().to_ascii_lowercase();
    match c.as_str() {
        "aac" | "mp4a" | "aac_latm" => "aac".to_string(),
        "ac3" | "ac-3" | "dd" => "ac3".to_string(),
        "eac3" | "e-ac-3" | "ec-3" | "ddp" | "dd+" => "eac3".to_string(),
        "dts" | "dca" => "dts".to_string(),
        "truehd" | "mlp" => "truehd".to_string(),
        "opus" | "libopus" => "opus".to_string(),
        "mp3" | "mp3float" | "libmp3lame" => "mp3".to_string(),
        "vorbis" | "libvorbis" => "vorbis".to_string(),
        "flac" => "flac".to_string(),
        _ => c,
    }
}

/// True when two audio codec names refer to the same codec.
pub fn audio_codec_matches(a: &str, b: &str) -> bool {
    canonical_audio_codec(a) == canonical_audio_codec(b)
}

/// Parse a bitrate string like `"640k"`, `"15M"` or `"8000000"` into
/// bits per second.
pub fn parse_bitrate(value: &str) -> Result<u64> {
    let s = value.trim();
    if s.is_empty() {
        return Err(Error::InvalidInput("empty bitrate string".to_string()));
    }

    let (number, multiplier) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1_000u64),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1_000_000u64),
        Some('g') | Some('G') => (&s[..s.len() - 1], 1_000_000_000u64),
        _ => (s, 1u64),
    };

    let parsed: f64 = number
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid bitrate string: {value:?}")))?;
    if !parsed.is_finite() || parsed <= 0.0 {
        return Err(Error::InvalidInput(format!(
            "invalid bitrate string: {value:?}"
        )));
    }

    Ok((parsed * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hevc_aliases_match() {
        assert!(video_codec_matches("hevc", "h265"));
        assert!(video_codec_matches("x265", "HEVC"));
        assert!(video_codec_matches("hvc1", "hevc"));
        assert!(!video_codec_matches("hevc", "h264"));
    }

    #[test]
    fn h264_aliases_match() {
        assert!(video_codec_matches("h264", "avc"));
        assert!(video_codec_matches("avc1", "x264"));
    }

    #[test]
    fn audio_aliases_match() {
        assert!(audio_codec_matches("eac3", "E-AC-3"));
        assert!(audio_codec_matches("dca", "dts"));
        assert!(!audio_codec_matches("aac", "ac3"));
    }

    #[test]
    fn bitrate_suffixes() {
        assert_eq!(parse_bitrate("640k").unwrap(), 640_000);
        assert_eq!(parse_bitrate("15M").unwrap(), 15_000_000);
        assert_eq!(parse_bitrate("1.5M").unwrap(), 1_500_000);
        assert_eq!(parse_bitrate("8000000").unwrap(), 8_000_000);
    }

    #[test]
    fn invalid_bitrates_are_rejected() {
        assert!(parse_bitrate("").is_err());
        assert!(parse_bitrate("fast").is_err());
        assert!(parse_bitrate("-5M").is_err());
    }
}
