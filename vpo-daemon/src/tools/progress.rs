//! FFmpeg progress parsing and encoding metrics.
//!
//! FFmpeg reports progress on stderr in `key=value` tokens
//! (`frame= 123 fps= 48 ... time=00:01:02.03 bitrate= 850.2kbits/s
//! speed=1.9x`). The parser is token-based; anything unrecognized is
//! ignored so changed ffmpeg builds degrade gracefully.

use vpo_common::db::models::JobProgress;

/// One parsed progress sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FfmpegProgress {
    pub frame: Option<i64>,
    pub fps: Option<f64>,
    pub time_seconds: Option<f64>,
    pub bitrate_kbps: Option<f64>,
    pub size_bytes: Option<i64>,
    pub speed: Option<f64>,
}

/// Parse `HH:MM:SS.ms` (or a bare seconds number) into seconds.
pub fn parse_ffmpeg_time(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" {
        return None;
    }
    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() == 3 {
            let h: f64 = parts[0].parse().ok()?;
            let m: f64 = parts[1].parse().ok()?;
            let sec: f64 = parts[2].parse().ok()?;
            return Some(h * 3600.0 + m * 60.0 + sec);
        }
        return None;
    }
    s.parse().ok()
}

/// Parse one stderr line into a progress sample. Returns None for lines
/// that carry no progress information.
pub fn parse_progress_line(line: &str) -> Option<FfmpegProgress> {
    if !line.contains("time=") && !line.contains("frame=") {
        return None;
    }

    let mut progress = FfmpegProgress::default();

    // ffmpeg pads values after '=' ("frame=  123"); collapse the padding
    // so the line splits into clean key=value tokens.
    let mut normalized = line.to_string();
    while normalized.contains("= ") {
        normalized = normalized.replace("= ", "=");
    }

    for token in normalized.split_whitespace() {
        if let Some(value) = token.strip_prefix("frame=") {
            progress.frame = value.parse().ok();
        } else if let Some(value) = token.strip_prefix("fps=") {
            progress.fps = value.parse().ok();
        } else if let Some(value) = token.strip_prefix("time=") {
            progress.time_seconds = parse_ffmpeg_time(value);
        } else if let Some(value) = token.strip_prefix("bitrate=") {
            let digits = value.trim_end_matches("kbits/s");
            progress.bitrate_kbps = digits.parse().ok();
        } else if let Some(value) = token.strip_prefix("size=") {
            let digits = value.trim_end_matches("kB");
            progress.size_bytes = digits.parse::<i64>().ok().map(|kb| kb * 1024);
        } else if let Some(value) = token.strip_prefix("Lsize=") {
            let digits = value.trim_end_matches("kB");
            progress.size_bytes = digits.parse::<i64>().ok().map(|kb| kb * 1024);
        } else if let Some(value) = token.strip_prefix("speed=") {
            progress.speed = value.trim_end_matches('x').parse().ok();
        }
    }

    if progress == FfmpegProgress::default() {
        None
    } else {
        Some(progress)
    }
}

/// Extract the total duration from ffmpeg's `Duration: 01:51:12.34, ...`
/// banner line.
pub fn parse_duration_line(line: &str) -> Option<f64> {
    let idx = line.find("Duration:")?;
    let rest = &line[idx + "Duration:".len()..];
    let time = rest.trim().split(',').next()?.trim();
    let seconds = parse_ffmpeg_time(time)?;
    (seconds > 0.0).then_some(seconds)
}

/// Accumulates samples into the metrics stored with processing stats.
#[derive(Debug, Clone, Default)]
pub struct EncodingMetrics {
    pub sample_count: u64,
    fps_sum: f64,
    fps_samples: u64,
    pub peak_fps: Option<f64>,
    bitrate_sum: f64,
    bitrate_samples: u64,
    pub total_frames: Option<i64>,
}

impl EncodingMetrics {
    pub fn record(&mut self, sample: &FfmpegProgress) {
        self.sample_count += 1;
        if let Some(fps) = sample.fps {
            if fps > 0.0 {
                self.fps_sum += fps;
                self.fps_samples += 1;
                self.peak_fps = Some(self.peak_fps.map_or(fps, |peak| peak.max(fps)));
            }
        }
        if let Some(bitrate) = sample.bitrate_kbps {
            if bitrate > 0.0 {
                self.bitrate_sum += bitrate;
                self.bitrate_samples += 1;
            }
        }
        if let Some(frame) = sample.frame {
            self.total_frames = Some(self.total_frames.map_or(frame, |f| f.max(frame)));
        }
    }

    pub fn avg_fps(&self) -> Option<f64> {
        (self.fps_samples > 0).then(|| self.fps_sum / self.fps_samples as f64)
    }

    pub fn avg_bitrate_kbps(&self) -> Option<i64> {
        (self.bitrate_samples > 0).then(|| (self.bitrate_sum / self.bitrate_samples as f64) as i64)
    }
}

/// Build the job progress blob from a sample and the known total
/// duration. Percent is derived from time when the total is known.
pub fn progress_to_job_blob(
    sample: &FfmpegProgress,
    total_duration: Option<f64>,
    frame_total: Option<i64>,
) -> JobProgress {
    let percent = match (sample.time_seconds, total_duration) {
        (Some(current), Some(total)) if total > 0.0 => ((current / total) * 100.0).clamp(0.0, 100.0),
        _ => 0.0,
    };

    let eta_s = match (sample.time_seconds, total_duration, sample.speed) {
        (Some(current), Some(total), Some(speed)) if speed > 0.0 && total > current => {
            Some(((total - current) / speed) as i64)
        }
        _ => None,
    };

    JobProgress {
        percent,
        frame_current: sample.frame,
        frame_total,
        time_current_s: sample.time_seconds,
        time_total_s: total_duration,
        fps: sample.fps,
        bitrate: sample.bitrate_kbps.map(|b| format!("{b:.1}kbits/s")),
        size_current: sample.size_bytes,
        eta_s,
    }
}
