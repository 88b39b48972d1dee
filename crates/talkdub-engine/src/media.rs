//! ffmpeg/ffprobe wrappers and WAV inspection.
//!
//! The audio tools are external collaborators; this module narrows them to
//! the handful of operations the phases need and keeps subprocess plumbing
//! out of phase logic.

use camino::Utf8Path;
use std::time::Duration;

use talkdub_config::EngineConfig;
use talkdub_utils::process::{CommandSpec, ProcessError, run_checked};

/// Probe the duration of an audio file in seconds.
pub async fn probe_duration(
    engines: &EngineConfig,
    audio_path: &Utf8Path,
) -> Result<f64, ProcessError> {
    let spec = CommandSpec::new(&engines.ffprobe, Duration::from_secs(30)).args([
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "json",
        audio_path.as_str(),
    ]);

    let output = run_checked(&spec).await?;

    let parsed: serde_json::Value =
        serde_json::from_str(&output.stdout).map_err(|e| ProcessError::NonZeroExit {
            program: engines.ffprobe.clone(),
            exit_code: 0,
            stderr: format!("unparsable ffprobe output: {e}"),
        })?;

    parsed["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| ProcessError::NonZeroExit {
            program: engines.ffprobe.clone(),
            exit_code: 0,
            stderr: "ffprobe output missing format.duration".to_string(),
        })
}

/// Loudness-normalize and resample to 16 kHz mono.
pub async fn normalize_audio(
    engines: &EngineConfig,
    input: &Utf8Path,
    output: &Utf8Path,
    timeout: Duration,
) -> Result<(), ProcessError> {
    let spec = CommandSpec::new(&engines.ffmpeg, timeout).args([
        "-i",
        input.as_str(),
        "-af",
        "loudnorm=I=-23:TP=-2:LRA=7,aresample=16000",
        "-ac",
        "1",
        "-ar",
        "16000",
        "-y",
        output.as_str(),
    ]);
    run_checked(&spec).await.map(|_| ())
}

/// Cut `[start, start+duration)` out of an audio file (stream copy).
pub async fn extract_segment(
    engines: &EngineConfig,
    input: &Utf8Path,
    output: &Utf8Path,
    start_sec: f64,
    duration_sec: f64,
) -> Result<(), ProcessError> {
    let start = format!("{start_sec:.3}");
    let duration = format!("{duration_sec:.3}");
    let spec = CommandSpec::new(&engines.ffmpeg, Duration::from_secs(300)).args([
        "-i",
        input.as_str(),
        "-ss",
        start.as_str(),
        "-t",
        duration.as_str(),
        "-c",
        "copy",
        "-y",
        output.as_str(),
    ]);
    run_checked(&spec).await.map(|_| ())
}

/// Facts about a WAV file, read without external tools.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavStats {
    pub duration_sec: f64,
    /// Root-mean-square amplitude, normalized to [0, 1].
    pub rms: f64,
    /// Fraction of samples above 99% of full scale.
    pub clipping_ratio: f64,
}

/// Read duration, RMS, and clipping ratio from a 16-bit PCM WAV file.
pub fn wav_stats(path: &Utf8Path) -> Result<WavStats, String> {
    let mut reader = hound::WavReader::open(path.as_std_path())
        .map_err(|e| format!("failed to open wav {path}: {e}"))?;
    let spec = reader.spec();

    let mut count = 0u64;
    let mut sum_squares = 0.0f64;
    let mut clipped = 0u64;

    match spec.sample_format {
        hound::SampleFormat::Int => {
            let full_scale = f64::from(i32::from(i16::MAX));
            for sample in reader.samples::<i16>() {
                let s = f64::from(sample.map_err(|e| format!("bad sample in {path}: {e}"))?)
                    / full_scale;
                sum_squares += s * s;
                if s.abs() > 0.99 {
                    clipped += 1;
                }
                count += 1;
            }
        }
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                let s = f64::from(sample.map_err(|e| format!("bad sample in {path}: {e}"))?);
                sum_squares += s * s;
                if s.abs() > 0.99 {
                    clipped += 1;
                }
                count += 1;
            }
        }
    }

    if count == 0 {
        return Err(format!("wav {path} contains no samples"));
    }

    let frames = count / u64::from(spec.channels.max(1));
    Ok(WavStats {
        duration_sec: frames as f64 / f64::from(spec.sample_rate),
        rms: (sum_squares / count as f64).sqrt(),
        clipping_ratio: clipped as f64 / count as f64,
    })
}

/// Validate a synthesized segment: present, non-trivial size, duration in
/// the expected band, audibly non-silent. Clipping is reported but not
/// fatal.
pub fn validate_tts_output(
    path: &Utf8Path,
    expected_duration_range: (f64, f64),
    min_rms: f64,
) -> Result<WavStats, String> {
    if !path.exists() {
        return Err(format!("audio file not found: {path}"));
    }
    let size = std::fs::metadata(path.as_std_path())
        .map(|m| m.len())
        .unwrap_or(0);
    if size < 10 * 1024 {
        return Err(format!("audio file too small: {size} bytes"));
    }

    let stats = wav_stats(path)?;

    let (min_dur, max_dur) = expected_duration_range;
    if stats.duration_sec < min_dur {
        return Err(format!(
            "audio too short: {:.2}s < {min_dur:.2}s",
            stats.duration_sec
        ));
    }
    if stats.duration_sec > max_dur {
        return Err(format!(
            "audio too long: {:.2}s > {max_dur:.2}s",
            stats.duration_sec
        ));
    }

    if stats.rms < min_rms {
        return Err(format!("audio appears silent: rms={:.6}", stats.rms));
    }

    if stats.clipping_ratio > 0.01 {
        tracing::warn!(path = %path, ratio = stats.clipping_ratio, "audio clipping detected");
    }

    Ok(stats)
}
