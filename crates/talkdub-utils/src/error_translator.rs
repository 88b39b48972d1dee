//! User-facing error translation.
//!
//! Phases fail with technical messages from external tools (yt-dlp, ffmpeg,
//! the separator, the recognizer, HTTP stacks). Before one of those reaches
//! a user it passes through an ordered pattern table that rewrites known
//! failures into plain sentences; anything unknown is stripped of technical
//! noise and capped at 200 characters.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Maximum length of an untranslated, simplified message.
const MAX_FALLBACK_LEN: usize = 200;

struct Translation {
    pattern: Regex,
    message: &'static str,
}

fn case_insensitive(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("static translation pattern must compile")
}

static TRANSLATIONS: Lazy<Vec<Translation>> = Lazy::new(|| {
    vec![
        // Source download
        Translation {
            pattern: case_insensitive(r"ERROR: \[youtube\] .+: Video unavailable"),
            message:
                "The video is not viewable (it may be deleted, private, or region-restricted).",
        },
        Translation {
            pattern: case_insensitive(r"ERROR: \[youtube\] .+: This video requires payment"),
            message: "The video is paid content and cannot be processed.",
        },
        Translation {
            pattern: case_insensitive(r"ERROR: \[youtube\] .+: Sign in to confirm your age"),
            message: "The video requires age verification and cannot be processed.",
        },
        // Audio conversion
        Translation {
            pattern: case_insensitive(r"Invalid data found when processing input"),
            message: "The audio stream is malformed (the source file may be corrupted).",
        },
        Translation {
            pattern: case_insensitive(r"Conversion failed"),
            message: "Audio conversion failed (the format may be unsupported).",
        },
        // Source separation
        Translation {
            pattern: case_insensitive(r"RuntimeError: The size of tensor .+ must match"),
            message: "Source separation ran out of memory (the video may be too long).",
        },
        // Speech recognition
        Translation {
            pattern: case_insensitive(r"No speech found in audio"),
            message: "No speech was detected (the audio may be silent or noise only).",
        },
        Translation {
            pattern: case_insensitive(r"Language .+ not supported"),
            message: "The requested language is not supported.",
        },
        // Generic
        Translation {
            pattern: case_insensitive(r"Timeout"),
            message: "Processing exceeded the time limit (the video may be too long, or the \
                      server is under heavy load).",
        },
        Translation {
            pattern: case_insensitive(r"Out of memory|OOM"),
            message: "Memory was exhausted (the video may be too long).",
        },
        Translation {
            pattern: case_insensitive(r"Connection (?:refused|timeout|timed out|reset)"),
            message: "A network connection failed (this is likely temporary; please try again \
                      later).",
        },
    ]
});

static BRACKETED_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[.*?\]").expect("static pattern must compile"));
static FILE_LINE_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"File ".*?", line \d+"#).expect("static pattern must compile"));

/// Translate a technical error message into a user-facing sentence.
#[must_use]
pub fn translate(technical_error: &str) -> String {
    for t in TRANSLATIONS.iter() {
        if t.pattern.is_match(technical_error) {
            return t.message.to_string();
        }
    }
    simplify(technical_error)
}

/// Strip technical noise and cap the length of an unrecognized message.
fn simplify(technical_error: &str) -> String {
    let simplified = BRACKETED_NOISE.replace_all(technical_error, "");
    let simplified = FILE_LINE_NOISE.replace_all(&simplified, "");
    let simplified = simplified.trim();

    if simplified.is_empty() {
        return "An unexpected error occurred.".to_string();
    }

    if simplified.chars().count() > MAX_FALLBACK_LEN {
        let truncated: String = simplified.chars().take(MAX_FALLBACK_LEN).collect();
        format!("{truncated}...")
    } else {
        simplified.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translates_video_unavailable() {
        let msg = translate("ERROR: [youtube] dQw4w9WgXcQ: Video unavailable");
        assert!(msg.contains("not viewable"));
    }

    #[test]
    fn test_translates_timeout() {
        let msg = translate("Timeout after 3600s");
        assert!(msg.contains("time limit"));
    }

    #[test]
    fn test_translates_oom() {
        assert!(translate("process killed: OOM").contains("Memory was exhausted"));
        assert!(translate("CUDA out of memory").contains("Memory was exhausted"));
    }

    #[test]
    fn test_translates_connection_errors() {
        assert!(translate("Connection refused (os error 111)").contains("network"));
        assert!(translate("connection reset by peer").contains("network"));
    }

    #[test]
    fn test_unknown_error_is_simplified_and_capped() {
        let long = format!("something odd happened: {}", "x".repeat(400));
        let msg = translate(&long);
        assert!(msg.chars().count() <= MAX_FALLBACK_LEN + 3);
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn test_unknown_error_strips_noise() {
        let msg = translate(r#"[tool] crashed at File "runner.py", line 42"#);
        assert!(!msg.contains("[tool]"));
        assert!(!msg.contains("line 42"));
    }

    #[test]
    fn test_empty_after_simplification() {
        assert_eq!(translate("[only][noise]"), "An unexpected error occurred.");
    }
}
