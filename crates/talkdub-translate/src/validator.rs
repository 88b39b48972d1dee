//! Translation quality validation.
//!
//! Each translated item is checked against its source; issues carry a
//! severity. The batch passes iff critical issues stay under 10% of the
//! items — warnings and informational findings are logged but never fail a
//! chunk on their own.

use once_cell::sync::Lazy;
use regex::Regex;

use talkdub_utils::types::Language;

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Counts toward the batch failure threshold.
    Critical,
    Warning,
    Info,
}

/// One validation finding for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub index: usize,
    pub severity: Severity,
    pub message: String,
}

/// Hiragana, katakana, and CJK unified ideographs.
static JAPANESE_CODEPOINTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{3040}-\u{309f}\u{30a0}-\u{30ff}\u{4e00}-\u{9fff}]").unwrap());

/// Only whitespace and punctuation/symbols.
static SYMBOLS_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s\p{P}\p{S}]+$").unwrap());

/// Fraction of items that may be critical before the batch fails.
const CRITICAL_THRESHOLD: f64 = 0.1;

/// Validate a batch of translations against their sources.
///
/// Returns `(pass, issues)`; `pass` is false when critical findings reach
/// 10% of the batch.
#[must_use]
pub fn validate_batch(
    originals: &[String],
    translations: &[String],
    src_lang: Language,
    tgt_lang: Language,
    min_length_ratio: f64,
    max_length_ratio: f64,
) -> (bool, Vec<ValidationIssue>) {
    let mut issues = Vec::new();
    let mut critical = 0usize;

    for (i, (orig, trans)) in originals.iter().zip(translations.iter()).enumerate() {
        if trans.trim().is_empty() {
            issues.push(ValidationIssue {
                index: i,
                severity: Severity::Critical,
                message: format!("segment {i}: empty translation"),
            });
            critical += 1;
            continue;
        }

        let orig_len = orig.chars().count();
        let trans_len = trans.chars().count();
        let ratio = if orig_len > 0 {
            trans_len as f64 / orig_len as f64
        } else {
            0.0
        };

        if orig_len > 0 && ratio < min_length_ratio {
            issues.push(ValidationIssue {
                index: i,
                severity: Severity::Warning,
                message: format!("segment {i}: translation too short (ratio={ratio:.2})"),
            });
        } else if ratio > max_length_ratio {
            issues.push(ValidationIssue {
                index: i,
                severity: Severity::Warning,
                message: format!("segment {i}: translation too long (ratio={ratio:.2})"),
            });
        }

        if src_lang == Language::Ja
            && tgt_lang == Language::En
            && JAPANESE_CODEPOINTS.is_match(trans)
        {
            issues.push(ValidationIssue {
                index: i,
                severity: Severity::Warning,
                message: format!("segment {i}: Japanese characters remain in English translation"),
            });
        }

        if SYMBOLS_ONLY.is_match(trans) {
            issues.push(ValidationIssue {
                index: i,
                severity: Severity::Warning,
                message: format!("segment {i}: translation contains only symbols/whitespace"),
            });
        }

        if orig.trim() == trans.trim() {
            issues.push(ValidationIssue {
                index: i,
                severity: Severity::Info,
                message: format!(
                    "segment {i}: translation identical to source (may be intentional)"
                ),
            });
        }
    }

    let pass = (critical as f64) < (originals.len() as f64) * CRITICAL_THRESHOLD;
    (pass, issues)
}
