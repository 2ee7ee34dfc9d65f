//! Turns raw backend text into verdicts. Total: every input yields a verdict.

use crate::models::{Suitability, Target, Verdict};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;

static OPENING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```[A-Za-z0-9_+\-]*").expect("opening fence pattern"));
static CLOSING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```\s*$").expect("closing fence pattern"));

/// Outcome of decoding backend output.
///
/// `Fallback` is an expected result, not an error: generative backends
/// regularly ignore the response contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Structured(Verdict),
    Fallback(Verdict),
}

impl Decoded {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Decoded::Fallback(_))
    }

    pub fn into_verdict(self) -> Verdict {
        match self {
            Decoded::Structured(v) | Decoded::Fallback(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    suitable: Value,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    blockers: Option<Vec<String>>,
    #[serde(default)]
    feature_loss: Option<Vec<String>>,
    #[serde(default)]
    warnings: Option<Vec<String>>,
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl From<RawVerdict> for Verdict {
    fn from(raw: RawVerdict) -> Self {
        let suitable = match raw.suitable {
            Value::Bool(true) => Suitability::Suitable,
            Value::Bool(false) => Suitability::NotSuitable,
            _ => Suitability::Unknown,
        };

        Self {
            suitable,
            target: raw
                .target
                .as_deref()
                .map(Target::from_label)
                .unwrap_or_default(),
            blockers: raw.blockers.unwrap_or_default(),
            feature_loss: raw.feature_loss.unwrap_or_default(),
            warnings: raw.warnings.unwrap_or_default(),
            recommendation: raw.recommendation.unwrap_or_default(),
            error: raw.error,
        }
    }
}

/// Removes one leading fence marker (with optional language tag) and one
/// trailing fence marker. Text without markers is returned unchanged.
pub fn strip_code_fences(text: &str) -> String {
    let without_open = OPENING_FENCE.replace(text, "");
    CLOSING_FENCE.replace(&without_open, "").into_owned()
}

/// Strips fences, trims, and decodes into a verdict.
pub fn decode_verdict(raw: &str) -> Decoded {
    let cleaned = strip_code_fences(raw);
    let cleaned = cleaned.trim();

    match serde_json::from_str::<RawVerdict>(cleaned) {
        Ok(parsed) => Decoded::Structured(parsed.into()),
        Err(e) => {
            tracing::warn!("Backend output is not a verdict object ({}); keeping raw text", e);
            Decoded::Fallback(Verdict::fallback(cleaned))
        }
    }
}

/// Convenience wrapper returning the verdict of either outcome.
pub fn parse_verdict(raw: &str) -> Verdict {
    decode_verdict(raw).into_verdict()
}
