use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest free-text note kept on a feedback record
pub const MAX_FEEDBACK_TEXT_CHARS: usize = 200;

/// Canned reactions offered by the feedback surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackPreset {
    TooModern,
    TooSimple,
    SimplifyLayout,
    MakeUsable,
    Regenerate,
    Good,
    Other,
}

impl FeedbackPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackPreset::TooModern => "too_modern",
            FeedbackPreset::TooSimple => "too_simple",
            FeedbackPreset::SimplifyLayout => "simplify_layout",
            FeedbackPreset::MakeUsable => "make_usable",
            FeedbackPreset::Regenerate => "regenerate",
            FeedbackPreset::Good => "good",
            FeedbackPreset::Other => "other",
        }
    }
}

impl fmt::Display for FeedbackPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedbackError {
    #[error("feedback needs a preset type or non-empty text")]
    Empty,
}

/// One user-supplied signal about a generated style
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub preset_type: Option<FeedbackPreset>,
    pub free_text: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl Feedback {
    /// Build a validated feedback record
    ///
    /// Text is trimmed and capped at [`MAX_FEEDBACK_TEXT_CHARS`] characters;
    /// whitespace-only text counts as absent.
    pub fn new(
        preset_type: Option<FeedbackPreset>,
        free_text: Option<&str>,
        submitted_at: DateTime<Utc>,
    ) -> Result<Self, FeedbackError> {
        let free_text = free_text
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(|text| text.chars().take(MAX_FEEDBACK_TEXT_CHARS).collect::<String>());

        let feedback = Self {
            preset_type,
            free_text,
            submitted_at,
        };
        feedback.validate()?;
        Ok(feedback)
    }

    /// Check the record carries a preset or some text
    pub fn validate(&self) -> Result<(), FeedbackError> {
        let has_text = self
            .free_text
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty());
        if self.preset_type.is_none() && !has_text {
            return Err(FeedbackError::Empty);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_only() {
        let fb = Feedback::new(Some(FeedbackPreset::TooModern), None, Utc::now()).unwrap();
        assert_eq!(fb.preset_type, Some(FeedbackPreset::TooModern));
        assert_eq!(fb.free_text, None);
    }

    #[test]
    fn test_text_only_is_trimmed() {
        let fb = Feedback::new(None, Some("  more gray please "), Utc::now()).unwrap();
        assert_eq!(fb.free_text.as_deref(), Some("more gray please"));
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(
            Feedback::new(None, None, Utc::now()).unwrap_err(),
            FeedbackError::Empty
        );
        assert_eq!(
            Feedback::new(None, Some("   "), Utc::now()).unwrap_err(),
            FeedbackError::Empty
        );
    }

    #[test]
    fn test_text_is_capped() {
        let long = "é".repeat(MAX_FEEDBACK_TEXT_CHARS + 50);
        let fb = Feedback::new(None, Some(&long), Utc::now()).unwrap();
        assert_eq!(
            fb.free_text.unwrap().chars().count(),
            MAX_FEEDBACK_TEXT_CHARS
        );
    }

    #[test]
    fn test_wire_format() {
        let fb: Feedback = serde_json::from_str(
            r#"{"presetType":"simplify_layout","freeText":null,"submittedAt":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(fb.preset_type, Some(FeedbackPreset::SimplifyLayout));
        assert!(fb.validate().is_ok());
    }
}
