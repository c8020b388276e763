//! Safety checks for generated CSS

use crate::generator::GeneratorError;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

static IMPORT_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)@import\s*[^;]*;?").expect("valid import pattern"));
static JS_PROTOCOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript\s*:").expect("valid protocol pattern"));
static EXPRESSION_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)expression\s*\([^)]*\)").expect("valid expression pattern"));

/// Check that css is non-empty, brace-balanced and free of active content
pub fn validate_css(css: &str) -> Result<(), String> {
    if css.trim().is_empty() {
        return Err("CSS is empty".to_string());
    }

    let mut problems = Vec::new();

    let open = css.matches('{').count();
    let close = css.matches('}').count();
    if open != close {
        problems.push(format!("Mismatched braces: {} open, {} close", open, close));
    }
    if IMPORT_RULE.is_match(css) {
        problems.push("@import detected".to_string());
    }
    if JS_PROTOCOL.is_match(css) {
        problems.push("javascript: protocol detected".to_string());
    }
    if EXPRESSION_CALL.is_match(css) {
        problems.push("CSS expression detected".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("; "))
    }
}

/// Strip `@import`, `javascript:` and `expression()` constructs
pub fn sanitize_css(css: &str) -> String {
    let css = IMPORT_RULE.replace_all(css, "");
    let css = JS_PROTOCOL.replace_all(&css, "");
    EXPRESSION_CALL.replace_all(&css, "").into_owned()
}

/// Sanitize generator output and make sure what remains is usable
pub fn clean_css(raw: &str) -> Result<String, GeneratorError> {
    let cleaned = sanitize_css(raw);
    if cleaned.len() != raw.len() {
        warn!(
            "Stripped {} bytes of unsafe constructs from generated css",
            raw.len() - cleaned.len()
        );
    }
    validate_css(&cleaned).map_err(GeneratorError::Invalid)?;
    debug!("Generated css passed validation ({} bytes)", cleaned.len());
    Ok(cleaned)
}
