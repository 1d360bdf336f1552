//! Prompt template rendering.

use crate::config::DIFF_PLACEHOLDER;
use crate::error::ProviderError;

/// Substitute `diff` into the single `{diff}` placeholder of `template`.
///
/// The emptiness check comes first so a blank diff is reported as
/// [`ProviderError::EmptyInput`] no matter what the template looks like.
/// Any other `{...}` sequence in the template is left as-is, and the diff
/// text itself is never re-scanned for placeholders.
pub fn render_prompt(diff: &str, template: &str) -> Result<String, ProviderError> {
    if diff.trim().is_empty() {
        return Err(ProviderError::EmptyInput);
    }

    let placeholders = template.matches(DIFF_PLACEHOLDER).count();
    if placeholders != 1 {
        return Err(ProviderError::Config(format!(
            "prompt template must contain exactly one {DIFF_PLACEHOLDER} placeholder, found {placeholders}"
        )));
    }

    Ok(template.replacen(DIFF_PLACEHOLDER, diff, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_diff() {
        let prompt = render_prompt("+line added", "Summarize: {diff}").unwrap();
        assert_eq!(prompt, "Summarize: +line added");
    }

    #[test]
    fn test_render_rejects_blank_diff() {
        assert!(matches!(
            render_prompt("   \n\t", "Summarize: {diff}"),
            Err(ProviderError::EmptyInput)
        ));
        // Empty input wins over a broken template.
        assert!(matches!(
            render_prompt("", "no placeholder"),
            Err(ProviderError::EmptyInput)
        ));
    }

    #[test]
    fn test_render_rejects_missing_placeholder() {
        let err = render_prompt("+x", "Summarize the change").unwrap_err();
        assert!(matches!(err, ProviderError::Config(ref m) if m.contains("found 0")));
    }

    #[test]
    fn test_other_braces_pass_through() {
        let prompt = render_prompt("+x", "Format as {type}: {summary}\n{diff}").unwrap();
        assert_eq!(prompt, "Format as {type}: {summary}\n+x");
    }

    #[test]
    fn test_diff_containing_placeholder_is_not_expanded() {
        let prompt = render_prompt("+let s = \"{diff}\";", "A {diff} B").unwrap();
        assert_eq!(prompt, "A +let s = \"{diff}\"; B");
    }
}
