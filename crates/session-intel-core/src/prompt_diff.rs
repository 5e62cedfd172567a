//! Line diffs between an original prompt and its rewrite.

use similar::TextDiff;

const CONTEXT_LINES: usize = 3;

/// Unified line diff from `original` to `rewritten`, hunks only.
///
/// Returns an empty string when the two texts are identical after trimming
/// trailing whitespace.
pub fn diff_prompts(original: &str, rewritten: &str) -> String {
    let old = normalized(original);
    let new = normalized(rewritten);
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(&old, &new)
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .missing_newline_hint(false)
        .to_string()
}

fn normalized(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_prompts_have_empty_diff() {
        assert_eq!(diff_prompts("same\n", "same"), "");
        assert_eq!(diff_prompts("", "  \n"), "");
    }

    #[test]
    fn changed_line_shows_both_sides() {
        let diff = diff_prompts(
            "How do I fetch data?",
            "How do I fetch data?\nRemind me how useEffect cleanup works.",
        );
        assert!(diff.starts_with("@@"));
        assert!(diff.contains("+Remind me how useEffect cleanup works."));
        assert!(!diff.contains("---"));
        assert!(!diff.contains("+++"));
    }

    #[test]
    fn replaced_line_is_removed_and_added() {
        let diff = diff_prompts("fix the bug", "fix the race in the file watcher");
        assert!(diff.contains("-fix the bug"));
        assert!(diff.contains("+fix the race in the file watcher"));
    }
}
