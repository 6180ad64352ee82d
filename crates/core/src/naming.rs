const MAX_TITLE_CHARS: usize = 72;

/// Derive a chat title from its first user turn.
pub fn title_from_first_prompt(prompt: &str) -> Option<String> {
    let normalized = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return None;
    }

    let mut out: String = normalized.chars().take(MAX_TITLE_CHARS).collect();
    if normalized.chars().count() > MAX_TITLE_CHARS {
        out.push('…');
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::title_from_first_prompt;

    #[test]
    fn blank_prompt_has_no_title() {
        assert!(title_from_first_prompt("   \n\t ").is_none());
    }

    #[test]
    fn truncates_and_normalizes_prompt() {
        let prompt =
            "  Please investigate auth race conditions and\n propose a safe migration plan.  ";
        let title = title_from_first_prompt(prompt).expect("expected title");
        assert_eq!(
            title,
            "Please investigate auth race conditions and propose a safe migration pla…"
        );
    }
}
