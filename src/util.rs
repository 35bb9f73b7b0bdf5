/// Titles derived from post text are capped at this many characters.
pub const TITLE_MAX_CHARS: usize = 120;

/// Builds an article title from post text: the first [`TITLE_MAX_CHARS`]
/// characters with a trailing ellipsis when truncated, or the permalink
/// when the post carries no text at all.
pub fn title_from_text(text: &str, permalink: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return permalink.to_string();
    }
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_kept_verbatim() {
        assert_eq!(title_from_text("Hello", "https://t.me/a/1"), "Hello");
    }

    #[test]
    fn long_text_is_truncated_with_ellipsis() {
        let text = "x".repeat(200);
        let title = title_from_text(&text, "https://t.me/a/1");
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn exactly_max_chars_is_not_truncated() {
        let text = "y".repeat(TITLE_MAX_CHARS);
        assert_eq!(title_from_text(&text, "link"), text);
    }

    #[test]
    fn empty_text_falls_back_to_permalink() {
        assert_eq!(title_from_text("  ", "https://vk.com/wall-1_2"), "https://vk.com/wall-1_2");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "я".repeat(150);
        let title = title_from_text(&text, "link");
        assert!(title.starts_with(&"я".repeat(TITLE_MAX_CHARS)));
        assert!(title.ends_with('…'));
    }
}
