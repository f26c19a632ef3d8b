//! Rendering of resolved issues into chat markup.

use crate::tracker::ResolvedIssue;

pub const DEFAULT_MAX_CHARS: usize = 3000;
const ELLIPSIS: &str = "...";

/// Escape the characters the chat markup treats as structure.
pub fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Cap `text` at `max_chars` characters. Longer text keeps its first
/// `max_chars - 3` characters followed by `...`.
pub fn truncate_message(text: String, max_chars: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text;
    };
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let end = text
        .char_indices()
        .nth(keep)
        .map(|(idx, _)| idx)
        .unwrap_or(cut);
    let mut out = String::with_capacity(end + ELLIPSIS.len());
    out.push_str(&text[..end]);
    out.push_str(ELLIPSIS);
    out
}

#[derive(Clone, Debug)]
pub struct MessageFormatter {
    issue_link_base: String,
    max_chars: usize,
}

impl MessageFormatter {
    /// `issue_link_base` is the tracker web root; links point at
    /// `{base}/issue/{ID}`.
    pub fn new(issue_link_base: impl Into<String>, max_chars: usize) -> Self {
        Self {
            issue_link_base: issue_link_base.into().trim_end_matches('/').to_string(),
            max_chars,
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn issue_url(&self, display_id: &str) -> String {
        format!("{}/issue/{}", self.issue_link_base, display_id)
    }

    /// `<link|ID> - summary`, then the description on the next line.
    pub fn format(&self, issue: &ResolvedIssue) -> String {
        let display_id = issue.display_id.to_uppercase();
        let summary = escape_markup(&issue.summary);
        let description = escape_markup(&issue.description);

        let mut text = format!(
            "<{}|{}> - {}",
            self.issue_url(&display_id),
            display_id,
            summary
        );
        if !description.is_empty() {
            text.push('\n');
            text.push_str(&description);
        }
        truncate_message(text, self.max_chars)
    }
}

/// Warning sent instead of per-issue replies when a message mentions too
/// many issues.
pub fn spam_warning(count: usize) -> String {
    format!(
        "{} issues in one message?! Do you want Skynet?! Because this is how you get Skynet!",
        count
    )
}
