use crate::models::{Priority, TaskStatus};
use crate::ui::theme::ThemeTokens;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::Span,
};
use regex::Regex;
use std::sync::OnceLock;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Helper function to calculate centered popup position
pub fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Cuts `text` to at most `max_width` display columns, ending with `…`
/// when anything was dropped.
pub fn truncate(text: &str, max_width: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let multiline = text.trim_end().contains('\n');
    if !multiline && first_line.width() <= max_width {
        return first_line.to_string();
    }
    let mut out = String::new();
    let mut width = 0;
    for c in first_line.chars() {
        let w = c.width().unwrap_or(0);
        if width + w + 1 > max_width {
            break;
        }
        width += w;
        out.push(c);
    }
    out.push('\u{2026}');
    out
}

/// Splits a line into plain and link spans; links get `link` style.
pub fn linkify(text: &str, base: Style, link: Style) -> Vec<Span<'static>> {
    static URL_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(url_regex) = URL_REGEX
        .get_or_init(|| {
            Regex::new(r"https?://[-a-zA-Z0-9+&@#/%?=~_|!:,.;]*[-a-zA-Z0-9+&@#/%=~_|]").ok()
        })
        .as_ref()
    else {
        return vec![Span::styled(text.to_string(), base)];
    };

    let mut spans = Vec::new();
    let mut last = 0;
    for mat in url_regex.find_iter(text) {
        if mat.start() > last {
            spans.push(Span::styled(text[last..mat.start()].to_string(), base));
        }
        spans.push(Span::styled(mat.as_str().to_string(), link));
        last = mat.end();
    }
    if last < text.len() || spans.is_empty() {
        spans.push(Span::styled(text[last..].to_string(), base));
    }
    spans
}

pub fn status_span(status: TaskStatus, tokens: &ThemeTokens) -> Span<'static> {
    match status {
        TaskStatus::Todo => Span::styled("[ ] ", Style::default().fg(tokens.ui_muted)),
        TaskStatus::InProgress => {
            Span::styled("[~] ", Style::default().fg(tokens.task_in_progress))
        }
        TaskStatus::Done => Span::styled("[x] ", Style::default().fg(tokens.task_done)),
    }
}

pub fn priority_span(priority: Priority, tokens: &ThemeTokens) -> Span<'static> {
    let (label, style) = match priority {
        Priority::High => (
            "high",
            Style::default()
                .fg(tokens.priority_high)
                .add_modifier(Modifier::BOLD),
        ),
        Priority::Medium => ("med", Style::default().fg(tokens.task_in_progress)),
        Priority::Low => ("low", Style::default().fg(tokens.ui_muted)),
    };
    Span::styled(format!(" {label}"), style)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linkify_splits_out_urls() {
        let base = Style::default();
        let link = Style::default().add_modifier(Modifier::UNDERLINED);
        let spans = linkify("see https://example.com/a?b=1. thanks", base, link);
        let texts: Vec<&str> = spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(texts, vec!["see ", "https://example.com/a?b=1", ". thanks"]);
        assert_eq!(spans[1].style, link);
    }

    #[test]
    fn linkify_keeps_plain_text_whole() {
        let spans = linkify("no links here", Style::default(), Style::default());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].content, "no links here");
    }

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 5), "hello");
    }

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate("hello world", 6), "hello\u{2026}");
        assert_eq!(truncate("first\nsecond", 20), "first\u{2026}");
    }

    #[test]
    fn truncate_counts_wide_characters() {
        assert_eq!(truncate("日本語テキスト", 7), "日本語\u{2026}");
    }
}
