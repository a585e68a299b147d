use crate::config::Theme;
use crate::models::ThemeMode;
use crate::ui::color_parser::parse_color;
use ratatui::style::Color;

#[derive(Debug, Clone)]
pub struct ThemeTokens {
    pub ui_border_default: Color,
    pub ui_border_active: Color,
    pub ui_border_editing: Color,
    pub ui_selection_bg: Color,
    pub ui_fg: Color,
    pub ui_muted: Color,
    pub task_done: Color,
    pub task_in_progress: Color,
    pub priority_high: Color,
    pub content_timestamp: Color,
    pub ui_toast_info: Color,
    pub ui_toast_success: Color,
    pub ui_toast_error: Color,
}

impl ThemeTokens {
    /// The workspace theme mode picks the selection background and the
    /// foreground used for regular text.
    pub fn from_theme(theme: &Theme, mode: ThemeMode) -> Self {
        let (ui_selection_bg, ui_fg, ui_muted) = match mode {
            ThemeMode::Light => (
                parse_color(&theme.text_highlight),
                Color::Reset,
                Color::DarkGray,
            ),
            ThemeMode::Dark => (
                parse_color(&theme.text_highlight_dark),
                Color::Gray,
                Color::Gray,
            ),
        };

        Self {
            ui_border_default: parse_color(&theme.border_default),
            ui_border_active: parse_color(&theme.border_active),
            ui_border_editing: parse_color(&theme.border_editing),
            ui_selection_bg,
            ui_fg,
            ui_muted,
            task_done: parse_color(&theme.task_done),
            task_in_progress: parse_color(&theme.task_in_progress),
            priority_high: parse_color(&theme.priority_high),
            content_timestamp: parse_color(&theme.timestamp),
            ui_toast_info: parse_color(&theme.toast_info),
            ui_toast_success: parse_color(&theme.toast_success),
            ui_toast_error: parse_color(&theme.toast_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ThemeTokens;
    use crate::config::Theme;
    use crate::models::ThemeMode;
    use ratatui::style::Color;

    #[test]
    fn maps_config_colors_to_tokens() {
        let theme = Theme {
            border_default: "Red".to_string(),
            border_active: "Cyan".to_string(),
            border_editing: "Green".to_string(),
            task_done: "LightGreen".to_string(),
            task_in_progress: "Yellow".to_string(),
            priority_high: "LightRed".to_string(),
            timestamp: "Blue".to_string(),
            ..Default::default()
        };

        let tokens = ThemeTokens::from_theme(&theme, ThemeMode::Light);
        assert_eq!(tokens.ui_border_default, Color::Red);
        assert_eq!(tokens.ui_border_active, Color::Cyan);
        assert_eq!(tokens.ui_border_editing, Color::Green);
        assert_eq!(tokens.task_done, Color::LightGreen);
        assert_eq!(tokens.task_in_progress, Color::Yellow);
        assert_eq!(tokens.priority_high, Color::LightRed);
        assert_eq!(tokens.content_timestamp, Color::Blue);
    }

    #[test]
    fn dark_mode_uses_dark_selection() {
        let theme = Theme {
            text_highlight: "1,2,3".to_string(),
            text_highlight_dark: "#0a141e".to_string(),
            ..Default::default()
        };
        let light = ThemeTokens::from_theme(&theme, ThemeMode::Light);
        let dark = ThemeTokens::from_theme(&theme, ThemeMode::Dark);
        assert_eq!(light.ui_selection_bg, Color::Rgb(1, 2, 3));
        assert_eq!(dark.ui_selection_bg, Color::Rgb(10, 20, 30));
    }
}
