use super::components::centered_rect;
use crate::app::App;
use crate::ui::theme::ThemeTokens;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

const SINGLE_LINE_HEIGHT: u16 = 3;
const MULTI_LINE_HEIGHT: u16 = 7;

pub fn render_form_popup(f: &mut Frame, app: &mut App, tokens: &ThemeTokens) {
    let confirm = fmt_keys(&app.config.keybindings.popup.confirm);
    let cancel = fmt_keys(&app.config.keybindings.popup.cancel);
    let next = fmt_keys(&app.config.keybindings.popup.next_field);
    let Some(form) = app.form.as_mut() else {
        return;
    };

    let fields_height: u16 = form
        .fields
        .iter()
        .map(|field| {
            if field.multiline {
                MULTI_LINE_HEIGHT
            } else {
                SINGLE_LINE_HEIGHT
            }
        })
        .sum();
    let screen = f.area();
    // Borders, margin and the footer line.
    let wanted = fields_height + 5;
    let percent_y = ((wanted as u32 * 100) / screen.height.max(1) as u32 + 1).min(90) as u16;
    let area = centered_rect(60, percent_y, screen);

    let block = Block::default()
        .title(form.kind.title())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(tokens.ui_border_active));
    f.render_widget(Clear, area);
    f.render_widget(block, area);

    let mut constraints: Vec<Constraint> = form
        .fields
        .iter()
        .map(|field| {
            if field.multiline {
                Constraint::Min(MULTI_LINE_HEIGHT)
            } else {
                Constraint::Length(SINGLE_LINE_HEIGHT)
            }
        })
        .collect();
    constraints.push(Constraint::Length(1));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .margin(1)
        .split(area);

    let focus = form.focus;
    let multiline_focused = form
        .fields
        .get(focus)
        .is_some_and(|field| field.multiline);
    for (idx, field) in form.fields.iter_mut().enumerate() {
        let focused = idx == focus;
        let border = if focused {
            tokens.ui_border_editing
        } else {
            tokens.ui_border_default
        };
        field.input.set_block(
            Block::default()
                .title(format!(" {} ", field.label))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border)),
        );
        field.input.set_cursor_line_style(Style::default());
        field.input.set_cursor_style(if focused {
            Style::default().add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
        });
        if let Some(rect) = chunks.get(idx) {
            f.render_widget(&field.input, *rect);
        }
    }

    let mut footer = format!("{confirm}: save  {next}: next field  {cancel}: cancel");
    if multiline_focused {
        footer.push_str("  shift+enter: newline");
    }
    if let Some(rect) = chunks.last() {
        f.render_widget(
            Paragraph::new(footer).style(Style::default().fg(tokens.ui_muted)),
            *rect,
        );
    }
}

pub fn render_report_popup(f: &mut Frame, app: &App, tokens: &ThemeTokens) {
    let area = centered_rect(85, 85, f.area());
    let title = if app.workspace.briefing.sector.is_empty() {
        " Detailed report ".to_string()
    } else {
        format!(" Detailed report: {} ", app.workspace.briefing.sector)
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(tokens.ui_border_active));
    f.render_widget(Clear, area);

    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(block.inner(area));
    f.render_widget(block, area);

    let body = app
        .workspace
        .detailed_report
        .as_deref()
        .unwrap_or("No report yet. Press r on the home view to generate one.");
    let report = Paragraph::new(body)
        .wrap(Wrap { trim: false })
        .scroll((app.report_scroll, 0));
    f.render_widget(report, popup_layout[0]);

    let help = Paragraph::new("(j/k, PgUp/PgDn) Scroll  (Esc) Close")
        .style(Style::default().fg(tokens.ui_muted));
    f.render_widget(help, popup_layout[1]);
}

pub fn render_help_popup(f: &mut Frame, app: &App, tokens: &ThemeTokens) {
    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(tokens.ui_border_default));
    let area = centered_rect(80, 80, f.area());
    f.render_widget(Clear, area);
    f.render_widget(block, area);

    let inner_area = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .margin(2)
        .split(area);

    let content_area = inner_area[0];
    let sections = help_sections(app);
    let column_count = if content_area.width >= 90 { 2 } else { 1 };
    let mut columns: Vec<Vec<HelpSection>> = vec![Vec::new(); column_count];
    let mut heights = vec![0u16; column_count];
    let mut overflow = false;
    for section in sections {
        let height = section.height();
        let Some(col) = (0..column_count).find(|&c| heights[c] + height <= content_area.height)
        else {
            overflow = true;
            continue;
        };
        heights[col] += height;
        columns[col].push(section);
    }

    let column_areas = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(vec![
            Constraint::Ratio(1, column_count as u32);
            column_count
        ])
        .split(content_area);
    for (column, area) in columns.iter().zip(column_areas.iter()) {
        let mut y = area.y;
        for section in column {
            let rect = Rect {
                x: area.x,
                y,
                width: area.width,
                height: section.height(),
            };
            render_help_block(f, rect, section, tokens);
            y = y.saturating_add(section.height());
        }
    }

    let footer_text = if overflow {
        "Some sections hidden (enlarge window) · Esc / ?: close"
    } else {
        "Esc / ?: close"
    };
    f.render_widget(
        Paragraph::new(footer_text).style(Style::default().fg(tokens.ui_muted)),
        inner_area[1],
    );
}

#[derive(Clone)]
struct HelpSection {
    title: &'static str,
    entries: Vec<(String, String)>,
}

impl HelpSection {
    fn new(title: &'static str, entries: Vec<(&str, String)>) -> Self {
        Self {
            title,
            entries: entries
                .into_iter()
                .map(|(label, keys)| (label.to_string(), keys))
                .collect(),
        }
    }

    fn height(&self) -> u16 {
        self.entries.len() as u16 + 2
    }
}

fn help_sections(app: &App) -> Vec<HelpSection> {
    let kb = &app.config.keybindings;
    vec![
        HelpSection::new(
            "Global",
            vec![
                ("Next / previous view", format!("{} , {}", fmt_keys(&kb.global.next_view), fmt_keys(&kb.global.prev_view))),
                ("Jump to view", "1-7".to_string()),
                ("Sign in", fmt_keys(&kb.global.sign_in)),
                ("Sign out", fmt_keys(&kb.global.sign_out)),
                ("Export backup", fmt_keys(&kb.global.export)),
                ("Import backup", fmt_keys(&kb.global.import)),
                ("Toggle theme", fmt_keys(&kb.global.toggle_theme)),
                ("Help", fmt_keys(&kb.global.help)),
                ("Quit", fmt_keys(&kb.global.quit)),
            ],
        ),
        HelpSection::new(
            "Lists",
            vec![
                ("Move", format!("{} , {}", fmt_keys(&kb.list.up), fmt_keys(&kb.list.down))),
                ("Add", fmt_keys(&kb.list.add)),
                ("Edit", fmt_keys(&kb.list.edit)),
                ("Delete", fmt_keys(&kb.list.delete)),
                ("Mark task done", fmt_keys(&kb.list.toggle)),
                ("Cycle status", fmt_keys(&kb.list.cycle_status)),
                ("Cycle priority", fmt_keys(&kb.list.cycle_priority)),
            ],
        ),
        HelpSection::new(
            "Home & calendar",
            vec![
                ("Set business sector", "s / b".to_string()),
                ("Detailed report", "r".to_string()),
                ("Open report", "v".to_string()),
                ("Previous / next day", "h / l".to_string()),
                ("Previous / next week", "[ / ]".to_string()),
                ("Today", "t".to_string()),
            ],
        ),
        HelpSection::new(
            "Assistant",
            vec![
                ("Write a message", format!("i / {}", fmt_keys(&kb.list.open))),
                ("Send", fmt_keys(&kb.composer.submit)),
                ("Newline", fmt_keys(&kb.composer.newline)),
                ("Clear composer", fmt_keys(&kb.composer.clear)),
                ("Stop writing", fmt_keys(&kb.composer.cancel)),
                ("New chat", fmt_keys(&kb.list.new_session)),
                ("Attach image", "a".to_string()),
                ("Scroll", "PgUp / PgDn".to_string()),
            ],
        ),
        HelpSection::new(
            "Enhancer",
            vec![
                ("Upload photo", "u".to_string()),
                ("Select option", "space".to_string()),
                ("Enhance", "g".to_string()),
                ("Refine / save result", "r / w".to_string()),
                ("Start over", "x".to_string()),
            ],
        ),
    ]
}

fn render_help_block(f: &mut Frame, area: Rect, section: &HelpSection, tokens: &ThemeTokens) {
    let key_style = Style::default()
        .fg(tokens.ui_border_active)
        .add_modifier(Modifier::BOLD);
    let block = Block::default()
        .title(Span::styled(format!(" {} ", section.title), key_style))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(tokens.ui_border_default));
    let inner = block.inner(area);
    f.render_widget(block, area);
    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let key_width = section
        .entries
        .iter()
        .map(|(_, keys)| keys.chars().count())
        .max()
        .unwrap_or(0)
        .max(6);
    let lines: Vec<Line<'static>> = section
        .entries
        .iter()
        .map(|(label, keys)| {
            let padding = key_width.saturating_sub(keys.chars().count());
            Line::from(vec![
                Span::styled(keys.clone(), key_style),
                Span::raw(" ".repeat(padding + 2)),
                Span::styled(label.clone(), Style::default().fg(tokens.ui_fg)),
            ])
        })
        .collect();
    f.render_widget(
        Paragraph::new(Text::from(lines)).wrap(Wrap { trim: true }),
        inner,
    );
}

fn fmt_keys(keys: &[String]) -> String {
    if keys.is_empty() {
        return "-".to_string();
    }
    keys.join(" / ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{FormKind, test_app};

    #[test]
    fn fmt_keys_marks_unbound_actions() {
        assert_eq!(fmt_keys(&[]), "-");
        assert_eq!(
            fmt_keys(&["ctrl+q".to_string(), "q".to_string()]),
            "ctrl+q / q"
        );
    }

    #[test]
    fn help_lists_configured_quit_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.config.keybindings.global.quit = vec!["ctrl+x".to_string()];
        let sections = help_sections(&app);
        let global = &sections[0];
        assert!(
            global
                .entries
                .iter()
                .any(|(label, keys)| label == "Quit" && keys == "ctrl+x")
        );
    }

    #[test]
    fn form_popup_renders_field_labels() {
        use ratatui::{Terminal, backend::TestBackend};

        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.open_form(
            FormKind::NewNote,
            vec![("Title", String::new(), false), ("Content", String::new(), true)],
        );
        let mut terminal = Terminal::new(TestBackend::new(100, 40)).expect("terminal");
        let tokens = ThemeTokens::from_theme(&app.config.theme, app.workspace.theme);
        terminal
            .draw(|f| render_form_popup(f, &mut app, &tokens))
            .expect("draw");
        let screen: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(screen.contains("Title"));
        assert!(screen.contains("Content"));
    }
}
