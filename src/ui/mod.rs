use chrono::{Datelike, Local, NaiveDate, Utc, Weekday};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};
use unicode_width::UnicodeWidthStr;

use crate::app::{App, EnhancerItem, SettingsItem, enhancer_items};
use crate::enhancer::Screen;
use crate::models::{ChatMessage, ChatRole, InputMode, TaskStatus, ToastKind, View};
use crate::storage::format_bytes;

pub mod color_parser;
pub mod components;
pub mod popups;
pub mod theme;

use components::{linkify, priority_span, status_span, truncate};
use theme::ThemeTokens;

const HOME_TASK_LIMIT: usize = 8;
const HOME_EVENT_LIMIT: usize = 5;

pub fn ui(f: &mut Frame, app: &mut App) {
    let tokens = ThemeTokens::from_theme(&app.config.theme, app.workspace.theme);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(f.area());

    render_tabs(f, chunks[0], app, &tokens);
    match app.view {
        View::Home => render_home(f, chunks[1], app, &tokens),
        View::Tasks => render_tasks(f, chunks[1], app, &tokens),
        View::Calendar => render_calendar(f, chunks[1], app, &tokens),
        View::Notes => render_notes(f, chunks[1], app, &tokens),
        View::Assistant => render_assistant(f, chunks[1], app, &tokens),
        View::Enhancer => render_enhancer(f, chunks[1], app, &tokens),
        View::Settings => render_settings(f, chunks[1], app, &tokens),
    }
    render_status_bar(f, chunks[2], app, &tokens);

    if app.show_report_popup {
        popups::render_report_popup(f, app, &tokens);
    }
    if app.show_help_popup {
        popups::render_help_popup(f, app, &tokens);
    }
    if app.form.is_some() {
        popups::render_form_popup(f, app, &tokens);
    }
}

fn panel<'b>(title: impl Into<Line<'b>>, active: bool, tokens: &ThemeTokens) -> Block<'b> {
    let color = if active {
        tokens.ui_border_active
    } else {
        tokens.ui_border_default
    };
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
}

fn highlight(tokens: &ThemeTokens) -> Style {
    Style::default()
        .bg(tokens.ui_selection_bg)
        .add_modifier(Modifier::BOLD)
}

fn render_tabs(f: &mut Frame, area: Rect, app: &App, tokens: &ThemeTokens) {
    let mut spans = vec![Span::styled(
        " BizMate ",
        Style::default()
            .fg(tokens.ui_border_active)
            .add_modifier(Modifier::BOLD),
    )];
    for (index, view) in View::all().into_iter().enumerate() {
        let label = format!(" {} {} ", index + 1, view.as_str());
        let style = if view == app.view {
            Style::default()
                .fg(tokens.ui_border_active)
                .add_modifier(Modifier::BOLD | Modifier::REVERSED)
        } else {
            Style::default().fg(tokens.ui_muted)
        };
        spans.push(Span::styled(label, style));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

// Home

fn render_home(f: &mut Frame, area: Rect, app: &mut App, tokens: &ThemeTokens) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let briefing = &app.workspace.briefing;
    let title = if briefing.sector.is_empty() {
        " Market briefing ".to_string()
    } else {
        format!(" Market briefing: {} ", briefing.sector)
    };
    let mut lines: Vec<Line> = Vec::new();
    if app.briefing_receiver.is_some() {
        lines.push(Line::from(Span::styled(
            "Analysing the market...",
            Style::default().fg(tokens.ui_muted),
        )));
    } else if briefing.content.is_empty() {
        lines.push(Line::from("No briefing yet. Press s to choose your business sector."));
    } else {
        lines.extend(briefing.content.lines().map(|l| Line::from(l.to_string())));
        if let Some(updated) = format_updated(&briefing.last_updated) {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                format!("Updated {updated}"),
                Style::default().fg(tokens.content_timestamp),
            )));
        }
    }
    lines.push(Line::from(""));
    let report_hint = if app.report_receiver.is_some() {
        "Writing the detailed report..."
    } else if app.workspace.detailed_report.is_some() {
        "v: open detailed report  r: regenerate"
    } else {
        "r: generate detailed report"
    };
    lines.push(Line::from(Span::styled(
        format!("s: change sector  {report_hint}"),
        Style::default().fg(tokens.ui_muted),
    )));
    if app.workspace.sim_mode {
        lines.push(Line::from(Span::styled(
            "Simulation mode: AI answers are canned.",
            Style::default().fg(tokens.task_in_progress),
        )));
    }
    f.render_widget(
        Paragraph::new(Text::from(lines))
            .block(panel(title, true, tokens))
            .wrap(Wrap { trim: false }),
        columns[0],
    );

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(columns[1]);

    let open_tasks: Vec<ListItem> = app
        .workspace
        .tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Done)
        .take(HOME_TASK_LIMIT)
        .map(|t| {
            ListItem::new(Line::from(vec![
                status_span(t.status, tokens),
                Span::raw(t.title.clone()),
                priority_span(t.priority, tokens),
            ]))
        })
        .collect();
    let open_count = app
        .workspace
        .tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Done)
        .count();
    f.render_widget(
        List::new(open_tasks).block(panel(format!(" Open tasks ({open_count}) "), false, tokens)),
        right[0],
    );

    let upcoming: Vec<ListItem> = app
        .workspace
        .upcoming_events(Utc::now(), HOME_EVENT_LIMIT)
        .into_iter()
        .map(|e| {
            let when = e
                .starts_at()
                .map(|at| at.with_timezone(&Local).format("%a %d %b %H:%M").to_string())
                .unwrap_or_default();
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{when}  "),
                    Style::default().fg(tokens.content_timestamp),
                ),
                Span::raw(e.title.clone()),
            ]))
        })
        .collect();
    f.render_widget(
        List::new(upcoming).block(panel(" Upcoming ", false, tokens)),
        right[1],
    );
}

fn format_updated(raw: &str) -> Option<String> {
    let at = chrono::DateTime::parse_from_rfc3339(raw).ok()?;
    Some(at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
}

// Tasks

fn render_tasks(f: &mut Frame, area: Rect, app: &mut App, tokens: &ThemeTokens) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(area);

    let width = columns[0].width.saturating_sub(14) as usize;
    let items: Vec<ListItem> = app
        .workspace
        .tasks
        .iter()
        .map(|t| {
            let title_style = if t.status == TaskStatus::Done {
                Style::default()
                    .fg(tokens.ui_muted)
                    .add_modifier(Modifier::CROSSED_OUT)
            } else {
                Style::default().fg(tokens.ui_fg)
            };
            ListItem::new(Line::from(vec![
                status_span(t.status, tokens),
                Span::styled(truncate(&t.title, width), title_style),
                priority_span(t.priority, tokens),
            ]))
        })
        .collect();
    let done = app
        .workspace
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .count();
    let title = format!(" Tasks {done}/{} ", app.workspace.tasks.len());
    let list = List::new(items)
        .block(panel(title, true, tokens))
        .highlight_style(highlight(tokens));
    f.render_stateful_widget(list, columns[0], &mut app.tasks_state);

    let mut lines = Vec::new();
    if let Some(task) = app.selected_task() {
        lines.push(Line::from(Span::styled(
            task.title.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(vec![
            Span::styled("Status: ", Style::default().fg(tokens.ui_muted)),
            Span::raw(task.status.as_str()),
            Span::styled("  Priority: ", Style::default().fg(tokens.ui_muted)),
            Span::raw(task.priority.as_str()),
        ]));
        lines.push(Line::from(""));
        match task.description.as_deref() {
            Some(description) => {
                lines.extend(description.lines().map(|l| Line::from(l.to_string())));
            }
            None => lines.push(Line::from(Span::styled(
                "No description.",
                Style::default().fg(tokens.ui_muted),
            ))),
        }
    } else {
        lines.push(Line::from("No tasks. Press a to add one."));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "a: add  e: edit  d: delete  space: done  s: status  p: priority",
        Style::default().fg(tokens.ui_muted),
    )));
    f.render_widget(
        Paragraph::new(Text::from(lines))
            .block(panel(" Details ", false, tokens))
            .wrap(Wrap { trim: false }),
        columns[1],
    );
}

// Calendar

fn render_calendar(f: &mut Frame, area: Rect, app: &mut App, tokens: &ThemeTokens) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(26), Constraint::Min(1)])
        .split(area);

    let month = Paragraph::new(Text::from(month_lines(app, tokens))).block(panel(
        format!(" {} ", app.calendar_day.format("%B %Y")),
        false,
        tokens,
    ));
    f.render_widget(month, columns[0]);

    let items: Vec<ListItem> = app
        .day_events()
        .into_iter()
        .map(|e| {
            let time = e
                .starts_at()
                .map(|at| at.with_timezone(&Local).format("%H:%M").to_string())
                .unwrap_or_else(|| "--:--".to_string());
            let mut spans = vec![
                Span::styled(
                    format!("{time}  "),
                    Style::default().fg(tokens.content_timestamp),
                ),
                Span::raw(e.title.clone()),
                priority_span(e.priority, tokens),
            ];
            if let Some(description) = e.description.as_deref() {
                spans.push(Span::styled(
                    format!("  {}", truncate(description, 40)),
                    Style::default().fg(tokens.ui_muted),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();
    let title = format!(
        " {} · a: add  e: edit  d: delete  \u{2190}/\u{2192}: day  t: today ",
        app.calendar_day.format("%A %d %B")
    );
    let list = List::new(items)
        .block(panel(title, true, tokens))
        .highlight_style(highlight(tokens));
    f.render_stateful_widget(list, columns[1], &mut app.events_state);
}

fn month_lines(app: &App, tokens: &ThemeTokens) -> Vec<Line<'static>> {
    let selected = app.calendar_day;
    let today = Local::now().date_naive();
    let first = NaiveDate::from_ymd_opt(selected.year(), selected.month(), 1).unwrap_or(selected);

    let mut lines = vec![Line::from(Span::styled(
        "Mo Tu We Th Fr Sa Su",
        Style::default().fg(tokens.ui_muted),
    ))];
    let offset = first.weekday().num_days_from_monday() as usize;
    let mut spans = vec![Span::raw("   ".repeat(offset))];
    let mut day = first;
    while day.month() == first.month() {
        let mut style = Style::default().fg(tokens.ui_fg);
        if !app.workspace.events_on(day).is_empty() {
            style = style
                .fg(tokens.ui_border_active)
                .add_modifier(Modifier::UNDERLINED);
        }
        if day == today {
            style = style.add_modifier(Modifier::BOLD);
        }
        if day == selected {
            style = style.add_modifier(Modifier::REVERSED);
        }
        spans.push(Span::styled(format!("{:>2}", day.day()), style));
        spans.push(Span::raw(" "));
        if day.weekday() == Weekday::Sun {
            lines.push(Line::from(std::mem::take(&mut spans)));
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    if !spans.is_empty() {
        lines.push(Line::from(spans));
    }
    lines
}

// Notes

fn render_notes(f: &mut Frame, area: Rect, app: &mut App, tokens: &ThemeTokens) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(area);

    let width = columns[0].width.saturating_sub(4) as usize;
    let items: Vec<ListItem> = app
        .workspace
        .notes
        .iter()
        .map(|n| {
            let date = format_updated(&n.date).unwrap_or_default();
            ListItem::new(vec![
                Line::from(Span::styled(
                    truncate(&n.title, width),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    date,
                    Style::default().fg(tokens.content_timestamp),
                )),
            ])
        })
        .collect();
    let list = List::new(items)
        .block(panel(
            format!(" Notes ({}) ", app.workspace.notes.len()),
            true,
            tokens,
        ))
        .highlight_style(highlight(tokens));
    f.render_stateful_widget(list, columns[0], &mut app.notes_state);

    let (title, body) = match app.selected_note() {
        Some(note) => (format!(" {} ", note.title), note.content.clone()),
        None => (
            " Note ".to_string(),
            "No notes yet. Press a to write one.".to_string(),
        ),
    };
    f.render_widget(
        Paragraph::new(body)
            .block(panel(title, false, tokens))
            .wrap(Wrap { trim: false }),
        columns[1],
    );
}

// Assistant

fn render_assistant(f: &mut Frame, area: Rect, app: &mut App, tokens: &ThemeTokens) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(area);

    let width = columns[0].width.saturating_sub(4) as usize;
    let items: Vec<ListItem> = app
        .workspace
        .sessions
        .iter()
        .map(|s| {
            ListItem::new(Line::from(vec![
                Span::raw(truncate(&s.title, width.saturating_sub(5))),
                Span::styled(
                    format!(" {}", s.messages.len()),
                    Style::default().fg(tokens.ui_muted),
                ),
            ]))
        })
        .collect();
    let sessions = List::new(items)
        .block(panel(" Chats · n: new ", app.input_mode == InputMode::Navigate, tokens))
        .highlight_style(highlight(tokens));
    f.render_stateful_widget(sessions, columns[0], &mut app.sessions_state);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(5)])
        .split(columns[1]);

    let conversation = right[0];
    let inner_width = conversation.width.saturating_sub(2).max(1) as usize;
    let inner_height = conversation.height.saturating_sub(2) as usize;
    let mut lines: Vec<Line> = Vec::new();
    let title = match app.workspace.active_session() {
        Some(session) => {
            for message in &session.messages {
                push_message_lines(&mut lines, message, inner_width, tokens);
            }
            format!(" {} ", session.title)
        }
        None => " Assistant ".to_string(),
    };
    if lines.is_empty() {
        lines.push(Line::from(Span::styled(
            "Ask about your market, or have the assistant plan tasks, events and notes.",
            Style::default().fg(tokens.ui_muted),
        )));
    }
    if app.is_processing_chat() {
        lines.push(Line::from(Span::styled(
            "Thinking...",
            Style::default()
                .fg(tokens.ui_muted)
                .add_modifier(Modifier::ITALIC),
        )));
    }

    // Anchor to the bottom; chat_scroll counts lines scrolled back.
    let max_scroll = lines.len().saturating_sub(inner_height);
    let back = (app.chat_scroll as usize).min(max_scroll);
    app.chat_scroll = back as u16;
    let top = max_scroll - back;
    f.render_widget(
        Paragraph::new(Text::from(lines))
            .block(panel(title, false, tokens))
            .scroll((top as u16, 0)),
        conversation,
    );

    let editing = app.input_mode == InputMode::Editing;
    let mut composer_title = if editing {
        " Message · Enter: send  Shift+Enter: newline  Esc: done ".to_string()
    } else {
        " Message · i: write  a: attach image ".to_string()
    };
    if let Some((name, _)) = app.chat_attachment.as_ref() {
        composer_title.push_str(&format!("· \u{1F4CE} {name} "));
    }
    let border = if editing {
        tokens.ui_border_editing
    } else {
        tokens.ui_border_default
    };
    app.chat_input.set_block(
        Block::default()
            .title(composer_title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border)),
    );
    app.chat_input.set_cursor_line_style(Style::default());
    app.chat_input.set_cursor_style(if editing {
        Style::default().add_modifier(Modifier::REVERSED)
    } else {
        Style::default()
    });
    f.render_widget(&app.chat_input, right[1]);
}

fn push_message_lines(
    lines: &mut Vec<Line<'static>>,
    message: &ChatMessage,
    width: usize,
    tokens: &ThemeTokens,
) {
    let (who, color) = match message.role {
        ChatRole::User => ("You", tokens.ui_border_editing),
        ChatRole::Model => ("BizMate", tokens.ui_border_active),
    };
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    lines.push(Line::from(vec![
        Span::styled(
            who.to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  {time}"),
            Style::default().fg(tokens.content_timestamp),
        ),
    ]));
    if let Some(name) = message.attachment_name.as_deref() {
        lines.push(Line::from(Span::styled(
            format!("\u{1F4CE} {name}"),
            Style::default().fg(tokens.ui_muted),
        )));
    }
    for paragraph in message.content.lines() {
        if paragraph.is_empty() {
            lines.push(Line::from(""));
            continue;
        }
        let link = Style::default()
            .fg(tokens.ui_border_active)
            .add_modifier(Modifier::UNDERLINED);
        for wrapped in textwrap::wrap(paragraph, width) {
            lines.push(Line::from(linkify(&wrapped, Style::default(), link)));
        }
    }
    if let Some(image) = message.image.as_deref() {
        lines.push(Line::from(Span::styled(
            format!("[image, {}]", format_bytes((image.len() as u64) * 3 / 4, 1)),
            Style::default().fg(tokens.ui_muted),
        )));
    }
    for source in grounding_sources(message) {
        lines.push(Line::from(Span::styled(
            format!("\u{2197} {source}"),
            Style::default().fg(tokens.ui_muted),
        )));
    }
    lines.push(Line::from(""));
}

/// Titles (or URIs) of the web pages a grounded answer cited.
fn grounding_sources(message: &ChatMessage) -> Vec<String> {
    let Some(chunks) = message
        .grounding_metadata
        .as_ref()
        .and_then(|m| m.get("groundingChunks"))
        .and_then(|c| c.as_array())
    else {
        return Vec::new();
    };
    chunks
        .iter()
        .filter_map(|chunk| chunk.get("web"))
        .filter_map(|web| {
            web.get("title")
                .or_else(|| web.get("uri"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .collect()
}

// Enhancer

fn render_enhancer(f: &mut Frame, area: Rect, app: &mut App, tokens: &ThemeTokens) {
    match app.enhancer.screen() {
        Screen::Upload => {
            let lines = vec![
                Line::from(Span::styled(
                    "Product photo studio",
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from("Turn a plain product shot into a marketplace-ready image."),
                Line::from(Span::styled(
                    "Press Enter or u to choose a .jpg or .png file (up to 10 MB).",
                    Style::default().fg(tokens.ui_muted),
                )),
            ];
            f.render_widget(
                Paragraph::new(Text::from(lines))
                    .alignment(Alignment::Center)
                    .block(panel(" Enhancer ", true, tokens)),
                area,
            );
        }
        Screen::Edit => render_enhancer_edit(f, area, app, tokens),
        Screen::Result => render_enhancer_result(f, area, app, tokens),
    }
}

fn render_enhancer_edit(f: &mut Frame, area: Rect, app: &mut App, tokens: &ThemeTokens) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(area);

    let state = &app.enhancer;
    let items: Vec<ListItem> = enhancer_items()
        .into_iter()
        .map(|item| {
            let (marker, label) = match item {
                EnhancerItem::Marketplace(m) => (
                    radio(state.marketplace == m),
                    format!("Marketplace: {}", m.badge()),
                ),
                EnhancerItem::Template(t) => (
                    check(state.template.is_some_and(|s| s.id == t.id)),
                    format!("Template: {} ({})", t.name, t.marketplace.badge()),
                ),
                EnhancerItem::Style(s) => (
                    check(state.styles.contains(&s)),
                    format!("Style: {}", s.label()),
                ),
                EnhancerItem::Mood(m) => (
                    radio(state.mood == Some(m)),
                    format!("Mood: {}", m.label()),
                ),
                EnhancerItem::Description => (
                    "   ",
                    if state.description.trim().is_empty() {
                        "Description: (none)".to_string()
                    } else {
                        format!("Description: {}", truncate(&state.description, 30))
                    },
                ),
                EnhancerItem::Enhance => ("\u{2192}  ", "Enhance photo".to_string()),
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(tokens.ui_border_active)),
                Span::raw(label),
            ]))
        })
        .collect();
    let list = List::new(items)
        .block(panel(" Options · space: select  g: enhance ", true, tokens))
        .highlight_style(highlight(tokens));
    f.render_stateful_widget(list, columns[0], &mut app.enhancer_state);

    let state = &app.enhancer;
    let mut lines = Vec::new();
    if let Some(original) = state.original.as_ref() {
        lines.push(Line::from(vec![
            Span::styled("Photo: ", Style::default().fg(tokens.ui_muted)),
            Span::raw(original.name.clone()),
            Span::styled(
                format!("  {}", format_bytes(original.bytes.len() as u64, 1)),
                Style::default().fg(tokens.ui_muted),
            ),
        ]));
    }
    lines.push(Line::from(vec![
        Span::styled("Target: ", Style::default().fg(tokens.ui_muted)),
        Span::raw(state.marketplace.badge()),
    ]));
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Prompt",
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(state.build_prompt()));
    lines.push(Line::from(""));
    if app.enhance_receiver.is_some() {
        lines.push(Line::from(Span::styled(
            "Enhancing...",
            Style::default().fg(tokens.task_in_progress),
        )));
    }
    lines.push(Line::from(Span::styled(
        "b: back  u: another photo  x: start over",
        Style::default().fg(tokens.ui_muted),
    )));
    f.render_widget(
        Paragraph::new(Text::from(lines))
            .block(panel(" Preview ", false, tokens))
            .wrap(Wrap { trim: false }),
        columns[1],
    );
}

fn render_enhancer_result(f: &mut Frame, area: Rect, app: &App, tokens: &ThemeTokens) {
    let state = &app.enhancer;
    let mut lines = Vec::new();
    match (state.enhanced.as_ref(), state.original.as_ref()) {
        (Some(bytes), _) => lines.push(Line::from(Span::styled(
            format!("Enhanced image ready ({}).", format_bytes(bytes.len() as u64, 1)),
            Style::default().fg(tokens.task_done),
        ))),
        (None, Some(original)) => lines.push(Line::from(Span::styled(
            format!("No image generated; keeping {}.", original.name),
            Style::default().fg(tokens.task_in_progress),
        ))),
        (None, None) => lines.push(Line::from("No image.")),
    }
    lines.push(Line::from(""));
    if let Some(prompt) = state.generated_prompt.as_deref() {
        lines.push(Line::from(Span::styled(
            "Prompt used",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(prompt.to_string()));
        lines.push(Line::from(""));
    }
    lines.push(Line::from(format!(
        "Saves as {}",
        app.config
            .data
            .data_dir
            .join("enhanced")
            .join(state.result_file_name())
            .display()
    )));
    lines.push(Line::from(Span::styled(
        "w: save  r: refine  x: start over",
        Style::default().fg(tokens.ui_muted),
    )));
    f.render_widget(
        Paragraph::new(Text::from(lines))
            .block(panel(" Result ", true, tokens))
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn radio(on: bool) -> &'static str {
    if on { "(\u{2022}) " } else { "( ) " }
}

fn check(on: bool) -> &'static str {
    if on { "[x] " } else { "[ ] " }
}

// Settings

fn render_settings(f: &mut Frame, area: Rect, app: &mut App, tokens: &ThemeTokens) {
    let rows: Vec<(String, String)> = SettingsItem::ALL
        .iter()
        .map(|item| setting_row(app, *item))
        .collect();
    let label_width = rows.iter().map(|(l, _)| l.width()).max().unwrap_or(0);
    let items: Vec<ListItem> = rows
        .into_iter()
        .map(|(label, value)| {
            ListItem::new(Line::from(vec![
                Span::raw(format!("{label:<label_width$}  ")),
                Span::styled(value, Style::default().fg(tokens.ui_muted)),
            ]))
        })
        .collect();
    let list = List::new(items)
        .block(panel(" Settings · Enter: change ", true, tokens))
        .highlight_style(highlight(tokens));
    f.render_stateful_widget(list, area, &mut app.settings_state);
}

fn setting_row(app: &App, item: SettingsItem) -> (String, String) {
    let (label, value) = match item {
        SettingsItem::Theme => ("Theme", app.workspace.theme.as_str().to_string()),
        SettingsItem::SimMode => (
            "Simulation mode",
            if app.workspace.sim_mode { "on" } else { "off" }.to_string(),
        ),
        SettingsItem::Sector => (
            "Business sector",
            if app.workspace.briefing.sector.is_empty() {
                "not set".to_string()
            } else {
                app.workspace.briefing.sector.clone()
            },
        ),
        SettingsItem::ApiKey => (
            "Gemini API key",
            if app.api_key().is_empty() {
                "missing".to_string()
            } else if app.custom_api_key.is_some() {
                "saved in workspace".to_string()
            } else {
                "from config/environment".to_string()
            },
        ),
        SettingsItem::Account => (
            "Cloud account",
            match (app.auth.is_some(), app.signed_in_email()) {
                (false, _) => "sync not configured".to_string(),
                (true, Some(email)) => format!("{email} (Enter: sign out)"),
                (true, None) => "signed out (Enter: sign in)".to_string(),
            },
        ),
        SettingsItem::Export => (
            "Export backup",
            app.config.data.backup_dir.display().to_string(),
        ),
        SettingsItem::Import => ("Import backup", "from a .json file".to_string()),
        SettingsItem::MergeBackup => (
            "Merge backup into storage",
            "overwrites only the slots in the file".to_string(),
        ),
        SettingsItem::ClearHistory => (
            "Clear chat history",
            format!("{} chats", app.workspace.sessions.len()),
        ),
        SettingsItem::DataDir => (
            "Data directory",
            format!(
                "{} ({})",
                app.config.data.data_dir.display(),
                format_bytes(app.storage_usage, 1)
            ),
        ),
    };
    (label.to_string(), value)
}

// Status bar

fn render_status_bar(f: &mut Frame, area: Rect, app: &App, tokens: &ThemeTokens) {
    if area.height == 0 || area.width == 0 {
        return;
    }

    let mode_label = match app.input_mode {
        InputMode::Navigate => "NAV",
        InputMode::Editing => "INSERT",
    };
    let account = match (app.sync.as_ref(), app.signed_in_email()) {
        (None, _) => "local only".to_string(),
        (Some(_), None) => "signed out".to_string(),
        (Some(sync), Some(email)) => {
            if app.is_syncing() {
                format!("\u{2601} {email} \u{21BB} syncing")
            } else if sync.push_pending() {
                format!("\u{2601} {email} \u{2022}")
            } else {
                format!("\u{2601} {email}")
            }
        }
    };

    let left_spans = vec![
        Span::styled(
            format!(" {mode_label} "),
            Style::default()
                .fg(tokens.ui_border_active)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(account, Style::default().fg(tokens.ui_fg)),
        Span::styled("  ?: help", Style::default().fg(tokens.ui_muted)),
    ];

    let Some((message, kind)) = app.toast_message.as_ref() else {
        f.render_widget(Paragraph::new(Line::from(left_spans)), area);
        return;
    };
    let color = match kind {
        ToastKind::Success => tokens.ui_toast_success,
        ToastKind::Error => tokens.ui_toast_error,
        ToastKind::Info => tokens.ui_toast_info,
    };

    let min_left_width = 10u16;
    let right_width = (UnicodeWidthStr::width(message.as_str()) as u16 + 1)
        .min(area.width.saturating_sub(min_left_width));
    let status_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(right_width)])
        .split(area);

    f.render_widget(Paragraph::new(Line::from(left_spans)), status_chunks[0]);
    let right = Paragraph::new(Line::from(Span::styled(
        message.clone(),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )))
    .alignment(Alignment::Right);
    f.render_widget(right, status_chunks[1]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_app;
    use ratatui::{Terminal, backend::TestBackend};

    fn draw(app: &mut App) -> String {
        let backend = TestBackend::new(100, 30);
        let mut terminal = Terminal::new(backend).expect("terminal");
        terminal.draw(|f| ui(f, app)).expect("draw");
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect::<String>()
    }

    #[test]
    fn every_view_renders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        for view in View::all() {
            app.set_view(view);
            let screen = draw(&mut app);
            assert!(screen.contains(view.as_str()));
        }
    }

    #[test]
    fn status_bar_shows_toast_and_local_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = test_app(dir.path());
        app.toast("Task added");
        let screen = draw(&mut app);
        assert!(screen.contains("Task added"));
        assert!(screen.contains("local only"));
    }

    #[test]
    fn grounding_sources_prefer_titles() {
        let mut message = ChatMessage::new(ChatRole::Model, "answer");
        message.grounding_metadata = Some(serde_json::json!({
            "groundingChunks": [
                {"web": {"uri": "https://a.example", "title": "Market report"}},
                {"web": {"uri": "https://b.example"}},
                {"retrievedContext": {}}
            ]
        }));
        assert_eq!(
            grounding_sources(&message),
            vec!["Market report".to_string(), "https://b.example".to_string()]
        );
    }
}
