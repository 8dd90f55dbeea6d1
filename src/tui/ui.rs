//! Screen layout for the channel view

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
    Frame,
};

use super::app::App;
use super::messages;

/// Returns status indicator symbol and color based on live state
fn status_indicator(is_live: bool) -> (&'static str, Color) {
    if is_live {
        ("*", Color::Green)
    } else {
        ("o", Color::Red)
    }
}

/// Draw one frame of the channel view
pub fn render(frame: &mut Frame, app: &mut App) {
    let area = frame.area();

    let new_banner = u16::from(app.snapshot.has_new_messages && !app.snapshot.loading_newer);
    let [header_area, top_banner_area, messages_area, new_banner_area, status_area] =
        Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Fill(1),
            Constraint::Length(new_banner),
            Constraint::Length(1),
        ])
        .areas(area);

    render_header(header_area, frame.buffer_mut(), app);
    render_top_banner(top_banner_area, frame.buffer_mut(), app);

    messages::render(
        messages_area,
        frame.buffer_mut(),
        &mut app.view,
        &app.snapshot,
        &app.members,
    );

    if new_banner > 0 {
        render_new_banner(new_banner_area, frame.buffer_mut());
    }
    render_status(status_area, frame.buffer_mut(), app);
}

/// Channel title with the live indicator and the signed-in user
fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let title = Span::styled(
        format!(" {}", app.channel_label),
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );

    let (status_symbol, status_color) = status_indicator(app.is_live());
    let live = if app.is_live() { "live" } else { "offline" };
    let live_status = Span::styled(
        format!(" {} {} ", status_symbol, live),
        Style::default().fg(status_color),
    );

    let user_name = Span::styled(
        format!(" {} ", app.user_name),
        Style::default().fg(Color::Cyan),
    );

    // Right-align the live indicator and user.
    let left_width = app.channel_label.chars().count() + 1;
    let right_width = format!(" {} {}  {} ", status_symbol, live, app.user_name)
        .chars()
        .count();
    let padding_width = area.width.saturating_sub((left_width + right_width) as u16) as usize;
    let padding = Span::raw(" ".repeat(padding_width));

    let header_line = Line::from(vec![title, padding, live_status, user_name]);
    Paragraph::new(header_line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Loading / beginning-of-channel line above the messages.
fn render_top_banner(area: Rect, buf: &mut Buffer, app: &App) {
    let snapshot = &app.snapshot;
    let (text, style) = if snapshot.loading_older {
        (
            "Loading older messages...",
            Style::default().fg(Color::Cyan),
        )
    } else if snapshot.is_loading {
        ("Loading...", Style::default().fg(Color::Cyan))
    } else if snapshot.entries.is_empty() {
        ("", Style::default())
    } else if snapshot.has_older_messages {
        (
            "Older messages above (k / Up at the top to load)",
            Style::default().fg(Color::DarkGray),
        )
    } else {
        (
            "Beginning of channel",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )
    };
    Paragraph::new(Line::from(Span::styled(format!(" {}", text), style))).render(area, buf);
}

fn render_new_banner(area: Rect, buf: &mut Buffer) {
    let line = Line::from(Span::styled(
        " New messages (End to jump) ",
        Style::default()
            .fg(Color::Black)
            .bg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    ));
    Paragraph::new(line)
        .style(Style::default().bg(Color::Yellow))
        .render(area, buf);
}

/// Bottom bar with the loaded count and key hints
fn render_status(area: Rect, buf: &mut Buffer, app: &App) {
    // Errors and status messages win over key hints.
    let error = app.snapshot.error.as_ref().map(|e| format!("{} (r to retry)", e));
    if let Some(msg) = error.as_ref().or(app.status_message.as_ref()) {
        let style = if error.is_some() || app.status_is_error {
            Style::default().fg(Color::Red).bg(Color::DarkGray)
        } else {
            Style::default().fg(Color::Green).bg(Color::DarkGray)
        };
        let line = Line::from(Span::styled(format!(" {} ", msg), style));
        Paragraph::new(line)
            .style(Style::default().bg(Color::DarkGray))
            .render(area, buf);
        return;
    }

    let sep_style = Style::default().fg(Color::DarkGray);
    let hint_style = Style::default().fg(Color::Gray);
    let count = app
        .snapshot
        .entries
        .iter()
        .filter(|e| e.as_message().is_some())
        .count();

    let status_line = Line::from(vec![
        Span::styled(
            format!(" {} loaded ", count),
            Style::default().fg(Color::Yellow),
        ),
        Span::styled(" | ", sep_style),
        Span::styled("j/k: move", hint_style),
        Span::styled(" | ", sep_style),
        Span::styled("End: latest", hint_style),
        Span::styled(" | ", sep_style),
        Span::styled("Enter: open reply", hint_style),
        Span::styled(" | ", sep_style),
        Span::styled("q: quit", hint_style),
    ]);

    Paragraph::new(status_line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}
