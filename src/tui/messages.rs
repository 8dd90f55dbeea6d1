//! Messages pane: the loaded window of a channel, with date separators,
//! selection, highlight, and scroll anchoring.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};
use unicode_width::UnicodeWidthStr;

use crate::models::{display_name, ChannelMembers, Message};
use crate::stream::{EntryKey, ScrollRequest, StreamEntry, StreamSnapshot};

/// Selection and scroll position over the stream entries.
#[derive(Debug, Default)]
pub struct MessagesView {
    /// Selected entry; `None` until the first window arrives.
    pub selected: Option<EntryKey>,
    /// Vertical scroll offset (in rendered lines, 0 = top).
    pub scroll_offset: usize,
    /// Selection sticks to the newest message as the window grows.
    pub follow: bool,
    /// Entry to put at the top of the viewport on the next render.
    pin: Option<EntryKey>,
}

impl MessagesView {
    pub fn new() -> Self {
        Self {
            follow: true,
            ..Default::default()
        }
    }

    fn selected_index(&self, entries: &[StreamEntry]) -> Option<usize> {
        let key = self.selected.as_ref()?;
        entries.iter().position(|e| &e.key() == key)
    }

    /// Reconcile the selection with a new set of entries.
    pub fn sync(&mut self, entries: &[StreamEntry]) {
        if entries.is_empty() {
            self.selected = None;
            self.scroll_offset = 0;
            return;
        }
        if self.follow || self.selected_index(entries).is_none() {
            self.selected = entries.last().map(StreamEntry::key);
        }
    }

    /// Apply a scroll instruction from the stream.
    pub fn apply(&mut self, request: ScrollRequest) {
        match request {
            ScrollRequest::Bottom => {
                self.follow = true;
                self.selected = None;
            }
            ScrollRequest::Anchor(key) => {
                // Older content was prepended: keep the previous first entry
                // on the top row, selected.
                self.follow = false;
                self.selected = Some(key.clone());
                self.pin = Some(key);
            }
            ScrollRequest::Reveal(message_id) => {
                self.follow = false;
                self.selected = Some(EntryKey::Message(message_id));
            }
        }
    }

    /// Move selection up. Returns `true` when the top entry is selected.
    pub fn select_previous(&mut self, entries: &[StreamEntry]) -> bool {
        let Some(idx) = self.selected_index(entries) else {
            self.selected = entries.last().map(StreamEntry::key);
            return entries.len() <= 1;
        };
        let idx = idx.saturating_sub(1);
        self.selected = Some(entries[idx].key());
        self.follow = false;
        idx == 0
    }

    /// Move selection down. Returns `true` when the bottom entry is selected.
    pub fn select_next(&mut self, entries: &[StreamEntry]) -> bool {
        let Some(idx) = self.selected_index(entries) else {
            self.selected = entries.last().map(StreamEntry::key);
            return true;
        };
        let idx = (idx + 1).min(entries.len().saturating_sub(1));
        self.selected = entries.get(idx).map(StreamEntry::key);
        let at_bottom = idx + 1 >= entries.len();
        self.follow = at_bottom;
        at_bottom
    }

    pub fn select_first(&mut self, entries: &[StreamEntry]) {
        self.selected = entries.first().map(StreamEntry::key);
        self.follow = entries.len() <= 1;
    }

    /// Selected message, if the selection is a message.
    pub fn selected_message<'a>(&self, entries: &'a [StreamEntry]) -> Option<&'a Message> {
        entries.get(self.selected_index(entries)?)?.as_message()
    }
}

/// Render the messages pane into the given area.
pub fn render(
    area: Rect,
    buf: &mut Buffer,
    view: &mut MessagesView,
    snapshot: &StreamSnapshot,
    members: &ChannelMembers,
) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Plain)
        .border_style(Style::default().fg(Color::DarkGray));

    let inner = block.inner(area);
    block.render(area, buf);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let entries = snapshot.entries.as_slice();
    if entries.is_empty() {
        let text = if snapshot.is_loading {
            "Loading..."
        } else {
            "(no messages)"
        };
        Paragraph::new(Line::from(Span::styled(
            text,
            Style::default().fg(Color::DarkGray),
        )))
        .render(inner, buf);
        return;
    }

    let selected = view.selected_index(entries);
    let (all_lines, ranges) = build_lines(
        entries,
        members,
        selected,
        snapshot.highlighted.as_deref(),
        inner.width as usize,
    );
    let total_lines = all_lines.len();
    let visible_height = inner.height as usize;

    let pinned = view
        .pin
        .take()
        .and_then(|key| entries.iter().position(|e| e.key() == key))
        .and_then(|idx| ranges.get(idx))
        .map(|(start, _)| *start);

    let scroll = match pinned {
        Some(start) => start.min(total_lines.saturating_sub(visible_height)),
        None if view.follow => total_lines.saturating_sub(visible_height),
        None => compute_auto_scroll(
            view.scroll_offset,
            selected,
            &ranges,
            visible_height,
            total_lines,
        ),
    };
    view.scroll_offset = scroll;

    for (row, line_idx) in (scroll..total_lines).take(visible_height).enumerate() {
        let y = inner.y + row as u16;
        let line_area = Rect::new(inner.x, y, inner.width, 1);
        Paragraph::new(all_lines[line_idx].clone()).render(line_area, buf);
    }

    if total_lines > visible_height {
        let indicator_x = inner.x + inner.width.saturating_sub(1);
        if scroll > 0 {
            let cell = &mut buf[(indicator_x, inner.y)];
            cell.set_char('^');
            cell.set_style(Style::default().fg(Color::DarkGray));
        }
        if scroll + visible_height < total_lines {
            let bottom_y = inner.y + inner.height.saturating_sub(1);
            let cell = &mut buf[(indicator_x, bottom_y)];
            cell.set_char('v');
            cell.set_style(Style::default().fg(Color::DarkGray));
        }
    }
}

/// Build the flat line buffer and per-entry line ranges in a single pass.
fn build_lines(
    entries: &[StreamEntry],
    members: &ChannelMembers,
    selected: Option<usize>,
    highlighted: Option<&str>,
    width: usize,
) -> (Vec<Line<'static>>, Vec<(usize, usize)>) {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut ranges: Vec<(usize, usize)> = Vec::with_capacity(entries.len());

    for (idx, entry) in entries.iter().enumerate() {
        let start = lines.len();
        let is_selected = selected == Some(idx);
        match entry {
            StreamEntry::DateSeparator(day) => {
                let label = day.format("%a, %-d %b %Y").to_string();
                lines.push(date_rule(&label, width, is_selected));
            }
            StreamEntry::Message(msg) => {
                let is_highlighted = highlighted == Some(msg.name.as_str());
                push_message(&mut lines, msg, members, width, is_selected, is_highlighted);
            }
        }
        ranges.push((start, lines.len()));
    }

    (lines, ranges)
}

/// Centered `──── label ────` line.
fn date_rule(label: &str, width: usize, is_selected: bool) -> Line<'static> {
    let label = format!(" {} ", label);
    let rule = width.saturating_sub(label.width());
    let left = rule / 2;
    let style = if is_selected {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Line::from(Span::styled(
        format!("{}{}{}", "─".repeat(left), label, "─".repeat(rule - left)),
        style,
    ))
}

fn push_message(
    lines: &mut Vec<Line<'static>>,
    msg: &Message,
    members: &ChannelMembers,
    width: usize,
    is_selected: bool,
    is_highlighted: bool,
) {
    let gutter = if is_selected { "▌ " } else { "  " };
    let gutter_style = Style::default().fg(Color::Yellow);
    let base = if is_highlighted {
        Style::default().bg(Color::Rgb(60, 50, 0))
    } else {
        Style::default()
    };

    let mut header = vec![
        Span::styled(gutter.to_string(), gutter_style),
        Span::styled(
            display_name(members, &msg.owner).to_string(),
            base.fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  {}", msg.creation.format("%H:%M")),
            base.fg(Color::DarkGray),
        ),
    ];
    if msg.is_edited {
        header.push(Span::styled(" (edited)", base.fg(Color::DarkGray)));
    }
    if msg.is_reply && msg.linked_message.is_some() {
        header.push(Span::styled(
            " ↪ reply (Enter to jump)",
            base.fg(Color::Cyan).add_modifier(Modifier::DIM),
        ));
    }
    lines.push(Line::from(header));

    let content_width = width.saturating_sub(gutter.width());
    for text in wrap_text(&msg.plain_text(), content_width) {
        lines.push(Line::from(vec![
            Span::styled(gutter.to_string(), gutter_style),
            Span::styled(text, base),
        ]));
    }

    if let Some(reactions) = msg.reaction_summary() {
        lines.push(Line::from(vec![
            Span::styled(gutter.to_string(), gutter_style),
            Span::styled(reactions, base.fg(Color::Yellow)),
        ]));
    }
}

/// Word-wrap by display width: split on newlines, then wrap long lines.
/// Words wider than the line are split by character.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    if max_width == 0 {
        return vec![];
    }
    let mut result = Vec::new();
    for line in text.lines() {
        if line.width() <= max_width {
            result.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            let sep = usize::from(!current.is_empty());
            if current.width() + sep + word.width() <= max_width {
                if sep == 1 {
                    current.push(' ');
                }
                current.push_str(word);
                continue;
            }
            if !current.is_empty() {
                result.push(std::mem::take(&mut current));
            }
            for ch in word.chars() {
                let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
                if current.width() + ch_width > max_width && !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
                current.push(ch);
            }
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}

/// Compute scroll offset that keeps the selected entry visible.
fn compute_auto_scroll(
    current_scroll: usize,
    selected: Option<usize>,
    ranges: &[(usize, usize)],
    visible_height: usize,
    total_lines: usize,
) -> usize {
    if ranges.is_empty() || total_lines <= visible_height {
        return 0;
    }

    let Some(&(sel_start, sel_end)) = selected.and_then(|idx| ranges.get(idx)) else {
        return current_scroll.min(total_lines.saturating_sub(visible_height));
    };

    let mut scroll = current_scroll;

    // Taller than the viewport: show its start.
    if sel_end.saturating_sub(sel_start) >= visible_height {
        scroll = sel_start;
    } else {
        if sel_start < scroll {
            scroll = sel_start;
        }
        if sel_end > scroll + visible_height {
            scroll = sel_end.saturating_sub(visible_height);
        }
    }

    let max_scroll = total_lines.saturating_sub(visible_height);
    scroll.min(max_scroll)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::message;
    use crate::stream::MessageWindow;
    use chrono::NaiveDate;

    fn entries() -> Vec<StreamEntry> {
        MessageWindow::from_messages(vec![
            message("a", "2024-03-04 09:00:00"),
            message("b", "2024-03-05 09:00:00"),
            message("c", "2024-03-05 10:00:00"),
        ])
        .entries()
    }

    #[test]
    fn test_wrap_text_by_width() {
        assert_eq!(wrap_text("hello world foo", 11), vec!["hello world", "foo"]);
        assert_eq!(wrap_text("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(wrap_text("line one\nline two", 20), vec!["line one", "line two"]);
        assert!(wrap_text("anything", 0).is_empty());
    }

    #[test]
    fn test_wrap_text_counts_wide_chars() {
        // Each CJK character is two columns wide.
        assert_eq!(wrap_text("日本語テキスト", 6), vec!["日本語", "テキス", "ト"]);
    }

    #[test]
    fn test_auto_scroll_keeps_selection_visible() {
        let ranges = vec![(0, 3), (3, 6), (6, 9), (9, 12)];
        assert_eq!(compute_auto_scroll(0, Some(3), &ranges, 5, 12), 7);
        assert_eq!(compute_auto_scroll(7, Some(0), &ranges, 5, 12), 0);
        assert_eq!(compute_auto_scroll(2, Some(1), &ranges, 5, 12), 2);
        assert_eq!(compute_auto_scroll(4, None, &ranges, 20, 12), 0);
    }

    #[test]
    fn test_sync_follows_newest() {
        let entries = entries();
        let mut view = MessagesView::new();
        view.sync(&entries);
        assert_eq!(view.selected, Some(EntryKey::Message("c".into())));
    }

    #[test]
    fn test_select_previous_reports_top() {
        let entries = entries();
        let mut view = MessagesView::new();
        view.sync(&entries);
        let mut reached_top = false;
        for _ in 0..entries.len() {
            reached_top = view.select_previous(&entries);
        }
        assert!(reached_top);
        assert!(!view.follow);
        assert_eq!(
            view.selected,
            Some(EntryKey::Date(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()))
        );

        assert!(!view.select_next(&entries));
        assert_eq!(view.selected, Some(EntryKey::Message("a".into())));
    }

    #[test]
    fn test_anchor_keeps_selection_after_prepend() {
        let mut view = MessagesView::new();
        let entries = entries();
        view.sync(&entries);
        view.select_first(&entries);

        view.apply(ScrollRequest::Anchor(EntryKey::Message("b".into())));
        view.sync(&entries);
        assert_eq!(view.selected, Some(EntryKey::Message("b".into())));
        assert!(!view.follow);
    }

    #[test]
    fn test_reveal_selects_message() {
        let entries = entries();
        let mut view = MessagesView::new();
        view.sync(&entries);
        view.apply(ScrollRequest::Reveal("a".into()));
        view.sync(&entries);
        assert_eq!(view.selected_message(&entries).unwrap().name, "a");
    }

    #[test]
    fn test_render_pins_anchor_to_top() {
        let mut messages = Vec::new();
        for i in 0..30 {
            let creation = format!("2024-03-05 10:{:02}:00", i);
            messages.push(message(&format!("m{:02}", i), &creation));
        }
        let snapshot = StreamSnapshot {
            entries: std::sync::Arc::new(MessageWindow::from_messages(messages).entries()),
            ..Default::default()
        };
        let mut view = MessagesView::new();
        view.sync(&snapshot.entries);
        view.apply(ScrollRequest::Anchor(EntryKey::Message("m10".into())));

        let area = Rect::new(0, 0, 40, 12);
        let mut buf = Buffer::empty(area);
        render(area, &mut buf, &mut view, &snapshot, &ChannelMembers::new());

        // Separator line, then two lines per message: m10 header starts at line 21.
        assert_eq!(view.scroll_offset, 21);
        let top_row: String = (1u16..39)
            .map(|x| buf[(x, 1u16)].symbol().to_string())
            .collect();
        assert!(top_row.contains("tester@example.com"));
    }
}
