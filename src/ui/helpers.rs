//! Helper functions for dashboard rendering

use chrono::{DateTime, Local, Utc};
use ratatui::{
    style::{Color, Modifier, Style},
    text::Span,
};
use unicode_width::UnicodeWidthChar;

/// Truncate to at most `max_width` terminal columns, ending in "..." when cut
pub fn truncate_with_ellipsis(s: &str, max_width: usize) -> String {
    let total: usize = s.chars().map(|c| c.width().unwrap_or(0)).sum();
    if total <= max_width {
        return s.to_string();
    }

    let budget = max_width.saturating_sub(3);
    let mut used = 0;
    let mut result = String::with_capacity(max_width);
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        result.push(c);
    }
    if max_width >= 3 {
        result.push_str("...");
    }
    result
}

/// Tail of a session id, enough to tell sessions apart in narrow columns
pub fn short_id(id: &str) -> &str {
    let count = id.chars().count();
    match id.char_indices().nth(count.saturating_sub(8)) {
        Some((idx, _)) if count > 8 => &id[idx..],
        _ => id,
    }
}

/// Wall-clock time of an event in the local timezone
pub fn clock(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Bold colored badge span
pub fn badge(text: impl Into<String>, color: Color) -> Span<'static> {
    Span::styled(
        text.into(),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )
}

/// First `height` items after skipping `offset`, with the offset clamped to the list
pub fn window<T>(items: &[T], offset: usize, height: usize) -> (&[T], usize) {
    let max_offset = items.len().saturating_sub(height.max(1));
    let offset = offset.min(max_offset);
    let end = (offset + height).min(items.len());
    (&items[offset..end], offset)
}
