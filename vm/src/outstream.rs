//! The output stream and text assembly.
//!
//! Content emitted during a continue chunk accumulates as stream items;
//! rendering to display text applies the glue and whitespace rules. String
//! building (`str` … `/str`) and tags (`#` … `/#`) bracket slices of the
//! stream with markers that are folded back out before the host sees the
//! text.

use skein_types::{Value, ValueKind};

/// One element of the output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A value to render (text atoms, numbers, booleans, lists).
    Value(Value),
    /// Newline suppression marker.
    Glue,
    /// Open marker of a string-building bracket.
    StringStart,
    /// Open marker of a tag bracket.
    TagStart,
    /// A folded tag attached to the surrounding output.
    Tag(String),
}

/// Render stream items to display text.
///
/// Glue removes newlines between the most recent non-whitespace character
/// and the buffer end, and suppresses newline atoms until the next
/// non-whitespace atom. Void and non-textual values render nothing.
#[must_use]
pub fn render_text(items: &[StreamItem]) -> String {
    let mut buf = String::new();
    let mut glue_active = false;

    for item in items {
        match item {
            StreamItem::Glue => {
                strip_newlines_after_last_text(&mut buf);
                glue_active = true;
            }
            StreamItem::StringStart | StreamItem::TagStart | StreamItem::Tag(_) => {}
            StreamItem::Value(value) => {
                match value.kind() {
                    ValueKind::Void | ValueKind::DivertTarget | ValueKind::VariablePointer => {
                        continue
                    }
                    _ => {}
                }
                if value.is_newline() {
                    if glue_active {
                        continue;
                    }
                } else if !value.is_inline_whitespace() {
                    glue_active = false;
                }
                buf.push_str(&value.to_text());
            }
        }
    }

    buf
}

/// Remove newlines that occur after the last non-whitespace character,
/// preserving spaces and tabs.
fn strip_newlines_after_last_text(buf: &mut String) {
    let bytes = buf.as_bytes();
    let last_text = bytes
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t' | b'\n'));
    let suffix_start = last_text.map_or(0, |i| i + 1);
    if bytes[suffix_start..].contains(&b'\n') {
        let head = buf[..suffix_start].to_string();
        let tail: String = buf[suffix_start..].chars().filter(|c| *c != '\n').collect();
        *buf = head + &tail;
    }
}

/// Whether the stream ends a continue chunk: the last non-glue item is a
/// newline atom.
#[must_use]
pub fn ends_in_newline(items: &[StreamItem]) -> bool {
    for item in items.iter().rev() {
        match item {
            StreamItem::Glue => continue,
            StreamItem::Value(v) => return v.is_newline(),
            _ => return false,
        }
    }
    false
}

/// Fold the slice since the last open marker of `kind` into its text,
/// removing the slice and the marker from the stream.
///
/// Non-text items inside the bracket are dropped; returns `None` when no
/// marker is open.
pub fn fold_since_marker(items: &mut Vec<StreamItem>, marker: &StreamItem) -> Option<String> {
    let start = items.iter().rposition(|item| item == marker)?;
    let mut text = String::new();
    for item in &items[start + 1..] {
        if let StreamItem::Value(Value::Str(s)) = item {
            text.push_str(s);
        }
    }
    items.truncate(start);
    Some(text)
}

/// The tags folded into the stream, in emission order.
#[must_use]
pub fn tags(items: &[StreamItem]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            StreamItem::Tag(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}
