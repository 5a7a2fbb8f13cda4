//! Escaping and value formatting for the Graphite plaintext protocol.
//!
//! Every line sent to Graphite has the shape `<path> <value> <timestamp>\n`. The helpers in this module produce the
//! individual pieces of that line: path segments that are safe to embed in a dotted metric path, the textual form of a
//! field value, and the Unix timestamp.

use std::borrow::Cow;

use chrono::{DateTime, Utc};

use crate::point::FieldValue;

const ESCAPE_REPLACEMENT: char = '_';

// Any whitespace would break the `<path> <value> <timestamp>\n` line shape.
fn is_unsafe(c: char, keep_dots: bool) -> bool {
    match c {
        '=' | ',' => true,
        '.' => !keep_dots,
        c => c.is_whitespace(),
    }
}

fn escape(s: &str, keep_dots: bool) -> Cow<'_, str> {
    if !s.chars().any(|c| is_unsafe(c, keep_dots)) {
        return Cow::Borrowed(s);
    }

    let escaped = s
        .chars()
        .map(|c| if is_unsafe(c, keep_dots) { ESCAPE_REPLACEMENT } else { c })
        .collect();
    Cow::Owned(escaped)
}

/// Escapes a metric name, context, or key so that it can be embedded in a dotted Graphite path.
///
/// Whitespace (including line breaks), `=` and `,` are replaced with `_`. When `is_path_segment` is `true`, the
/// string is treated as a path (or part of one) and dots are preserved as path separators; otherwise dots are replaced
/// as well.
///
/// Escaping is idempotent: escaping an already-escaped string returns it unchanged.
pub fn escape_name(s: &str, is_path_segment: bool) -> Cow<'_, str> {
    escape(s, is_path_segment)
}

/// Escapes a tag value that is placed inline in a dotted Graphite path.
///
/// Applies the same substitution as [`escape_name`] for a non-path string, so a tag value always occupies exactly one
/// path segment.
pub fn escape_tag_value(s: &str) -> Cow<'_, str> {
    escape(s, false)
}

/// Formats a field value for the wire.
///
/// - integers render in base 10 with no decimal point
/// - floating-point values render fixed to two decimal places
/// - booleans render as `t` or `f`
/// - durations render as whole milliseconds
/// - strings render as-is, except for whitespace, which is replaced with `_`
pub fn format_value(value: &FieldValue) -> String {
    let mut buf = String::new();
    write_value(&mut buf, value);
    buf
}

pub(crate) fn write_value(buf: &mut String, value: &FieldValue) {
    let mut int_writer = itoa::Buffer::new();
    match value {
        FieldValue::Int(v) => buf.push_str(int_writer.format(*v)),
        FieldValue::UInt(v) => buf.push_str(int_writer.format(*v)),
        FieldValue::Float(v) => {
            use std::fmt::Write as _;
            let _ = write!(buf, "{v:.2}");
        }
        FieldValue::Bool(true) => buf.push('t'),
        FieldValue::Bool(false) => buf.push('f'),
        FieldValue::Duration(d) => buf.push_str(int_writer.format(d.as_millis())),
        FieldValue::Str(s) => {
            buf.extend(s.chars().map(|c| if c.is_whitespace() { ESCAPE_REPLACEMENT } else { c }));
        }
    }
}

/// Formats a UTC instant as Unix epoch seconds.
///
/// Sub-second precision is truncated towards zero rather than rounded.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    itoa::Buffer::new().format(unix_seconds(timestamp)).to_owned()
}

pub(crate) fn unix_seconds(timestamp: &DateTime<Utc>) -> i64 {
    let secs = timestamp.timestamp();
    if secs < 0 && timestamp.timestamp_subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
