//! Strategies for turning a point into Graphite lines.
//!
//! Both formatters share the same path prefix: the reserved tags (`app`, `env`, `server`, `mtype`) are lifted to the
//! front of the path, followed by the point's context and name. They differ in how the remaining tags are rendered:
//!
//! - [`PathNameFormatter`] appends every remaining tag as a `.<key>.<value>` pair of path segments.
//! - [`TaggedNameFormatter`] appends them as `;key=value` pairs, using the tag support in Graphite 1.1+.

use std::collections::HashSet;
use std::sync::Arc;

use crate::point::GraphitePoint;
use crate::syntax::{escape_name, escape_tag_value, unix_seconds, write_value};
use crate::tags::{APP_TAG, ENV_TAG, METRIC_TYPE_TAG, RESERVED_TAGS, SERVER_TAG};

/// Tag keys that are never rendered as generic tags by default.
pub const DEFAULT_TAG_EXCLUSIONS: [&str; 7] =
    [APP_TAG, ENV_TAG, SERVER_TAG, METRIC_TYPE_TAG, "unit", "unit_rate", "unit_dur"];

/// Turns a point into Graphite plaintext lines.
///
/// Implementations must produce exactly one line per field of the point, each line terminated by `\n`, and must not
/// depend on anything but the point itself.
pub trait NameFormatter: Send + Sync {
    /// Formats the given point into one line per field.
    fn format(&self, point: &GraphitePoint) -> Vec<String>;
}

impl<F> NameFormatter for Arc<F>
where
    F: NameFormatter + ?Sized,
{
    fn format(&self, point: &GraphitePoint) -> Vec<String> {
        (**self).format(point)
    }
}

fn default_exclusions() -> HashSet<String> {
    DEFAULT_TAG_EXCLUSIONS.iter().map(|s| (*s).to_owned()).collect()
}

fn push_separator(buf: &mut String) {
    if !buf.is_empty() && !buf.ends_with('.') {
        buf.push('.');
    }
}

/// Writes the reserved portion of the path, the context, and the name.
fn write_path_prefix(buf: &mut String, point: &GraphitePoint) {
    let tags = point.tags();

    for key in [APP_TAG, ENV_TAG, SERVER_TAG] {
        if let Some(value) = tags.get(key) {
            push_separator(buf);
            buf.push_str(key);
            buf.push('.');
            buf.push_str(&escape_tag_value(value));
        }
    }

    if let Some(metric_type) = tags.get(METRIC_TYPE_TAG).filter(|v| !v.trim().is_empty()) {
        push_separator(buf);
        buf.push_str(&escape_tag_value(metric_type));
    }

    if let Some(context) = point.context().filter(|c| !c.trim().is_empty()) {
        let context = escape_name(context, true);
        let context = trim_separators(&context);
        if !context.is_empty() {
            push_separator(buf);
            buf.push_str(context);
        }
    }

    push_separator(buf);
    let name = escape_name(point.name(), true);
    match trim_separators(&name) {
        // A name made only of dots still needs a segment of its own.
        "" => buf.push_str(&escape_name(point.name(), false)),
        name => buf.push_str(name),
    }
}

// Leading or trailing dots would produce empty path segments.
fn trim_separators(segment: &str) -> &str {
    segment.trim_matches('.')
}

fn generic_tags<'a>(
    point: &'a GraphitePoint,
    exclusions: &'a HashSet<String>,
) -> impl Iterator<Item = (&'a str, &'a str)> {
    point
        .tags()
        .iter()
        .filter(move |(key, _)| !RESERVED_TAGS.contains(key) && !exclusions.contains(*key))
}

/// Renders one line per field, given the shared path up to (but excluding) the field name, and a suffix written
/// directly after the field name.
fn render_fields(point: &GraphitePoint, prefix: &str, suffix: &str) -> Vec<String> {
    let mut int_writer = itoa::Buffer::new();
    let timestamp = int_writer.format(unix_seconds(point.timestamp())).to_owned();

    point
        .fields()
        .map(|(key, value)| {
            let mut line = String::with_capacity(prefix.len() + suffix.len() + key.len() + 32);
            line.push_str(prefix);
            line.push('.');
            line.push_str(&escape_name(key, false));
            line.push_str(suffix);
            line.push(' ');
            write_value(&mut line, value);
            line.push(' ');
            line.push_str(&timestamp);
            line.push('\n');
            line
        })
        .collect()
}

/// Formats points with their tags embedded as path segments.
///
/// A point named `requests` with the tags `env=prod`, `mtype=counter` and `region=eu` and a single `value` field
/// renders as:
///
/// ```text
/// env.prod.counter.requests.region.eu.value 42 1483232461
/// ```
#[derive(Clone, Debug)]
pub struct PathNameFormatter {
    exclusions: HashSet<String>,
}

impl PathNameFormatter {
    /// Creates a `PathNameFormatter` with the default tag exclusions.
    pub fn new() -> Self {
        Self { exclusions: default_exclusions() }
    }

    /// Sets the tag keys that are never rendered as generic tags.
    ///
    /// The reserved tags are always excluded from the generic tags, regardless of this setting.
    #[must_use]
    pub fn with_exclusions<I, S>(mut self, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions = exclusions.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for PathNameFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl NameFormatter for PathNameFormatter {
    fn format(&self, point: &GraphitePoint) -> Vec<String> {
        let mut prefix = String::new();
        write_path_prefix(&mut prefix, point);

        for (key, value) in generic_tags(point, &self.exclusions) {
            prefix.push('.');
            prefix.push_str(&escape_name(key, false));
            prefix.push('.');
            prefix.push_str(&escape_tag_value(value));
        }

        render_fields(point, &prefix, "")
    }
}

/// Formats points with their tags attached as Graphite tag metadata.
///
/// A point named `requests` with the tags `env=prod`, `mtype=counter` and `region=eu` and a single `value` field
/// renders as:
///
/// ```text
/// env.prod.counter.requests.value;region=eu 42 1483232461
/// ```
#[derive(Clone, Debug)]
pub struct TaggedNameFormatter {
    exclusions: HashSet<String>,
}

impl TaggedNameFormatter {
    /// Creates a `TaggedNameFormatter` with the default tag exclusions.
    pub fn new() -> Self {
        Self { exclusions: default_exclusions() }
    }

    /// Sets the tag keys that are never rendered as tags.
    ///
    /// The reserved tags are always excluded, regardless of this setting.
    #[must_use]
    pub fn with_exclusions<I, S>(mut self, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions = exclusions.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for TaggedNameFormatter {
    fn default() -> Self {
        Self::new()
    }
}

// `;` separates tags and `~` is reserved by Graphite for its tag query syntax.
fn escape_tag_metadata(s: &str) -> String {
    escape_tag_value(s).replace([';', '~'], "_")
}

impl NameFormatter for TaggedNameFormatter {
    fn format(&self, point: &GraphitePoint) -> Vec<String> {
        let mut prefix = String::new();
        write_path_prefix(&mut prefix, point);

        let mut suffix = String::new();
        for (key, value) in generic_tags(point, &self.exclusions) {
            suffix.push(';');
            suffix.push_str(&escape_tag_metadata(key));
            suffix.push('=');
            suffix.push_str(&escape_tag_metadata(value));
        }

        render_fields(point, &prefix, &suffix)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};
    use proptest::{collection::vec as arb_vec, prelude::*};

    use super::{NameFormatter, PathNameFormatter, TaggedNameFormatter};
    use crate::point::GraphitePoint;
    use crate::tags::MetricTags;

    fn point(context: Option<&str>, name: &str, tags: MetricTags) -> GraphitePoint {
        let timestamp = Utc.with_ymd_and_hms(2017, 1, 1, 1, 1, 1).unwrap();
        let mut builder = GraphitePoint::builder(name).field("key", "value").tags(tags).timestamp(timestamp);
        if let Some(context) = context {
            builder = builder.context(context);
        }
        builder.build().unwrap()
    }

    #[test]
    fn formats_bare_point() {
        let lines = PathNameFormatter::new().format(&point(None, "measurement", MetricTags::new()));
        assert_eq!(lines, ["measurement.key value 1483232461\n"]);
    }

    #[test]
    fn formats_generic_tags_as_path_segments() {
        let tags = MetricTags::new().with("tagkey", "tagvalue");
        let lines = PathNameFormatter::new().format(&point(None, "measurement", tags));
        assert_eq!(lines, ["measurement.tagkey.tagvalue.key value 1483232461\n"]);
    }

    #[test]
    fn formats_context_and_metric_type() {
        let timestamp = Utc.with_ymd_and_hms(2017, 1, 1, 1, 1, 1).unwrap();
        let point = GraphitePoint::builder("test counter")
            .context("test")
            .field("value", 1)
            .tags(MetricTags::new().with("mtype", "counter"))
            .timestamp(timestamp)
            .build()
            .unwrap();

        let lines = PathNameFormatter::new().format(&point);
        assert_eq!(lines, ["counter.test.test_counter.value 1 1483232461\n"]);
    }

    #[test]
    fn reserved_tags_move_to_the_front() {
        let tags = MetricTags::new()
            .with("host", "server1")
            .with("env", "staging")
            .with("app", "shop")
            .with("server", "web 01");
        let lines = PathNameFormatter::new().format(&point(Some("http"), "requests", tags));
        assert_eq!(
            lines,
            ["app.shop.env.staging.server.web_01.http.requests.host.server1.key value 1483232461\n"]
        );
    }

    #[test]
    fn excluded_tags_are_skipped() {
        let tags = MetricTags::new().with("unit", "ms").with("region", "eu").with("unit_rate", "s");
        let lines = PathNameFormatter::new().format(&point(None, "latency", tags.clone()));
        assert_eq!(lines, ["latency.region.eu.key value 1483232461\n"]);

        let lines = PathNameFormatter::new()
            .with_exclusions(["region"])
            .format(&point(None, "latency", tags));
        assert_eq!(lines, ["latency.unit.ms.unit_rate.s.key value 1483232461\n"]);
    }

    #[test]
    fn blank_metric_type_and_context_are_skipped() {
        let tags = MetricTags::new().with("mtype", "  ").with("env", "dev");
        let lines = PathNameFormatter::new().format(&point(Some(" "), "requests", tags));
        assert_eq!(lines, ["env.dev.requests.key value 1483232461\n"]);
    }

    #[test]
    fn field_names_and_tags_are_escaped() {
        let timestamp = Utc.with_ymd_and_hms(2017, 1, 1, 1, 1, 1).unwrap();
        let point = GraphitePoint::builder("my.metric name")
            .field("p.99", 1.5)
            .tags(MetricTags::new().with("ver sion", "1.2"))
            .timestamp(timestamp)
            .build()
            .unwrap();

        let lines = PathNameFormatter::new().format(&point);
        assert_eq!(lines, ["my.metric_name.ver_sion.1_2.p_99 1.50 1483232461\n"]);
    }

    #[test]
    fn line_breaks_cannot_inject_lines() {
        let timestamp = Utc.with_ymd_and_hms(2017, 1, 1, 1, 1, 1).unwrap();
        let point = GraphitePoint::builder("req\nevil.metric 999 0")
            .field("value", "1\nx.y 2 3")
            .tags(MetricTags::new().with("host", "a\nb"))
            .timestamp(timestamp)
            .build()
            .unwrap();

        let lines = PathNameFormatter::new().format(&point);
        assert_eq!(lines, ["req_evil.metric_999_0.host.a_b.value 1_x.y_2_3 1483232461\n"]);

        let lines = TaggedNameFormatter::new().format(&point);
        assert_eq!(lines, ["req_evil.metric_999_0.value;host=a_b 1_x.y_2_3 1483232461\n"]);
    }

    #[test]
    fn leading_and_trailing_dots_are_trimmed() {
        let lines = PathNameFormatter::new().format(&point(Some(".ctx."), ".requests.", MetricTags::new()));
        assert_eq!(lines, ["ctx.requests.key value 1483232461\n"]);

        let lines = PathNameFormatter::new().format(&point(Some("..."), "..", MetricTags::new()));
        assert_eq!(lines, ["__.key value 1483232461\n"]);
    }

    #[test]
    fn formats_tags_as_metadata() {
        let tags = MetricTags::new()
            .with("region", "eu")
            .with("env", "prod")
            .with("mtype", "counter")
            .with("host", "a;b");
        let lines = TaggedNameFormatter::new().format(&point(None, "requests", tags));
        assert_eq!(lines, ["env.prod.counter.requests.key;region=eu;host=a_b value 1483232461\n"]);
    }

    #[test]
    fn formats_multiple_fields() {
        let timestamp = Utc.with_ymd_and_hms(2017, 1, 1, 1, 1, 1).unwrap();
        let point = GraphitePoint::builder("measurement")
            .field("field1key", "field1value")
            .field("field2key", 2)
            .field("field3key", false)
            .timestamp(timestamp)
            .build()
            .unwrap();

        let lines = PathNameFormatter::new().format(&point);
        assert_eq!(
            lines,
            [
                "measurement.field1key field1value 1483232461\n",
                "measurement.field2key 2 1483232461\n",
                "measurement.field3key f 1483232461\n",
            ]
        );
    }

    proptest! {
        #[test]
        fn one_line_per_field(
            keys in arb_vec("[a-z \\n\\r]{1,8}", 1..16),
            text in "[a-z \\n\\r]{0,8}",
            tagged in any::<bool>(),
        ) {
            let mut builder = GraphitePoint::builder(format!("measure\nment {text}"))
                .context(text.clone())
                .tags(MetricTags::new().with(format!("ho\nst{text}"), text.clone()).with("env", text.clone()));
            for (i, key) in keys.iter().enumerate() {
                if i % 2 == 0 {
                    builder = builder.field(format!("{key}_{i}"), i as u64);
                } else {
                    builder = builder.field(format!("{key}_{i}"), text.clone());
                }
            }
            let point = builder.build().unwrap();

            let lines = if tagged {
                TaggedNameFormatter::new().format(&point)
            } else {
                PathNameFormatter::new().format(&point)
            };

            prop_assert_eq!(lines.len(), keys.len());
            for line in lines {
                prop_assert!(line.ends_with('\n'));
                prop_assert_eq!(line.matches('\n').count(), 1);
                prop_assert!(!line.contains('\r'));
                prop_assert_eq!(line.trim_end_matches('\n').split(' ').count(), 3);
            }
        }
    }
}
