use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use indexmap::IndexMap;
use thiserror::Error;

use crate::tags::MetricTags;

/// Errors that could occur while constructing a [`GraphitePoint`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PointError {
    /// The point had no name.
    #[error("a name must be specified")]
    MissingName,

    /// The point had no fields.
    #[error("at least one field must be specified")]
    NoFields,

    /// One of the fields had an empty name.
    #[error("fields must have non-empty names")]
    EmptyFieldKey,

    /// The timestamp carried a non-zero UTC offset.
    #[error("timestamps must be specified as UTC (got offset {offset})")]
    NonUtcTimestamp {
        /// Offset of the rejected timestamp.
        offset: FixedOffset,
    },
}

/// The value of a single point field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// A signed integer.
    Int(i64),

    /// An unsigned integer.
    UInt(u64),

    /// A floating-point number.
    Float(f64),

    /// A boolean.
    Bool(bool),

    /// A duration, sent as whole milliseconds.
    Duration(Duration),

    /// Any other value, sent in its string form.
    Str(String),
}

macro_rules! impl_from_for_field_value {
    ($variant:ident($target:ty): $($source:ty),+) => {
        $(
            impl From<$source> for FieldValue {
                fn from(value: $source) -> Self {
                    FieldValue::$variant(<$target>::from(value))
                }
            }
        )+
    };
}

impl_from_for_field_value!(Int(i64): i8, i16, i32, i64);
impl_from_for_field_value!(UInt(u64): u8, u16, u32, u64);
impl_from_for_field_value!(Float(f64): f32, f64);
impl_from_for_field_value!(Bool(bool): bool);
impl_from_for_field_value!(Duration(Duration): Duration);
impl_from_for_field_value!(Str(String): String, &str);

/// A single measurement: a named set of fields, tagged and timestamped.
///
/// A point renders into one wire line per field. Points are validated when built and are immutable afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphitePoint {
    context: Option<String>,
    name: String,
    fields: IndexMap<String, FieldValue>,
    tags: MetricTags,
    timestamp: DateTime<Utc>,
}

impl GraphitePoint {
    /// Creates a [`PointBuilder`] for a point with the given name.
    pub fn builder<N>(name: N) -> PointBuilder
    where
        N: Into<String>,
    {
        PointBuilder::new(name)
    }

    /// Creates a point from its parts.
    ///
    /// When `timestamp` is `None`, the point is stamped with the current time.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty, if there are no fields, or if any field has an empty name.
    pub fn new<I, K, V>(
        context: Option<&str>,
        name: &str,
        fields: I,
        tags: MetricTags,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Self, PointError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let mut builder = PointBuilder::new(name).fields(fields).tags(tags);
        if let Some(context) = context {
            builder = builder.context(context);
        }
        if let Some(timestamp) = timestamp {
            builder = builder.timestamp(timestamp);
        }
        builder.build()
    }

    /// Gets the context of this point, if any.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Gets the name of this point.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Iterates over the fields of this point, in insertion order.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Gets the tags of this point.
    pub fn tags(&self) -> &MetricTags {
        &self.tags
    }

    /// Gets the timestamp of this point.
    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }
}

/// Builder for a [`GraphitePoint`].
#[derive(Debug)]
pub struct PointBuilder {
    context: Option<String>,
    name: String,
    fields: IndexMap<String, FieldValue>,
    tags: MetricTags,
    timestamp: Option<DateTime<FixedOffset>>,
}

impl PointBuilder {
    fn new<N: Into<String>>(name: N) -> Self {
        PointBuilder {
            context: None,
            name: name.into(),
            fields: IndexMap::new(),
            tags: MetricTags::new(),
            timestamp: None,
        }
    }

    /// Sets the context (logical namespace) of the point.
    ///
    /// Blank contexts are ignored when the point is rendered.
    #[must_use]
    pub fn context<C: Into<String>>(mut self, context: C) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Adds a field to the point.
    ///
    /// Adding a field with an existing name replaces its value.
    #[must_use]
    pub fn field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Adds several fields to the point.
    #[must_use]
    pub fn fields<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.fields.extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the tags of the point.
    #[must_use]
    pub fn tags(mut self, tags: MetricTags) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the timestamp of the point.
    ///
    /// The timestamp must be in UTC: any non-zero offset is rejected by [`build`][PointBuilder::build]. When no
    /// timestamp is set, the point is stamped with the time it is built.
    #[must_use]
    pub fn timestamp<Tz: TimeZone>(mut self, timestamp: DateTime<Tz>) -> Self {
        self.timestamp = Some(timestamp.fixed_offset());
        self
    }

    /// Validates and builds the point.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty, if there are no fields, if any field has an empty name, or if the timestamp is not
    /// in UTC.
    pub fn build(self) -> Result<GraphitePoint, PointError> {
        if self.name.is_empty() {
            return Err(PointError::MissingName);
        }

        if self.fields.is_empty() {
            return Err(PointError::NoFields);
        }

        if self.fields.keys().any(String::is_empty) {
            return Err(PointError::EmptyFieldKey);
        }

        let timestamp = match self.timestamp {
            Some(ts) if ts.offset().local_minus_utc() != 0 => {
                return Err(PointError::NonUtcTimestamp { offset: *ts.offset() });
            }
            Some(ts) => ts.with_timezone(&Utc),
            None => Utc::now(),
        };

        Ok(GraphitePoint {
            context: self.context,
            name: self.name,
            fields: self.fields,
            tags: self.tags,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone as _, Utc};

    use super::{FieldValue, GraphitePoint, PointError};
    use crate::tags::MetricTags;

    #[test]
    fn at_least_one_field_is_required() {
        let result = GraphitePoint::builder("measurement").build();
        assert_eq!(result, Err(PointError::NoFields));
    }

    #[test]
    fn field_key_cannot_be_empty() {
        let result = GraphitePoint::builder("measurement").field("", "value").build();
        assert_eq!(result, Err(PointError::EmptyFieldKey));
    }

    #[test]
    fn name_is_required() {
        let result = GraphitePoint::new(
            None,
            "",
            [("key", "value")],
            MetricTags::new(),
            None,
        );
        assert_eq!(result, Err(PointError::MissingName));
    }

    #[test]
    fn timestamp_must_be_utc() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let timestamp = offset.with_ymd_and_hms(2017, 1, 1, 1, 1, 1).unwrap();

        let result = GraphitePoint::builder("measurement").field("key", 1).timestamp(timestamp).build();
        assert_eq!(result, Err(PointError::NonUtcTimestamp { offset }));
    }

    #[test]
    fn zero_offset_timestamps_are_accepted() {
        let utc = Utc.with_ymd_and_hms(2017, 1, 1, 1, 1, 1).unwrap();
        let zero = utc.fixed_offset();

        let point = GraphitePoint::builder("measurement").field("key", 1).timestamp(zero).build().unwrap();
        assert_eq!(point.timestamp(), &utc);
    }

    #[test]
    fn timestamp_defaults_to_construction_time() {
        let before = Utc::now();
        let point = GraphitePoint::builder("measurement").field("key", 1).build().unwrap();
        let after = Utc::now();

        assert!(point.timestamp() >= &before && point.timestamp() <= &after);
    }

    #[test]
    fn fields_keep_insertion_order() {
        let point = GraphitePoint::builder("measurement")
            .field("b", 1)
            .field("a", true)
            .field("c", 2.5)
            .build()
            .unwrap();

        let fields: Vec<_> = point.fields().collect();
        assert_eq!(
            fields,
            [
                ("b", &FieldValue::Int(1)),
                ("a", &FieldValue::Bool(true)),
                ("c", &FieldValue::Float(2.5)),
            ]
        );
    }
}
