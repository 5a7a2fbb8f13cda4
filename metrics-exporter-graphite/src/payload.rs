use std::{io, iter::FusedIterator, slice};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    formatter::NameFormatter,
    point::{FieldValue, GraphitePoint, PointError},
    tags::MetricTags,
};

/// Errors that could occur while splitting a payload into batches.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    /// The batch size was zero.
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
}

/// An ordered collection of points queued for one export.
///
/// A payload belongs to a single reporting cycle: points are added while collecting, then the payload is written and
/// cleared (or dropped) before the next cycle starts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphitePayload {
    points: Vec<GraphitePoint>,
}

impl GraphitePayload {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a point to the payload.
    ///
    /// Passing `None` is a no-op.
    pub fn add<P>(&mut self, point: P)
    where
        P: Into<Option<GraphitePoint>>,
    {
        if let Some(point) = point.into() {
            self.points.push(point);
        }
    }

    /// Returns the number of points in the payload.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns `true` if the payload holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterates over the points in the payload, in insertion order.
    pub fn iter(&self) -> slice::Iter<'_, GraphitePoint> {
        self.points.iter()
    }

    /// Removes every point from the payload.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Splits the payload into batches of at most `batch_size` points.
    ///
    /// Batches are contiguous, non-overlapping, and cover the payload in order. Every batch holds exactly `batch_size`
    /// points except possibly the last one. An empty payload yields no batches at all.
    ///
    /// # Errors
    ///
    /// If `batch_size` is zero, an error is returned.
    pub fn to_batches(&self, batch_size: usize) -> Result<Batches<'_>, BatchError> {
        if batch_size == 0 {
            return Err(BatchError::ZeroBatchSize);
        }

        Ok(Batches { inner: self.points.chunks(batch_size) })
    }

    /// Writes every point of the payload, in order, to the given writer.
    ///
    /// If either the writer or the formatter is absent, nothing is written and `Ok(())` is returned.
    ///
    /// # Errors
    ///
    /// If writing to the writer fails, the error is returned.
    pub fn format<W>(&self, writer: Option<&mut W>, formatter: Option<&dyn NameFormatter>) -> io::Result<()>
    where
        W: io::Write + ?Sized,
    {
        let (Some(writer), Some(formatter)) = (writer, formatter) else {
            return Ok(());
        };

        write_points(&self.points, writer, formatter)
    }

    /// Renders the whole payload as plaintext lines.
    pub fn to_text(&self, formatter: &dyn NameFormatter) -> String {
        render_points(&self.points, formatter)
    }
}

impl Extend<GraphitePoint> for GraphitePayload {
    fn extend<I: IntoIterator<Item = GraphitePoint>>(&mut self, iter: I) {
        self.points.extend(iter);
    }
}

impl FromIterator<GraphitePoint> for GraphitePayload {
    fn from_iter<I: IntoIterator<Item = GraphitePoint>>(iter: I) -> Self {
        Self { points: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a GraphitePayload {
    type Item = &'a GraphitePoint;
    type IntoIter = slice::Iter<'a, GraphitePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn write_points<W>(points: &[GraphitePoint], writer: &mut W, formatter: &dyn NameFormatter) -> io::Result<()>
where
    W: io::Write + ?Sized,
{
    for point in points {
        for line in formatter.format(point) {
            writer.write_all(line.as_bytes())?;
        }
    }

    Ok(())
}

fn render_points(points: &[GraphitePoint], formatter: &dyn NameFormatter) -> String {
    let mut buf = String::new();
    for point in points {
        for line in formatter.format(point) {
            buf.push_str(&line);
        }
    }
    buf
}

/// A size-bounded, ordered view over a contiguous range of a payload.
#[derive(Clone, Copy, Debug)]
pub struct Batch<'a> {
    points: &'a [GraphitePoint],
}

impl<'a> Batch<'a> {
    /// Returns the points in this batch.
    pub fn points(&self) -> &'a [GraphitePoint] {
        self.points
    }

    /// Returns the number of points in this batch.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns `true` if this batch holds no points.
    ///
    /// Batches produced by [`GraphitePayload::to_batches`] are never empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Writes every point of the batch, in order, to the given writer.
    ///
    /// # Errors
    ///
    /// If writing to the writer fails, the error is returned.
    pub fn format<W>(&self, writer: &mut W, formatter: &dyn NameFormatter) -> io::Result<()>
    where
        W: io::Write + ?Sized,
    {
        write_points(self.points, writer, formatter)
    }

    /// Renders the batch as plaintext lines.
    pub fn to_text(&self, formatter: &dyn NameFormatter) -> String {
        render_points(self.points, formatter)
    }
}

/// Iterator over the batches of a payload.
///
/// Created by [`GraphitePayload::to_batches`].
#[derive(Clone, Debug)]
pub struct Batches<'a> {
    inner: slice::Chunks<'a, GraphitePoint>,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|points| Batch { points })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Batches<'_> {}

impl FusedIterator for Batches<'_> {}

/// Builds the payload for one reporting cycle.
///
/// Global tags are added to every packed point, with the point's own tags winning on conflict. When a cycle timestamp is
/// set, every packed point shares it; otherwise each point is stamped when it is packed.
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    payload: GraphitePayload,
    global_tags: MetricTags,
    default_context: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl PayloadBuilder {
    /// Creates an empty `PayloadBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tags added to every packed point.
    #[must_use]
    pub fn with_global_tags(mut self, tags: MetricTags) -> Self {
        self.global_tags = tags;
        self
    }

    /// Sets the context used for points packed without one.
    #[must_use]
    pub fn with_default_context<C: Into<String>>(mut self, context: Option<C>) -> Self {
        self.default_context = context.map(Into::into);
        self
    }

    /// Sets the timestamp shared by every point packed from now on.
    ///
    /// Passing `None` reverts to stamping each point as it is packed.
    pub fn set_timestamp(&mut self, timestamp: Option<DateTime<Utc>>) {
        self.timestamp = timestamp;
    }

    /// Packs a single-value point, stored under the field `value`.
    ///
    /// # Errors
    ///
    /// If the point fails validation, an error is returned and nothing is added to the payload.
    pub fn pack<V>(&mut self, context: Option<&str>, name: &str, value: V, tags: MetricTags) -> Result<(), PointError>
    where
        V: Into<FieldValue>,
    {
        self.pack_point(context, name, [("value", value.into())], tags)
    }

    /// Packs a multi-field point, pairing each column name with the value at the same position.
    ///
    /// Pairing stops at the end of the shorter of the two sequences.
    ///
    /// # Errors
    ///
    /// If the point fails validation, an error is returned and nothing is added to the payload.
    pub fn pack_fields<C, K, I, V>(
        &mut self,
        context: Option<&str>,
        name: &str,
        columns: C,
        values: I,
        tags: MetricTags,
    ) -> Result<(), PointError>
    where
        C: IntoIterator<Item = K>,
        K: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        self.pack_point(context, name, columns.into_iter().zip(values), tags)
    }

    fn pack_point<F, K, V>(
        &mut self,
        context: Option<&str>,
        name: &str,
        fields: F,
        tags: MetricTags,
    ) -> Result<(), PointError>
    where
        F: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let context = context.or(self.default_context.as_deref());
        let tags = tags.with_defaults(&self.global_tags);
        let point = GraphitePoint::new(context, name, fields, tags, self.timestamp)?;
        self.payload.add(point);
        Ok(())
    }

    /// Returns the payload built so far.
    pub fn payload(&self) -> &GraphitePayload {
        &self.payload
    }

    /// Takes the payload built so far, leaving an empty one in its place.
    pub fn take_payload(&mut self) -> GraphitePayload {
        std::mem::take(&mut self.payload)
    }

    /// Clears the payload built so far.
    pub fn clear(&mut self) {
        self.payload.clear();
    }
}
