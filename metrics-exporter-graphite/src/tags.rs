use indexmap::IndexMap;
use metrics::{Key, Label};

/// Tag key holding the application name.
pub const APP_TAG: &str = "app";

/// Tag key holding the environment name.
pub const ENV_TAG: &str = "env";

/// Tag key holding the server/host name.
pub const SERVER_TAG: &str = "server";

/// Tag key holding the metric type, such as `counter` or `gauge`.
pub const METRIC_TYPE_TAG: &str = "mtype";

/// Tag keys that are consumed by the reserved part of a metric path.
pub const RESERVED_TAGS: [&str; 4] = [APP_TAG, ENV_TAG, SERVER_TAG, METRIC_TYPE_TAG];

/// An ordered set of tags attached to a point.
///
/// Keys are unique, and iteration follows insertion order, which in turn decides the order in which generic tags are
/// rendered into a metric path. Inserting a key that already exists replaces its value but keeps its original
/// position.
///
/// Tags are built up front and then treated as immutable: the builder-style methods consume `self`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricTags {
    inner: IndexMap<String, String>,
}

impl MetricTags {
    /// Creates an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tag set with the given tag added.
    #[must_use]
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.inner.insert(key.into(), value.into());
        self
    }

    /// Returns the tag set with every tag from `other` that is not already present.
    ///
    /// Existing tags win over tags from `other`.
    #[must_use]
    pub fn with_defaults(mut self, other: &MetricTags) -> Self {
        for (key, value) in other.iter() {
            if !self.inner.contains_key(key) {
                self.inner.insert(key.to_owned(), value.to_owned());
            }
        }
        self
    }

    /// Builds a tag set from the labels of a metric key.
    pub fn from_key(key: &Key) -> Self {
        key.labels().collect()
    }

    /// Gets the value of the given tag.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    /// Returns `true` if the given tag is present.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Returns the number of tags.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over the tags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for MetricTags
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let inner = iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { inner }
    }
}

impl<'a> FromIterator<&'a Label> for MetricTags {
    fn from_iter<I: IntoIterator<Item = &'a Label>>(iter: I) -> Self {
        iter.into_iter().map(|label| (label.key(), label.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use metrics::Key;

    use super::MetricTags;

    #[test]
    fn preserves_insertion_order() {
        let tags = MetricTags::new().with("zeta", "1").with("alpha", "2").with("mid", "3");
        let keys: Vec<_> = tags.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn duplicate_keys_replace_value_in_place() {
        let tags = MetricTags::new().with("host", "a").with("env", "dev").with("host", "b");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.iter().collect::<Vec<_>>(), [("host", "b"), ("env", "dev")]);
    }

    #[test]
    fn defaults_do_not_override_existing_tags() {
        let globals = MetricTags::new().with("app", "shop").with("env", "prod");
        let tags = MetricTags::new().with("env", "staging").with_defaults(&globals);

        assert_eq!(tags.get("env"), Some("staging"));
        assert_eq!(tags.get("app"), Some("shop"));
    }

    #[test]
    fn from_key_labels() {
        let key = Key::from_parts("requests", &[("method", "GET"), ("status", "200")]);
        let tags = MetricTags::from_key(&key);
        assert_eq!(tags.iter().collect::<Vec<_>>(), [("method", "GET"), ("status", "200")]);
    }
}
