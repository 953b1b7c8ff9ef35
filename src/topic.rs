/// Raw namespace generation-1 shellies publish under, and the default value
/// for the normalized base.
pub const V1_NAMESPACE: &str = "shellies/";

/// The configured base all normalized topics are published under.
///
/// Always stored with a trailing `/`; topics are built by plain segment
/// concatenation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBase(String);

impl TopicBase {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self(base)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strips the base off `topic`, returning the device-relative remainder.
    pub fn strip<'t>(&self, topic: &'t str) -> Option<&'t str> {
        topic.strip_prefix(self.0.as_str())
    }

    /// The `<base><name>/` prefix all facts about one device go under.
    ///
    /// `name` is the user alias, or the raw device id when no alias is
    /// configured.
    pub fn device(&self, name: &str) -> DeviceTopic {
        DeviceTopic(format!("{}{}/", self.0, name))
    }
}

impl Default for TopicBase {
    fn default() -> Self {
        Self::new(V1_NAMESPACE)
    }
}

/// Per-device topic prefix, `/`-terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopic(String);

impl DeviceTopic {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, sub: &str) -> String {
        format!("{}{}", self.0, sub)
    }
}

/// Splits off the first `/`-delimited segment of a topic.
pub fn first_segment(topic: &str) -> (&str, Option<&str>) {
    match topic.split_once('/') {
        Some((head, rest)) => (head, Some(rest)),
        None => (topic, None),
    }
}
