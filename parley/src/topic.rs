use std::{borrow::Borrow, fmt, hash::Hash, sync::Arc};

/// Label naming the semantic kind of a message (`"init"`, `"chatbox-opened"`).
///
/// Topics live in one flat namespace shared by both directions of a
/// [`Channel`](crate::Channel): a request sent under `"test-init"` is
/// typically answered under a different topic such as `"test-init-done"`.
/// Nothing about a topic ties it to a direction or to a particular request.
///
/// Topics are produced by [`Message::topic`](crate::Message::topic) and are
/// the keys the [`CorrelationTracker`](crate::CorrelationTracker) matches
/// responses against.
///
/// ```rust
/// use parley::Topic;
///
/// let opened = Topic::new("chatbox-opened");
/// assert_eq!(opened, "chatbox-opened");
/// assert_eq!(opened.to_string(), "chatbox-opened");
/// ```
#[derive(Debug, Clone, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Topic(Arc<str>);

impl Topic {
    pub fn new(label: &str) -> Self {
        Self(Arc::from(label))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Topic {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for Topic {}

impl Hash for Topic {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialEq<str> for Topic {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Topic {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(label: &str) -> Self {
        Topic::new(label)
    }
}

impl From<String> for Topic {
    fn from(label: String) -> Self {
        Topic(Arc::from(label))
    }
}

impl From<&Topic> for Topic {
    fn from(topic: &Topic) -> Self {
        topic.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn compares_with_plain_strings() {
        let topic = Topic::new("pong");
        assert_eq!(topic, "pong");
        assert!(topic != "ping");
    }

    #[test]
    fn set_lookup_by_str() {
        let topics: HashSet<Topic> = ["opened", "closed"].into_iter().map(Topic::from).collect();
        assert!(topics.contains("opened"));
        assert!(!topics.contains("error"));
    }

    #[test]
    fn request_and_response_share_namespace() {
        let request = Topic::from("test-init");
        let response = Topic::from(String::from("test-init-done"));
        assert_ne!(request, response);
        assert_eq!(response.as_str(), "test-init-done");
    }
}
