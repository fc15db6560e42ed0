use std::{hash::Hash, sync::Arc};

/// Name of one end of a [`Channel`](crate::Channel).
///
/// Every envelope records the endpoint that sent it. Harness-side channels
/// get a unique id per connection (`"provider@example.com#3"`), simulated
/// peers are identified by the name they were registered under.
///
/// `EndpointId` is cheap to clone. Equality falls back to string comparison
/// when two ids do not share an allocation, so ids survive serialization.
///
/// # Example
///
/// ```ignore
/// let mut registry = PeerRegistry::<ChatMessage>::default();
/// let worker = registry.add_actor("worker", |ctx| Worker::new(ctx))?;
///
/// let mut port = registry.connect(&worker)?;
/// assert!(port.id().as_str().starts_with("worker#"));
/// ```
#[derive(Debug, Clone, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EndpointId(Arc<str>);

impl EndpointId {
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    /// Returns the string representation of this endpoint id.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives the id of the `n`th connection made to this endpoint.
    pub(crate) fn connection(&self, n: u64) -> Self {
        Self::from(format!("{}#{n}", self.0))
    }
}

impl PartialEq for EndpointId {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for EndpointId {}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Hash for EndpointId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&EndpointId> for EndpointId {
    fn from(id: &EndpointId) -> Self {
        id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_across_allocations() {
        let a = EndpointId::new("worker");
        let b = EndpointId::from(String::from("worker"));
        assert_eq!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn connection_ids_are_numbered() {
        let worker = EndpointId::new("worker");
        assert_eq!(worker.connection(3).as_str(), "worker#3");
    }
}
