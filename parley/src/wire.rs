//! JSON boundary for messages that arrive untyped.
//!
//! Real peers speak `{ "topic": ..., "payload": ... }` objects. A
//! [`WireMessage`] holds one of those as received; [`WireMessage::decode`]
//! validates the payload into a typed value before anything else sees it.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;

use crate::{Error, Message, Result, Topic};

/// An untyped message as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub topic: Topic,
    #[serde(default)]
    pub payload: Value,
}

impl WireMessage {
    pub fn new(topic: impl Into<Topic>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Wrap a typed message, tagging it with its own topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if the message does not serialize.
    pub fn encode<M>(message: &M) -> Result<Self>
    where
        M: Message + Serialize,
    {
        let topic = message.topic();
        let payload = serde_json::to_value(message).map_err(|e| Error::InvalidPayload {
            topic: topic.clone(),
            source: Arc::new(e),
        })?;
        Ok(Self { topic, payload })
    }

    /// Validate the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] naming this message's topic.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.payload).map_err(|e| Error::InvalidPayload {
            topic: self.topic.clone(),
            source: Arc::new(e),
        })
    }

    /// Decode into a typed message and check it carries the same topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if the payload does not fit `M`,
    /// and [`Error::UnexpectedTopic`] if it decodes under another topic.
    pub fn into_message<M>(&self, channel: &crate::EndpointId) -> Result<M>
    where
        M: Message + DeserializeOwned,
    {
        let message: M = self.decode()?;
        let topic = message.topic();
        if topic != self.topic {
            tracing::debug!(wire = %self.topic, decoded = %topic, "topic mismatch on wire");
            return Err(Error::UnexpectedTopic {
                channel: channel.clone(),
                topic: self.topic.clone(),
            });
        }
        Ok(message)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidPayload {
            topic: self.topic.clone(),
            source: Arc::new(e),
        })
    }

    /// Parse one wire object from text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] under the topic `"<unparsed>"`
    /// when the text is not a wire object.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidPayload {
            topic: Topic::new("<unparsed>"),
            source: Arc::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::EndpointId;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "kebab-case")]
    enum Sms {
        Received { id: u32, body: String },
        NotFound { id: i64 },
    }

    impl Message for Sms {
        fn topic(&self) -> Topic {
            match self {
                Sms::Received { .. } => Topic::new("received"),
                Sms::NotFound { .. } => Topic::new("not-found"),
            }
        }
    }

    #[test]
    fn typed_message_survives_the_wire() {
        let sms = Sms::Received {
            id: 7,
            body: "Hello".into(),
        };
        let wire = WireMessage::encode(&sms).unwrap();
        assert_eq!(wire.topic, "received");

        let parsed = WireMessage::from_json(&wire.to_json().unwrap()).unwrap();
        let back: Sms = parsed.into_message(&EndpointId::new("sms")).unwrap();
        assert_eq!(back, sms);
    }

    #[test]
    fn malformed_payload_is_rejected_with_its_topic() {
        let wire = WireMessage::new("received", json!({ "kind": "received", "id": "seven" }));
        let err = wire.decode::<Sms>().unwrap_err();
        match err {
            Error::InvalidPayload { topic, .. } => assert_eq!(topic, "received"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn topic_mismatch_is_unexpected() {
        let wire = WireMessage::new("received", json!({ "kind": "not-found", "id": -1 }));
        let err = wire
            .into_message::<Sms>(&EndpointId::new("sms"))
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedTopic { .. }));
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let wire = WireMessage::from_json(r#"{ "topic": "test-init" }"#).unwrap();
        assert_eq!(wire.topic, "test-init");
        assert_eq!(wire.payload, Value::Null);
        assert!(WireMessage::from_json("not json").is_err());
    }
}
