//! Device-to-cloud messages and the diagnostic envelope
//!
//! A sampled message carries two extra application properties:
//!
//! ```text
//! diag_id                  correlation id (UUID v4, simple form)
//! diag_creation_time_utc   RFC 3339 timestamp, millisecond precision
//! ```
//!
//! The service uses the pair to measure end-to-end latency. The body is
//! never touched.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Property carrying the correlation id of a sampled message
pub const DIAG_ID_PROPERTY: &str = "diag_id";

/// Property carrying the creation timestamp of a sampled message
pub const DIAG_CREATION_TIME_PROPERTY: &str = "diag_creation_time_utc";

/// A telemetry message handed to the transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub body: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The diagnostic envelope, if this message was sampled
    pub fn diagnostic_envelope(&self) -> Option<DiagnosticEnvelope> {
        DiagnosticEnvelope::extract(self)
    }
}

/// Correlation metadata attached to a sampled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEnvelope {
    pub correlation_id: String,
    pub creation_time_utc: DateTime<Utc>,
}

impl DiagnosticEnvelope {
    /// A fresh envelope stamped now
    pub fn generate() -> Self {
        Self {
            correlation_id: Uuid::new_v4().simple().to_string(),
            creation_time_utc: Utc::now(),
        }
    }

    /// Write the envelope into the message properties
    pub fn apply(&self, message: &mut Message) {
        message.set_property(DIAG_ID_PROPERTY, self.correlation_id.clone());
        message.set_property(
            DIAG_CREATION_TIME_PROPERTY,
            self.creation_time_utc
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }

    /// Read an envelope back from message properties
    ///
    /// Both properties must be present and the timestamp must parse.
    pub fn extract(message: &Message) -> Option<Self> {
        let correlation_id = message.property(DIAG_ID_PROPERTY)?;
        let created = message.property(DIAG_CREATION_TIME_PROPERTY)?;
        let creation_time_utc = DateTime::parse_from_rfc3339(created)
            .ok()?
            .with_timezone(&Utc);

        Some(Self {
            correlation_id: correlation_id.to_string(),
            creation_time_utc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builder() {
        let message = Message::new("{\"temp\":21}")
            .with_message_id("m-1")
            .with_property("level", "info");

        assert_eq!(message.body, b"{\"temp\":21}".to_vec());
        assert_eq!(message.message_id.as_deref(), Some("m-1"));
        assert_eq!(message.property("level"), Some("info"));
        assert!(message.diagnostic_envelope().is_none());
    }

    #[test]
    fn test_envelope_applied_to_properties() {
        let envelope = DiagnosticEnvelope::generate();
        let mut message = Message::new("payload");
        envelope.apply(&mut message);

        assert_eq!(message.property(DIAG_ID_PROPERTY), Some(envelope.correlation_id.as_str()));
        assert_eq!(envelope.correlation_id.len(), 32);
        let stamp = message.property(DIAG_CREATION_TIME_PROPERTY).unwrap();
        assert!(stamp.ends_with('Z'));
        assert_eq!(message.body, b"payload".to_vec());
    }

    #[test]
    fn test_envelope_extraction_requires_both_properties() {
        let message = Message::new("x").with_property(DIAG_ID_PROPERTY, "abc");
        assert!(DiagnosticEnvelope::extract(&message).is_none());

        let message = message.with_property(DIAG_CREATION_TIME_PROPERTY, "yesterday");
        assert!(DiagnosticEnvelope::extract(&message).is_none());

        let message = message.with_property(DIAG_CREATION_TIME_PROPERTY, "2017-03-23T08:00:00.125Z");
        let envelope = DiagnosticEnvelope::extract(&message).unwrap();
        assert_eq!(envelope.correlation_id, "abc");
        assert_eq!(envelope.creation_time_utc.timestamp_subsec_millis(), 125);
    }
}
