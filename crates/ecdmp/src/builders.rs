//! Event builder for the fluent API.

use crate::types::{Event, EventType, Preference};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Builder for tracking events.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event_type: EventType,
    event_data: Value,
    uri: String,
    referer: String,
    utm: String,
    pub(crate) force_flush: bool,
}

impl EventBuilder {
    pub(crate) fn new(event_type: impl Into<EventType>) -> Self {
        Self {
            event_type: event_type.into(),
            event_data: Value::Null,
            uri: String::new(),
            referer: String::new(),
            utm: String::new(),
            force_flush: false,
        }
    }

    /// Set the event payload.
    pub fn data(mut self, data: impl Into<Value>) -> Self {
        self.event_data = data.into();
        self
    }

    /// Set the URI the event happened on.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Set the referer.
    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = referer.into();
        self
    }

    /// Set the UTM string.
    pub fn utm(mut self, utm: impl Into<String>) -> Self {
        self.utm = utm.into();
        self
    }

    /// Upload the queue right after this event is stored.
    pub fn force_flush(mut self) -> Self {
        self.force_flush = true;
        self
    }

    /// Stamp the event with the identity in `preference`.
    ///
    /// The session must already be refreshed for `now`.
    pub(crate) fn build(self, preference: &Preference, now: DateTime<Utc>) -> Event {
        Event {
            bundle_id: preference.bundle_id.clone(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            feed_id: preference.feed_id.clone(),
            device_id: preference.device_id.clone(),
            visitor_id: preference.visitor_id.clone(),
            customer_id: preference.customer_id.clone(),
            session_id: preference.session_id.clone(),
            uri: self.uri,
            referer: self.referer,
            utm: self.utm,
            event_type: self.event_type.as_str().to_string(),
            event_data: self.event_data,
        }
    }
}
