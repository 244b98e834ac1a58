//! Event types and serialization.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known event types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    PageView,
    ViewContent,
    Identify,
    /// Any other event type name, sent verbatim.
    Custom(String),
}

impl EventType {
    /// Wire name of the event type.
    pub fn as_str(&self) -> &str {
        match self {
            EventType::PageView => "pageView",
            EventType::ViewContent => "viewContent",
            EventType::Identify => "identify",
            EventType::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        match name {
            "pageView" => EventType::PageView,
            "viewContent" => EventType::ViewContent,
            "identify" => EventType::Identify,
            other => EventType::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        EventType::from(name.as_str())
    }
}

/// Identity, session and consent record for one installation.
///
/// Missing keys in a stored blob fall back to their defaults, so older
/// blobs without `lets` still load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preference {
    pub opt_out: bool,
    pub feed_id: String,
    pub bundle_id: String,
    #[serde(rename = "sid")]
    pub session_id: String,
    #[serde(rename = "vid")]
    pub visitor_id: String,
    #[serde(rename = "cid")]
    pub customer_id: String,
    #[serde(rename = "did")]
    pub device_id: String,
    /// Last event timestamp in milliseconds since epoch.
    #[serde(rename = "lets")]
    pub last_event_timestamp: i64,
}

/// A queued tracking event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub bundle_id: String,
    /// ISO-8601 UTC timestamp with millisecond precision.
    #[serde(rename = "dateTime")]
    pub timestamp: String,
    pub feed_id: String,
    #[serde(rename = "did")]
    pub device_id: String,
    #[serde(rename = "vid")]
    pub visitor_id: String,
    #[serde(rename = "cid")]
    pub customer_id: String,
    #[serde(rename = "sid")]
    pub session_id: String,
    pub uri: String,
    pub referer: String,
    pub utm: String,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

/// Data carried by an `identify` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyData {
    pub cid: String,
    pub em: String,
    pub pn: String,
    pub did: String,
    pub ext: Option<Vec<String>>,
}

/// Body posted to the bulk ingest endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EventsPayload<'a> {
    pub events: &'a [Event],
}
