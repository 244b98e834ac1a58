//! Visitor and session identity.
//!
//! A visitor ID is a random UUID generated once per installation. A session
//! ID is the Unix second at which the session started; it is renewed after
//! an idle gap longer than the session expiry, or when the local calendar
//! date changes between two events.

use crate::types::Preference;
use chrono::{DateTime, Local, TimeZone};
use std::time::Duration;
use tracing::debug;

/// Assign a visitor ID if none exists.
pub(crate) fn ensure_visitor_id(preference: &mut Preference) {
    if !preference.visitor_id.is_empty() {
        return;
    }
    preference.visitor_id = uuid::Uuid::new_v4().to_string();
    debug!(visitor_id = %preference.visitor_id, "generated visitor id");
}

/// Renew the session ID if it expired at `now`, and advance the last event
/// timestamp to `now`. Returns the current session ID.
pub(crate) fn refresh_session(
    preference: &mut Preference,
    now: DateTime<Local>,
    expire: Duration,
) -> String {
    let now_ms = now.timestamp_millis();
    let lets = preference.last_event_timestamp;

    if is_expired(lets, now, expire) {
        preference.session_id = now_ms.div_euclid(1000).to_string();
        debug!(
            session_id = %preference.session_id,
            last_event_timestamp = lets,
            "started new session"
        );
    }
    preference.last_event_timestamp = now_ms;

    preference.session_id.clone()
}

fn is_expired(lets: i64, now: DateTime<Local>, expire: Duration) -> bool {
    let expire_ms = i64::try_from(expire.as_millis()).unwrap_or(i64::MAX);
    if now.timestamp_millis().saturating_sub(lets) > expire_ms {
        return true;
    }
    match Local.timestamp_millis_opt(lets).single() {
        Some(last) => last.date_naive() != now.date_naive(),
        None => true,
    }
}
