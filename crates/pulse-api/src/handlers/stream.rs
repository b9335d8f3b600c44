//! SSE stream of raw insert envelopes.
//!
//! Analytics events go to everyone. Notification envelopes only carry ids and
//! are forwarded to their owner alone. Alert and audit inserts are not
//! streamed.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use pulse_core::defaults::SSE_KEEPALIVE_SECS;
use pulse_core::{InsertEnvelope, Table};

use crate::auth::Viewer;
use crate::AppState;

/// Whether `envelope` may be shown to `viewer`.
pub fn visible_to(envelope: &InsertEnvelope, viewer: Option<Uuid>) -> bool {
    match envelope.table {
        Table::AnalyticsEvents => true,
        Table::Notifications => viewer.is_some() && envelope.owner_id() == viewer,
        Table::AlertRules | Table::AuditLogs => false,
    }
}

pub async fn sse_stream(
    State(state): State<AppState>,
    viewer: Viewer,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let viewer_id = viewer.identity().map(|v| v.viewer_id);
    let rx = state.feed.tap();

    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(envelope) if visible_to(&envelope, viewer_id) => {
            match serde_json::to_string(&envelope) {
                Ok(json) => Some(Ok(Event::default().event(envelope.event_name()).data(json))),
                Err(_) => None,
            }
        }
        // Skip hidden envelopes and lag reports.
        _ => None,
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_visibility() {
        let owner = Uuid::new_v4();
        let event = InsertEnvelope::new(Table::AnalyticsEvents, json!({"id": Uuid::new_v4()}));
        assert!(visible_to(&event, None));

        let note = InsertEnvelope::new(
            Table::Notifications,
            json!({"id": Uuid::new_v4(), "owner_id": owner}),
        );
        assert!(visible_to(&note, Some(owner)));
        assert!(!visible_to(&note, Some(Uuid::new_v4())));
        assert!(!visible_to(&note, None));

        let audit = InsertEnvelope::new(Table::AuditLogs, json!({"id": Uuid::new_v4()}));
        assert!(!visible_to(&audit, Some(owner)));
    }
}
