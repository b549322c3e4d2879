use axum::{
    extract::{Query, State},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream::{self, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::WatchStream;

use super::api::ViewQuery;
use crate::AppState;

/// Streams the filtered fleet view. One `fleet-view` event is sent on connect
/// and another on every store change, refresh start or finish, and time switch.
pub async fn handle_fleet_events(
    State(state): State<AppState>,
    Query(query): Query<ViewQuery>,
) -> Response {
    let filter = query.filter();
    let fleet = state.fleet.clone();

    let store_changes = WatchStream::new(fleet.store.subscribe()).map(|_| ());
    // only the store stream yields on connect
    let refresh_activity = WatchStream::from_changes(fleet.refresher.subscribe()).map(|_| ());
    let mode_switches = WatchStream::from_changes(fleet.mode.subscribe()).map(|_| ());

    let changes = stream::select(store_changes, stream::select(refresh_activity, mode_switches));
    let events = changes.map(move |_| {
        let view = fleet.view(&filter);
        let data = serde_json::to_string(&view).unwrap_or_default();
        Ok::<_, Infallible>(
            Event::default()
                .event("fleet-view")
                .id(view.revision.to_string())
                .data(data),
        )
    });

    Sse::new(events)
        .keep_alive(KeepAlive::default().interval(Duration::from_secs(15)))
        .into_response()
}
