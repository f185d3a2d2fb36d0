//! Server-sent event rooms.
//!
//! Both rooms read the same broadcast bus; the order room filters it down to
//! one order. A subscriber that lags behind the bus silently skips the
//! messages it missed.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use futures_util::{future, Stream, StreamExt};
use servex_schemas::Role;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::{
    auth::Staff,
    error::{ApiError, ApiPath, ApiResult},
    state::{AppState, BusMsg},
};

pub(crate) fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/stream/kitchen", get(kitchen_stream))
        .route("/api/stream/orders/:id", get(order_stream))
}

/// Every bus message: new paid orders, status changes, heartbeats.
pub(crate) async fn kitchen_stream(
    State(st): State<Arc<AppState>>,
    staff: Staff,
) -> ApiResult<Response> {
    staff.require(&[Role::Admin, Role::Kitchen])?;
    let rx = st.bus.subscribe();
    Ok(sse_response(broadcast_to_sse(rx, |_| true)))
}

/// Status changes for one order, plus heartbeats.
pub(crate) async fn order_stream(
    State(st): State<Arc<AppState>>,
    ApiPath(order_id): ApiPath<Uuid>,
) -> ApiResult<Response> {
    if st.store.fetch_order(order_id).await?.is_none() {
        return Err(ApiError::not_found("order not found"));
    }
    let rx = st.bus.subscribe();
    Ok(sse_response(broadcast_to_sse(rx, move |m| {
        m.visible_to_order(order_id)
    })))
}

fn sse_response<S>(events: S) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

pub(crate) fn broadcast_to_sse<F>(
    rx: broadcast::Receiver<BusMsg>,
    keep: F,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    F: Fn(&BusMsg) -> bool + Send + 'static,
{
    BroadcastStream::new(rx).filter_map(move |msg| {
        let event = match msg {
            Ok(m) if keep(&m) => serde_json::to_string(&m)
                .ok()
                .map(|data| Ok(Event::default().event(m.event_name()).data(data))),
            _ => None, // filtered / lagged / closed
        };
        future::ready(event)
    })
}
