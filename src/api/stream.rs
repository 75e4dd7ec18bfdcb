use std::sync::Arc;
use axum::{
    extract::{Query, State},
    http::header,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use log::{debug, info};

use crate::api::handlers::ApiState;
use crate::data::{HistoryBuffer, Sample, Subscriber, SubscriberRegistry};

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub since: Option<String>,
}

impl StreamQuery {
    /// Replay threshold. Anything other than integer seconds since the epoch
    /// means no replay.
    pub fn since(&self) -> Option<DateTime<Utc>> {
        let raw = self.since.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }

        match raw.parse::<i64>() {
            Ok(secs) => DateTime::from_timestamp(secs, 0),
            Err(e) => {
                debug!("Ignoring malformed since={:?}: {}", raw, e);
                None
            }
        }
    }
}

enum Phase {
    Replay(std::vec::IntoIter<Sample>),
    Live,
    Closed,
}

/// One connection's subscription: replayed history first, then live samples.
///
/// The server drops the response body when the client goes away; dropping the
/// session unregisters the subscriber, which also cancels a pending receive.
struct StreamSession {
    phase: Phase,
    subscriber: Subscriber,
    registry: Arc<SubscriberRegistry>,
}

impl StreamSession {
    fn open(
        registry: Arc<SubscriberRegistry>,
        history: &HistoryBuffer,
        since: Option<DateTime<Utc>>,
    ) -> Self {
        let subscriber = registry.register();
        let replay = since
            .filter(|_| !history.is_empty())
            .map(|t| history.query_since(t))
            .unwrap_or_default();
        if !replay.is_empty() {
            info!("Replaying {} missed samples to [{}]", replay.len(), subscriber.id());
        }

        Self {
            phase: Phase::Replay(replay.into_iter()),
            subscriber,
            registry,
        }
    }

    async fn next_sample(&mut self) -> Option<Sample> {
        if let Phase::Replay(pending) = &mut self.phase {
            if let Some(sample) = pending.next() {
                return Some(sample);
            }
            self.phase = Phase::Live;
        }

        if let Phase::Live = self.phase {
            if let Some(sample) = self.subscriber.recv().await {
                return Some(sample);
            }
            debug!("Delivery queue closed for [{}]", self.subscriber.id());
            self.phase = Phase::Closed;
        }

        None
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.registry.unregister(self.subscriber.id());
    }
}

fn sample_events(session: StreamSession) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(session, |mut session| async move {
        let sample = session.next_sample().await?;
        Some((sample, session))
    })
    .map(|sample| Event::default().json_data(sample))
}

// GET /stream?since=<unix seconds> - Server-Sent Events price feed
pub async fn stream_prices(
    State(state): State<ApiState>,
    query: Option<Query<StreamQuery>>,
) -> impl IntoResponse {
    let since = query.and_then(|Query(q)| q.since());
    let session = StreamSession::open(state.registry.clone(), &state.history, since);

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Sse::new(sample_events(session)),
    )
}
