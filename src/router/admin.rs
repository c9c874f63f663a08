//! Admin dashboard.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Extension, Json};
use chrono::Utc;
use futures_util::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::admin::{self, AdminSnapshot, AdminView};
use crate::router::Authenticated;
use crate::session::ClientSession;
use crate::{AppState, ServerError};

const UPDATE_BUFFER: usize = 8;
const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize)]
pub struct Search {
    /// Filter on user name or email.
    #[serde(default)]
    q: String,
}

pub async fn view(
    State(state): State<AppState>,
    user: Authenticated,
    Query(search): Query<Search>,
) -> Result<Json<AdminView>, ServerError> {
    let snapshot = AdminSnapshot::fetch(&state.profiles, &user.session.access_token).await?;
    Ok(Json(snapshot.view(&search.q, Utc::now().date_naive())))
}

/// Stream refetched lists while the tables change.
pub async fn events(
    State(state): State<AppState>,
    Extension(client): Extension<ClientSession>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (sender, receiver) = mpsc::channel(UPDATE_BUFFER);

    tokio::spawn(async move {
        if let Err(err) = admin::watch(
            state.gateway,
            state.profiles,
            state.feed,
            client.store,
            sender,
        ).await {
            tracing::error!(error = %err, "admin feed failed");
        }
    });

    let stream = ReceiverStream::new(receiver).map(|update| {
        let event = Event::default().event(update.table().as_str());
        Ok(match event.json_data(&update) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = %err, "admin update not serialized");
                Event::default().comment("skipped")
            },
        })
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
}
