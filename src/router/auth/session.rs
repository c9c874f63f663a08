//! Current session state.

use axum::{Extension, Json};

use crate::session::{ClientSession, SessionView};

pub async fn handler(Extension(client): Extension<ClientSession>) -> Json<SessionView> {
    Json(SessionView::from(&client.store.settled().await))
}
