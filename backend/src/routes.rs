use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::get,
    Router,
};
use chrono::Utc;
use futures::stream::{self, Stream};
use shared::{AddDocumentResponse, Document, Fields, Snapshot, UserId};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::docs::stamp_new;
use crate::hub::ChangeHub;
use crate::repo::{DocumentRepo, RepoError};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn DocumentRepo>,
    pub hub: Arc<ChangeHub>,
}

impl AppState {
    pub fn new(repo: Arc<dyn DocumentRepo>) -> Self {
        Self {
            repo,
            hub: Arc::new(ChangeHub::new()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/users/:uid/tasks", get(list_tasks).post(create_task))
        .route("/api/users/:uid/tasks/stream", get(stream_tasks))
        .route(
            "/api/users/:uid/tasks/:id",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn internal(err: RepoError) -> StatusCode {
    error!(error = %err, "repository failure");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn list_tasks(
    Path(uid): Path<UserId>,
    State(state): State<AppState>,
) -> Result<Json<Snapshot>, StatusCode> {
    let documents = state.repo.list(&uid).await.map_err(internal)?;
    Ok(Json(Snapshot { documents }))
}

async fn get_task(
    Path((uid, id)): Path<(UserId, Uuid)>,
    State(state): State<AppState>,
) -> Result<Json<Document>, StatusCode> {
    match state.repo.get(&uid, id).await.map_err(internal)? {
        Some(doc) => Ok(Json(doc)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn create_task(
    Path(uid): Path<UserId>,
    State(state): State<AppState>,
    Json(payload): Json<Fields>,
) -> Result<(StatusCode, Json<AddDocumentResponse>), StatusCode> {
    let doc = stamp_new(&uid, payload, Utc::now());
    state.repo.insert(&uid, &doc).await.map_err(internal)?;
    state.hub.notify(&uid);
    info!(owner = %uid, id = %doc.id, "document added");
    Ok((StatusCode::CREATED, Json(AddDocumentResponse { id: doc.id })))
}

async fn update_task(
    Path((uid, id)): Path<(UserId, Uuid)>,
    State(state): State<AppState>,
    Json(payload): Json<Fields>,
) -> Result<StatusCode, StatusCode> {
    let patched = state.repo.patch(&uid, id, payload, Utc::now()).await;
    if patched.map_err(internal)?.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    state.hub.notify(&uid);
    info!(owner = %uid, %id, "document updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_task(
    Path((uid, id)): Path<(UserId, Uuid)>,
    State(state): State<AppState>,
) -> Result<StatusCode, StatusCode> {
    if state.repo.remove(&uid, id).await.map_err(internal)? {
        state.hub.notify(&uid);
        info!(owner = %uid, %id, "document deleted");
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn stream_tasks(
    Path(uid): Path<UserId>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before the first read so no change slips in between.
    let changes = state.hub.subscribe(&uid);
    info!(owner = %uid, "task stream opened");
    Sse::new(snapshot_stream(state.repo, uid, changes)).keep_alive(KeepAlive::default())
}

/// The current collection, then the collection again after every change.
fn snapshot_stream(
    repo: Arc<dyn DocumentRepo>,
    owner: UserId,
    changes: broadcast::Receiver<()>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((repo, owner, changes, true), |(repo, owner, mut changes, first)| async move {
        if !first {
            match changes.recv().await {
                Ok(()) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(%owner, missed, "task stream lagged, sending latest state");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
        let event = snapshot_event(repo.as_ref(), &owner).await;
        Some((Ok(event), (repo, owner, changes, false)))
    })
}

async fn snapshot_event(repo: &dyn DocumentRepo, owner: &UserId) -> Event {
    let documents = match repo.list(owner).await {
        Ok(documents) => documents,
        Err(err) => {
            error!(%owner, error = %err, "task stream read failed");
            return Event::default().event("error").data(err.to_string());
        }
    };
    match Event::default().event("snapshot").json_data(Snapshot { documents }) {
        Ok(event) => event,
        Err(err) => Event::default().event("error").data(err.to_string()),
    }
}
