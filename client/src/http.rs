//! [`BackingStore`] backed by the task backend's HTTP API.
//!
//! Writes are plain JSON requests. Live queries hold one
//! `text/event-stream` response open per listener; the backend pushes the
//! whole ordered collection as a `snapshot` event after every change.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode, Url};
use shared::{AddDocumentResponse, Fields, Snapshot};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{
    BackingStore, CollectionRef, DocumentRef, Listener, ListenerRegistration, SnapshotEvent,
    Direction, TaskQuery,
};

#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    base: Url,
}

impl HttpStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, StoreError> {
        let invalid = |reason: String| {
            StoreError::Unavailable(format!("invalid backend url {base_url:?}: {reason}"))
        };
        let base = Url::parse(base_url).map_err(|err| invalid(err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a hierarchical url".into()));
        }
        Ok(Self { client, base })
    }

    /// `{base}/api/users/{owner}/tasks/{tail..}` with every segment
    /// percent-encoded, so an owner id can never reshape the path.
    fn endpoint(&self, collection: &CollectionRef, tail: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Always Ok: `with_client` rejects cannot-be-a-base urls.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["api", "users", collection.owner().as_str(), "tasks"])
                .extend(tail);
        }
        url
    }

    fn collection_url(&self, collection: &CollectionRef) -> Url {
        self.endpoint(collection, &[])
    }

    fn document_url(&self, doc: &DocumentRef) -> Url {
        self.endpoint(doc.collection(), &[&doc.id().to_string()])
    }
}

fn unreachable(err: reqwest::Error) -> StoreError {
    error!(error = %err, "task backend unreachable");
    StoreError::Unavailable(err.to_string())
}

async fn check(response: Response, target: String) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(%status, %target, %body, "task backend rejected request");
    Err(match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(target),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied(target),
        _ => StoreError::Unavailable(format!("{status}: {body}")),
    })
}

#[async_trait]
impl BackingStore for HttpStore {
    async fn add_document(&self, collection: &CollectionRef, data: Fields) -> Result<Uuid, StoreError> {
        let response = self
            .client
            .post(self.collection_url(collection))
            .json(&data)
            .send()
            .await
            .map_err(unreachable)?;
        let created: AddDocumentResponse = check(response, collection.to_string())
            .await?
            .json()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok(created.id)
    }

    async fn update_document(&self, doc: &DocumentRef, changes: Fields) -> Result<(), StoreError> {
        let response = self
            .client
            .patch(self.document_url(doc))
            .json(&changes)
            .send()
            .await
            .map_err(unreachable)?;
        check(response, doc.to_string()).await?;
        Ok(())
    }

    async fn delete_document(&self, doc: &DocumentRef) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.document_url(doc))
            .send()
            .await
            .map_err(unreachable)?;
        match check(response, doc.to_string()).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Must be called from within a Tokio runtime.
    fn listen(&self, query: &TaskQuery) -> Listener {
        let (tx, events) = mpsc::unbounded_channel();
        let url = self.endpoint(&query.collection, &["stream"]);
        let reader = tokio::spawn(read_stream(self.client.clone(), url, query.direction, tx));
        let registration = ListenerRegistration::new(move || reader.abort());
        Listener { events, registration }
    }
}

/// The backend always sends newest first; ascending queries get the
/// reverse, which keeps same-instant documents in insertion order.
async fn read_stream(
    client: Client,
    url: Url,
    direction: Direction,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
) {
    let response = match client
        .get(url.clone())
        .header("accept", "text/event-stream")
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            let _ = tx.send(Err(StoreError::Listener(err.to_string())));
            return;
        }
    };
    let response = match check(response, url.to_string()).await {
        Ok(response) => response,
        Err(err) => {
            let _ = tx.send(Err(StoreError::Listener(err.to_string())));
            return;
        }
    };
    info!(%url, "task stream connected");

    let mut bytes = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = tx.send(Err(StoreError::Listener(err.to_string())));
                return;
            }
        };
        for event in decoder.push(&chunk) {
            if let Some(mut item) = event.into_snapshot_event() {
                if let (Ok(snapshot), Direction::Ascending) = (&mut item, direction) {
                    snapshot.documents.reverse();
                }
                if tx.send(item).is_err() {
                    return;
                }
            }
        }
    }
    let _ = tx.send(Err(StoreError::Listener("task stream closed".into())));
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    fn into_snapshot_event(self) -> Option<SnapshotEvent> {
        match self.event.as_deref() {
            Some("snapshot") | None => Some(
                serde_json::from_str::<Snapshot>(&self.data)
                    .map_err(|err| StoreError::Decode(err.to_string())),
            ),
            Some("error") => Some(Err(StoreError::Listener(self.data))),
            Some(other) => {
                debug!(event = other, "ignoring unknown stream event");
                None
            }
        }
    }
}

/// Incremental `text/event-stream` decoder. Bytes are buffered up to each
/// newline, so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut out = Vec::new();
        for &byte in chunk {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }
            let raw = std::mem::take(&mut self.line);
            let line = String::from_utf8_lossy(&raw);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.line_done(line) {
                out.push(event);
            }
        }
        out
    }

    fn line_done(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.data.is_empty() {
                self.event = None;
                return None;
            }
            return Some(SseEvent {
                event: self.event.take(),
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_named_events_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b": keep-alive\n\nevent: snap").is_empty());
        let events = decoder.push(b"shot\ndata: {\"documents\":[]}\r\n\r\ndata: a\ndata: b\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: Some("snapshot".into()),
                    data: r#"{"documents":[]}"#.into(),
                },
                SseEvent {
                    event: None,
                    data: "a\nb".into(),
                },
            ]
        );
    }

    #[test]
    fn multibyte_characters_survive_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let payload = "data: caf\u{e9}\n\n".as_bytes();
        let split = payload.len() - 3;
        assert!(decoder.push(&payload[..split]).is_empty());
        let events = decoder.push(&payload[split..]);
        assert_eq!(events[0].data, "caf\u{e9}");
    }

    #[test]
    fn stream_events_map_to_snapshots_and_listener_errors() {
        let snapshot = SseEvent {
            event: Some("snapshot".into()),
            data: r#"{"documents":[{"id":"67e55044-10b1-426f-9247-bb680e5fe0c8","fields":{"title":"a"}}]}"#
                .into(),
        };
        let snapshot = snapshot.into_snapshot_event().unwrap().unwrap();
        assert_eq!(snapshot.documents[0].str_field("title"), Some("a"));

        let failed = SseEvent {
            event: Some("error".into()),
            data: "redis down".into(),
        };
        assert_eq!(
            failed.into_snapshot_event(),
            Some(Err(StoreError::Listener("redis down".into())))
        );

        let unknown = SseEvent {
            event: Some("ping".into()),
            data: "x".into(),
        };
        assert_eq!(unknown.into_snapshot_event(), None);
    }

    #[test]
    fn urls_follow_the_collection_path() {
        let store = HttpStore::new("http://localhost:3000/").unwrap();
        let tasks = CollectionRef::tasks_of("u1".into());
        let id = Uuid::nil();
        assert_eq!(
            store.collection_url(&tasks).as_str(),
            "http://localhost:3000/api/users/u1/tasks"
        );
        assert_eq!(
            store.document_url(&tasks.doc(id)).as_str(),
            format!("http://localhost:3000/api/users/u1/tasks/{id}")
        );

        let mounted = HttpStore::new("http://localhost:3000/todo/").unwrap();
        assert_eq!(
            mounted.endpoint(&tasks, &["stream"]).as_str(),
            "http://localhost:3000/todo/api/users/u1/tasks/stream"
        );
    }

    #[test]
    fn owner_ids_are_percent_encoded_as_one_segment() {
        let store = HttpStore::new("http://h").unwrap();
        let tasks = CollectionRef::tasks_of("a/b?x#y".into());
        assert_eq!(
            store.collection_url(&tasks).as_str(),
            "http://h/api/users/a%2Fb%3Fx%23y/tasks"
        );
        assert_eq!(
            store.endpoint(&tasks, &["stream"]).as_str(),
            "http://h/api/users/a%2Fb%3Fx%23y/tasks/stream"
        );
    }

    #[test]
    fn unusable_backend_urls_are_rejected() {
        assert!(matches!(HttpStore::new("not a url"), Err(StoreError::Unavailable(_))));
        assert!(matches!(HttpStore::new("mailto:ops@example.com"), Err(StoreError::Unavailable(_))));
    }
}
