//! Server-side document rules: what the store stamps on writes and how a
//! collection is ordered.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use shared::{fields, Document, Fields, UserId};
use uuid::Uuid;

pub fn timestamp(now: DateTime<Utc>) -> Value {
    Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// A new document for `owner`. The owner and both timestamps are set here
/// regardless of what the client sent.
pub fn stamp_new(owner: &UserId, mut data: Fields, now: DateTime<Utc>) -> Document {
    let stamp = timestamp(now);
    data.insert(fields::OWNER_ID.into(), Value::String(owner.to_string()));
    data.insert(fields::CREATED_AT.into(), stamp.clone());
    data.insert(fields::UPDATED_AT.into(), stamp);
    Document {
        id: Uuid::new_v4(),
        fields: data,
    }
}

/// Merges `patch` into `doc`. `ownerId` and `createdAt` never change;
/// `updatedAt` is always refreshed.
pub fn apply_patch(doc: &mut Document, patch: Fields, now: DateTime<Utc>) {
    for (key, value) in patch {
        if key == fields::OWNER_ID || key == fields::CREATED_AT || key == fields::UPDATED_AT {
            continue;
        }
        doc.fields.insert(key, value);
    }
    doc.fields.insert(fields::UPDATED_AT.into(), timestamp(now));
}

fn created_at(doc: &Document) -> Option<DateTime<Utc>> {
    doc.str_field(fields::CREATED_AT)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Sorts by `createdAt`, newest first. Expects `docs` in reverse insertion
/// order; the sort is stable, so equal timestamps keep the later insert
/// first.
pub fn newest_first(docs: &mut [Document]) {
    docs.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
}
